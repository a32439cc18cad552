//! Shopify HMAC-SHA256 signatures.
//!
//! Two encodings are in play:
//!
//! - Install and app-load redirects carry a hex digest in the `hmac` query
//!   parameter, computed over the remaining parameters sorted by key and
//!   joined as `key=value&key=value`.
//! - Webhooks carry a base64 digest of the raw request body in the
//!   `X-Shopify-Hmac-SHA256` header.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use super::constant_time_compare;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter holding the digest.
pub const HMAC_PARAM: &str = "hmac";

/// Signature verification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HmacError {
    #[error("missing hmac")]
    MissingHmac,
    #[error("hmac mismatch")]
    Mismatch,
    #[error("invalid hmac key")]
    InvalidKey,
}

/// Build the canonical signed message from query pairs.
///
/// Pairs are sorted by key (stable, so repeated keys keep their order) and the
/// `hmac` parameter is dropped.
#[must_use]
pub fn query_message(pairs: &[(String, String)]) -> String {
    let mut signed: Vec<&(String, String)> = pairs
        .iter()
        .filter(|(k, _)| k != HMAC_PARAM)
        .collect();
    signed.sort_by(|a, b| a.0.cmp(&b.0));

    signed
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn mac(secret: &str, message: &[u8]) -> Result<HmacSha256, HmacError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| HmacError::InvalidKey)?;
    mac.update(message);
    Ok(mac)
}

/// Hex digest for a set of query pairs.
///
/// # Errors
///
/// Returns `HmacError::InvalidKey` if the secret cannot key the MAC.
pub fn sign_query(pairs: &[(String, String)], secret: &str) -> Result<String, HmacError> {
    let message = query_message(pairs);
    Ok(hex::encode(mac(secret, message.as_bytes())?.finalize().into_bytes()))
}

/// Verify the `hmac` parameter of a Shopify-signed query string.
///
/// # Errors
///
/// Returns `HmacError::MissingHmac` if there is no `hmac` parameter and
/// `HmacError::Mismatch` if it does not match the computed digest.
pub fn verify_query(pairs: &[(String, String)], secret: &str) -> Result<(), HmacError> {
    let provided = pairs
        .iter()
        .find(|(k, _)| k == HMAC_PARAM)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
        .ok_or(HmacError::MissingHmac)?;

    let computed = sign_query(pairs, secret)?;

    if constant_time_compare(&computed, &provided.to_ascii_lowercase()) {
        Ok(())
    } else {
        Err(HmacError::Mismatch)
    }
}

/// Base64 digest of a webhook body.
///
/// # Errors
///
/// Returns `HmacError::InvalidKey` if the secret cannot key the MAC.
pub fn sign_webhook(body: &[u8], secret: &str) -> Result<String, HmacError> {
    Ok(base64::engine::general_purpose::STANDARD.encode(mac(secret, body)?.finalize().into_bytes()))
}

/// Verify a webhook body against its `X-Shopify-Hmac-SHA256` header value.
///
/// # Errors
///
/// Returns `HmacError::MissingHmac` if the header is absent or empty and
/// `HmacError::Mismatch` if it does not match the body.
pub fn verify_webhook(body: &[u8], provided: Option<&str>, secret: &str) -> Result<(), HmacError> {
    let provided = provided
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(HmacError::MissingHmac)?;

    let computed = sign_webhook(body, secret)?;

    if constant_time_compare(&computed, provided) {
        Ok(())
    } else {
        Err(HmacError::Mismatch)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "hush";

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn signed(items: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut p = pairs(items);
        let digest = sign_query(&p, SECRET).unwrap();
        p.push((HMAC_PARAM.to_string(), digest));
        p
    }

    #[test]
    fn test_query_message_sorts_and_excludes() {
        let p = pairs(&[
            ("timestamp", "1337178173"),
            ("shop", "foo.myshopify.com"),
            ("hmac", "abc"),
            ("code", "0907a61c0c8d55e99db179b68161bc00"),
            ("signature", "legacy"),
        ]);
        assert_eq!(
            query_message(&p),
            "code=0907a61c0c8d55e99db179b68161bc00&shop=foo.myshopify.com&signature=legacy&timestamp=1337178173"
        );
    }

    #[test]
    fn test_known_digest() {
        // Worked example from Shopify's OAuth documentation.
        let p = pairs(&[
            ("code", "0907a61c0c8d55e99db179b68161bc00"),
            ("shop", "some-shop.myshopify.com"),
            ("state", "0.6784241404160823"),
            ("timestamp", "1337178173"),
        ]);
        assert_eq!(
            sign_query(&p, SECRET).unwrap(),
            "700e2dadb827fcc8609e9d5ce208b2e9cdaab9df07390d2cbca10d7c328fc4bf"
        );
    }

    #[test]
    fn test_verify_query_accepts_valid() {
        let p = signed(&[("shop", "foo.myshopify.com"), ("timestamp", "1")]);
        assert_eq!(verify_query(&p, SECRET), Ok(()));
    }

    #[test]
    fn test_verify_query_order_independent() {
        let mut p = signed(&[("shop", "foo.myshopify.com"), ("timestamp", "1")]);
        p.reverse();
        assert_eq!(verify_query(&p, SECRET), Ok(()));
    }

    #[test]
    fn test_verify_query_rejects_tampering() {
        let original = signed(&[
            ("host", "YWRtaW4uc2hvcGlmeS5jb20vc3RvcmUvZm9v"),
            ("shop", "foo.myshopify.com"),
            ("timestamp", "1700000000"),
        ]);

        for index in 0..3 {
            let mut tampered = original.clone();
            if let Some((_, value)) = tampered.get_mut(index) {
                value.push('x');
            }
            assert_eq!(verify_query(&tampered, SECRET), Err(HmacError::Mismatch));
        }

        let mut added = original;
        added.push(("extra".to_string(), "1".to_string()));
        assert_eq!(verify_query(&added, SECRET), Err(HmacError::Mismatch));
    }

    #[test]
    fn test_verify_query_signature_param_is_signed() {
        let original = signed(&[
            ("shop", "foo.myshopify.com"),
            ("signature", "original"),
            ("timestamp", "1"),
        ]);
        assert_eq!(verify_query(&original, SECRET), Ok(()));

        let mut changed = original.clone();
        changed[1].1 = "attacker-controlled".to_string();
        assert_eq!(verify_query(&changed, SECRET), Err(HmacError::Mismatch));

        let mut unsigned = signed(&[("shop", "foo.myshopify.com"), ("timestamp", "1")]);
        unsigned.push(("signature".to_string(), "injected".to_string()));
        assert_eq!(verify_query(&unsigned, SECRET), Err(HmacError::Mismatch));
    }

    #[test]
    fn test_verify_query_wrong_secret() {
        let p = signed(&[("shop", "foo.myshopify.com")]);
        assert_eq!(verify_query(&p, "other"), Err(HmacError::Mismatch));
    }

    #[test]
    fn test_verify_query_missing_hmac() {
        let p = pairs(&[("shop", "foo.myshopify.com")]);
        assert_eq!(verify_query(&p, SECRET), Err(HmacError::MissingHmac));

        let empty = pairs(&[("shop", "foo.myshopify.com"), ("hmac", "")]);
        assert_eq!(verify_query(&empty, SECRET), Err(HmacError::MissingHmac));
    }

    #[test]
    fn test_verify_webhook() {
        let body = br#"{"id":1,"domain":"foo.myshopify.com"}"#;
        let digest = sign_webhook(body, SECRET).unwrap();

        assert_eq!(verify_webhook(body, Some(&digest), SECRET), Ok(()));
        assert_eq!(
            verify_webhook(b"{\"id\":2}", Some(&digest), SECRET),
            Err(HmacError::Mismatch)
        );
        assert_eq!(
            verify_webhook(body, None, SECRET),
            Err(HmacError::MissingHmac)
        );
    }
}

//! App Bridge session tokens.
//!
//! Every API call from the embedded frontend carries
//! `Authorization: Bearer <JWT>`, an HS256 token signed with the app secret.
//! Claims are fully validated before the shop is looked up, so a token for
//! another app never costs a database round trip.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use shop_tagger_core::{ShopDomain, ShopDomainError};
use thiserror::Error;
use tracing::instrument;

use crate::db::{RepositoryError, ShopStore};
use crate::models::Shop;

const BEARER_PREFIX: &str = "Bearer ";
const DEST_SCHEME: &str = "https://";

/// Claims minted by App Bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Shop admin URL, e.g. `https://foo.myshopify.com/admin`
    pub iss: String,
    /// Shop origin, e.g. `https://foo.myshopify.com`
    pub dest: String,
    /// App client ID
    pub aud: String,
    /// Shopify user ID
    pub sub: String,
    pub exp: i64,
    pub nbf: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
}

impl SessionClaims {
    /// Shop domain named by `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` is not `https://` followed by a valid
    /// shop domain.
    pub fn shop_domain(&self) -> Result<ShopDomain, SessionTokenError> {
        let host = self
            .dest
            .strip_prefix(DEST_SCHEME)
            .ok_or(SessionTokenError::InvalidDestination(None))?;
        ShopDomain::parse(host).map_err(|e| SessionTokenError::InvalidDestination(Some(e)))
    }
}

/// Reasons a session token is rejected.
#[derive(Debug, Error)]
pub enum SessionTokenError {
    #[error("missing bearer token")]
    Missing,
    #[error("malformed session token")]
    Malformed,
    #[error("invalid session token signature")]
    InvalidSignature,
    #[error("session token expired")]
    Expired,
    #[error("session token not yet valid")]
    NotYetValid,
    #[error("session token audience mismatch")]
    InvalidAudience,
    #[error("session token missing claim: {0}")]
    MissingClaim(String),
    #[error("session token issuer does not match destination")]
    IssuerMismatch,
    #[error("session token destination is not a shop domain")]
    InvalidDestination(#[source] Option<ShopDomainError>),
}

impl From<jsonwebtoken::errors::Error> for SessionTokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::MissingRequiredClaim(claim) => Self::MissingClaim(claim.clone()),
            _ => Self::Malformed,
        }
    }
}

/// Verifies App Bridge session tokens for this app.
#[derive(Clone)]
pub struct SessionTokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for SessionTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokenVerifier")
            .field("decoding_key", &"[REDACTED]")
            .field("audience", &self.validation.aud)
            .finish()
    }
}

impl SessionTokenVerifier {
    /// Create a verifier for tokens addressed to `api_key`.
    #[must_use]
    pub fn new(api_key: &str, api_secret: &SecretString) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[api_key]);
        validation.set_required_spec_claims(&["exp", "nbf", "aud", "iss", "sub"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = 0;

        Self {
            decoding_key: DecodingKey::from_secret(api_secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Verify signature and claims.
    ///
    /// # Errors
    ///
    /// Returns `SessionTokenError` for any signature or claim failure.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionTokenError> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)?.claims;

        if claims.iss.is_empty() {
            return Err(SessionTokenError::MissingClaim("iss".to_string()));
        }
        if claims.sub.is_empty() {
            return Err(SessionTokenError::MissingClaim("sub".to_string()));
        }
        if claims.dest.is_empty() || !claims.iss.contains(&claims.dest) {
            return Err(SessionTokenError::IssuerMismatch);
        }

        Ok(claims)
    }
}

/// Extract the token from an `Authorization` header value.
///
/// # Errors
///
/// Returns `SessionTokenError::Missing` if the header is absent, not a
/// bearer credential, or empty.
pub fn bearer_token(header: Option<&str>) -> Result<&str, SessionTokenError> {
    header
        .and_then(|h| h.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(SessionTokenError::Missing)
}

/// Failure to resolve a session token to a shop.
#[derive(Debug, Error)]
pub enum SessionAuthError {
    #[error(transparent)]
    Token(#[from] SessionTokenError),
    #[error("unknown shop: {0}")]
    UnknownShop(ShopDomain),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Resolve an `Authorization` header to the shop it was minted for.
///
/// # Errors
///
/// Returns `SessionAuthError::Token` when the token is rejected (the store is
/// not consulted), `UnknownShop` when no row exists for the domain.
#[instrument(skip_all)]
pub async fn authenticate<S: ShopStore>(
    verifier: &SessionTokenVerifier,
    store: &S,
    authorization: Option<&str>,
) -> Result<Shop, SessionAuthError> {
    let token = bearer_token(authorization)?;
    let claims = verifier.verify(token)?;
    let domain = claims.shop_domain()?;

    store
        .find_by_domain(&domain)
        .await?
        .ok_or(SessionAuthError::UnknownShop(domain))
}

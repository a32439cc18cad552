//! Request verification extractors.
//!
//! Each extractor verifies a signature before exposing anything derived from
//! the request, so handlers only ever see authenticated shop domains.

use axum::{
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use secrecy::ExposeSecret;
use shop_tagger_core::ShopDomain;
use tracing::debug;

use crate::auth::{authenticate, verify_query, verify_webhook};
use crate::error::{AppError, set_sentry_shop};
use crate::models::Shop;
use crate::state::AppState;

/// Largest webhook body accepted (uninstall payloads are a few KB).
const MAX_WEBHOOK_BODY: usize = 256 * 1024;

pub const HMAC_HEADER: &str = "x-shopify-hmac-sha256";
pub const SHOP_DOMAIN_HEADER: &str = "x-shopify-shop-domain";
pub const TOPIC_HEADER: &str = "x-shopify-topic";

/// A Shopify-signed query string with a valid `shop` parameter.
///
/// Rejects with 401 if the `hmac` is missing or wrong and 400 if `shop` is
/// missing or not a `*.myshopify.com` domain.
#[derive(Debug, Clone)]
pub struct VerifiedShopQuery {
    pub shop: ShopDomain,
    pub params: Vec<(String, String)>,
}

impl VerifiedShopQuery {
    /// First value of a query parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// A parameter the request cannot proceed without.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` if the parameter is absent or empty.
    pub fn require(&self, key: &str) -> Result<&str, AppError> {
        self.param(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::BadRequest(format!("missing {key} parameter")))
    }
}

impl FromRequestParts<AppState> for VerifiedShopQuery {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        verify_query(&params, state.config().shopify.api_secret.expose_secret())?;

        let raw = params
            .iter()
            .find(|(k, _)| k == "shop")
            .map(|(_, v)| v.as_str())
            .ok_or_else(|| AppError::BadRequest("missing shop parameter".to_string()))?;
        let shop = ShopDomain::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))?;

        Ok(Self { shop, params })
    }
}

/// A webhook whose body HMAC verified.
///
/// The shop domain header is parsed only after the signature checks out.
#[derive(Debug, Clone)]
pub struct ShopifyWebhook {
    pub shop: ShopDomain,
    pub topic: Option<String>,
    pub body: Bytes,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl FromRequest<AppState> for ShopifyWebhook {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();
        let body = axum::body::to_bytes(body, MAX_WEBHOOK_BODY)
            .await
            .map_err(|e| AppError::BadRequest(format!("unreadable webhook body: {e}")))?;

        verify_webhook(
            &body,
            header(&parts.headers, HMAC_HEADER),
            state.config().shopify.api_secret.expose_secret(),
        )?;

        let raw = header(&parts.headers, SHOP_DOMAIN_HEADER)
            .ok_or_else(|| AppError::BadRequest("missing shop domain header".to_string()))?;
        let shop = ShopDomain::parse(raw).map_err(|e| AppError::BadRequest(e.to_string()))?;
        let topic = header(&parts.headers, TOPIC_HEADER).map(str::to_string);

        debug!(shop = %shop, topic = ?topic, "Verified webhook");
        Ok(Self { shop, topic, body })
    }
}

/// The properly installed shop named by the request's session token.
///
/// Rejects with 401 for any token failure or unknown shop and 403 when the
/// shop exists but has been uninstalled.
#[derive(Debug, Clone)]
pub struct SessionShop(pub Shop);

impl FromRequestParts<AppState> for SessionShop {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let authorization = header(&parts.headers, AUTHORIZATION.as_str());
        let shop = authenticate(state.session_verifier(), state.shops(), authorization).await?;

        if shop.is_not_properly_installed() {
            return Err(AppError::Forbidden(
                "Shop doesn't exist or isn't installed".to_string(),
            ));
        }

        set_sentry_shop(shop.domain.as_str());
        Ok(Self(shop))
    }
}

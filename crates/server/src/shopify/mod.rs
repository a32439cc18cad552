//! Shopify Admin API access for installed shops.
//!
//! # Architecture
//!
//! - [`ShopifyClient`] talks to `https://{shop}/admin/...` with `reqwest`,
//!   one client for every shop; the per-shop access token is passed per call
//! - [`ShopifyPlatform`] is the slice of the API the install flow needs, so
//!   the flow can run against an in-memory platform in tests
//! - Catalog reads and writes (REST products, GraphQL tags/types/collections)
//!   live in [`catalog`]

mod catalog;
mod client;
pub mod types;

use std::future::Future;

use secrecy::SecretString;
use shop_tagger_core::{ShopDomain, WebhookId};
use thiserror::Error;

pub use catalog::{CatalogError, ProductFilters, normalize_tags};
pub use client::ShopifyClient;
pub use types::*;

/// Topic of the only webhook the app subscribes to.
pub const APP_UNINSTALLED_TOPIC: &str = "app/uninstalled";

/// Errors that can occur when interacting with Shopify.
#[derive(Debug, Error)]
pub enum ShopifyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// OAuth token exchange failed.
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limited by Shopify.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Authentication/authorization failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success status.
    #[error("Shopify returned {status}: {body}")]
    Api { status: u16, body: String },

    /// A request URL could not be built.
    #[error("Invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    /// GraphQL query returned errors.
    #[error("GraphQL errors: {}", .0.join("; "))]
    GraphQL(Vec<String>),
}

/// The Shopify operations the install flow depends on.
pub trait ShopifyPlatform: Send + Sync {
    /// Exchange an authorization code for an offline access token.
    fn exchange_code(
        &self,
        shop: &ShopDomain,
        code: &str,
    ) -> impl Future<Output = Result<AccessToken, ShopifyError>> + Send;

    /// Scopes actually granted to the token.
    fn access_scopes(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> impl Future<Output = Result<Vec<String>, ShopifyError>> + Send;

    /// Shop name, owner and contact email.
    fn shop_details(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> impl Future<Output = Result<ShopDetails, ShopifyError>> + Send;

    /// First webhook subscribed to `topic`, if any.
    fn find_webhook(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: &str,
    ) -> impl Future<Output = Result<Option<Webhook>, ShopifyError>> + Send;

    fn create_webhook(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: &str,
        address: &str,
    ) -> impl Future<Output = Result<Webhook, ShopifyError>> + Send;

    fn update_webhook_address(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        id: WebhookId,
        address: &str,
    ) -> impl Future<Output = Result<Webhook, ShopifyError>> + Send;

    fn delete_webhook(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        id: WebhookId,
    ) -> impl Future<Output = Result<(), ShopifyError>> + Send;
}

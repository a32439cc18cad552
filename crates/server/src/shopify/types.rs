//! Shopify API types.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use shop_tagger_core::{ProductId, WebhookId};

/// Offline access token returned by the OAuth code exchange.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub access_token: SecretString,
    /// Comma-separated scopes granted with the token.
    pub scope: String,
}

/// Subset of `shop.json` the app stores.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ShopDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub shop_owner: String,
}

/// A webhook subscription.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Webhook {
    pub id: WebhookId,
    pub topic: String,
    pub address: String,
    #[serde(default)]
    pub format: String,
}

/// A product as returned by the REST API.
///
/// Only the fields the app reads are typed; the rest pass through to the
/// frontend untouched.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Product {
    pub id: ProductId,
    #[serde(default)]
    pub title: String,
    /// Comma-separated tag list.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub product_type: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Cursor-based pagination from the REST `Link` header.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PageInfo {
    /// `page_info` cursor of the next page.
    pub next: Option<String>,
    /// `page_info` cursor of the previous page.
    pub previous: Option<String>,
}

/// One page of products.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub page_info: PageInfo,
}

/// A collection as listed in the filter sidebar.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CollectionSummary {
    /// GraphQL global ID (`gid://shopify/Collection/...`).
    pub id: String,
    pub title: String,
    pub handle: String,
}

// =============================================================================
// REST envelopes
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccessScopesResponse {
    pub access_scopes: Vec<AccessScope>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AccessScope {
    pub handle: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ShopResponse {
    pub shop: ShopDetails,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WebhooksResponse {
    pub webhooks: Vec<Webhook>,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct WebhookEnvelope<T> {
    pub webhook: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProductsResponse {
    pub products: Vec<Product>,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct ProductEnvelope<T> {
    pub product: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CountResponse {
    pub count: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_product_keeps_unknown_fields() {
        let json = r#"{
            "id": 632910392,
            "title": "IPod Nano - 8GB",
            "tags": "Emotive, Flash Memory",
            "product_type": "Cult Products",
            "vendor": "Apple",
            "variants": [{"id": 808950810}]
        }"#;

        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.id, ProductId::new(632_910_392));
        assert_eq!(product.tags, "Emotive, Flash Memory");
        assert_eq!(product.extra.get("vendor").unwrap(), "Apple");

        let back = serde_json::to_value(&product).unwrap();
        assert_eq!(back["variants"][0]["id"], 808_950_810);
    }

    #[test]
    fn test_product_page_serializes_camel_case() {
        let page = ProductPage {
            products: vec![],
            page_info: PageInfo {
                next: Some("abc".to_string()),
                previous: None,
            },
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["pageInfo"]["next"], "abc");
        assert!(json["pageInfo"]["previous"].is_null());
    }
}

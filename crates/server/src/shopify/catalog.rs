//! Product catalog reads and edits for the embedded UI.
//!
//! Listing, counting and editing go through REST; distinct tags, product
//! types and collections come from GraphQL.

use reqwest::Method;
use reqwest::header::LINK;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use shop_tagger_core::{ProductId, ShopDomain};
use thiserror::Error;
use tracing::instrument;

use super::client::ShopifyClient;
use super::types::{
    CollectionSummary, CountResponse, PageInfo, Product, ProductEnvelope, ProductPage,
    ProductsResponse,
};
use super::ShopifyError;

/// Shopify's per-request ceiling for `limit` and `first`.
const MAX_PAGE_SIZE: u32 = 250;

/// Rejected catalog edits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Duplicate tag: {0}")]
    DuplicateTag(String),
}

/// Query parameters accepted by the product list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilters {
    /// Cursor from a previous page's `pageInfo`.
    pub page_info: Option<String>,
    pub limit: Option<u32>,
    pub product_type: Option<String>,
    pub vendor: Option<String>,
    pub collection_id: Option<i64>,
    pub title: Option<String>,
}

impl ProductFilters {
    /// Filter pairs, excluding paging.
    fn filter_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = non_empty(self.product_type.as_deref()) {
            pairs.push(("product_type", v.to_string()));
        }
        if let Some(v) = non_empty(self.vendor.as_deref()) {
            pairs.push(("vendor", v.to_string()));
        }
        if let Some(id) = self.collection_id {
            pairs.push(("collection_id", id.to_string()));
        }
        if let Some(v) = non_empty(self.title.as_deref()) {
            pairs.push(("title", v.to_string()));
        }
        pairs
    }

    /// Query string for `products.json`.
    ///
    /// Shopify rejects any parameter other than `limit` alongside
    /// `page_info`, so filters are only sent for the first page.
    fn list_query(&self, default_limit: u32) -> Vec<(&'static str, String)> {
        let limit = self.limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_SIZE);
        let mut pairs = vec![("limit", limit.to_string())];

        if let Some(cursor) = non_empty(self.page_info.as_deref()) {
            pairs.push(("page_info", cursor.to_string()));
            return pairs;
        }

        pairs.push(("published_status", "any".to_string()));
        pairs.extend(self.filter_pairs());
        pairs
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Normalize a comma-separated tag list.
///
/// Entries are trimmed and empty ones dropped. Shopify treats tags
/// case-insensitively, so `Sale` and `sale` count as duplicates.
///
/// # Errors
///
/// Returns `CatalogError::DuplicateTag` naming the first repeated tag.
pub fn normalize_tags(input: &str) -> Result<String, CatalogError> {
    let mut seen: Vec<String> = Vec::new();
    let mut tags: Vec<&str> = Vec::new();

    for tag in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let key = tag.to_lowercase();
        if seen.contains(&key) {
            return Err(CatalogError::DuplicateTag(tag.to_string()));
        }
        seen.push(key);
        tags.push(tag);
    }

    Ok(tags.join(", "))
}

/// Extract `page_info` cursors from a REST `Link` header.
///
/// ```text
/// <https://foo.myshopify.com/admin/api/2025-01/products.json?limit=50&page_info=abc>; rel="next"
/// ```
#[must_use]
pub(crate) fn parse_link_header(value: &str) -> PageInfo {
    let mut page_info = PageInfo::default();

    for link in value.split(',') {
        let mut parts = link.split(';').map(str::trim);
        let Some(target) = parts
            .next()
            .and_then(|t| t.strip_prefix('<'))
            .and_then(|t| t.strip_suffix('>'))
        else {
            continue;
        };

        let Some(rel) = parts.find_map(|p| p.strip_prefix("rel=")) else {
            continue;
        };

        let Some(cursor) = url::Url::parse(target).ok().and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "page_info")
                .map(|(_, v)| v.into_owned())
        }) else {
            continue;
        };

        match rel.trim_matches('"') {
            "next" => page_info.next = Some(cursor),
            "previous" => page_info.previous = Some(cursor),
            _ => {}
        }
    }

    page_info
}

fn with_query(base: &str, pairs: &[(&'static str, String)]) -> Result<String, ShopifyError> {
    let mut url = url::Url::parse(base).map_err(|source| ShopifyError::InvalidUrl {
        url: base.to_string(),
        source,
    })?;
    if !pairs.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())));
    }
    Ok(url.into())
}

// =============================================================================
// GraphQL
// =============================================================================

#[derive(Debug, Serialize)]
struct FirstVariables {
    first: u32,
}

#[derive(Debug, Deserialize)]
struct StringNodes {
    nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductTagsData {
    product_tags: StringNodes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductTypesData {
    product_types: StringNodes,
}

#[derive(Debug, Deserialize)]
struct CollectionNodes {
    nodes: Vec<CollectionSummary>,
}

#[derive(Debug, Deserialize)]
struct CollectionsData {
    collections: CollectionNodes,
}

const PRODUCT_TAGS_QUERY: &str =
    "query ProductTags($first: Int!) { productTags(first: $first) { nodes } }";
const PRODUCT_TYPES_QUERY: &str =
    "query ProductTypes($first: Int!) { productTypes(first: $first) { nodes } }";
const COLLECTIONS_QUERY: &str = "query Collections($first: Int!) { \
     collections(first: $first, sortKey: TITLE) { nodes { id title handle } } }";

#[derive(Serialize)]
struct ProductTagsUpdate<'a> {
    id: ProductId,
    tags: &'a str,
}

#[derive(Serialize)]
struct ProductTypeUpdate<'a> {
    id: ProductId,
    product_type: &'a str,
}

impl ShopifyClient {
    /// Execute a GraphQL query against the shop's Admin API.
    async fn graphql<T: DeserializeOwned>(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        query: &'static str,
        operation_name: &'static str,
    ) -> Result<T, ShopifyError> {
        let url = self.admin_url(shop, "graphql.json");
        let body = graphql_client::QueryBody {
            variables: FirstVariables {
                first: MAX_PAGE_SIZE,
            },
            query,
            operation_name,
        };

        let response: graphql_client::Response<T> =
            self.send_json(Method::POST, &url, token, &body).await?;

        if let Some(errors) = response.errors
            && !errors.is_empty()
        {
            return Err(ShopifyError::GraphQL(
                errors.into_iter().map(|e| e.message).collect(),
            ));
        }

        response
            .data
            .ok_or_else(|| ShopifyError::GraphQL(vec!["No data in response".to_string()]))
    }

    /// One page of products with cursors for its neighbours.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails or returns an error response.
    #[instrument(skip(self, token), fields(shop = %shop))]
    pub async fn list_products(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        filters: &ProductFilters,
        default_limit: u32,
    ) -> Result<ProductPage, ShopifyError> {
        let url = with_query(
            &self.admin_url(shop, "products.json"),
            &filters.list_query(default_limit),
        )?;

        let response = self.send::<()>(Method::GET, &url, token, None).await?;
        let page_info = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .map(parse_link_header)
            .unwrap_or_default();
        let body: ProductsResponse = response.json().await?;

        Ok(ProductPage {
            products: body.products,
            page_info,
        })
    }

    /// Number of products matching the filters (paging fields are ignored).
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails or returns an error response.
    #[instrument(skip(self, token), fields(shop = %shop))]
    pub async fn count_products(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        filters: &ProductFilters,
    ) -> Result<u64, ShopifyError> {
        let url = with_query(
            &self.admin_url(shop, "products/count.json"),
            &filters.filter_pairs(),
        )?;
        let body: CountResponse = self.get_json(&url, token).await?;
        Ok(body.count)
    }

    /// A single product.
    ///
    /// # Errors
    ///
    /// Returns `ShopifyError::NotFound` if the product does not exist.
    #[instrument(skip(self, token), fields(shop = %shop, product_id = %id))]
    pub async fn get_product(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        id: ProductId,
    ) -> Result<Product, ShopifyError> {
        let url = self.admin_url(shop, &format!("products/{id}.json"));
        let body: ProductEnvelope<Product> = self.get_json(&url, token).await?;
        Ok(body.product)
    }

    /// Replace a product's tags; returns the tags Shopify stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails or returns an error response.
    #[instrument(skip(self, token), fields(shop = %shop, product_id = %id))]
    pub async fn update_product_tags(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        id: ProductId,
        tags: &str,
    ) -> Result<String, ShopifyError> {
        let url = self.admin_url(shop, &format!("products/{id}.json"));
        let body = ProductEnvelope {
            product: ProductTagsUpdate { id, tags },
        };
        let updated: ProductEnvelope<Product> =
            self.send_json(Method::PUT, &url, token, &body).await?;
        Ok(updated.product.tags)
    }

    /// Change a product's type; returns the type Shopify stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails or returns an error response.
    #[instrument(skip(self, token), fields(shop = %shop, product_id = %id))]
    pub async fn update_product_type(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        id: ProductId,
        product_type: &str,
    ) -> Result<String, ShopifyError> {
        let url = self.admin_url(shop, &format!("products/{id}.json"));
        let body = ProductEnvelope {
            product: ProductTypeUpdate { id, product_type },
        };
        let updated: ProductEnvelope<Product> =
            self.send_json(Method::PUT, &url, token, &body).await?;
        Ok(updated.product.product_type)
    }

    /// Every distinct product tag in the shop (first 250).
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails or GraphQL reports errors.
    #[instrument(skip(self, token), fields(shop = %shop))]
    pub async fn product_tags(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> Result<Vec<String>, ShopifyError> {
        let data: ProductTagsData = self
            .graphql(shop, token, PRODUCT_TAGS_QUERY, "ProductTags")
            .await?;
        Ok(data.product_tags.nodes)
    }

    /// Every distinct product type in the shop (first 250).
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails or GraphQL reports errors.
    #[instrument(skip(self, token), fields(shop = %shop))]
    pub async fn product_types(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> Result<Vec<String>, ShopifyError> {
        let data: ProductTypesData = self
            .graphql(shop, token, PRODUCT_TYPES_QUERY, "ProductTypes")
            .await?;
        Ok(data
            .product_types
            .nodes
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect())
    }

    /// Collections sorted by title (first 250).
    ///
    /// # Errors
    ///
    /// Returns an error if the API request fails or GraphQL reports errors.
    #[instrument(skip(self, token), fields(shop = %shop))]
    pub async fn collections(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> Result<Vec<CollectionSummary>, ShopifyError> {
        let data: CollectionsData = self
            .graphql(shop, token, COLLECTIONS_QUERY, "Collections")
            .await?;
        Ok(data.collections.nodes)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_with_query_rejects_unparseable_base() {
        let err = with_query("not a url", &[("limit", "5".to_string())]).unwrap_err();
        assert!(matches!(err, ShopifyError::InvalidUrl { ref url, .. } if url == "not a url"));
    }

    #[test]
    fn test_normalize_tags() {
        assert_eq!(
            normalize_tags(" Summer , sale,,  new arrival ").as_deref(),
            Ok("Summer, sale, new arrival")
        );
        assert_eq!(normalize_tags("").as_deref(), Ok(""));
        assert_eq!(normalize_tags(" , ").as_deref(), Ok(""));
    }

    #[test]
    fn test_normalize_tags_rejects_duplicates() {
        let err = normalize_tags("sale, Summer, Sale").unwrap_err();
        assert_eq!(err, CatalogError::DuplicateTag("Sale".to_string()));
        assert_eq!(err.to_string(), "Duplicate tag: Sale");
    }

    #[test]
    fn test_parse_link_header_both() {
        let header = "<https://foo.myshopify.com/admin/api/2025-01/products.json?limit=50&page_info=prevCursor>; rel=\"previous\", \
                      <https://foo.myshopify.com/admin/api/2025-01/products.json?limit=50&page_info=nextCursor>; rel=\"next\"";
        let info = parse_link_header(header);
        assert_eq!(info.next.as_deref(), Some("nextCursor"));
        assert_eq!(info.previous.as_deref(), Some("prevCursor"));
    }

    #[test]
    fn test_parse_link_header_next_only_and_garbage() {
        let info = parse_link_header(
            "<https://foo.myshopify.com/admin/api/2025-01/products.json?page_info=abc%3D>; rel=\"next\"",
        );
        assert_eq!(info.next.as_deref(), Some("abc="));
        assert_eq!(info.previous, None);

        assert_eq!(parse_link_header("garbage"), PageInfo::default());
    }

    #[test]
    fn test_list_query_first_page_sends_filters() {
        let filters = ProductFilters {
            vendor: Some("Acme".to_string()),
            collection_id: Some(841_564_295),
            title: Some("  ".to_string()),
            ..ProductFilters::default()
        };
        let query = filters.list_query(50);
        assert_eq!(
            query,
            vec![
                ("limit", "50".to_string()),
                ("published_status", "any".to_string()),
                ("vendor", "Acme".to_string()),
                ("collection_id", "841564295".to_string()),
            ]
        );
    }

    #[test]
    fn test_list_query_with_cursor_sends_only_limit() {
        let filters = ProductFilters {
            page_info: Some("nextCursor".to_string()),
            limit: Some(1000),
            vendor: Some("Acme".to_string()),
            ..ProductFilters::default()
        };
        assert_eq!(
            filters.list_query(50),
            vec![
                ("limit", "250".to_string()),
                ("page_info", "nextCursor".to_string()),
            ]
        );
    }

    #[test]
    fn test_with_query_encodes() {
        let url = with_query(
            "https://foo.myshopify.com/admin/api/2025-01/products.json",
            &[("title", "Tee & Tank".to_string())],
        )
        .unwrap_or_default();
        assert_eq!(
            url,
            "https://foo.myshopify.com/admin/api/2025-01/products.json?title=Tee+%26+Tank"
        );
    }
}

//! Catalog API for the embedded UI.
//!
//! Every handler takes a [`SessionShop`], so requests are authenticated by
//! session token and the shop is known to be properly installed.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shop_tagger_core::ProductId;
use tracing::{info, instrument};

use crate::error::AppError;
use crate::middleware::SessionShop;
use crate::shopify::{CollectionSummary, ProductFilters, ProductPage, normalize_tags};
use crate::state::AppState;

/// Routes mounted under `/shop`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/count", get(count_products))
        .route("/products/tags", get(product_tags))
        .route("/products/editTag", post(edit_tag))
        .route("/products/editProductType", post(edit_product_type))
        .route("/products/{id}", get(show_product))
        .route("/productTypes", get(product_types))
        .route("/collections", get(collections))
}

#[instrument(skip_all, fields(shop = %shop.domain))]
async fn list_products(
    State(state): State<AppState>,
    SessionShop(shop): SessionShop,
    Query(filters): Query<ProductFilters>,
) -> Result<Json<ProductPage>, AppError> {
    let page = state
        .shopify()
        .list_products(
            &shop.domain,
            &shop.access_token,
            &filters,
            state.config().page_limit,
        )
        .await?;
    Ok(Json(page))
}

#[instrument(skip_all, fields(shop = %shop.domain))]
async fn count_products(
    State(state): State<AppState>,
    SessionShop(shop): SessionShop,
    Query(filters): Query<ProductFilters>,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state
        .shopify()
        .count_products(&shop.domain, &shop.access_token, &filters)
        .await?;
    Ok(Json(json!({ "count": count })))
}

#[instrument(skip_all, fields(shop = %shop.domain, product_id = id))]
async fn show_product(
    State(state): State<AppState>,
    SessionShop(shop): SessionShop,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let product = state
        .shopify()
        .get_product(&shop.domain, &shop.access_token, ProductId::new(id))
        .await?;
    Ok(Json(json!({ "product": product })))
}

#[instrument(skip_all, fields(shop = %shop.domain))]
async fn product_tags(
    State(state): State<AppState>,
    SessionShop(shop): SessionShop,
) -> Result<Json<serde_json::Value>, AppError> {
    let tags = state
        .shopify()
        .product_tags(&shop.domain, &shop.access_token)
        .await?;
    Ok(Json(json!({ "tags": tags })))
}

#[instrument(skip_all, fields(shop = %shop.domain))]
async fn product_types(
    State(state): State<AppState>,
    SessionShop(shop): SessionShop,
) -> Result<Json<serde_json::Value>, AppError> {
    let types = state
        .shopify()
        .product_types(&shop.domain, &shop.access_token)
        .await?;
    Ok(Json(json!({ "productTypes": types })))
}

#[derive(Debug, Serialize)]
struct CollectionsResponse {
    collections: Vec<CollectionSummary>,
}

#[instrument(skip_all, fields(shop = %shop.domain))]
async fn collections(
    State(state): State<AppState>,
    SessionShop(shop): SessionShop,
) -> Result<Json<CollectionsResponse>, AppError> {
    let collections = state
        .shopify()
        .collections(&shop.domain, &shop.access_token)
        .await?;
    Ok(Json(CollectionsResponse { collections }))
}

#[derive(Debug, Deserialize)]
struct EditTagRequest {
    id: ProductId,
    /// Comma-separated; an empty string clears all tags.
    tags: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EditTagResponse {
    new_tags: String,
}

#[instrument(skip_all, fields(shop = %shop.domain, product_id = %body.id))]
async fn edit_tag(
    State(state): State<AppState>,
    SessionShop(shop): SessionShop,
    Json(body): Json<EditTagRequest>,
) -> Result<Json<EditTagResponse>, AppError> {
    let tags = normalize_tags(&body.tags)?;

    let new_tags = state
        .shopify()
        .update_product_tags(&shop.domain, &shop.access_token, body.id, &tags)
        .await?;

    info!("Product tags updated");
    Ok(Json(EditTagResponse { new_tags }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditProductTypeRequest {
    id: ProductId,
    product_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EditProductTypeResponse {
    new_product_type: String,
}

#[instrument(skip_all, fields(shop = %shop.domain, product_id = %body.id))]
async fn edit_product_type(
    State(state): State<AppState>,
    SessionShop(shop): SessionShop,
    Json(body): Json<EditProductTypeRequest>,
) -> Result<Json<EditProductTypeResponse>, AppError> {
    let new_product_type = state
        .shopify()
        .update_product_type(
            &shop.domain,
            &shop.access_token,
            body.id,
            body.product_type.trim(),
        )
        .await?;

    info!("Product type updated");
    Ok(Json(EditProductTypeResponse { new_product_type }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_requests_deserialize() {
        let tag: EditTagRequest =
            serde_json::from_str(r#"{"id": 632910392, "tags": "sale, summer"}"#).unwrap();
        assert_eq!(tag.id, ProductId::new(632_910_392));
        assert_eq!(tag.tags, "sale, summer");

        let ty: EditProductTypeRequest =
            serde_json::from_str(r#"{"id": 1, "productType": "Shirts"}"#).unwrap();
        assert_eq!(ty.product_type, "Shirts");
    }

    #[test]
    fn test_edit_responses_serialize() {
        let json = serde_json::to_value(EditTagResponse {
            new_tags: "sale, summer".to_string(),
        })
        .unwrap();
        assert_eq!(json, json!({ "newTags": "sale, summer" }));

        let json = serde_json::to_value(EditProductTypeResponse {
            new_product_type: "Shirts".to_string(),
        })
        .unwrap();
        assert_eq!(json, json!({ "newProductType": "Shirts" }));
    }
}

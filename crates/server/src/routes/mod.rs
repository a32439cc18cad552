//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                       - Liveness check
//! GET  /health/ready                 - Readiness check (database)
//!
//! # Install (Shopify-signed query strings)
//! GET  /app                          - App load: serve the shell or start OAuth
//! GET  /auth/callback                - OAuth redirect target
//! GET  /credentials                  - App Bridge bootstrap values
//!
//! # Webhooks (HMAC-signed bodies)
//! POST /uninstall                    - app/uninstalled
//!
//! # Catalog API (session token)
//! GET  /shop/products                - Paginated product listing
//! GET  /shop/products/count          - Product count for the same filters
//! GET  /shop/products/tags           - All product tags in the shop
//! GET  /shop/products/{id}           - Single product
//! POST /shop/products/editTag        - Replace a product's tags
//! POST /shop/products/editProductType - Replace a product's type
//! GET  /shop/productTypes            - All product types in the shop
//! GET  /shop/collections             - Collections for the filter UI
//! ```

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

pub mod install;
pub mod products;

/// Build the application routes (health checks are added by [`crate::app`]).
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/app", get(install::app))
        .route("/auth/callback", get(install::callback))
        .route("/credentials", get(install::credentials))
        .route("/uninstall", post(install::uninstall))
        .nest("/shop", products::routes())
}

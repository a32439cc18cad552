//! Install, app-load, credentials and uninstall handlers.

use askama::Template;
use axum::{
    Json,
    extract::{Query, State},
    http::header,
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use shop_tagger_core::ShopDomain;
use tracing::{info, instrument, warn};

use crate::db::ShopStore;
use crate::error::AppError;
use crate::middleware::{ShopifyWebhook, VerifiedShopQuery};
use crate::services::{AppLoad, CallbackParams, InstallError};
use crate::state::AppState;

/// Embedded app shell; the catalog UI loads from `/static`.
#[derive(Template)]
#[template(path = "app.html")]
struct AppShellTemplate<'a> {
    api_key: &'a str,
    shop: &'a str,
    host: &'a str,
    page_limit: u32,
}

/// Frame ancestors allowed to embed the app for `shop`.
pub(crate) fn frame_ancestors(shop: &ShopDomain) -> String {
    format!("frame-ancestors https://{shop} https://admin.shopify.com")
}

/// App load from the Shopify admin.
///
/// Renders the app for a properly installed shop, otherwise starts OAuth.
#[instrument(skip(state, query), fields(shop = %query.shop))]
pub async fn app(
    State(state): State<AppState>,
    query: VerifiedShopQuery,
) -> Result<Response, AppError> {
    match state.install_flow().load(&query.shop).await? {
        AppLoad::Authorize { url } => Ok(Redirect::to(&url).into_response()),
        AppLoad::Serve(shop) => {
            let host = query
                .param("host")
                .filter(|h| !h.is_empty())
                .unwrap_or(&shop.host);
            let html = AppShellTemplate {
                api_key: &state.config().shopify.api_key,
                shop: shop.domain.as_str(),
                host,
                page_limit: state.config().page_limit,
            }
            .render()
            .map_err(|e| AppError::Internal(format!("template render failed: {e}")))?;

            Ok((
                [(header::CONTENT_SECURITY_POLICY, frame_ancestors(&shop.domain))],
                Html(html),
            )
                .into_response())
        }
    }
}

/// OAuth redirect target.
#[instrument(skip(state, query), fields(shop = %query.shop))]
pub async fn callback(
    State(state): State<AppState>,
    query: VerifiedShopQuery,
) -> Result<Redirect, AppError> {
    let params = CallbackParams {
        shop: query.shop.clone(),
        code: query.require("code")?.to_string(),
        state: query.require("state")?.to_string(),
        host: query.param("host").unwrap_or_default().to_string(),
    };

    let target = state.install_flow().complete(&params).await?;
    Ok(Redirect::to(&target))
}

#[derive(Debug, Deserialize)]
pub struct CredentialsQuery {
    shop: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    api_key: String,
    host: String,
}

/// App Bridge bootstrap values for an installed shop.
#[instrument(skip(state))]
pub async fn credentials(
    State(state): State<AppState>,
    Query(query): Query<CredentialsQuery>,
) -> Result<Json<Credentials>, AppError> {
    let raw = query
        .shop
        .ok_or_else(|| AppError::BadRequest("missing shop parameter".to_string()))?;
    let domain = ShopDomain::parse(&raw).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let shop = state
        .shops()
        .find_by_domain(&domain)
        .await?
        .filter(crate::models::Shop::is_properly_installed)
        .ok_or_else(|| AppError::NotFound(format!("shop {domain}")))?;

    Ok(Json(Credentials {
        api_key: state.config().shopify.api_key.clone(),
        host: shop.host,
    }))
}

/// `app/uninstalled` webhook.
#[instrument(skip(state, webhook), fields(shop = %webhook.shop))]
pub async fn uninstall(
    State(state): State<AppState>,
    webhook: ShopifyWebhook,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(topic) = webhook.topic.as_deref()
        && topic != crate::shopify::APP_UNINSTALLED_TOPIC
    {
        info!(topic, "Ignoring webhook for unexpected topic");
        return Ok(Json(serde_json::json!({})));
    }

    acknowledge_uninstall(state.install_flow().uninstall(&webhook.shop).await)
}

/// Shopify retries any non-2xx webhook response, so a shop with no record is
/// acknowledged rather than reported.
fn acknowledge_uninstall(
    result: Result<(), InstallError>,
) -> Result<Json<serde_json::Value>, AppError> {
    match result {
        Ok(()) => Ok(Json(serde_json::json!({}))),
        Err(InstallError::UnknownShop(shop)) => {
            warn!(shop = %shop, "Uninstall webhook for unknown shop");
            Ok(Json(serde_json::json!({})))
        }
        Err(e) => Err(e.into()),
    }
}

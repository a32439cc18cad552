//! Unified error handling for the app server.
//!
//! Every error reaches the frontend as `{"message": "..."}`; the embedded UI
//! matches on message text (e.g. `Duplicate tag:`).

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::auth::{HmacError, SessionAuthError};
use crate::db::RepositoryError;
use crate::services::InstallError;
use crate::shopify::{CatalogError, ShopifyError};

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Shopify API operation failed.
    #[error("Shopify error: {0}")]
    Shopify(#[from] ShopifyError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Signature, state or session token rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Shop is known but not usable.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<HmacError> for AppError {
    fn from(err: HmacError) -> Self {
        Self::Unauthorized(err.to_string())
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<SessionAuthError> for AppError {
    fn from(err: SessionAuthError) -> Self {
        match err {
            SessionAuthError::Token(e) => Self::Unauthorized(e.to_string()),
            SessionAuthError::UnknownShop(shop) => Self::Unauthorized(format!("unknown shop {shop}")),
            SessionAuthError::Repository(e) => Self::Database(e),
        }
    }
}

impl From<InstallError> for AppError {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::State(e) => Self::Unauthorized(e.to_string()),
            InstallError::Shopify { stage, source } => {
                tracing::warn!(%stage, error = %source, "Install step failed");
                Self::Shopify(source)
            }
            InstallError::Repository(e) => Self::Database(e),
            InstallError::UnknownShop(shop) => Self::NotFound(format!("shop {shop}")),
            InstallError::Transition(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log server errors with Sentry
        if matches!(
            self,
            Self::Database(_) | Self::Internal(_) | Self::Shopify(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Shopify(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Shopify(_) => "External service error".to_string(),
            _ => self.to_string(),
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// Tag Sentry events with the shop making the request.
pub fn set_sentry_shop(shop: &str) {
    sentry::configure_scope(|scope| {
        scope.set_tag("shop", shop);
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::StateError;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("shop foo.myshopify.com".to_string());
        assert_eq!(err.to_string(), "Not found: shop foo.myshopify.com");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_app_error_status_codes() {
        fn get_status(err: AppError) -> StatusCode {
            err.into_response().status()
        }

        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Unauthorized("test".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            get_status(AppError::Forbidden("test".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::BadRequest("test".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(AppError::Shopify(ShopifyError::RateLimited(2))),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_install_error_mapping() {
        assert!(matches!(
            AppError::from(InstallError::State(StateError::Mismatch)),
            AppError::Unauthorized(_)
        ));
        assert!(matches!(
            AppError::from(HmacError::Mismatch),
            AppError::Unauthorized(_)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_tag_message_reaches_client() {
        let response =
            AppError::from(CatalogError::DuplicateTag("sale".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("Duplicate tag: sale")
        );
    }

    #[tokio::test]
    async fn test_internal_details_hidden() {
        let response = AppError::Internal("connection string leaked".to_string()).into_response();
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
    }
}

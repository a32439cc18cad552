//! REST client for the Shopify Admin API.

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shop_tagger_core::{ShopDomain, WebhookId};
use tracing::instrument;

use super::types::{
    AccessScopesResponse, AccessToken, AccessTokenResponse, ShopDetails, ShopResponse, Webhook,
    WebhookEnvelope, WebhooksResponse,
};
use super::{ShopifyError, ShopifyPlatform};
use crate::config::ShopifyAppConfig;

const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";
const DEFAULT_RETRY_AFTER_SECS: u64 = 2;

/// Shopify Admin API client shared by all shops.
///
/// Cheap to clone; the underlying `reqwest::Client` pools connections.
#[derive(Clone)]
pub struct ShopifyClient {
    inner: Arc<ShopifyClientInner>,
}

struct ShopifyClientInner {
    client: reqwest::Client,
    api_key: String,
    api_secret: SecretString,
    api_version: String,
}

impl std::fmt::Debug for ShopifyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyClient")
            .field("api_key", &self.inner.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("api_version", &self.inner.api_version)
            .finish()
    }
}

#[derive(Serialize)]
struct NewWebhook<'a> {
    topic: &'a str,
    address: &'a str,
    format: &'a str,
}

#[derive(Serialize)]
struct WebhookAddressUpdate<'a> {
    id: WebhookId,
    address: &'a str,
}

impl ShopifyClient {
    /// Create a new client from app credentials.
    #[must_use]
    pub fn new(config: &ShopifyAppConfig) -> Self {
        Self {
            inner: Arc::new(ShopifyClientInner {
                client: reqwest::Client::new(),
                api_key: config.api_key.clone(),
                api_secret: config.api_secret.clone(),
                api_version: config.api_version.clone(),
            }),
        }
    }

    /// Versioned Admin API URL, e.g. `https://foo.myshopify.com/admin/api/2025-01/shop.json`.
    pub(crate) fn admin_url(&self, shop: &ShopDomain, path: &str) -> String {
        format!(
            "https://{shop}/admin/api/{}/{path}",
            self.inner.api_version
        )
    }

    /// Send an authenticated request and map non-success statuses to errors.
    pub(crate) async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        token: &SecretString,
        body: Option<&B>,
    ) -> Result<Response, ShopifyError> {
        let mut request = self
            .inner
            .client
            .request(method, url)
            .header(ACCESS_TOKEN_HEADER, token.expose_secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        check_status(request.send().await?, url).await
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        token: &SecretString,
    ) -> Result<T, ShopifyError> {
        let response = self.send::<()>(Method::GET, url, token, None).await?;
        Ok(response.json().await?)
    }

    pub(crate) async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        token: &SecretString,
        body: &B,
    ) -> Result<T, ShopifyError> {
        let response = self.send(method, url, token, Some(body)).await?;
        Ok(response.json().await?)
    }
}

/// Round a `Retry-After` value up to whole seconds.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn whole_seconds(secs: f64) -> u64 {
    secs.ceil().max(0.0) as u64
}

/// Map a Shopify response status to a `ShopifyError`.
async fn check_status(response: Response, url: &str) -> Result<Response, ShopifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok())
                .map_or(DEFAULT_RETRY_AFTER_SECS, whole_seconds);
            Err(ShopifyError::RateLimited(retry_after))
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ShopifyError::Unauthorized(
            "Invalid or revoked access token".to_string(),
        )),
        StatusCode::NOT_FOUND => Err(ShopifyError::NotFound(url.to_string())),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(ShopifyError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

impl ShopifyPlatform for ShopifyClient {
    #[instrument(skip(self, code), fields(shop = %shop))]
    async fn exchange_code(&self, shop: &ShopDomain, code: &str) -> Result<AccessToken, ShopifyError> {
        let url = format!("https://{shop}/admin/oauth/access_token");

        let params = [
            ("client_id", self.inner.api_key.as_str()),
            ("client_secret", self.inner.api_secret.expose_secret()),
            ("code", code),
        ];

        let response = self.inner.client.post(&url).form(&params).send().await?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ShopifyError::OAuth(format!("Token exchange failed: {text}")));
        }

        let token: AccessTokenResponse = response.json().await?;
        if token.access_token.is_empty() {
            return Err(ShopifyError::OAuth(
                "Token exchange returned no access token".to_string(),
            ));
        }

        Ok(AccessToken {
            access_token: SecretString::from(token.access_token),
            scope: token.scope,
        })
    }

    #[instrument(skip(self, token), fields(shop = %shop))]
    async fn access_scopes(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> Result<Vec<String>, ShopifyError> {
        // Unversioned endpoint
        let url = format!("https://{shop}/admin/oauth/access_scopes.json");
        let response: AccessScopesResponse = self.get_json(&url, token).await?;
        Ok(response
            .access_scopes
            .into_iter()
            .map(|s| s.handle)
            .collect())
    }

    #[instrument(skip(self, token), fields(shop = %shop))]
    async fn shop_details(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
    ) -> Result<ShopDetails, ShopifyError> {
        let url = self.admin_url(shop, "shop.json");
        let response: ShopResponse = self.get_json(&url, token).await?;
        Ok(response.shop)
    }

    #[instrument(skip(self, token), fields(shop = %shop))]
    async fn find_webhook(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: &str,
    ) -> Result<Option<Webhook>, ShopifyError> {
        let url = format!(
            "{}?topic={}",
            self.admin_url(shop, "webhooks.json"),
            urlencoding::encode(topic)
        );
        let response: WebhooksResponse = self.get_json(&url, token).await?;
        Ok(response.webhooks.into_iter().find(|w| w.topic == topic))
    }

    #[instrument(skip(self, token), fields(shop = %shop))]
    async fn create_webhook(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        topic: &str,
        address: &str,
    ) -> Result<Webhook, ShopifyError> {
        let url = self.admin_url(shop, "webhooks.json");
        let body = WebhookEnvelope {
            webhook: NewWebhook {
                topic,
                address,
                format: "json",
            },
        };
        let created: WebhookEnvelope<Webhook> =
            self.send_json(Method::POST, &url, token, &body).await?;
        Ok(created.webhook)
    }

    #[instrument(skip(self, token), fields(shop = %shop, webhook_id = %id))]
    async fn update_webhook_address(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        id: WebhookId,
        address: &str,
    ) -> Result<Webhook, ShopifyError> {
        let url = self.admin_url(shop, &format!("webhooks/{id}.json"));
        let body = WebhookEnvelope {
            webhook: WebhookAddressUpdate { id, address },
        };
        let updated: WebhookEnvelope<Webhook> =
            self.send_json(Method::PUT, &url, token, &body).await?;
        Ok(updated.webhook)
    }

    #[instrument(skip(self, token), fields(shop = %shop, webhook_id = %id))]
    async fn delete_webhook(
        &self,
        shop: &ShopDomain,
        token: &SecretString,
        id: WebhookId,
    ) -> Result<(), ShopifyError> {
        let url = self.admin_url(shop, &format!("webhooks/{id}.json"));
        self.send::<()>(Method::DELETE, &url, token, None).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client() -> ShopifyClient {
        ShopifyClient::new(&ShopifyAppConfig {
            api_key: "test_api_key".to_string(),
            api_secret: SecretString::from("shpss_not_logged"),
            api_version: "2025-01".to_string(),
            scopes: "read_products".to_string(),
            app_handle: "shop-tagger".to_string(),
        })
    }

    #[test]
    fn test_admin_url() {
        let shop = ShopDomain::parse("foo.myshopify.com").unwrap();
        assert_eq!(
            client().admin_url(&shop, "products/count.json"),
            "https://foo.myshopify.com/admin/api/2025-01/products/count.json"
        );
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(whole_seconds(2.0), 2);
        assert_eq!(whole_seconds(0.4), 1);
        assert_eq!(whole_seconds(-3.0), 0);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", client());
        assert!(debug.contains("test_api_key"));
        assert!(!debug.contains("shpss_not_logged"));
    }

    #[test]
    fn test_webhook_bodies() {
        let create = serde_json::to_value(WebhookEnvelope {
            webhook: NewWebhook {
                topic: "app/uninstalled",
                address: "https://tagger.example.app/uninstall",
                format: "json",
            },
        })
        .unwrap();
        assert_eq!(create["webhook"]["topic"], "app/uninstalled");
        assert_eq!(create["webhook"]["format"], "json");

        let update = serde_json::to_value(WebhookEnvelope {
            webhook: WebhookAddressUpdate {
                id: WebhookId::new(4_759_306),
                address: "https://tagger.example.app/uninstall",
            },
        })
        .unwrap();
        assert_eq!(update["webhook"]["id"], 4_759_306);
    }
}

//! OAuth installation orchestration.
//!
//! Drives a shop through [`InstallStage`]:
//!
//! ```text
//! app load ──► PendingAuthorization ──callback──► TokenExchanged ──► WebhookRegistered
//!                                                                        │
//!                          redirect into app ◄── Installed ◄── ShopPersisted
//! ```
//!
//! The callback is not transactional across Shopify and the database. If a
//! step after webhook registration fails and this run created the webhook,
//! the webhook is deleted again (best effort). Callbacks for one shop are
//! serialized by [`InstallLocks`].

use secrecy::SecretString;
use shop_tagger_core::{InstallStage, InvalidTransition, ShopDomain, WebhookId};
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::install_cache::{InstallCache, InstallLocks, StateError};
use crate::config::AppConfig;
use crate::db::{RepositoryError, ShopStore};
use crate::models::{NewShop, Shop};
use crate::shopify::{APP_UNINSTALLED_TOPIC, ShopifyError, ShopifyPlatform, Webhook};

/// Install flow failures.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("invalid OAuth state: {0}")]
    State(#[from] StateError),

    #[error("Shopify request failed at {stage}: {source}")]
    Shopify {
        stage: InstallStage,
        source: ShopifyError,
    },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("unknown shop: {0}")]
    UnknownShop(ShopDomain),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl InstallError {
    fn shopify(stage: InstallStage) -> impl FnOnce(ShopifyError) -> Self {
        move |source| Self::Shopify { stage, source }
    }
}

/// App URLs and OAuth parameters derived from configuration.
#[derive(Debug, Clone)]
pub struct InstallSettings {
    pub api_key: String,
    /// Public base URL without trailing slash.
    pub app_url: String,
    pub scopes: String,
    pub app_handle: String,
}

impl InstallSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            api_key: config.shopify.api_key.clone(),
            app_url: config.app_url.clone(),
            scopes: config.shopify.scopes.clone(),
            app_handle: config.shopify.app_handle.clone(),
        }
    }

    /// OAuth callback URL registered with Shopify.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.app_url)
    }

    /// Address the `app/uninstalled` webhook must point at.
    #[must_use]
    pub fn uninstall_address(&self) -> String {
        format!("{}/uninstall", self.app_url)
    }

    /// Shopify authorization URL for an offline-token grant.
    #[must_use]
    pub fn authorize_url(&self, shop: &ShopDomain, state: &str) -> String {
        format!(
            "https://{shop}/admin/oauth/authorize?client_id={}&scope={}&redirect_uri={}&state={}&grant_options[]=",
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&self.scopes),
            urlencoding::encode(&self.redirect_uri()),
            urlencoding::encode(state)
        )
    }

    /// Embedded app URL inside the shop's admin.
    #[must_use]
    pub fn app_redirect(&self, shop: &ShopDomain) -> String {
        format!("https://{shop}/admin/apps/{}", self.app_handle)
    }
}

/// Outcome of an app-load request.
#[derive(Debug)]
pub enum AppLoad {
    /// Shop is properly installed; render the app.
    Serve(Shop),
    /// Send the merchant to Shopify to authorize.
    Authorize { url: String },
}

/// Verified parameters of an OAuth callback.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    pub shop: ShopDomain,
    pub code: String,
    pub state: String,
    /// Base64 admin host, kept for App Bridge.
    pub host: String,
}

/// What [`ensure_uninstall_webhook`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Created(Webhook),
    Updated(Webhook),
    Unchanged(Webhook),
}

impl WebhookOutcome {
    /// ID of a webhook created by this call.
    #[must_use]
    pub const fn created_id(&self) -> Option<WebhookId> {
        match self {
            Self::Created(w) => Some(w.id),
            Self::Updated(_) | Self::Unchanged(_) => None,
        }
    }

    #[must_use]
    pub const fn webhook(&self) -> &Webhook {
        match self {
            Self::Created(w) | Self::Updated(w) | Self::Unchanged(w) => w,
        }
    }
}

/// Make sure exactly one `app/uninstalled` webhook points at `address`.
///
/// # Errors
///
/// Returns `ShopifyError` if any webhook API call fails.
#[instrument(skip(platform, token), fields(shop = %shop))]
pub async fn ensure_uninstall_webhook<P: ShopifyPlatform>(
    platform: &P,
    shop: &ShopDomain,
    token: &SecretString,
    address: &str,
) -> Result<WebhookOutcome, ShopifyError> {
    match platform.find_webhook(shop, token, APP_UNINSTALLED_TOPIC).await? {
        None => {
            let webhook = platform
                .create_webhook(shop, token, APP_UNINSTALLED_TOPIC, address)
                .await?;
            info!(webhook_id = %webhook.id, "Registered uninstall webhook");
            Ok(WebhookOutcome::Created(webhook))
        }
        Some(existing) if existing.address != address => {
            let webhook = platform
                .update_webhook_address(shop, token, existing.id, address)
                .await?;
            info!(
                webhook_id = %webhook.id,
                old_address = %existing.address,
                "Updated stale uninstall webhook address"
            );
            Ok(WebhookOutcome::Updated(webhook))
        }
        Some(existing) => Ok(WebhookOutcome::Unchanged(existing)),
    }
}

/// The install flow bound to its collaborators.
pub struct InstallFlow<'a, S, P> {
    pub store: &'a S,
    pub platform: &'a P,
    pub cache: &'a InstallCache,
    pub locks: &'a InstallLocks,
    pub settings: &'a InstallSettings,
}

impl<S: ShopStore, P: ShopifyPlatform> InstallFlow<'_, S, P> {
    /// Handle a verified app-load request.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::Repository` if the shop lookup fails.
    #[instrument(skip(self), fields(shop = %shop))]
    pub async fn load(&self, shop: &ShopDomain) -> Result<AppLoad, InstallError> {
        let existing = self.store.find_by_domain(shop).await?;

        let stage = match existing {
            Some(found) if found.is_properly_installed() => return Ok(AppLoad::Serve(found)),
            Some(found) => found.stage(),
            None => InstallStage::NotInstalled,
        };
        stage.advance(InstallStage::PendingAuthorization)?;

        let state = self.cache.begin(shop, &self.settings.scopes).await;
        info!(from = %stage, "Starting OAuth authorization");

        Ok(AppLoad::Authorize {
            url: self.settings.authorize_url(shop, &state),
        })
    }

    /// Complete a verified OAuth callback and return the redirect target.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::State` before any Shopify call if `state` does
    /// not match the pending handshake; otherwise the error of the first
    /// failing step.
    #[instrument(skip(self, params), fields(shop = %params.shop))]
    pub async fn complete(&self, params: &CallbackParams) -> Result<String, InstallError> {
        let shop = &params.shop;
        let _guard = self.locks.acquire(shop).await;

        self.cache.verify_state(shop, &params.state).await?;

        if let Some(existing) = self.store.find_by_domain(shop).await?
            && existing.is_properly_installed()
        {
            info!("Shop already installed; skipping token exchange");
            return Ok(self.settings.app_redirect(shop));
        }

        let mut stage = InstallStage::PendingAuthorization;

        let token = self
            .platform
            .exchange_code(shop, &params.code)
            .await
            .map_err(InstallError::shopify(stage))?;
        stage = stage.advance(InstallStage::TokenExchanged)?;

        let webhook = ensure_uninstall_webhook(
            self.platform,
            shop,
            &token.access_token,
            &self.settings.uninstall_address(),
        )
        .await
        .map_err(InstallError::shopify(stage))?;
        stage = stage.advance(InstallStage::WebhookRegistered)?;

        let persisted = match self.persist(params, &token.access_token, stage).await {
            Ok(shop) => shop,
            Err(e) => {
                if let Some(id) = webhook.created_id() {
                    self.delete_created_webhook(shop, &token.access_token, id)
                        .await;
                }
                return Err(e);
            }
        };
        stage = stage.advance(InstallStage::ShopPersisted)?;

        let scopes = self
            .platform
            .access_scopes(shop, &token.access_token)
            .await
            .map_err(InstallError::shopify(stage))?;
        if !same_scopes(&token.scope, &scopes) {
            warn!(
                token_scope = %token.scope,
                granted = %scopes.join(","),
                "Token scope differs from granted access scopes"
            );
        }
        self.cache
            .record_granted_scopes(shop, scopes.join(","))
            .await;
        stage = stage.advance(InstallStage::Installed)?;

        info!(
            shop_id = %persisted.id,
            stage = %stage,
            scopes = %scopes.join(","),
            "Shop installed"
        );
        Ok(self.settings.app_redirect(shop))
    }

    async fn persist(
        &self,
        params: &CallbackParams,
        token: &SecretString,
        stage: InstallStage,
    ) -> Result<Shop, InstallError> {
        let details = self
            .platform
            .shop_details(&params.shop, token)
            .await
            .map_err(InstallError::shopify(stage))?;

        let shop = self
            .store
            .upsert_installed(&NewShop {
                domain: params.shop.clone(),
                shop_name: details.name,
                host: params.host.clone(),
                owner: details.shop_owner,
                email: details.email,
                access_token: token.clone(),
            })
            .await?;
        Ok(shop)
    }

    async fn delete_created_webhook(&self, shop: &ShopDomain, token: &SecretString, id: WebhookId) {
        match self.platform.delete_webhook(shop, token, id).await {
            Ok(()) => info!(webhook_id = %id, "Removed webhook created by failed install"),
            Err(e) => warn!(
                webhook_id = %id,
                error = %e,
                "Could not remove webhook created by failed install"
            ),
        }
    }

    /// Handle a verified `app/uninstalled` webhook.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::UnknownShop` if the shop has no record.
    #[instrument(skip(self), fields(shop = %shop))]
    pub async fn uninstall(&self, shop: &ShopDomain) -> Result<(), InstallError> {
        if !self.store.mark_uninstalled(shop).await? {
            return Err(InstallError::UnknownShop(shop.clone()));
        }
        self.cache.evict(shop).await;
        info!("Shop uninstalled");
        Ok(())
    }
}

/// Compare a comma-separated scope string with a scope list, ignoring order.
fn same_scopes(token_scope: &str, granted: &[String]) -> bool {
    let mut from_token: Vec<&str> = token_scope
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let mut listed: Vec<&str> = granted.iter().map(String::as_str).collect();
    from_token.sort_unstable();
    listed.sort_unstable();
    from_token == listed
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_same_scopes_ignores_order() {
        let granted = vec!["write_products".to_string(), "read_products".to_string()];
        assert!(same_scopes("read_products,write_products", &granted));
        assert!(same_scopes("read_products, write_products", &granted));
        assert!(!same_scopes("read_products", &granted));
        assert!(!same_scopes("", &granted));
    }

    fn settings() -> InstallSettings {
        InstallSettings {
            api_key: "test_api_key".to_string(),
            app_url: "https://tagger.example.app".to_string(),
            scopes: "read_products,write_products".to_string(),
            app_handle: "shop-tagger".to_string(),
        }
    }

    #[test]
    fn test_authorize_url() {
        let shop = ShopDomain::parse("foo.myshopify.com").unwrap();
        assert_eq!(
            settings().authorize_url(&shop, "nonce123"),
            "https://foo.myshopify.com/admin/oauth/authorize?client_id=test_api_key\
             &scope=read_products%2Cwrite_products\
             &redirect_uri=https%3A%2F%2Ftagger.example.app%2Fauth%2Fcallback\
             &state=nonce123&grant_options[]="
        );
    }

    #[test]
    fn test_derived_urls() {
        let shop = ShopDomain::parse("foo.myshopify.com").unwrap();
        let s = settings();
        assert_eq!(s.redirect_uri(), "https://tagger.example.app/auth/callback");
        assert_eq!(s.uninstall_address(), "https://tagger.example.app/uninstall");
        assert_eq!(
            s.app_redirect(&shop),
            "https://foo.myshopify.com/admin/apps/shop-tagger"
        );
    }

    #[test]
    fn test_webhook_outcome_created_id() {
        let webhook = Webhook {
            id: WebhookId::new(9),
            topic: APP_UNINSTALLED_TOPIC.to_string(),
            address: "https://tagger.example.app/uninstall".to_string(),
            format: "json".to_string(),
        };
        assert_eq!(
            WebhookOutcome::Created(webhook.clone()).created_id(),
            Some(WebhookId::new(9))
        );
        assert_eq!(WebhookOutcome::Updated(webhook.clone()).created_id(), None);
        assert_eq!(WebhookOutcome::Unchanged(webhook).created_id(), None);
    }
}

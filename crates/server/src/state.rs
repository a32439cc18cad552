//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::SessionTokenVerifier;
use crate::config::AppConfig;
use crate::crypto::{CipherError, TokenCipher};
use crate::db::PgShopStore;
use crate::services::{InstallCache, InstallFlow, InstallLocks, InstallSettings};
use crate::shopify::ShopifyClient;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    pool: PgPool,
    shops: PgShopStore,
    shopify: ShopifyClient,
    install_cache: InstallCache,
    install_locks: InstallLocks,
    install_settings: InstallSettings,
    session_verifier: SessionTokenVerifier,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns `CipherError::InvalidKey` if `APP_KEY` is not a usable key.
    pub fn new(config: AppConfig, pool: PgPool) -> Result<Self, CipherError> {
        let cipher = TokenCipher::from_base64_key(&config.app_key)?;
        let shops = PgShopStore::new(pool.clone(), cipher);
        let shopify = ShopifyClient::new(&config.shopify);
        let install_cache = InstallCache::new(config.install_state_ttl);
        let install_settings = InstallSettings::from_config(&config);
        let session_verifier =
            SessionTokenVerifier::new(&config.shopify.api_key, &config.shopify.api_secret);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                shops,
                shopify,
                install_cache,
                install_locks: InstallLocks::new(),
                install_settings,
                session_verifier,
            }),
        })
    }

    /// Get a reference to the server configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get a reference to the shop repository.
    #[must_use]
    pub fn shops(&self) -> &PgShopStore {
        &self.inner.shops
    }

    /// Get a reference to the Shopify Admin API client.
    #[must_use]
    pub fn shopify(&self) -> &ShopifyClient {
        &self.inner.shopify
    }

    #[must_use]
    pub fn session_verifier(&self) -> &SessionTokenVerifier {
        &self.inner.session_verifier
    }

    /// The install flow wired to the live database and Shopify.
    #[must_use]
    pub fn install_flow(&self) -> InstallFlow<'_, PgShopStore, ShopifyClient> {
        InstallFlow {
            store: &self.inner.shops,
            platform: &self.inner.shopify,
            cache: &self.inner.install_cache,
            locks: &self.inner.install_locks,
            settings: &self.inner.install_settings,
        }
    }
}

//! Integration tests for shop-tagger.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory scenarios (no database or Shopify needed)
//! cargo test -p shop-tagger-integration-tests
//!
//! # Live checks against a running server
//! cargo test -p shop-tagger-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `install_flow` - OAuth install, reinstall and uninstall scenarios
//! - `session_auth` - Session token resolution against the shop store
//! - `live_server` - HTTP checks against a running server (ignored by default)
//!
//! This crate provides in-memory [`ShopStore`] and [`ShopifyPlatform`]
//! implementations that record how they were called.

#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use shop_tagger_core::{ShopDomain, ShopId, WebhookId};
use shop_tagger_server::db::{RepositoryError, ShopStore};
use shop_tagger_server::models::{NewShop, Shop};
use shop_tagger_server::services::{
    InstallCache, InstallFlow, InstallLocks, InstallSettings,
};
use shop_tagger_server::shopify::{
    AccessToken, ShopDetails, ShopifyError, ShopifyPlatform, Webhook,
};

pub const APP_URL: &str = "https://tagger.example.app";
pub const API_KEY: &str = "test_api_key";
pub const API_SECRET: &str = "shpss_integration_test_secret";
pub const SCOPES: &str = "read_products,write_products";

/// Parse a domain known to be valid.
pub fn domain(s: &str) -> ShopDomain {
    ShopDomain::parse(s).unwrap()
}

// =============================================================================
// Shop store
// =============================================================================

/// In-memory shop table.
#[derive(Debug, Default)]
pub struct FakeShopStore {
    shops: Mutex<HashMap<ShopDomain, Shop>>,
    next_id: AtomicI64,
    lookups: AtomicUsize,
    fail_upserts: AtomicBool,
}

impl FakeShopStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly.
    pub fn insert(&self, shop: Shop) {
        self.shops.lock().unwrap().insert(shop.domain.clone(), shop);
    }

    /// Current row for a domain.
    pub fn get(&self, domain: &ShopDomain) -> Option<Shop> {
        self.shops.lock().unwrap().get(domain).cloned()
    }

    /// Number of `find_by_domain` calls so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Make every subsequent upsert fail.
    pub fn fail_upserts(&self) {
        self.fail_upserts.store(true, Ordering::SeqCst);
    }

    /// A row the way it looks after an earlier install.
    pub fn installed_shop(domain: &ShopDomain, token: &str) -> Shop {
        let now = Utc::now();
        Shop {
            id: ShopId::new(1),
            domain: domain.clone(),
            shop_name: "Existing".to_string(),
            host: "YWRtaW4uc2hvcGlmeS5jb20vc3RvcmUvZm9v".to_string(),
            owner: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            is_installed: !token.is_empty(),
            access_token: SecretString::from(token),
            created_at: now,
            updated_at: now,
        }
    }
}

impl ShopStore for FakeShopStore {
    async fn find_by_domain(&self, domain: &ShopDomain) -> Result<Option<Shop>, RepositoryError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(domain))
    }

    async fn upsert_installed(&self, shop: &NewShop) -> Result<Shop, RepositoryError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(RepositoryError::DataCorruption("injected failure".to_string()));
        }

        let mut shops = self.shops.lock().unwrap();
        let now = Utc::now();
        let row = match shops.get(&shop.domain) {
            Some(existing) => Shop {
                shop_name: shop.shop_name.clone(),
                host: if shop.host.is_empty() {
                    existing.host.clone()
                } else {
                    shop.host.clone()
                },
                owner: shop.owner.clone(),
                email: shop.email.clone(),
                is_installed: true,
                access_token: shop.access_token.clone(),
                updated_at: now,
                ..existing.clone()
            },
            None => Shop {
                id: ShopId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
                domain: shop.domain.clone(),
                shop_name: shop.shop_name.clone(),
                host: shop.host.clone(),
                owner: shop.owner.clone(),
                email: shop.email.clone(),
                is_installed: true,
                access_token: shop.access_token.clone(),
                created_at: now,
                updated_at: now,
            },
        };
        shops.insert(row.domain.clone(), row.clone());
        Ok(row)
    }

    async fn mark_uninstalled(&self, domain: &ShopDomain) -> Result<bool, RepositoryError> {
        let mut shops = self.shops.lock().unwrap();
        Ok(shops.get_mut(domain).is_some_and(|shop| {
            shop.is_installed = false;
            shop.access_token = SecretString::from(String::new());
            true
        }))
    }

    async fn list(&self) -> Result<Vec<Shop>, RepositoryError> {
        let mut shops: Vec<Shop> = self.shops.lock().unwrap().values().cloned().collect();
        shops.sort_by(|a, b| a.domain.cmp(&b.domain));
        Ok(shops)
    }
}

// =============================================================================
// Shopify platform
// =============================================================================

/// In-memory Shopify: one webhook list per shop, tokens derived from codes.
#[derive(Debug, Default)]
pub struct FakePlatform {
    webhooks: Mutex<HashMap<ShopDomain, Vec<Webhook>>>,
    next_webhook_id: AtomicI64,
    exchanges: AtomicUsize,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    fail_exchange: AtomicBool,
}

impl FakePlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Token handed out for an authorization code.
    #[must_use]
    pub fn token_for(code: &str) -> String {
        format!("shpat_{code}")
    }

    /// Seed a webhook as if an earlier install had created it.
    pub fn seed_webhook(&self, shop: &ShopDomain, topic: &str, address: &str) -> WebhookId {
        let id = WebhookId::new(self.next_webhook_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.webhooks
            .lock()
            .unwrap()
            .entry(shop.clone())
            .or_default()
            .push(Webhook {
                id,
                topic: topic.to_string(),
                address: address.to_string(),
                format: "json".to_string(),
            });
        id
    }

    /// Webhooks currently registered for a shop.
    pub fn webhooks(&self, shop: &ShopDomain) -> Vec<Webhook> {
        self.webhooks
            .lock()
            .unwrap()
            .get(shop)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_exchange(&self) {
        self.fail_exchange.store(true, Ordering::SeqCst);
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl ShopifyPlatform for FakePlatform {
    async fn exchange_code(
        &self,
        _shop: &ShopDomain,
        code: &str,
    ) -> Result<AccessToken, ShopifyError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(ShopifyError::OAuth("invalid authorization code".to_string()));
        }
        Ok(AccessToken {
            access_token: SecretString::from(Self::token_for(code)),
            scope: SCOPES.to_string(),
        })
    }

    async fn access_scopes(
        &self,
        _shop: &ShopDomain,
        _token: &SecretString,
    ) -> Result<Vec<String>, ShopifyError> {
        Ok(SCOPES.split(',').map(str::to_string).collect())
    }

    async fn shop_details(
        &self,
        shop: &ShopDomain,
        _token: &SecretString,
    ) -> Result<ShopDetails, ShopifyError> {
        Ok(ShopDetails {
            name: format!("{} store", shop.handle()),
            email: format!("owner@{shop}"),
            shop_owner: "Grace".to_string(),
        })
    }

    async fn find_webhook(
        &self,
        shop: &ShopDomain,
        _token: &SecretString,
        topic: &str,
    ) -> Result<Option<Webhook>, ShopifyError> {
        Ok(self.webhooks(shop).into_iter().find(|w| w.topic == topic))
    }

    async fn create_webhook(
        &self,
        shop: &ShopDomain,
        _token: &SecretString,
        topic: &str,
        address: &str,
    ) -> Result<Webhook, ShopifyError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let id = self.seed_webhook(shop, topic, address);
        Ok(Webhook {
            id,
            topic: topic.to_string(),
            address: address.to_string(),
            format: "json".to_string(),
        })
    }

    async fn update_webhook_address(
        &self,
        shop: &ShopDomain,
        _token: &SecretString,
        id: WebhookId,
        address: &str,
    ) -> Result<Webhook, ShopifyError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut webhooks = self.webhooks.lock().unwrap();
        let webhook = webhooks
            .get_mut(shop)
            .and_then(|list| list.iter_mut().find(|w| w.id == id))
            .ok_or_else(|| ShopifyError::NotFound(format!("webhooks/{id}.json")))?;
        webhook.address = address.to_string();
        Ok(webhook.clone())
    }

    async fn delete_webhook(
        &self,
        shop: &ShopDomain,
        _token: &SecretString,
        id: WebhookId,
    ) -> Result<(), ShopifyError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if let Some(list) = self.webhooks.lock().unwrap().get_mut(shop) {
            list.retain(|w| w.id != id);
        }
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Everything an [`InstallFlow`] borrows, owned in one place.
pub struct Harness {
    pub store: FakeShopStore,
    pub platform: FakePlatform,
    pub cache: InstallCache,
    pub locks: InstallLocks,
    pub settings: InstallSettings,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: FakeShopStore::new(),
            platform: FakePlatform::new(),
            cache: InstallCache::new(Duration::from_secs(600)),
            locks: InstallLocks::new(),
            settings: InstallSettings {
                api_key: API_KEY.to_string(),
                app_url: APP_URL.to_string(),
                scopes: SCOPES.to_string(),
                app_handle: "shop-tagger".to_string(),
            },
        }
    }

    #[must_use]
    pub fn flow(&self) -> InstallFlow<'_, FakeShopStore, FakePlatform> {
        InstallFlow {
            store: &self.store,
            platform: &self.platform,
            cache: &self.cache,
            locks: &self.locks,
            settings: &self.settings,
        }
    }

    /// `{APP_URL}/uninstall`
    #[must_use]
    pub fn uninstall_address(&self) -> String {
        self.settings.uninstall_address()
    }
}

/// Value of a query parameter in an absolute URL.
pub fn query_param(url: &str, key: &str) -> Option<String> {
    url::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

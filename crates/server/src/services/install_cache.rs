//! Short-lived OAuth handshake state.
//!
//! Each shop in the middle of an install has one entry holding the scopes
//! requested and the anti-CSRF `state` nonce sent to Shopify. Entries expire
//! after `INSTALL_STATE_TTL_SECS`; a nonce is cleared the first time it
//! validates, so a replayed callback fails.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use moka::future::Cache;
use rand::Rng;
use rand::distr::Alphanumeric;
use shop_tagger_core::ShopDomain;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::auth::constant_time_compare;

const STATE_LENGTH: usize = 32;
const MAX_PENDING_INSTALLS: u64 = 10_000;

/// Install handshake data for one shop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallEntry {
    /// Requested scopes, replaced by the granted scopes once installed.
    pub scopes: String,
    /// Outstanding nonce; `None` once consumed.
    pub state: Option<String>,
}

/// OAuth `state` validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("no pending install for this shop (expired or never started)")]
    Missing,
    #[error("state does not match")]
    Mismatch,
}

/// Generate a random alphanumeric string.
fn generate_random_string(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// TTL-bounded store of install handshake entries keyed by shop domain.
#[derive(Clone)]
pub struct InstallCache {
    entries: Cache<ShopDomain, InstallEntry>,
}

impl std::fmt::Debug for InstallCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallCache")
            .field("entries", &self.entries.entry_count())
            .finish()
    }
}

impl InstallCache {
    /// Create a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(MAX_PENDING_INSTALLS)
            .time_to_live(ttl)
            .build();
        Self { entries }
    }

    /// Start a handshake: store `scopes` with a fresh nonce and return it.
    ///
    /// Replaces any earlier pending nonce for the shop.
    pub async fn begin(&self, shop: &ShopDomain, scopes: &str) -> String {
        let state = generate_random_string(STATE_LENGTH);
        self.entries
            .insert(
                shop.clone(),
                InstallEntry {
                    scopes: scopes.to_string(),
                    state: Some(state.clone()),
                },
            )
            .await;
        state
    }

    /// Check a callback's `state` and consume it on success.
    ///
    /// A mismatch leaves the pending nonce in place so the genuine callback
    /// can still complete.
    ///
    /// # Errors
    ///
    /// Returns `StateError::Missing` when there is no outstanding nonce and
    /// `StateError::Mismatch` when it differs.
    pub async fn verify_state(&self, shop: &ShopDomain, state: &str) -> Result<(), StateError> {
        let entry = self.entries.get(shop).await.ok_or(StateError::Missing)?;
        let expected = entry.state.as_deref().ok_or(StateError::Missing)?;

        if !constant_time_compare(expected, state) {
            return Err(StateError::Mismatch);
        }

        self.entries
            .insert(
                shop.clone(),
                InstallEntry {
                    scopes: entry.scopes,
                    state: None,
                },
            )
            .await;
        Ok(())
    }

    /// Replace the cached scopes with what Shopify actually granted.
    pub async fn record_granted_scopes(&self, shop: &ShopDomain, scopes: String) {
        self.entries
            .insert(shop.clone(), InstallEntry { scopes, state: None })
            .await;
    }

    /// Current entry for a shop, if it has not expired.
    pub async fn get(&self, shop: &ShopDomain) -> Option<InstallEntry> {
        self.entries.get(shop).await
    }

    /// Drop the shop's entry.
    pub async fn evict(&self, shop: &ShopDomain) {
        self.entries.invalidate(shop).await;
    }
}

/// Per-domain async locks serializing install callbacks for one shop.
///
/// Locks are held weakly; a domain's mutex is freed once no callback holds
/// or waits on it.
#[derive(Debug, Clone, Default)]
pub struct InstallLocks {
    locks: Arc<Mutex<HashMap<ShopDomain, Weak<tokio::sync::Mutex<()>>>>>,
}

impl InstallLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `shop`'s install flow.
    pub async fn acquire(&self, shop: &ShopDomain) -> OwnedMutexGuard<()> {
        let lock = {
            // A poisoned map only means another thread panicked mid-insert; the map is still usable.
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            locks.retain(|_, weak| weak.strong_count() > 0);

            if let Some(existing) = locks.get(shop).and_then(Weak::upgrade) {
                existing
            } else {
                let fresh = Arc::new(tokio::sync::Mutex::new(()));
                locks.insert(shop.clone(), Arc::downgrade(&fresh));
                fresh
            }
        };

        lock.lock_owned().await
    }

    /// Number of domains with a live lock.
    #[must_use]
    pub fn active(&self) -> usize {
        self.locks
            .lock()
            .map(|locks| locks.values().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shop() -> ShopDomain {
        ShopDomain::parse("foo.myshopify.com").unwrap()
    }

    #[test]
    fn test_generate_random_string() {
        let s = generate_random_string(STATE_LENGTH);
        assert_eq!(s.len(), STATE_LENGTH);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(s, generate_random_string(STATE_LENGTH));
    }

    #[tokio::test]
    async fn test_state_is_single_use() {
        let cache = InstallCache::new(Duration::from_secs(60));
        let state = cache.begin(&shop(), "read_products").await;

        assert_eq!(cache.verify_state(&shop(), &state).await, Ok(()));
        assert_eq!(
            cache.verify_state(&shop(), &state).await,
            Err(StateError::Missing)
        );
        // Scopes survive consumption.
        assert_eq!(cache.get(&shop()).await.unwrap().scopes, "read_products");
    }

    #[tokio::test]
    async fn test_mismatch_keeps_pending_state() {
        let cache = InstallCache::new(Duration::from_secs(60));
        let state = cache.begin(&shop(), "read_products").await;

        assert_eq!(
            cache.verify_state(&shop(), "forged").await,
            Err(StateError::Mismatch)
        );
        assert_eq!(cache.verify_state(&shop(), &state).await, Ok(()));
    }

    #[tokio::test]
    async fn test_unknown_shop_is_missing() {
        let cache = InstallCache::new(Duration::from_secs(60));
        assert_eq!(
            cache.verify_state(&shop(), "anything").await,
            Err(StateError::Missing)
        );
    }

    #[tokio::test]
    async fn test_new_begin_replaces_state() {
        let cache = InstallCache::new(Duration::from_secs(60));
        let first = cache.begin(&shop(), "read_products").await;
        let second = cache.begin(&shop(), "read_products").await;

        assert_eq!(
            cache.verify_state(&shop(), &first).await,
            Err(StateError::Mismatch)
        );
        assert_eq!(cache.verify_state(&shop(), &second).await, Ok(()));
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = InstallCache::new(Duration::from_millis(50));
        let state = cache.begin(&shop(), "read_products").await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            cache.verify_state(&shop(), &state).await,
            Err(StateError::Missing)
        );
    }

    #[tokio::test]
    async fn test_record_scopes_and_evict() {
        let cache = InstallCache::new(Duration::from_secs(60));
        cache
            .record_granted_scopes(&shop(), "read_products,write_products".to_string())
            .await;
        assert_eq!(
            cache.get(&shop()).await,
            Some(InstallEntry {
                scopes: "read_products,write_products".to_string(),
                state: None,
            })
        );

        cache.evict(&shop()).await;
        assert_eq!(cache.get(&shop()).await, None);
    }

    #[tokio::test]
    async fn test_locks_serialize_per_domain() {
        let locks = InstallLocks::new();
        let other = ShopDomain::parse("bar.myshopify.com").unwrap();

        let guard = locks.acquire(&shop()).await;
        // A different shop is not blocked.
        let other_guard = locks.acquire(&other).await;
        assert_eq!(locks.active(), 2);

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(&shop()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let second = tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
        drop(second);
        drop(other_guard);
        assert_eq!(locks.active(), 0);
    }
}

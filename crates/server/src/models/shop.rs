//! Shop domain types.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};

use shop_tagger_core::{InstallStage, ShopDomain, ShopId};

/// A shop that has installed the app at least once.
///
/// `access_token` is always plaintext here; the repository decrypts on read
/// and encrypts on write.
#[derive(Debug, Clone)]
pub struct Shop {
    /// Local row ID.
    pub id: ShopId,
    /// `*.myshopify.com` domain (unique, immutable).
    pub domain: ShopDomain,
    /// Display name from `shop.json`.
    pub shop_name: String,
    /// Base64 `host` parameter from the install redirect.
    pub host: String,
    /// Shop owner's name.
    pub owner: String,
    /// Shop contact email.
    pub email: String,
    /// Whether the app is currently installed.
    pub is_installed: bool,
    /// Offline Admin API access token; empty once uninstalled.
    pub access_token: SecretString,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shop {
    /// Installed with a usable access token.
    #[must_use]
    pub fn is_properly_installed(&self) -> bool {
        self.is_installed && !self.access_token.expose_secret().is_empty()
    }

    /// Negation of [`Shop::is_properly_installed`]; gates every API call.
    #[must_use]
    pub fn is_not_properly_installed(&self) -> bool {
        !self.is_properly_installed()
    }

    /// Install stage implied by this row.
    #[must_use]
    pub fn stage(&self) -> InstallStage {
        InstallStage::from_record(
            self.is_installed,
            !self.access_token.expose_secret().is_empty(),
        )
    }
}

/// Values written by a completed OAuth callback.
#[derive(Debug, Clone)]
pub struct NewShop {
    pub domain: ShopDomain,
    pub shop_name: String,
    pub host: String,
    pub owner: String,
    pub email: String,
    pub access_token: SecretString,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shop(is_installed: bool, token: &str) -> Shop {
        Shop {
            id: ShopId::new(1),
            domain: ShopDomain::parse("foo.myshopify.com").unwrap(),
            shop_name: "Foo".to_string(),
            host: String::new(),
            owner: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            is_installed,
            access_token: SecretString::from(token),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_is_not_properly_installed_truth_table() {
        assert!(!shop(true, "shpat_x").is_not_properly_installed());
        assert!(shop(true, "").is_not_properly_installed());
        assert!(shop(false, "shpat_x").is_not_properly_installed());
        assert!(shop(false, "").is_not_properly_installed());
    }

    #[test]
    fn test_stage() {
        assert_eq!(shop(true, "shpat_x").stage(), InstallStage::Installed);
        assert_eq!(shop(false, "").stage(), InstallStage::Uninstalled);
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", shop(true, "shpat_very_secret"));
        assert!(!debug.contains("shpat_very_secret"));
    }
}

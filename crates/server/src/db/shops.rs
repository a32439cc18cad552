//! Shop repository.
//!
//! Access tokens are encrypted immediately before they are written and
//! decrypted immediately after they are read; nothing outside this module
//! sees ciphertext.

use std::future::Future;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use sqlx::PgPool;
use tracing::{instrument, warn};

use shop_tagger_core::{ShopDomain, ShopId};

use super::RepositoryError;
use crate::crypto::TokenCipher;
use crate::models::{NewShop, Shop};

/// Persistence for [`Shop`] records.
///
/// Implemented by [`PgShopStore`]; tests substitute in-memory stores.
pub trait ShopStore: Send + Sync {
    /// Look up a shop by domain.
    fn find_by_domain(
        &self,
        domain: &ShopDomain,
    ) -> impl Future<Output = Result<Option<Shop>, RepositoryError>> + Send;

    /// Insert or update the shop keyed by domain, marking it installed.
    fn upsert_installed(
        &self,
        shop: &NewShop,
    ) -> impl Future<Output = Result<Shop, RepositoryError>> + Send;

    /// Set `is_installed = false` and clear the access token.
    ///
    /// Returns `false` if no row exists for the domain.
    fn mark_uninstalled(
        &self,
        domain: &ShopDomain,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// All shops, ordered by domain.
    fn list(&self) -> impl Future<Output = Result<Vec<Shop>, RepositoryError>> + Send;
}

// =============================================================================
// Internal Row Types
// =============================================================================

/// Internal row type for `shops` queries.
#[derive(Debug, sqlx::FromRow)]
struct ShopRow {
    id: i64,
    shopify_domain: String,
    shop_name: String,
    host: String,
    owner: String,
    email: String,
    is_installed: bool,
    access_token: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

const SHOP_COLUMNS: &str = "id, shopify_domain, shop_name, host, owner, email, is_installed, \
                            access_token, created_at, updated_at";

impl ShopRow {
    /// Ciphertext written to the `access_token` column for a new install.
    fn sealed_token(shop: &NewShop, cipher: &TokenCipher) -> Result<String, RepositoryError> {
        Ok(cipher.encrypt(&shop.access_token)?)
    }

    fn into_shop(self, cipher: &TokenCipher) -> Result<Shop, RepositoryError> {
        let domain = ShopDomain::parse(&self.shopify_domain).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid shop domain in database: {e}"))
        })?;

        // A token sealed under a rotated key reads back empty, which forces a reinstall.
        let access_token = cipher.decrypt(&self.access_token).unwrap_or_else(|e| {
            warn!(shop = %domain, error = %e, "Stored access token could not be decrypted");
            SecretString::from(String::new())
        });

        Ok(Shop {
            id: ShopId::new(self.id),
            domain,
            shop_name: self.shop_name,
            host: self.host,
            owner: self.owner,
            email: self.email,
            is_installed: self.is_installed,
            access_token,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// =============================================================================
// Repository
// =============================================================================

/// `PostgreSQL` implementation of [`ShopStore`].
#[derive(Debug, Clone)]
pub struct PgShopStore {
    pool: PgPool,
    cipher: TokenCipher,
}

impl PgShopStore {
    /// Create a new shop repository.
    #[must_use]
    pub const fn new(pool: PgPool, cipher: TokenCipher) -> Self {
        Self { pool, cipher }
    }
}

impl ShopStore for PgShopStore {
    #[instrument(skip(self), fields(shop = %domain))]
    async fn find_by_domain(&self, domain: &ShopDomain) -> Result<Option<Shop>, RepositoryError> {
        let row: Option<ShopRow> = sqlx::query_as(&format!(
            "SELECT {SHOP_COLUMNS} FROM shops WHERE shopify_domain = $1"
        ))
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_shop(&self.cipher)).transpose()
    }

    #[instrument(skip(self, shop), fields(shop = %shop.domain))]
    async fn upsert_installed(&self, shop: &NewShop) -> Result<Shop, RepositoryError> {
        let sealed = ShopRow::sealed_token(shop, &self.cipher)?;

        let row: ShopRow = sqlx::query_as(&format!(
            r"
            INSERT INTO shops (shopify_domain, shop_name, host, owner, email, is_installed, access_token)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6)
            ON CONFLICT (shopify_domain) DO UPDATE SET
                shop_name = EXCLUDED.shop_name,
                host = COALESCE(NULLIF(EXCLUDED.host, ''), shops.host),
                owner = EXCLUDED.owner,
                email = EXCLUDED.email,
                is_installed = TRUE,
                access_token = EXCLUDED.access_token,
                updated_at = NOW()
            RETURNING {SHOP_COLUMNS}
            "
        ))
        .bind(&shop.domain)
        .bind(&shop.shop_name)
        .bind(&shop.host)
        .bind(&shop.owner)
        .bind(&shop.email)
        .bind(&sealed)
        .fetch_one(&self.pool)
        .await?;

        row.into_shop(&self.cipher)
    }

    #[instrument(skip(self), fields(shop = %domain))]
    async fn mark_uninstalled(&self, domain: &ShopDomain) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE shops
            SET is_installed = FALSE, access_token = '', updated_at = NOW()
            WHERE shopify_domain = $1
            ",
        )
        .bind(domain)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<Shop>, RepositoryError> {
        let rows: Vec<ShopRow> = sqlx::query_as(&format!(
            "SELECT {SHOP_COLUMNS} FROM shops ORDER BY shopify_domain"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_shop(&self.cipher)).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use base64::Engine;
    use secrecy::ExposeSecret;

    fn cipher(byte: u8) -> TokenCipher {
        let key = base64::engine::general_purpose::STANDARD.encode([byte; 32]);
        TokenCipher::from_base64_key(&SecretString::from(key)).unwrap()
    }

    fn row(domain: &str, access_token: String) -> ShopRow {
        ShopRow {
            id: 7,
            shopify_domain: domain.to_string(),
            shop_name: "Foo".to_string(),
            host: "YWRtaW4uc2hvcGlmeS5jb20vc3RvcmUvZm9v".to_string(),
            owner: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            is_installed: true,
            access_token,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_decrypts_token() {
        let c = cipher(1);
        let sealed = c.encrypt(&SecretString::from("shpat_abc")).unwrap();

        let shop = row("foo.myshopify.com", sealed).into_shop(&c).unwrap();
        assert_eq!(shop.id, ShopId::new(7));
        assert_eq!(shop.access_token.expose_secret(), "shpat_abc");
        assert!(shop.is_properly_installed());
    }

    #[test]
    fn test_row_with_undecryptable_token_reads_empty() {
        let sealed = cipher(1).encrypt(&SecretString::from("shpat_abc")).unwrap();

        let shop = row("foo.myshopify.com", sealed).into_shop(&cipher(2)).unwrap();
        assert_eq!(shop.access_token.expose_secret(), "");
        assert!(shop.is_not_properly_installed());
    }

    #[test]
    fn test_sealed_token_is_ciphertext() {
        let c = cipher(1);
        let new_shop = NewShop {
            domain: ShopDomain::parse("foo.myshopify.com").unwrap(),
            shop_name: "Foo".to_string(),
            host: String::new(),
            owner: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            access_token: SecretString::from("shpat_abc"),
        };

        let sealed = ShopRow::sealed_token(&new_shop, &c).unwrap();
        assert!(!sealed.is_empty());
        assert!(!sealed.contains("shpat_abc"));
        assert_eq!(c.decrypt(&sealed).unwrap().expose_secret(), "shpat_abc");

        let shop = row("foo.myshopify.com", sealed).into_shop(&c).unwrap();
        assert_eq!(shop.access_token.expose_secret(), "shpat_abc");
    }

    #[test]
    fn test_row_with_bad_domain_is_corruption() {
        let result = row("foo.example.com", String::new()).into_shop(&cipher(1));
        assert!(matches!(result, Err(RepositoryError::DataCorruption(_))));
    }
}

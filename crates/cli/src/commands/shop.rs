//! Shop inspection commands.
//!
//! # Usage
//!
//! ```bash
//! tagger-cli shop list
//! tagger-cli shop token foo.myshopify.com
//! ```
//!
//! # Environment Variables
//!
//! Reads the same configuration as the server (`DATABASE_URL`, `APP_KEY`,
//! `SHOPIFY_*`, ...); `APP_KEY` is needed to decrypt stored access tokens.

use secrecy::ExposeSecret;
use shop_tagger_core::{ShopDomain, ShopDomainError};
use shop_tagger_server::config::{AppConfig, ConfigError};
use shop_tagger_server::crypto::{CipherError, TokenCipher};
use shop_tagger_server::db::{PgShopStore, RepositoryError, ShopStore, create_pool};
use shop_tagger_server::models::Shop;
use thiserror::Error;

/// Errors that can occur during shop commands.
#[derive(Debug, Error)]
pub enum ShopCommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Invalid APP_KEY: {0}")]
    Cipher(#[from] CipherError),

    #[error("Invalid shop domain: {0}")]
    Domain(#[from] ShopDomainError),

    #[error("No shop found for {0}")]
    NotFound(ShopDomain),

    #[error("{0} has no access token; it must be reinstalled")]
    NoToken(ShopDomain),
}

/// Load configuration and open the shop repository.
pub async fn open_store() -> Result<(AppConfig, PgShopStore), ShopCommandError> {
    let config = AppConfig::from_env()?;
    let cipher = TokenCipher::from_base64_key(&config.app_key)?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;

    Ok((config, PgShopStore::new(pool, cipher)))
}

/// Look up a shop that has a usable access token.
pub async fn find_with_token(
    store: &PgShopStore,
    domain: &str,
) -> Result<Shop, ShopCommandError> {
    let domain = ShopDomain::parse(domain)?;
    let shop = store
        .find_by_domain(&domain)
        .await?
        .ok_or_else(|| ShopCommandError::NotFound(domain.clone()))?;

    if shop.access_token.expose_secret().is_empty() {
        return Err(ShopCommandError::NoToken(domain));
    }
    Ok(shop)
}

fn format_row(shop: &Shop) -> String {
    format!(
        "{:<40} {:<14} {:<30} {}",
        shop.domain.as_str(),
        shop.stage().as_str(),
        shop.shop_name,
        shop.updated_at.format("%Y-%m-%d %H:%M"),
    )
}

/// List every shop with its install stage.
pub async fn list() -> Result<(), ShopCommandError> {
    let (_, store) = open_store().await?;
    let shops = store.list().await?;

    #[allow(clippy::print_stdout)]
    {
        println!("{:<40} {:<14} {:<30} UPDATED", "DOMAIN", "STAGE", "NAME");
        for shop in &shops {
            println!("{}", format_row(shop));
        }
    }

    tracing::info!(count = shops.len(), "Listed shops");
    Ok(())
}

/// Print a shop's decrypted access token.
pub async fn token(domain: &str) -> Result<(), ShopCommandError> {
    let (_, store) = open_store().await?;
    let shop = find_with_token(&store, domain).await?;

    tracing::warn!(shop = %shop.domain, "Printing plaintext access token");

    #[allow(clippy::print_stdout)]
    {
        println!("{}", shop.access_token.expose_secret());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;
    use shop_tagger_core::ShopId;

    use super::*;

    #[test]
    fn test_format_row() {
        let shop = Shop {
            id: ShopId::new(7),
            domain: ShopDomain::parse("foo.myshopify.com").unwrap(),
            shop_name: "Foo Goods".to_string(),
            host: String::new(),
            owner: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            is_installed: true,
            access_token: SecretString::from("shpat_abc"),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap(),
        };

        let row = format_row(&shop);
        assert!(row.starts_with("foo.myshopify.com"));
        assert!(row.contains("Foo Goods"));
        assert!(row.ends_with("2024-05-06 07:08"));
        assert!(!row.contains("shpat_abc"));
    }
}

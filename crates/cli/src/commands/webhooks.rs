//! Webhook maintenance commands.
//!
//! # Usage
//!
//! ```bash
//! # After changing APP_URL, repoint a shop's uninstall webhook
//! tagger-cli webhooks update foo.myshopify.com
//! ```

use shop_tagger_server::services::{InstallSettings, WebhookOutcome, ensure_uninstall_webhook};
use shop_tagger_server::shopify::{ShopifyClient, ShopifyError};
use thiserror::Error;

use super::shop::{ShopCommandError, find_with_token, open_store};

/// Errors that can occur during webhook commands.
#[derive(Debug, Error)]
pub enum WebhookCommandError {
    #[error(transparent)]
    Shop(#[from] ShopCommandError),

    #[error("Shopify error: {0}")]
    Shopify(#[from] ShopifyError),
}

/// Ensure the shop's `app/uninstalled` webhook points at `{APP_URL}/uninstall`.
pub async fn update(domain: &str) -> Result<(), WebhookCommandError> {
    let (config, store) = open_store().await?;
    let shop = find_with_token(&store, domain).await?;

    let settings = InstallSettings::from_config(&config);
    let client = ShopifyClient::new(&config.shopify);
    let address = settings.uninstall_address();

    let outcome =
        ensure_uninstall_webhook(&client, &shop.domain, &shop.access_token, &address).await?;

    let action = match &outcome {
        WebhookOutcome::Created(_) => "created",
        WebhookOutcome::Updated(_) => "updated",
        WebhookOutcome::Unchanged(_) => "already up to date",
    };
    tracing::info!(
        shop = %shop.domain,
        webhook_id = %outcome.webhook().id,
        address = %address,
        "Uninstall webhook {action}"
    );
    Ok(())
}

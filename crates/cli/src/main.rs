//! shop-tagger CLI - Database migrations and shop maintenance.
//!
//! # Usage
//!
//! ```bash
//! # Apply pending migrations
//! tagger-cli migrate run
//!
//! # Drop everything and migrate from scratch (refused in production without --force)
//! tagger-cli migrate fresh
//!
//! # List shops and their install status
//! tagger-cli shop list
//!
//! # Print a shop's decrypted access token
//! tagger-cli shop token foo.myshopify.com
//!
//! # Point the app/uninstalled webhook at the current APP_URL
//! tagger-cli webhooks update foo.myshopify.com
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tagger-cli")]
#[command(author, version, about = "shop-tagger CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Inspect installed shops
    Shop {
        #[command(subcommand)]
        action: ShopAction,
    },
    /// Manage Shopify webhook subscriptions
    Webhooks {
        #[command(subcommand)]
        action: WebhookAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Apply pending migrations
    Run,
    /// Drop all tables and re-run every migration
    Fresh {
        /// Allow running when `APP_ENV=production`
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ShopAction {
    /// List shops with install status
    List,
    /// Print the decrypted access token for a shop
    Token {
        /// Shop domain (`*.myshopify.com`)
        domain: String,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Create or repoint the `app/uninstalled` webhook
    Update {
        /// Shop domain (`*.myshopify.com`)
        domain: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate { action } => match action {
            MigrateAction::Run => commands::migrate::run().await?,
            MigrateAction::Fresh { force } => commands::migrate::fresh(force).await?,
        },
        Commands::Shop { action } => match action {
            ShopAction::List => commands::shop::list().await?,
            ShopAction::Token { domain } => commands::shop::token(&domain).await?,
        },
        Commands::Webhooks { action } => match action {
            WebhookAction::Update { domain } => commands::webhooks::update(&domain).await?,
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fresh_force() {
        let cli = Cli::try_parse_from(["tagger-cli", "migrate", "fresh", "--force"]);
        assert!(matches!(
            cli.map(|c| c.command),
            Ok(Commands::Migrate {
                action: MigrateAction::Fresh { force: true }
            })
        ));
    }

    #[test]
    fn test_shop_token_requires_domain() {
        assert!(Cli::try_parse_from(["tagger-cli", "shop", "token"]).is_err());
    }
}

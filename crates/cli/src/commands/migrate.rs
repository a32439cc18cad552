//! Database migration commands.
//!
//! # Usage
//!
//! ```bash
//! # Apply pending migrations
//! tagger-cli migrate run
//!
//! # Drop the shops table and migration ledger, then migrate from scratch
//! tagger-cli migrate fresh [--force]
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `APP_ENV` - `fresh` refuses to run when this is `production` unless
//!   `--force` is given
//!
//! Migrations live in `crates/server/migrations/` and are embedded at build
//! time.

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use thiserror::Error;

static MIGRATOR: Migrator = sqlx::migrate!("../server/migrations");

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Refusing to run a fresh migration in production; pass --force to override")]
    ProductionGuard,
}

/// Whether `fresh` may proceed in the environment named by `app_env`.
fn fresh_allowed(app_env: Option<&str>, force: bool) -> bool {
    force || !app_env.is_some_and(|env| env.eq_ignore_ascii_case("production"))
}

async fn connect() -> Result<PgPool, MigrationError> {
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| MigrationError::MissingEnvVar("DATABASE_URL"))?;

    tracing::info!("Connecting to database...");
    Ok(PgPool::connect(&database_url).await?)
}

/// Apply pending migrations.
pub async fn run() -> Result<(), MigrationError> {
    let pool = connect().await?;

    tracing::info!("Running migrations...");
    MIGRATOR.run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}

/// Drop all app tables and re-run every migration.
pub async fn fresh(force: bool) -> Result<(), MigrationError> {
    dotenvy::dotenv().ok();

    let app_env = std::env::var("APP_ENV").ok();
    if !fresh_allowed(app_env.as_deref(), force) {
        return Err(MigrationError::ProductionGuard);
    }

    let pool = connect().await?;

    tracing::warn!("Dropping shops table and migration history");
    let mut tx = pool.begin().await?;
    sqlx::query("DROP TABLE IF EXISTS shops")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DROP TABLE IF EXISTS _sqlx_migrations")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!("Running migrations...");
    MIGRATOR.run(&pool).await?;

    tracing::info!("Fresh migration complete!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_allowed_outside_production() {
        assert!(fresh_allowed(None, false));
        assert!(fresh_allowed(Some("development"), false));
        assert!(fresh_allowed(Some("staging"), false));
    }

    #[test]
    fn test_fresh_refused_in_production_without_force() {
        assert!(!fresh_allowed(Some("production"), false));
        assert!(!fresh_allowed(Some("PRODUCTION"), false));
        assert!(fresh_allowed(Some("production"), true));
    }

    #[test]
    fn test_migrations_are_embedded() {
        assert!(MIGRATOR.iter().any(|m| m.description.contains("create shops")));
    }
}

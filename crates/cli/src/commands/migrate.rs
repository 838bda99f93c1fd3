//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! canteen migrate
//! ```
//!
//! # Environment Variables
//!
//! - `REGISTRATION_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Registration migrations: `crates/registration/migrations/`

use canteen_registration::store::create_pool;
use canteen_registration::{ConfigError, RegistrationConfig};
use thiserror::Error;

/// Errors that can occur while migrating.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Run registration database migrations.
pub async fn run(config: &RegistrationConfig) -> Result<(), MigrationError> {
    let database_url = config.require_database_url()?;

    tracing::info!("Connecting to registration database...");
    let pool = create_pool(database_url).await?;

    tracing::info!("Running registration migrations...");
    sqlx::migrate!("../registration/migrations").run(&pool).await?;

    tracing::info!("Registration migrations complete!");
    Ok(())
}

//! `PostgreSQL` profile store.
//!
//! # Table: `registration.profile`
//!
//! One row per committed registration. The allocation rules are backed by
//! partial unique indexes:
//!
//! - `profile_single_admin` - at most one row with role `admin`
//! - `profile_vendor_shop` - at most one vendor row per `shop_id`
//!
//! # Migrations
//!
//! Migrations are stored in `crates/registration/migrations/` and run via:
//! ```bash
//! cargo run -p canteen-cli -- migrate
//! ```

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use canteen_core::{AccountId, Profile, Rejection};

use super::{Inserted, ProfileFilter, ProfileStore, StoreError};

const PROFILE_PKEY: &str = "profile_pkey";
const SINGLE_ADMIN_INDEX: &str = "profile_single_admin";
const VENDOR_SHOP_INDEX: &str = "profile_vendor_shop";

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// How a failed write should be reported.
enum WriteFailure {
    Duplicate,
    Rejected(Rejection),
    Other(sqlx::Error),
}

/// Classify a write error by the constraint it violated.
fn classify(err: sqlx::Error) -> WriteFailure {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            match db_err.constraint() {
                Some(PROFILE_PKEY) => return WriteFailure::Duplicate,
                Some(SINGLE_ADMIN_INDEX) => {
                    return WriteFailure::Rejected(Rejection::AdminExists);
                }
                Some(VENDOR_SHOP_INDEX) => return WriteFailure::Rejected(Rejection::ShopTaken),
                _ => {}
            }
        }
        if db_err.is_check_violation() {
            return WriteFailure::Rejected(Rejection::ShopRequired);
        }
    }
    WriteFailure::Other(err)
}

/// Profile store backed by `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database at `database_url`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the connection cannot be established.
    pub async fn connect(database_url: &SecretString) -> Result<Self, StoreError> {
        Ok(Self::new(create_pool(database_url).await?))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn get(&self, account_id: &AccountId) -> Result<Option<Profile>, StoreError> {
        let profile = sqlx::query_as::<_, Profile>(
            r"
            SELECT account_id, email, role, shop_id, created_at
            FROM registration.profile
            WHERE account_id = $1
            ",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn put(&self, profile: &Profile) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO registration.profile (account_id, email, role, shop_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (account_id) DO UPDATE
            SET email = EXCLUDED.email,
                role = EXCLUDED.role,
                shop_id = EXCLUDED.shop_id,
                created_at = EXCLUDED.created_at
            ",
        )
        .bind(&profile.account_id)
        .bind(&profile.email)
        .bind(profile.role)
        .bind(profile.shop_id.as_ref())
        .bind(profile.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match classify(e) {
            WriteFailure::Rejected(rejection) => StoreError::Conflict(rejection),
            WriteFailure::Duplicate => {
                StoreError::DataCorruption("upsert hit primary key conflict".to_owned())
            }
            WriteFailure::Other(e) => StoreError::Database(e),
        })?;
        Ok(())
    }

    async fn insert_if_eligible(&self, profile: &Profile) -> Result<Inserted, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO registration.profile (account_id, email, role, shop_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(&profile.account_id)
        .bind(&profile.email)
        .bind(profile.role)
        .bind(profile.shop_id.as_ref())
        .bind(profile.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Inserted::Created),
            Err(e) => match classify(e) {
                WriteFailure::Duplicate => Ok(Inserted::AlreadyExists),
                WriteFailure::Rejected(rejection) => Err(StoreError::Conflict(rejection)),
                WriteFailure::Other(e) => Err(StoreError::Database(e)),
            },
        }
    }

    async fn delete(&self, account_id: &AccountId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM registration.profile WHERE account_id = $1")
            .bind(account_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, filter: ProfileFilter) -> Result<Vec<Profile>, StoreError> {
        let query = match filter {
            ProfileFilter::All => sqlx::query_as::<_, Profile>(
                r"
                SELECT account_id, email, role, shop_id, created_at
                FROM registration.profile
                ORDER BY created_at
                ",
            ),
            ProfileFilter::Allocations => sqlx::query_as::<_, Profile>(
                r"
                SELECT account_id, email, role, shop_id, created_at
                FROM registration.profile
                WHERE role IN ('admin', 'vendor')
                ORDER BY created_at
                ",
            ),
            ProfileFilter::Role(role) => sqlx::query_as::<_, Profile>(
                r"
                SELECT account_id, email, role, shop_id, created_at
                FROM registration.profile
                WHERE role = $1
                ORDER BY created_at
                ",
            )
            .bind(role),
        };
        Ok(query.fetch_all(&self.pool).await?)
    }
}

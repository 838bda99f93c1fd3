//! Registration configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Optional
//! - `REGISTRATION_POLL_INTERVAL_SECS` - Verification poll cadence (default: 2)
//! - `REGISTRATION_VERIFICATION_TIMEOUT_SECS` - Deadline for clicking the email link (default: 300)
//! - `REGISTRATION_RESEND_COOLDOWN_SECS` - Delay before the email can be resent (default: 30)
//! - `REGISTRATION_MIN_PASSWORD_LENGTH` - Local weak-password check (default: 6)
//! - `REGISTRATION_DATABASE_URL` - `PostgreSQL` profile store (falls back to `DATABASE_URL`)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

use crate::session::SessionSettings;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_VERIFICATION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RESEND_COOLDOWN_SECS: u64 = 30;
const DEFAULT_MIN_PASSWORD_LENGTH: usize = 6;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Registration configuration.
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Verification session timing
    pub session: SessionSettings,
    /// Minimum password length accepted before contacting the identity provider
    pub min_password_length: usize,
    /// `PostgreSQL` profile store URL (contains password)
    pub database_url: Option<SecretString>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            min_password_length: DEFAULT_MIN_PASSWORD_LENGTH,
            database_url: None,
            sentry_dsn: None,
            sentry_environment: None,
        }
    }
}

impl RegistrationConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` for unparsable numbers, a zero
    /// poll interval, or a timeout shorter than the poll interval.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let poll_interval = Duration::from_secs(parse_or_default(
            &lookup,
            "REGISTRATION_POLL_INTERVAL_SECS",
            DEFAULT_POLL_INTERVAL_SECS,
        )?);
        let timeout = Duration::from_secs(parse_or_default(
            &lookup,
            "REGISTRATION_VERIFICATION_TIMEOUT_SECS",
            DEFAULT_VERIFICATION_TIMEOUT_SECS,
        )?);
        let resend_cooldown = Duration::from_secs(parse_or_default(
            &lookup,
            "REGISTRATION_RESEND_COOLDOWN_SECS",
            DEFAULT_RESEND_COOLDOWN_SECS,
        )?);
        let min_password_length = parse_or_default(
            &lookup,
            "REGISTRATION_MIN_PASSWORD_LENGTH",
            DEFAULT_MIN_PASSWORD_LENGTH,
        )?;

        if poll_interval.is_zero() {
            return Err(ConfigError::InvalidEnvVar(
                "REGISTRATION_POLL_INTERVAL_SECS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if timeout < poll_interval {
            return Err(ConfigError::InvalidEnvVar(
                "REGISTRATION_VERIFICATION_TIMEOUT_SECS".to_string(),
                format!(
                    "must be at least the poll interval ({}s)",
                    poll_interval.as_secs()
                ),
            ));
        }

        let database_url = lookup("REGISTRATION_DATABASE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .map(SecretString::from);

        Ok(Self {
            session: SessionSettings {
                poll_interval,
                timeout,
                resend_cooldown,
            },
            min_password_length,
            database_url,
            sentry_dsn: lookup("SENTRY_DSN"),
            sentry_environment: lookup("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the database URL or an error naming the missing variable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if no database URL is configured.
    pub fn require_database_url(&self) -> Result<&SecretString, ConfigError> {
        self.database_url
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("REGISTRATION_DATABASE_URL".to_string()))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse an optional variable, falling back to a default when unset.
fn parse_or_default<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}

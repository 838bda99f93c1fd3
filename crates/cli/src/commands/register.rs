//! Registration dry-run.
//!
//! Runs the full registration lifecycle against the in-memory identity
//! provider and profile store, with the timing from the environment.
//!
//! # Usage
//!
//! ```bash
//! # Verified after 4 seconds
//! canteen register -e a@x.com -p secret1 -r vendor -s shop-1 --verify-after 4
//!
//! # Never verified: times out and rolls back
//! REGISTRATION_VERIFICATION_TIMEOUT_SECS=10 canteen register -e a@x.com -p secret1
//! ```

use std::sync::Arc;
use std::time::Duration;

use canteen_core::{Email, RegistrationRequest, Role, ShopId};
use canteen_registration::{
    IdentityGateway, MemoryIdentityGateway, MemoryProfileStore, Outcome, ProfileStore,
    RegistrationConfig, RegistrationCoordinator, format_remaining,
};
use secrecy::SecretString;
use thiserror::Error;

/// Arguments of the `register` command.
#[derive(Debug)]
pub struct RegisterArgs {
    pub email: String,
    pub password: String,
    pub role: String,
    pub shop: Option<String>,
    pub verify_after: Option<u64>,
}

/// Errors that can occur before the registration starts.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Invalid role: {0}. Valid roles: customer, vendor, admin")]
    InvalidRole(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] canteen_core::EmailError),
}

/// Run a registration dry-run and print the final outcome.
pub async fn run(
    config: &RegistrationConfig,
    args: RegisterArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let role: Role = args
        .role
        .parse()
        .map_err(|_| RegisterError::InvalidRole(args.role.clone()))?;
    let email = Email::parse(&args.email).map_err(RegisterError::from)?;
    let request = RegistrationRequest::new(
        email,
        SecretString::from(args.password),
        role,
        args.shop.map(ShopId::new),
    );

    let gateway = match args.verify_after {
        Some(secs) => MemoryIdentityGateway::new().with_auto_verify(Duration::from_secs(secs)),
        None => MemoryIdentityGateway::new(),
    };
    let gateway: Arc<dyn IdentityGateway> = Arc::new(gateway);
    let store: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::new());
    let coordinator = RegistrationCoordinator::new(gateway, store, config);

    tracing::info!(email = %request.email, role = %request.role(), "Starting registration dry-run...");
    let outcome = match coordinator.submit(request).await {
        Ok(mut handle) => {
            while let Some(update) = handle.changed().await {
                match update {
                    Outcome::Pending { remaining_secs } => {
                        tracing::info!("Waiting for verification ({})", format_remaining(remaining_secs));
                    }
                    _ => break,
                }
            }
            handle.wait().await
        }
        Err(e) => {
            tracing::warn!(error = %e, user_message = %e.user_message(), "Registration refused");
            e.outcome()
        }
    };

    tracing::info!(
        user_message = outcome.user_message(),
        redirect = outcome.redirect().unwrap_or("-"),
        "Registration finished"
    );

    #[allow(clippy::print_stdout)]
    {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Ok(())
}

//! Registration and email-verification lifecycle for Canteen.
//!
//! A registration runs in two halves:
//!
//! 1. [`RegistrationCoordinator::submit`] checks the allocation rules
//!    against a fresh snapshot, creates a provisional identity at the
//!    identity provider, signs it out and sends the verification email.
//! 2. A [`VerificationSession`] polls the provider until the email is
//!    verified (commit the profile) or the deadline passes (roll the
//!    identity back).
//!
//! The identity provider and the profile store are reached only through the
//! [`IdentityGateway`] and [`ProfileStore`] traits. In-memory
//! implementations of both ship with the crate for dry runs and tests.
//!
//! # Example
//!
//! ```rust,ignore
//! let coordinator = RegistrationCoordinator::new(gateway, store, &config);
//! let handle = coordinator.submit(request).await?;
//! match handle.wait().await {
//!     Outcome::Success(role) => redirect(role.landing_path()),
//!     other => show(other.user_message()),
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod outcome;
pub mod session;
pub mod store;

pub use config::{ConfigError, RegistrationConfig};
pub use coordinator::{FormOptions, RegistrationCoordinator};
pub use error::RegistrationError;
pub use gateway::{Identity, IdentityGateway, MemoryIdentityGateway, ProviderError, SignInMethod};
pub use outcome::{ErrorKind, Outcome, format_remaining};
pub use session::{
    PollerRegistry, ProvisionalIdentity, ResendError, SessionHandle, SessionSettings,
    SessionState, VerificationSession,
};
pub use store::{
    Inserted, MemoryProfileStore, PgProfileStore, ProfileFilter, ProfileStore, StoreError,
};

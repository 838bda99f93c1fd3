//! Identity provider boundary.
//!
//! The identity provider owns credentials, password hashing, email delivery,
//! and sessions. Registration only ever talks to it through
//! [`IdentityGateway`], so every call is treated as fallible I/O.

pub mod memory;

pub use memory::{GatewayOp, MemoryIdentityGateway};

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

use canteen_core::{AccountId, Email};

/// An account record at the identity provider.
///
/// Not the same as a [`canteen_core::Profile`]: an identity can exist
/// without a profile (unverified, or mid-registration).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Provider-assigned account id.
    pub account_id: AccountId,
    /// Email the account was created with.
    pub email: Email,
    /// Whether the provider has seen the verification link clicked.
    pub verified: bool,
}

/// An authenticated provider session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Account the session belongs to.
    pub account_id: AccountId,
}

/// A way an email can sign in at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SignInMethod {
    /// Email and password.
    Password,
    /// A federated provider, identified by its provider id (e.g. `google.com`).
    Federated(String),
}

impl SignInMethod {
    /// Provider id for the password method.
    pub const PASSWORD_ID: &'static str = "password";

    /// Parse a provider method id.
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        if id == Self::PASSWORD_ID {
            Self::Password
        } else {
            Self::Federated(id.to_owned())
        }
    }

    /// Provider method id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Password => Self::PASSWORD_ID,
            Self::Federated(id) => id,
        }
    }

    /// Returns `true` for third-party sign-in methods.
    #[must_use]
    pub const fn is_federated(&self) -> bool {
        matches!(self, Self::Federated(_))
    }
}

/// Errors reported by the identity provider.
///
/// Identity creation never partially succeeds: if `create` returns an error
/// no account exists.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The email already has an account.
    #[error("email already in use")]
    EmailInUse,

    /// The provider rejected the email syntax.
    #[error("invalid email")]
    InvalidEmail,

    /// The provider rejected the password strength.
    #[error("weak password")]
    WeakPassword,

    /// Email/password did not match.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The operation needs a fresh sign-in (e.g. deleting a signed-out account).
    #[error("requires recent login")]
    RequiresRecentLogin,

    /// The account does not exist.
    #[error("account not found")]
    AccountNotFound,

    /// The user closed the federated sign-in window.
    #[error("sign-in window was closed")]
    PopupClosed,

    /// The provider could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// Any other provider failure.
    #[error("provider error {code}: {message}")]
    Other {
        /// Provider error code.
        code: String,
        /// Provider message.
        message: String,
    },
}

impl ProviderError {
    /// Map a provider error code (`auth/...`) to a stable variant.
    #[must_use]
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        match code {
            "auth/email-already-in-use" => Self::EmailInUse,
            "auth/invalid-email" => Self::InvalidEmail,
            "auth/weak-password" => Self::WeakPassword,
            "auth/wrong-password" | "auth/invalid-credential" => Self::InvalidCredentials,
            "auth/requires-recent-login" => Self::RequiresRecentLogin,
            "auth/user-not-found" => Self::AccountNotFound,
            "auth/popup-closed-by-user" => Self::PopupClosed,
            "auth/network-request-failed" => Self::Network(message.into()),
            other => Self::Other {
                code: other.to_owned(),
                message: message.into(),
            },
        }
    }
}

/// Operations the registration lifecycle needs from the identity provider.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    /// Create an unverified account.
    async fn create(&self, email: &Email, password: &SecretString)
    -> Result<Identity, ProviderError>;

    /// Delete an account.
    async fn delete(&self, identity: &Identity) -> Result<(), ProviderError>;

    /// Dispatch the verification email for an account.
    async fn send_verification(&self, identity: &Identity) -> Result<(), ProviderError>;

    /// Re-read the account, including its verification flag.
    async fn reload(&self, identity: &Identity) -> Result<Identity, ProviderError>;

    /// Sign in with email and password.
    async fn sign_in(&self, email: &Email, password: &SecretString)
    -> Result<Session, ProviderError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Run the federated sign-in flow and return the signed-in identity.
    async fn sign_in_with_federated_provider(&self) -> Result<Identity, ProviderError>;

    /// Sign-in methods already registered for an email.
    async fn list_sign_in_methods(&self, email: &Email)
    -> Result<Vec<SignInMethod>, ProviderError>;
}

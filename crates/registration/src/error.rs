//! Registration errors and Sentry reporting.
//!
//! Every error a caller can see maps to exactly one [`ErrorKind`] through
//! [`RegistrationError::outcome`]. Conditions that need an operator (an
//! identity left behind by a failed rollback) are also sent to Sentry;
//! without an initialised client the report is a no-op.

use std::borrow::Cow;

use thiserror::Error;
use tracing::error;

use canteen_core::{FormError, Rejection};

use crate::gateway::{Identity, ProviderError};
use crate::outcome::{ErrorKind, Outcome};
use crate::store::StoreError;

/// Errors returned by the registration coordinator.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The form failed local validation.
    #[error("invalid form: {0}")]
    Form(#[from] FormError),

    /// The password is shorter than the configured minimum.
    #[error("password must be at least {min} characters")]
    WeakPassword { min: usize },

    /// The allocation rules refused the request.
    #[error("registration rejected: {0}")]
    Rejected(#[from] Rejection),

    /// The email is registered through a federated provider.
    #[error("email is registered with a federated provider")]
    FederatedAccount,

    /// The federated identity has not verified its email.
    #[error("federated identity email is not verified")]
    EmailUnverified,

    /// The identity provider failed.
    #[error("identity provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Reading profiles failed.
    #[error("profile store error: {0}")]
    Store(#[from] StoreError),

    /// Writing the profile of a verified identity failed.
    #[error("profile commit failed: {0}")]
    Commit(StoreError),
}

impl RegistrationError {
    /// The stable error code.
    ///
    /// Returns `None` for rejections, which surface as `Outcome::Rejected`.
    #[must_use]
    pub const fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            Self::Form(FormError::InvalidEmail(_)) => ErrorKind::InvalidEmail,
            Self::Form(FormError::PasswordMismatch) => ErrorKind::PasswordMismatch,
            Self::WeakPassword { .. } => ErrorKind::WeakPassword,
            Self::Rejected(_) => return None,
            Self::FederatedAccount => ErrorKind::UseFederatedSignIn,
            Self::EmailUnverified => ErrorKind::EmailUnverified,
            Self::Provider(err) => match err {
                ProviderError::EmailInUse => ErrorKind::EmailInUse,
                ProviderError::InvalidEmail => ErrorKind::InvalidEmail,
                ProviderError::WeakPassword => ErrorKind::WeakPassword,
                ProviderError::Network(_) => ErrorKind::Network,
                ProviderError::PopupClosed => ErrorKind::PopupClosed,
                ProviderError::InvalidCredentials
                | ProviderError::RequiresRecentLogin
                | ProviderError::AccountNotFound
                | ProviderError::Other { .. } => ErrorKind::Collaborator,
            },
            Self::Store(_) => ErrorKind::Collaborator,
            Self::Commit(_) => ErrorKind::CommitFailed,
        })
    }

    /// The outcome to show the presentation layer.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match (self, self.kind()) {
            (Self::Rejected(rejection), _) => Outcome::Rejected(*rejection),
            (_, Some(kind)) => Outcome::Error(kind),
            (_, None) => Outcome::Error(ErrorKind::Collaborator),
        }
    }

    /// Message shown to the user.
    ///
    /// The local password check names the configured minimum; everything
    /// else uses the copy of its outcome.
    #[must_use]
    pub fn user_message(&self) -> Cow<'static, str> {
        match self {
            Self::WeakPassword { min } => {
                Cow::Owned(format!("Password should be at least {min} characters"))
            }
            _ => Cow::Borrowed(self.outcome().user_message()),
        }
    }
}

/// Log and report an identity that could not be cleaned up.
pub fn report_orphaned_identity(identity: &Identity, reason: &str) {
    add_breadcrumb(
        "registration",
        "provisional identity left behind",
        Some(&[
            ("account_id", identity.account_id.as_str()),
            ("email", identity.email.as_str()),
        ]),
    );
    let event_id = sentry::capture_message(
        &format!(
            "manual cleanup required for account {}: {reason}",
            identity.account_id
        ),
        sentry::Level::Error,
    );
    error!(
        account_id = %identity.account_id,
        email = %identity.email,
        reason,
        sentry_event_id = %event_id,
        "manual cleanup required"
    );
}

/// Add a breadcrumb for registration actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of actions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use canteen_core::{AccountId, Email, EmailError};

    use super::*;

    #[test]
    fn test_provider_errors_map_to_kinds() {
        let cases = [
            (ProviderError::EmailInUse, ErrorKind::EmailInUse),
            (ProviderError::InvalidEmail, ErrorKind::InvalidEmail),
            (ProviderError::WeakPassword, ErrorKind::WeakPassword),
            (ProviderError::Network("offline".to_owned()), ErrorKind::Network),
            (ProviderError::PopupClosed, ErrorKind::PopupClosed),
            (ProviderError::AccountNotFound, ErrorKind::Collaborator),
        ];
        for (err, kind) in cases {
            assert_eq!(RegistrationError::from(err).kind(), Some(kind));
        }
    }

    #[test]
    fn test_rejection_outcome() {
        let err = RegistrationError::from(Rejection::AdminExists);
        assert_eq!(err.kind(), None);
        assert_eq!(err.outcome(), Outcome::Rejected(Rejection::AdminExists));
    }

    #[test]
    fn test_local_errors() {
        assert_eq!(
            RegistrationError::from(FormError::PasswordMismatch).outcome(),
            Outcome::Error(ErrorKind::PasswordMismatch)
        );
        assert_eq!(
            RegistrationError::from(FormError::InvalidEmail(EmailError::Empty)).outcome(),
            Outcome::Error(ErrorKind::InvalidEmail)
        );
        assert_eq!(
            RegistrationError::WeakPassword { min: 6 }.to_string(),
            "password must be at least 6 characters"
        );
        assert_eq!(
            RegistrationError::FederatedAccount.outcome(),
            Outcome::Error(ErrorKind::UseFederatedSignIn)
        );
    }

    #[test]
    fn test_weak_password_message_uses_configured_minimum() {
        let err = RegistrationError::WeakPassword { min: 10 };
        assert_eq!(err.user_message(), "Password should be at least 10 characters");
        assert_eq!(err.outcome(), Outcome::Error(ErrorKind::WeakPassword));
        assert_eq!(
            RegistrationError::from(ProviderError::WeakPassword).user_message(),
            ErrorKind::WeakPassword.user_message()
        );
    }

    #[test]
    fn test_commit_failure_is_distinct() {
        let err = RegistrationError::Commit(StoreError::Conflict(Rejection::ShopTaken));
        assert_eq!(err.outcome(), Outcome::Error(ErrorKind::CommitFailed));
        let err = RegistrationError::Store(StoreError::Unavailable("down".to_owned()));
        assert_eq!(err.outcome(), Outcome::Error(ErrorKind::Collaborator));
    }

    #[test]
    fn test_reporting_without_sentry_client_is_a_noop() {
        let identity = Identity {
            account_id: AccountId::new("u1"),
            email: Email::parse("a@x.com").unwrap(),
            verified: false,
        };
        report_orphaned_identity(&identity, "delete identity: network error");
    }
}

//! Outcomes surfaced to the presentation layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use canteen_core::{Rejection, Role};

/// Observable state of a registration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "kebab-case")]
pub enum Outcome {
    /// Waiting for the user to click the verification link.
    Pending {
        /// Seconds left before the deadline (countdown display only).
        remaining_secs: u64,
    },
    /// The profile is committed.
    Success(Role),
    /// The deadline passed and the provisional identity was removed.
    TimedOut,
    /// The allocation rules refused the request.
    Rejected(Rejection),
    /// Anything else.
    Error(ErrorKind),
}

impl Outcome {
    /// Returns `true` for every outcome except `Pending`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }

    /// Route the presentation layer should navigate to, if any.
    #[must_use]
    pub const fn redirect(&self) -> Option<&'static str> {
        match self {
            Self::Success(role) => Some(role.landing_path()),
            Self::Error(kind) => kind.redirect(),
            Self::Pending { .. } | Self::TimedOut | Self::Rejected(_) => None,
        }
    }

    /// Message to show the user.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Pending { .. } => "Email verification in progress...",
            Self::Success(_) => "Registration successful!",
            Self::TimedOut => "Verification timeout. Please try registering again.",
            Self::Rejected(rejection) => rejection.user_message(),
            Self::Error(kind) => kind.user_message(),
        }
    }
}

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    EmailInUse,
    InvalidEmail,
    WeakPassword,
    Network,
    PopupClosed,
    /// The email belongs to a federated account.
    UseFederatedSignIn,
    /// The federated identity's email is not verified.
    EmailUnverified,
    /// Verified, but signing back in failed. The identity is kept.
    VerifiedLoginFailed,
    /// Verified, but the profile could not be written. The identity is kept.
    CommitFailed,
    /// Rollback left an identity or profile behind.
    ManualCleanupRequired,
    /// A collaborator failed in a way with no more specific code.
    Collaborator,
    /// The session was superseded by a newer one before finishing.
    SessionEnded,
    PasswordMismatch,
}

impl ErrorKind {
    /// Stable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::EmailInUse => "email-in-use",
            Self::InvalidEmail => "invalid-email",
            Self::WeakPassword => "weak-password",
            Self::Network => "network",
            Self::PopupClosed => "popup-closed",
            Self::UseFederatedSignIn => "use-federated-sign-in",
            Self::EmailUnverified => "email-unverified",
            Self::VerifiedLoginFailed => "verified-login-failed",
            Self::CommitFailed => "commit-failed",
            Self::ManualCleanupRequired => "manual-cleanup-required",
            Self::Collaborator => "collaborator",
            Self::SessionEnded => "session-ended",
            Self::PasswordMismatch => "password-mismatch",
        }
    }

    /// Message shown to the user.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::EmailInUse => "This email is already registered",
            Self::InvalidEmail => "Please enter a valid email address",
            Self::WeakPassword => "Password is too short",
            Self::Network => "Network error. Please check your connection",
            Self::PopupClosed => "Sign-in window was closed. Please try again.",
            Self::UseFederatedSignIn => "Please use the Google Sign In button instead",
            Self::EmailUnverified => "Please verify your Google email before continuing",
            Self::VerifiedLoginFailed => "Please try logging in manually",
            Self::CommitFailed => "Failed to complete registration. Please try again.",
            Self::ManualCleanupRequired => {
                "Verification timeout. Please contact support before registering again."
            }
            Self::Collaborator => "Failed to verify email. Please try again.",
            Self::SessionEnded => "Verification was restarted",
            Self::PasswordMismatch => "Passwords do not match",
        }
    }

    /// Route to send the user to, if any.
    #[must_use]
    pub const fn redirect(self) -> Option<&'static str> {
        match self {
            Self::VerifiedLoginFailed | Self::CommitFailed => Some("/login"),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Whole seconds in `duration`, rounded up.
#[must_use]
pub fn whole_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Format a countdown as `m:ss`.
#[must_use]
pub fn format_remaining(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_format_remaining() {
        assert_eq!(format_remaining(300), "5:00");
        assert_eq!(format_remaining(61), "1:01");
        assert_eq!(format_remaining(9), "0:09");
        assert_eq!(format_remaining(0), "0:00");
    }

    #[test]
    fn test_whole_secs_rounds_up() {
        assert_eq!(whole_secs(Duration::from_secs(2)), 2);
        assert_eq!(whole_secs(Duration::from_millis(1500)), 2);
        assert_eq!(whole_secs(Duration::ZERO), 0);
    }

    #[test]
    fn test_terminal() {
        assert!(!Outcome::Pending { remaining_secs: 3 }.is_terminal());
        assert!(Outcome::TimedOut.is_terminal());
        assert!(Outcome::Rejected(Rejection::ShopTaken).is_terminal());
    }

    #[test]
    fn test_redirects() {
        assert_eq!(Outcome::Success(Role::Vendor).redirect(), Some("/vendor/items"));
        assert_eq!(Outcome::Success(Role::Admin).redirect(), Some("/admin/shops"));
        assert_eq!(
            Outcome::Error(ErrorKind::VerifiedLoginFailed).redirect(),
            Some("/login")
        );
        assert_eq!(Outcome::TimedOut.redirect(), None);
    }

    #[test]
    fn test_serialization() {
        assert_eq!(
            serde_json::to_value(Outcome::Success(Role::Vendor)).unwrap(),
            serde_json::json!({"status": "success", "detail": "vendor"})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Pending { remaining_secs: 42 }).unwrap(),
            serde_json::json!({"status": "pending", "detail": {"remaining_secs": 42}})
        );
        assert_eq!(
            serde_json::to_value(Outcome::Error(ErrorKind::ManualCleanupRequired)).unwrap(),
            serde_json::json!({"status": "error", "detail": "manual-cleanup-required"})
        );
        assert_eq!(
            serde_json::to_value(Outcome::TimedOut).unwrap(),
            serde_json::json!({"status": "timed-out"})
        );
    }

    #[test]
    fn test_codes_match_serde() {
        for kind in [
            ErrorKind::EmailInUse,
            ErrorKind::UseFederatedSignIn,
            ErrorKind::VerifiedLoginFailed,
            ErrorKind::SessionEnded,
        ] {
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.code().to_owned())
            );
        }
    }
}

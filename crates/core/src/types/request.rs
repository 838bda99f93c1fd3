//! Registration form input.

use secrecy::{ExposeSecret, SecretString};

use super::{Email, EmailError, ProfileClaim, Role, ShopId};

/// Errors caught before any collaborator is contacted.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    /// The email is structurally invalid.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Password and confirmation differ.
    #[error("passwords do not match")]
    PasswordMismatch,
}

/// Raw registration form as submitted by the user.
#[derive(Debug, Clone)]
pub struct RegistrationForm {
    /// Email as typed.
    pub email: String,
    /// Chosen password.
    pub password: SecretString,
    /// Password typed a second time.
    pub confirm_password: SecretString,
    /// Requested role.
    pub role: Role,
    /// Selected shop, if any.
    pub shop_id: Option<ShopId>,
}

impl RegistrationForm {
    /// Validate the form and turn it into a [`RegistrationRequest`].
    ///
    /// # Errors
    ///
    /// Returns `FormError::PasswordMismatch` if the confirmation differs and
    /// `FormError::InvalidEmail` if the email cannot be parsed.
    pub fn into_request(self) -> Result<RegistrationRequest, FormError> {
        if self.password.expose_secret() != self.confirm_password.expose_secret() {
            return Err(FormError::PasswordMismatch);
        }
        let email = Email::parse(&self.email)?;
        Ok(RegistrationRequest::new(
            email,
            self.password,
            self.role,
            self.shop_id,
        ))
    }
}

/// A validated registration attempt.
///
/// Lives for one submission only. The password stays wrapped in a
/// [`SecretString`] and is moved into the verification session, which drops
/// it as soon as the commit or rollback completes.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    /// Email to register.
    pub email: Email,
    /// Password for the new identity.
    pub password: SecretString,
    /// Requested role and shop.
    pub claim: ProfileClaim,
}

impl RegistrationRequest {
    /// Create a request. `shop_id` is discarded unless `role` is vendor.
    #[must_use]
    pub fn new(email: Email, password: SecretString, role: Role, shop_id: Option<ShopId>) -> Self {
        Self {
            email,
            password,
            claim: ProfileClaim::new(role, shop_id),
        }
    }

    /// Requested role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.claim.role
    }

    /// Requested shop.
    #[must_use]
    pub const fn shop_id(&self) -> Option<&ShopId> {
        self.claim.shop_id.as_ref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn form(password: &str, confirm: &str) -> RegistrationForm {
        RegistrationForm {
            email: "a@x.com".to_owned(),
            password: SecretString::from(password.to_owned()),
            confirm_password: SecretString::from(confirm.to_owned()),
            role: Role::Vendor,
            shop_id: Some(ShopId::new("shop-1")),
        }
    }

    #[test]
    fn test_into_request_accepts_matching_passwords() {
        let request = form("secret1", "secret1").into_request().unwrap();
        assert_eq!(request.email.as_str(), "a@x.com");
        assert_eq!(request.role(), Role::Vendor);
        assert_eq!(request.shop_id(), Some(&ShopId::new("shop-1")));
    }

    #[test]
    fn test_into_request_rejects_mismatch() {
        let err = form("secret1", "secret2").into_request().unwrap_err();
        assert_eq!(err, FormError::PasswordMismatch);
    }

    #[test]
    fn test_into_request_rejects_bad_email() {
        let mut bad = form("secret1", "secret1");
        bad.email = "not-an-email".to_owned();
        assert!(matches!(
            bad.into_request(),
            Err(FormError::InvalidEmail(EmailError::MissingAtSymbol))
        ));
    }

    #[test]
    fn test_debug_redacts_password() {
        let request = form("secret1", "secret1").into_request().unwrap();
        assert!(!format!("{request:?}").contains("secret1"));
    }
}

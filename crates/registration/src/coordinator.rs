//! Registration coordinator.
//!
//! Runs a registration from the submitted form to a running verification
//! session, and handles federated sign-ups that skip verification.

use std::sync::Arc;

use chrono::Utc;
use secrecy::ExposeSecret;
use tracing::{info, instrument, warn};

use canteen_core::{
    AllocationSnapshot, Profile, ProfileClaim, RegistrationForm, RegistrationRequest, Role, Shop,
    available_shops, check,
};

use crate::config::RegistrationConfig;
use crate::error::{RegistrationError, report_orphaned_identity};
use crate::gateway::{Identity, IdentityGateway, ProviderError};
use crate::session::{
    PollerRegistry, ProvisionalIdentity, SessionHandle, SessionSettings, VerificationSession,
};
use crate::store::{ProfileStore, StoreError, commit_profile};

/// Roles and shops the registration form should offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormOptions {
    /// Selectable roles.
    pub roles: Vec<Role>,
    /// Shops without a vendor.
    pub shops: Vec<Shop>,
}

/// Orchestrates registrations against the identity provider and the
/// profile store.
pub struct RegistrationCoordinator {
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<dyn ProfileStore>,
    settings: SessionSettings,
    min_password_length: usize,
    pollers: PollerRegistry,
}

impl RegistrationCoordinator {
    /// Create a coordinator from loaded configuration.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn IdentityGateway>,
        store: Arc<dyn ProfileStore>,
        config: &RegistrationConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            settings: config.session,
            min_password_length: config.min_password_length,
            pollers: PollerRegistry::new(),
        }
    }

    /// Create a coordinator with explicit session timing and default
    /// password rules.
    #[must_use]
    pub fn with_settings(
        gateway: Arc<dyn IdentityGateway>,
        store: Arc<dyn ProfileStore>,
        settings: SessionSettings,
    ) -> Self {
        let config = RegistrationConfig {
            session: settings,
            ..RegistrationConfig::default()
        };
        Self::new(gateway, store, &config)
    }

    /// The verification pollers started by this coordinator.
    #[must_use]
    pub const fn pollers(&self) -> &PollerRegistry {
        &self.pollers
    }

    /// Fresh view of the admin slot and the shops held by vendors.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Store` if the profiles cannot be read.
    pub async fn allocation_snapshot(&self) -> Result<AllocationSnapshot, RegistrationError> {
        Ok(self.store.allocation_snapshot().await?)
    }

    /// Roles and shops to offer on the form, given the shop catalogue.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Store` if the profiles cannot be read.
    pub async fn form_options(&self, catalogue: &[Shop]) -> Result<FormOptions, RegistrationError> {
        let snapshot = self.allocation_snapshot().await?;
        let shops: Vec<Shop> = available_shops(catalogue, &snapshot)
            .into_iter()
            .cloned()
            .collect();
        Ok(FormOptions {
            roles: Role::selectable(&snapshot, !shops.is_empty()),
            shops,
        })
    }

    /// Validate a raw form and [`submit`](Self::submit) it.
    ///
    /// # Errors
    ///
    /// Returns `RegistrationError::Form` for a mismatched confirmation or an
    /// invalid email, and otherwise the errors of [`submit`](Self::submit).
    pub async fn submit_form(
        &self,
        form: RegistrationForm,
    ) -> Result<SessionHandle, RegistrationError> {
        let request = form.into_request()?;
        self.submit(request).await
    }

    /// Register a new email/password account.
    ///
    /// On success the identity exists, is signed out, has been sent a
    /// verification email, and is being polled by a verification session.
    ///
    /// # Errors
    ///
    /// - `RegistrationError::WeakPassword` if the password is too short
    /// - `RegistrationError::Rejected` if the allocation rules refuse the claim
    /// - `RegistrationError::FederatedAccount` if the email signs in elsewhere
    /// - `RegistrationError::Provider` if the provider fails
    /// - `RegistrationError::Store` if the profiles cannot be read
    pub async fn submit(
        &self,
        request: RegistrationRequest,
    ) -> Result<SessionHandle, RegistrationError> {
        let claim = request.claim.clone();
        let provisional = self.provision(request).await?;
        Ok(self.start_verification(provisional, claim))
    }

    /// Create, sign out, and send verification for a new identity.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    #[instrument(
        skip_all,
        fields(email = %request.email, role = %request.role())
    )]
    pub async fn provision(
        &self,
        request: RegistrationRequest,
    ) -> Result<ProvisionalIdentity, RegistrationError> {
        if request.password.expose_secret().chars().count() < self.min_password_length {
            return Err(RegistrationError::WeakPassword {
                min: self.min_password_length,
            });
        }

        // Always a fresh snapshot; a stale one can admit a second admin or vendor.
        let snapshot = self.allocation_snapshot().await?;
        if let Err(rejection) = check(&request.claim, &snapshot) {
            info!(rejection = %rejection, "registration rejected");
            return Err(rejection.into());
        }

        let methods = self
            .gateway
            .list_sign_in_methods(&request.email)
            .await
            .inspect_err(|err| warn!(action = "list-sign-in-methods", error = %err, "lookup failed"))?;
        if methods.iter().any(|method| method.is_federated()) {
            info!("email registered with a federated provider");
            return Err(RegistrationError::FederatedAccount);
        }

        let identity = self
            .gateway
            .create(&request.email, &request.password)
            .await
            .inspect_err(|err| warn!(action = "create", error = %err, "identity creation failed"))?;
        info!(account_id = %identity.account_id, "provisional identity created");

        if let Err(err) = self.gateway.sign_out().await {
            warn!(action = "sign-out", account_id = %identity.account_id, error = %err, "sign-out after create failed");
            self.discard_identity(&identity, &err).await;
            return Err(err.into());
        }

        if let Err(err) = self.gateway.send_verification(&identity).await {
            warn!(action = "send-verification", account_id = %identity.account_id, error = %err, "verification email failed");
            self.discard_identity(&identity, &err).await;
            return Err(err.into());
        }

        Ok(ProvisionalIdentity::new(identity, request.password))
    }

    /// Start polling for verification of a provisional identity.
    ///
    /// Any session already polling the same account is superseded.
    pub fn start_verification(
        &self,
        provisional: ProvisionalIdentity,
        claim: ProfileClaim,
    ) -> SessionHandle {
        VerificationSession::new(
            provisional,
            claim,
            Arc::clone(&self.gateway),
            Arc::clone(&self.store),
            self.settings,
        )
        .spawn(&self.pollers)
    }

    /// Register through a federated provider.
    ///
    /// The provider vouches for the email, so no verification session runs.
    /// An account that already has a profile gets that profile back
    /// unchanged.
    ///
    /// # Errors
    ///
    /// - `RegistrationError::Provider` if the sign-in fails (e.g. the popup was closed)
    /// - `RegistrationError::EmailUnverified` if the provider has not verified the email
    /// - `RegistrationError::Rejected` if the allocation rules refuse the claim
    /// - `RegistrationError::Commit` if the profile cannot be written
    #[instrument(skip_all, fields(role = %claim.role))]
    pub async fn register_via_external_provider(
        &self,
        claim: ProfileClaim,
    ) -> Result<Profile, RegistrationError> {
        let identity = self
            .gateway
            .sign_in_with_federated_provider()
            .await
            .inspect_err(|err| warn!(action = "federated-sign-in", error = %err, "federated sign-in failed"))?;

        if !identity.verified {
            info!(account_id = %identity.account_id, email = %identity.email, "federated email not verified");
            self.sign_out_quietly().await;
            return Err(RegistrationError::EmailUnverified);
        }

        if let Some(existing) = self.store.get(&identity.account_id).await? {
            info!(account_id = %identity.account_id, role = %existing.role, "profile already exists");
            return Ok(existing);
        }

        let snapshot = self.allocation_snapshot().await?;
        if let Err(rejection) = check(&claim, &snapshot) {
            info!(rejection = %rejection, "federated registration rejected");
            self.sign_out_quietly().await;
            return Err(rejection.into());
        }

        let profile = Profile::new(identity.account_id, identity.email, claim, Utc::now());
        match commit_profile(self.store.as_ref(), profile).await {
            Ok(profile) => {
                info!(account_id = %profile.account_id, role = %profile.role, "registration complete");
                Ok(profile)
            }
            Err(StoreError::Conflict(rejection)) => {
                info!(rejection = %rejection, "allocation taken by a concurrent registration");
                self.sign_out_quietly().await;
                Err(rejection.into())
            }
            Err(err) => Err(RegistrationError::Commit(err)),
        }
    }

    /// Delete an identity whose registration could not continue.
    async fn discard_identity(&self, identity: &Identity, cause: &ProviderError) {
        if let Err(err) = self.gateway.delete(identity).await {
            report_orphaned_identity(identity, &format!("{cause}; delete identity: {err}"));
        }
    }

    async fn sign_out_quietly(&self) {
        if let Err(err) = self.gateway.sign_out().await {
            warn!(action = "sign-out", error = %err, "sign-out failed");
        }
    }
}

impl std::fmt::Debug for RegistrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationCoordinator")
            .field("settings", &self.settings)
            .field("min_password_length", &self.min_password_length)
            .field("pollers", &self.pollers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use secrecy::SecretString;

    use canteen_core::{AccountId, Email, Rejection, ShopId};

    use super::*;
    use crate::gateway::{GatewayOp, MemoryIdentityGateway};
    use crate::outcome::{ErrorKind, Outcome};
    use crate::store::{MemoryProfileStore, StoreOp};

    struct Fixture {
        gateway: Arc<MemoryIdentityGateway>,
        store: Arc<MemoryProfileStore>,
        coordinator: RegistrationCoordinator,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MemoryIdentityGateway::new());
        let store = Arc::new(MemoryProfileStore::new());
        let coordinator = RegistrationCoordinator::with_settings(
            Arc::clone(&gateway) as Arc<dyn IdentityGateway>,
            Arc::clone(&store) as Arc<dyn ProfileStore>,
            SessionSettings::default(),
        );
        Fixture {
            gateway,
            store,
            coordinator,
        }
    }

    fn email(s: &str) -> Email {
        Email::parse(s).unwrap()
    }

    fn request(role: Role, shop: Option<&str>) -> RegistrationRequest {
        RegistrationRequest::new(
            email("a@x.com"),
            SecretString::from("secret1".to_owned()),
            role,
            shop.map(ShopId::new),
        )
    }

    fn seeded_profile(uid: &str, claim: ProfileClaim) -> Profile {
        Profile::new(
            AccountId::new(uid),
            email(&format!("{uid}@x.com")),
            claim,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_weak_password_rejected_locally() {
        let f = fixture();
        let mut weak = request(Role::Customer, None);
        weak.password = SecretString::from("123".to_owned());

        let err = f.coordinator.provision(weak).await.unwrap_err();
        assert!(matches!(err, RegistrationError::WeakPassword { min: 6 }));
        assert_eq!(f.gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_provision_creates_signs_out_and_sends() {
        let f = fixture();
        let provisional = f
            .coordinator
            .provision(request(Role::Vendor, Some("shop-1")))
            .await
            .unwrap();

        assert!(provisional.holds_password());
        assert_eq!(f.gateway.calls(GatewayOp::Create), 1);
        assert_eq!(f.gateway.signed_in(), None);
        assert_eq!(f.gateway.verification_emails(), vec![email("a@x.com")]);
        assert_eq!(f.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_federated_email_is_redirected() {
        let f = fixture();
        f.gateway.seed_federated(&email("a@x.com"), "google.com", true);

        let err = f
            .coordinator
            .provision(request(Role::Customer, None))
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::Error(ErrorKind::UseFederatedSignIn));
        assert_eq!(f.gateway.calls(GatewayOp::Create), 0);
    }

    #[tokio::test]
    async fn test_email_in_use_maps_to_kind() {
        let f = fixture();
        f.gateway.seed_password_account(&email("a@x.com"), "other-password");

        let err = f
            .coordinator
            .provision(request(Role::Customer, None))
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::Error(ErrorKind::EmailInUse));
    }

    #[tokio::test]
    async fn test_failed_verification_email_deletes_identity() {
        let f = fixture();
        f.gateway.fail_next(
            GatewayOp::SendVerification,
            ProviderError::Network("offline".to_owned()),
        );

        let err = f
            .coordinator
            .provision(request(Role::Customer, None))
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::Error(ErrorKind::Network));
        assert_eq!(f.gateway.calls(GatewayOp::Delete), 1);
        assert!(f.gateway.account(&email("a@x.com")).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_read_failure() {
        let f = fixture();
        f.store.fail_next(StoreOp::Query);

        let err = f
            .coordinator
            .provision(request(Role::Admin, None))
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::Error(ErrorKind::Collaborator));
        assert_eq!(f.gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_form_options() {
        let f = fixture();
        f.store.seed([seeded_profile(
            "v1",
            ProfileClaim::new(Role::Vendor, Some(ShopId::new("shop-1"))),
        )]);
        let catalogue = vec![
            Shop {
                id: ShopId::new("shop-1"),
                name: "Dosa Point".to_owned(),
            },
            Shop {
                id: ShopId::new("shop-2"),
                name: "Chai Corner".to_owned(),
            },
        ];

        let options = f.coordinator.form_options(&catalogue).await.unwrap();
        assert_eq!(options.roles, vec![Role::Customer, Role::Admin, Role::Vendor]);
        assert_eq!(options.shops.len(), 1);

        f.store.seed([seeded_profile("a", ProfileClaim::new(Role::Admin, None))]);
        let options = f.coordinator.form_options(catalogue.get(..1).unwrap()).await.unwrap();
        assert_eq!(options.roles, vec![Role::Customer]);
        assert!(options.shops.is_empty());
    }

    #[tokio::test]
    async fn test_federated_registration_commits_profile() {
        let f = fixture();
        f.gateway.seed_federated(&email("g@x.com"), "google.com", true);

        let claim = ProfileClaim::new(Role::Vendor, Some(ShopId::new("shop-3")));
        let profile = f
            .coordinator
            .register_via_external_provider(claim)
            .await
            .unwrap();
        assert_eq!(profile.role, Role::Vendor);
        assert_eq!(profile.shop_id, Some(ShopId::new("shop-3")));
        assert_eq!(f.store.writes(), 1);
        assert!(f.gateway.signed_in().is_some());
    }

    #[tokio::test]
    async fn test_federated_unverified_is_signed_out() {
        let f = fixture();
        f.gateway.seed_federated(&email("g@x.com"), "google.com", false);

        let err = f
            .coordinator
            .register_via_external_provider(ProfileClaim::customer())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::EmailUnverified));
        assert_eq!(f.gateway.signed_in(), None);
        assert_eq!(f.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_federated_existing_profile_is_returned() {
        let f = fixture();
        let identity = f.gateway.seed_federated(&email("g@x.com"), "google.com", true);
        let existing = Profile::new(
            identity.account_id.clone(),
            identity.email.clone(),
            ProfileClaim::new(Role::Admin, None),
            Utc::now(),
        );
        f.store.seed([existing.clone()]);

        let profile = f
            .coordinator
            .register_via_external_provider(ProfileClaim::customer())
            .await
            .unwrap();
        assert_eq!(profile, existing);
        assert_eq!(f.store.writes(), 0);
    }

    #[tokio::test]
    async fn test_federated_rejected_claim() {
        let f = fixture();
        f.store.seed([seeded_profile("a", ProfileClaim::new(Role::Admin, None))]);
        f.gateway.seed_federated(&email("g@x.com"), "google.com", true);

        let err = f
            .coordinator
            .register_via_external_provider(ProfileClaim::new(Role::Admin, None))
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::Rejected(Rejection::AdminExists));
        assert_eq!(f.gateway.signed_in(), None);
    }

    #[tokio::test]
    async fn test_federated_popup_closed() {
        let f = fixture();
        f.gateway.fail_federated_popup(ProviderError::PopupClosed);

        let err = f
            .coordinator
            .register_via_external_provider(ProfileClaim::customer())
            .await
            .unwrap_err();
        assert_eq!(err.outcome(), Outcome::Error(ErrorKind::PopupClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_returns_pending_handle() {
        let f = fixture();
        let handle = f
            .coordinator
            .submit(request(Role::Customer, None))
            .await
            .unwrap();

        assert_eq!(handle.outcome(), Outcome::Pending { remaining_secs: 300 });
        assert!(f.coordinator.pollers().is_polling(handle.account_id()));

        f.gateway.mark_verified(&email("a@x.com"));
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(handle.wait().await, Outcome::Success(Role::Customer));
    }
}

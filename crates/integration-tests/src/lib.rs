//! Integration tests for Canteen.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p canteen-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `registration_lifecycle` - submit, verify, commit, time out, roll back
//! - `federated_registration` - sign-up through a federated provider
//! - `allocation_races` - concurrent registrations for the same slot
//!
//! Every test runs against the in-memory identity provider and profile
//! store, on a paused Tokio clock, so the 300 second deadline elapses
//! instantly.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;

use canteen_core::{AccountId, Email, Profile, ProfileClaim, RegistrationRequest, Role, ShopId};
use canteen_registration::{
    IdentityGateway, MemoryIdentityGateway, MemoryProfileStore, ProfileStore,
    RegistrationCoordinator, SessionSettings,
};

/// Coordinator wired to spy collaborators.
pub struct Harness {
    pub gateway: Arc<MemoryIdentityGateway>,
    pub store: Arc<MemoryProfileStore>,
    pub coordinator: RegistrationCoordinator,
}

impl Harness {
    /// Harness with default session timing (2s polls, 300s deadline).
    #[must_use]
    pub fn new() -> Self {
        Self::with_gateway(MemoryIdentityGateway::new())
    }

    /// Harness around a preconfigured gateway.
    #[must_use]
    pub fn with_gateway(gateway: MemoryIdentityGateway) -> Self {
        let gateway = Arc::new(gateway);
        let store = Arc::new(MemoryProfileStore::new());
        let coordinator = RegistrationCoordinator::with_settings(
            Arc::clone(&gateway) as Arc<dyn IdentityGateway>,
            Arc::clone(&store) as Arc<dyn ProfileStore>,
            SessionSettings::default(),
        );
        Self {
            gateway,
            store,
            coordinator,
        }
    }

    /// Seed an existing admin profile.
    pub fn seed_admin(&self, uid: &str) {
        self.store
            .seed([profile(uid, ProfileClaim::new(Role::Admin, None))]);
    }

    /// Seed an existing vendor profile for `shop`.
    pub fn seed_vendor(&self, uid: &str, shop: &str) {
        self.store.seed([profile(
            uid,
            ProfileClaim::new(Role::Vendor, Some(ShopId::new(shop))),
        )]);
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse an email, panicking on invalid test input.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn email(s: &str) -> Email {
    Email::parse(s).unwrap()
}

/// Registration request with password `secret1`.
#[must_use]
pub fn request(address: &str, role: Role, shop: Option<&str>) -> RegistrationRequest {
    RegistrationRequest::new(
        email(address),
        SecretString::from("secret1".to_owned()),
        role,
        shop.map(ShopId::new),
    )
}

/// A committed profile for `uid` at `uid@x.com`.
#[must_use]
pub fn profile(uid: &str, claim: ProfileClaim) -> Profile {
    Profile::new(
        AccountId::new(uid),
        email(&format!("{uid}@x.com")),
        claim,
        Utc::now(),
    )
}

/// Advance the paused clock by `secs` seconds, letting every timer due in
/// that window fire.
pub async fn elapse(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

//! Durable profile storage.
//!
//! Profiles are the application records created once an identity is
//! verified. Two backends implement [`ProfileStore`]:
//!
//! - [`PgProfileStore`] - `PostgreSQL`, table `registration.profile`
//! - [`MemoryProfileStore`] - in-process, for dry runs and tests
//!
//! Both enforce the allocation rules at write time through
//! [`ProfileStore::insert_if_eligible`], so two concurrent registrations
//! for the same admin slot or shop cannot both commit.

pub mod memory;
pub mod postgres;

pub use memory::{MemoryProfileStore, StoreOp};
pub use postgres::{PgProfileStore, create_pool};

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use canteen_core::{AccountId, AllocationSnapshot, Profile, Rejection, Role};

/// Errors that can occur in profile storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write would break an allocation rule.
    #[error("allocation conflict: {0}")]
    Conflict(#[from] Rejection),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the store is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Which profiles a [`ProfileStore::query`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileFilter {
    /// Every profile.
    All,
    /// Profiles that occupy an allocation slot (admins and vendors).
    Allocations,
    /// Profiles with the given role.
    Role(Role),
}

impl ProfileFilter {
    /// Returns `true` if `profile` passes the filter.
    #[must_use]
    pub fn matches(self, profile: &Profile) -> bool {
        match self {
            Self::All => true,
            Self::Allocations => matches!(profile.role, Role::Admin | Role::Vendor),
            Self::Role(role) => profile.role == role,
        }
    }
}

/// Result of [`ProfileStore::insert_if_eligible`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inserted {
    /// The profile was written.
    Created,
    /// A profile for the account already existed; nothing was written.
    AlreadyExists,
}

/// Keyed profile storage.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch the profile for an account.
    async fn get(&self, account_id: &AccountId) -> Result<Option<Profile>, StoreError>;

    /// Write a profile, replacing any existing one for the account.
    ///
    /// Allocation rules are still enforced against other accounts.
    async fn put(&self, profile: &Profile) -> Result<(), StoreError>;

    /// Write a profile only if none exists for the account and the
    /// allocation rules still hold at write time.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if another account took the admin slot
    /// or the shop since the snapshot was read.
    async fn insert_if_eligible(&self, profile: &Profile) -> Result<Inserted, StoreError>;

    /// Delete the profile for an account. Returns `false` if none existed.
    async fn delete(&self, account_id: &AccountId) -> Result<bool, StoreError>;

    /// List profiles matching a filter.
    async fn query(&self, filter: ProfileFilter) -> Result<Vec<Profile>, StoreError>;

    /// Snapshot of the admin slot and the shops held by vendors.
    async fn allocation_snapshot(&self) -> Result<AllocationSnapshot, StoreError> {
        let profiles = self.query(ProfileFilter::Allocations).await?;
        Ok(AllocationSnapshot::from_profiles(&profiles))
    }
}

/// Commit a profile once, returning the durable record.
///
/// An existing profile for the account is returned unchanged, so repeating
/// a commit never writes twice and never changes the stored role.
pub(crate) async fn commit_profile(
    store: &dyn ProfileStore,
    profile: Profile,
) -> Result<Profile, StoreError> {
    if let Some(existing) = store.get(&profile.account_id).await? {
        debug!(account_id = %existing.account_id, "profile already committed");
        return Ok(existing);
    }

    match store.insert_if_eligible(&profile).await? {
        Inserted::Created => Ok(profile),
        // Lost a race with a commit for the same account.
        Inserted::AlreadyExists => store
            .get(&profile.account_id)
            .await?
            .ok_or_else(|| StoreError::DataCorruption("profile vanished after insert".to_owned())),
    }
}

/// Profiles per role, for reporting.
#[must_use]
pub fn count_by_role(profiles: &[Profile]) -> BTreeMap<&'static str, usize> {
    let mut counts: BTreeMap<&'static str, usize> =
        Role::ALL.iter().map(|role| (role.as_str(), 0)).collect();
    for profile in profiles {
        *counts.entry(profile.role.as_str()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;

    use canteen_core::{Email, ProfileClaim, ShopId};

    use super::*;

    fn profile(uid: &str, claim: ProfileClaim) -> Profile {
        Profile::new(
            AccountId::new(uid),
            Email::parse(&format!("{uid}@x.com")).unwrap(),
            claim,
            Utc::now(),
        )
    }

    #[test]
    fn test_filter_matches() {
        let admin = profile("a", ProfileClaim::new(Role::Admin, None));
        let customer = profile("c", ProfileClaim::customer());
        assert!(ProfileFilter::Allocations.matches(&admin));
        assert!(!ProfileFilter::Allocations.matches(&customer));
        assert!(ProfileFilter::Role(Role::Customer).matches(&customer));
        assert!(ProfileFilter::All.matches(&customer));
    }

    #[test]
    fn test_count_by_role() {
        let counts = count_by_role(&[
            profile("a", ProfileClaim::new(Role::Admin, None)),
            profile("c1", ProfileClaim::customer()),
            profile("c2", ProfileClaim::customer()),
        ]);
        assert_eq!(counts.get("customer"), Some(&2));
        assert_eq!(counts.get("vendor"), Some(&0));
        assert_eq!(counts.get("admin"), Some(&1));
    }

    #[tokio::test]
    async fn test_commit_profile_is_idempotent() {
        let store = MemoryProfileStore::new();
        let vendor = profile(
            "v1",
            ProfileClaim::new(Role::Vendor, Some(ShopId::new("shop-1"))),
        );

        let first = commit_profile(&store, vendor.clone()).await.unwrap();
        assert_eq!(first, vendor);

        let mut retry = vendor.clone();
        retry.role = Role::Customer;
        retry.shop_id = None;
        let second = commit_profile(&store, retry).await.unwrap();
        assert_eq!(second.role, Role::Vendor);
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_commit_profile_enforces_allocation() {
        let store = MemoryProfileStore::new();
        commit_profile(&store, profile("a1", ProfileClaim::new(Role::Admin, None)))
            .await
            .unwrap();

        let err = commit_profile(&store, profile("a2", ProfileClaim::new(Role::Admin, None)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Rejection::AdminExists)));
    }

    #[tokio::test]
    async fn test_default_allocation_snapshot() {
        let store = MemoryProfileStore::new();
        store.seed([
            profile("a", ProfileClaim::new(Role::Admin, None)),
            profile("v", ProfileClaim::new(Role::Vendor, Some(ShopId::new("shop-2")))),
            profile("c", ProfileClaim::customer()),
        ]);

        let snapshot = store.allocation_snapshot().await.unwrap();
        assert!(snapshot.admin_exists);
        assert!(snapshot.is_shop_taken(&ShopId::new("shop-2")));
        assert_eq!(snapshot.shops_taken_by_vendor.len(), 1);
    }
}

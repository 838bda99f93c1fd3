//! In-memory profile store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;

use canteen_core::{AccountId, AllocationSnapshot, Profile, ProfileClaim, check};

use super::{Inserted, ProfileFilter, ProfileStore, StoreError};

/// Store operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Put,
    Insert,
    Delete,
    Query,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Once,
    Always,
}

#[derive(Debug, Default)]
struct State {
    profiles: BTreeMap<AccountId, Profile>,
    calls: HashMap<StoreOp, usize>,
    failures: HashMap<StoreOp, Failure>,
}

impl State {
    fn enter(&mut self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get(&op).copied() {
            Some(Failure::Once) => {
                self.failures.remove(&op);
                Err(injected(op))
            }
            Some(Failure::Always) => Err(injected(op)),
            None => Ok(()),
        }
    }

    /// Allocation rules evaluated against every profile except `account_id`.
    fn check_against_others(&self, profile: &Profile) -> Result<(), StoreError> {
        let others = self
            .profiles
            .values()
            .filter(|p| p.account_id != profile.account_id);
        let snapshot = AllocationSnapshot::from_profiles(others);
        let claim = ProfileClaim {
            role: profile.role,
            shop_id: profile.shop_id.clone(),
        };
        check(&claim, &snapshot)?;
        Ok(())
    }
}

fn injected(op: StoreOp) -> StoreError {
    StoreError::Unavailable(format!("injected {op:?} failure"))
}

/// Profile store held in a mutex-guarded map.
///
/// Check-and-insert runs under a single lock acquisition, which gives the
/// same guarantee as the unique indexes of the `PostgreSQL` store.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    state: Mutex<State>,
}

impl MemoryProfileStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert profiles directly, bypassing the allocation rules and counters.
    pub fn seed(&self, profiles: impl IntoIterator<Item = Profile>) {
        let mut state = self.state.lock();
        for profile in profiles {
            state.profiles.insert(profile.account_id.clone(), profile);
        }
    }

    /// Fail the next call of `op` with `StoreError::Unavailable`.
    pub fn fail_next(&self, op: StoreOp) {
        self.state.lock().failures.insert(op, Failure::Once);
    }

    /// Fail every call of `op` with `StoreError::Unavailable`.
    pub fn fail_always(&self, op: StoreOp) {
        self.state.lock().failures.insert(op, Failure::Always);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.state.lock().failures.clear();
    }

    /// Number of calls made to `op`.
    #[must_use]
    pub fn calls(&self, op: StoreOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of write attempts (`put` plus `insert_if_eligible`).
    #[must_use]
    pub fn writes(&self) -> usize {
        self.calls(StoreOp::Put) + self.calls(StoreOp::Insert)
    }

    /// Current profile for an account, without counting a call.
    #[must_use]
    pub fn profile(&self, account_id: &AccountId) -> Option<Profile> {
        self.state.lock().profiles.get(account_id).cloned()
    }

    /// Number of stored profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().profiles.len()
    }

    /// Returns `true` if no profiles are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().profiles.is_empty()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, account_id: &AccountId) -> Result<Option<Profile>, StoreError> {
        let mut state = self.state.lock();
        state.enter(StoreOp::Get)?;
        Ok(state.profiles.get(account_id).cloned())
    }

    async fn put(&self, profile: &Profile) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.enter(StoreOp::Put)?;
        state.check_against_others(profile)?;
        state
            .profiles
            .insert(profile.account_id.clone(), profile.clone());
        Ok(())
    }

    async fn insert_if_eligible(&self, profile: &Profile) -> Result<Inserted, StoreError> {
        let mut state = self.state.lock();
        state.enter(StoreOp::Insert)?;
        if state.profiles.contains_key(&profile.account_id) {
            return Ok(Inserted::AlreadyExists);
        }
        state.check_against_others(profile)?;
        state
            .profiles
            .insert(profile.account_id.clone(), profile.clone());
        Ok(Inserted::Created)
    }

    async fn delete(&self, account_id: &AccountId) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.enter(StoreOp::Delete)?;
        Ok(state.profiles.remove(account_id).is_some())
    }

    async fn query(&self, filter: ProfileFilter) -> Result<Vec<Profile>, StoreError> {
        let mut state = self.state.lock();
        state.enter(StoreOp::Query)?;
        Ok(state
            .profiles
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect())
    }
}

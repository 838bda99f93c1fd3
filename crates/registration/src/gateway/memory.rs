//! In-memory identity provider.
//!
//! Backs the CLI dry-run and the test suites. Every call is counted per
//! [`GatewayOp`] and failures can be injected per operation, either for the
//! next call or for every call.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use tracing::{debug, info};

use canteen_core::{AccountId, Email};

use super::{Identity, IdentityGateway, ProviderError, Session, SignInMethod};

/// Minimum password length the in-memory provider accepts.
const PROVIDER_MIN_PASSWORD_LENGTH: usize = 6;

/// Gateway operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    Create,
    Delete,
    SendVerification,
    Reload,
    SignIn,
    SignOut,
    SignInWithFederatedProvider,
    ListSignInMethods,
}

#[derive(Debug, Clone)]
enum Failure {
    Once(ProviderError),
    Always(ProviderError),
}

#[derive(Debug)]
struct Account {
    identity: Identity,
    password: Option<SecretString>,
    methods: Vec<SignInMethod>,
    verify_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    by_email: HashMap<Email, AccountId>,
    signed_in: Option<AccountId>,
    federated_popup: Option<Result<AccountId, ProviderError>>,
    auto_verify_after: Option<Duration>,
    outbox: Vec<Email>,
    calls: HashMap<GatewayOp, usize>,
    failures: HashMap<GatewayOp, Failure>,
}

impl State {
    fn enter(&mut self, op: GatewayOp) -> Result<(), ProviderError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get(&op).cloned() {
            Some(Failure::Once(err)) => {
                self.failures.remove(&op);
                Err(err)
            }
            Some(Failure::Always(err)) => Err(err),
            None => Ok(()),
        }
    }

    fn account_mut(&mut self, id: &AccountId) -> Result<&mut Account, ProviderError> {
        self.accounts
            .get_mut(id)
            .ok_or(ProviderError::AccountNotFound)
    }
}

/// Identity provider held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryIdentityGateway {
    state: Mutex<State>,
}

impl MemoryIdentityGateway {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify every account created from now on once `delay` has passed,
    /// as if the user clicked the link.
    #[must_use]
    pub fn with_auto_verify(self, delay: Duration) -> Self {
        self.state.lock().auto_verify_after = Some(delay);
        self
    }

    /// Mark the account for `email` as verified.
    ///
    /// Returns `false` if no such account exists.
    pub fn mark_verified(&self, email: &Email) -> bool {
        let mut state = self.state.lock();
        let Some(id) = state.by_email.get(email).cloned() else {
            return false;
        };
        state.account_mut(&id).is_ok_and(|account| {
            account.identity.verified = true;
            true
        })
    }

    /// Seed an account that signs in through a federated provider and make
    /// it the result of the next federated sign-in.
    pub fn seed_federated(&self, email: &Email, provider_id: &str, verified: bool) -> Identity {
        let mut state = self.state.lock();
        let identity = Identity {
            account_id: new_account_id(),
            email: email.clone(),
            verified,
        };
        state
            .by_email
            .insert(email.clone(), identity.account_id.clone());
        state.accounts.insert(
            identity.account_id.clone(),
            Account {
                identity: identity.clone(),
                password: None,
                methods: vec![SignInMethod::Federated(provider_id.to_owned())],
                verify_at: None,
            },
        );
        state.federated_popup = Some(Ok(identity.account_id.clone()));
        identity
    }

    /// Seed a verified email/password account.
    pub fn seed_password_account(&self, email: &Email, password: &str) -> Identity {
        let mut state = self.state.lock();
        let identity = Identity {
            account_id: new_account_id(),
            email: email.clone(),
            verified: true,
        };
        state
            .by_email
            .insert(email.clone(), identity.account_id.clone());
        state.accounts.insert(
            identity.account_id.clone(),
            Account {
                identity: identity.clone(),
                password: Some(SecretString::from(password.to_owned())),
                methods: vec![SignInMethod::Password],
                verify_at: None,
            },
        );
        identity
    }

    /// Make the next federated sign-in fail (e.g. with `PopupClosed`).
    pub fn fail_federated_popup(&self, err: ProviderError) {
        self.state.lock().federated_popup = Some(Err(err));
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: GatewayOp, err: ProviderError) {
        self.state.lock().failures.insert(op, Failure::Once(err));
    }

    /// Fail every call of `op` with `err`.
    pub fn fail_always(&self, op: GatewayOp, err: ProviderError) {
        self.state.lock().failures.insert(op, Failure::Always(err));
    }

    /// Number of calls made to `op`.
    #[must_use]
    pub fn calls(&self, op: GatewayOp) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Total number of calls across all operations.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Current state of the account for `email`.
    #[must_use]
    pub fn account(&self, email: &Email) -> Option<Identity> {
        let state = self.state.lock();
        let id = state.by_email.get(email)?;
        state.accounts.get(id).map(|account| account.identity.clone())
    }

    /// Account currently signed in, if any.
    #[must_use]
    pub fn signed_in(&self) -> Option<AccountId> {
        self.state.lock().signed_in.clone()
    }

    /// Recipients of every verification email dispatched so far.
    #[must_use]
    pub fn verification_emails(&self) -> Vec<Email> {
        self.state.lock().outbox.clone()
    }
}

fn new_account_id() -> AccountId {
    AccountId::new(uuid::Uuid::new_v4().simple().to_string())
}

#[async_trait]
impl IdentityGateway for MemoryIdentityGateway {
    async fn create(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Identity, ProviderError> {
        let mut state = self.state.lock();
        state.enter(GatewayOp::Create)?;

        if state.by_email.contains_key(email) {
            return Err(ProviderError::EmailInUse);
        }
        if password.expose_secret().chars().count() < PROVIDER_MIN_PASSWORD_LENGTH {
            return Err(ProviderError::WeakPassword);
        }

        let identity = Identity {
            account_id: new_account_id(),
            email: email.clone(),
            verified: false,
        };
        let verify_at = state.auto_verify_after.map(|delay| Instant::now() + delay);
        state
            .by_email
            .insert(email.clone(), identity.account_id.clone());
        state.accounts.insert(
            identity.account_id.clone(),
            Account {
                identity: identity.clone(),
                password: Some(password.clone()),
                methods: vec![SignInMethod::Password],
                verify_at,
            },
        );
        // Creating an account signs it in, as real providers do.
        state.signed_in = Some(identity.account_id.clone());
        debug!(account_id = %identity.account_id, email = %email, "account created");
        Ok(identity)
    }

    async fn delete(&self, identity: &Identity) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(GatewayOp::Delete)?;

        let account = state
            .accounts
            .remove(&identity.account_id)
            .ok_or(ProviderError::AccountNotFound)?;
        state.by_email.remove(&account.identity.email);
        if state.signed_in.as_ref() == Some(&identity.account_id) {
            state.signed_in = None;
        }
        debug!(account_id = %identity.account_id, "account deleted");
        Ok(())
    }

    async fn send_verification(&self, identity: &Identity) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(GatewayOp::SendVerification)?;

        let email = state.account_mut(&identity.account_id)?.identity.email.clone();
        info!(
            account_id = %identity.account_id,
            email = %email,
            "verification email dispatched"
        );
        state.outbox.push(email);
        Ok(())
    }

    async fn reload(&self, identity: &Identity) -> Result<Identity, ProviderError> {
        let mut state = self.state.lock();
        state.enter(GatewayOp::Reload)?;

        let account = state.account_mut(&identity.account_id)?;
        if account.verify_at.is_some_and(|at| Instant::now() >= at) {
            account.identity.verified = true;
        }
        Ok(account.identity.clone())
    }

    async fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<Session, ProviderError> {
        let mut state = self.state.lock();
        state.enter(GatewayOp::SignIn)?;

        let id = state
            .by_email
            .get(email)
            .cloned()
            .ok_or(ProviderError::InvalidCredentials)?;
        let account = state.account_mut(&id)?;
        let matches = account
            .password
            .as_ref()
            .is_some_and(|stored| stored.expose_secret() == password.expose_secret());
        if !matches {
            return Err(ProviderError::InvalidCredentials);
        }
        state.signed_in = Some(id.clone());
        Ok(Session { account_id: id })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        state.enter(GatewayOp::SignOut)?;
        state.signed_in = None;
        Ok(())
    }

    async fn sign_in_with_federated_provider(&self) -> Result<Identity, ProviderError> {
        let mut state = self.state.lock();
        state.enter(GatewayOp::SignInWithFederatedProvider)?;

        let id = state
            .federated_popup
            .take()
            .unwrap_or(Err(ProviderError::PopupClosed))?;
        let identity = state.account_mut(&id)?.identity.clone();
        state.signed_in = Some(id);
        Ok(identity)
    }

    async fn list_sign_in_methods(
        &self,
        email: &Email,
    ) -> Result<Vec<SignInMethod>, ProviderError> {
        let mut state = self.state.lock();
        state.enter(GatewayOp::ListSignInMethods)?;

        let Some(id) = state.by_email.get(email).cloned() else {
            return Ok(Vec::new());
        };
        Ok(state.account_mut(&id)?.methods.clone())
    }
}

//! Verification sessions.
//!
//! A [`VerificationSession`] owns one provisional identity from the moment
//! the verification email is sent until exactly one of these happens:
//!
//! - the email is verified and the profile is committed
//! - the deadline passes, or the caller cancels, and the identity is rolled
//!   back
//! - a collaborator fails and polling stops
//!
//! The session runs as a Tokio task registered in a [`PollerRegistry`]. The
//! caller observes it through a [`SessionHandle`]; dropping or detaching the
//! handle never stops the task, so rollback on timeout still happens.
//! Cancelling runs the rollback immediately instead of waiting for the
//! deadline.

mod machine;
mod registry;

pub use machine::{Effect, Event, SessionState, VerificationMachine};
pub use registry::PollerRegistry;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use canteen_core::{AccountId, Profile, ProfileClaim};

use crate::error::report_orphaned_identity;
use crate::gateway::{Identity, IdentityGateway, ProviderError};
use crate::outcome::{ErrorKind, Outcome, whole_secs};
use crate::store::{ProfileStore, StoreError, commit_profile};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_RESEND_COOLDOWN: Duration = Duration::from_secs(30);

/// Timing of a verification session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// How often the identity is reloaded.
    pub poll_interval: Duration,
    /// How long the user has to click the verification link.
    pub timeout: Duration,
    /// Minimum delay between verification emails.
    pub resend_cooldown: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            resend_cooldown: DEFAULT_RESEND_COOLDOWN,
        }
    }
}

/// An identity created at the provider but not yet verified.
///
/// Holds the password needed to sign back in after verification. The
/// password is dropped as soon as it has been used or the session ends.
#[derive(Debug)]
pub struct ProvisionalIdentity {
    identity: Identity,
    password: Option<SecretString>,
}

impl ProvisionalIdentity {
    /// Pair a freshly created identity with its password.
    #[must_use]
    pub const fn new(identity: Identity, password: SecretString) -> Self {
        Self {
            identity,
            password: Some(password),
        }
    }

    /// The provider identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Provider account id.
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        &self.identity.account_id
    }

    /// Returns `true` while the password is still held.
    #[must_use]
    pub const fn holds_password(&self) -> bool {
        self.password.is_some()
    }

    fn take_password(&mut self) -> Option<SecretString> {
        self.password.take()
    }

    fn discard_password(&mut self) {
        self.password = None;
    }
}

/// Errors from [`SessionHandle::resend_verification`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResendError {
    /// The previous email was sent too recently.
    #[error("verification email can be resent in {retry_in_secs}s")]
    CoolingDown {
        /// Seconds until a resend is allowed.
        retry_in_secs: u64,
    },

    /// The session is no longer awaiting verification.
    #[error("verification session has ended")]
    SessionClosed,

    /// The provider failed to send the email.
    #[error("failed to send verification email: {0}")]
    Provider(#[from] ProviderError),
}

enum Command {
    Resend(oneshot::Sender<Result<(), ResendError>>),
    Cancel,
}

/// The verification lifecycle of one provisional identity.
pub struct VerificationSession {
    identity: ProvisionalIdentity,
    claim: ProfileClaim,
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<dyn ProfileStore>,
    settings: SessionSettings,
    machine: VerificationMachine,
}

impl std::fmt::Debug for VerificationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationSession")
            .field("identity", &self.identity)
            .field("claim", &self.claim)
            .field("settings", &self.settings)
            .field("state", self.machine.state())
            .finish_non_exhaustive()
    }
}

impl VerificationSession {
    /// Create an idle session.
    #[must_use]
    pub fn new(
        identity: ProvisionalIdentity,
        claim: ProfileClaim,
        gateway: Arc<dyn IdentityGateway>,
        store: Arc<dyn ProfileStore>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            identity,
            claim,
            gateway,
            store,
            settings,
            machine: VerificationMachine::new(settings.timeout),
        }
    }

    /// Start polling on the runtime, replacing any poller already running
    /// for the same account.
    pub fn spawn(self, registry: &PollerRegistry) -> SessionHandle {
        let account_id = self.identity.account_id().clone();
        let (updates_tx, updates_rx) = watch::channel(Outcome::Pending {
            remaining_secs: whole_secs(self.settings.timeout),
        });
        let (commands_tx, commands_rx) = mpsc::channel(4);

        let abort = registry.spawn(account_id.clone(), self.run(updates_tx, commands_rx));
        SessionHandle {
            account_id,
            updates: updates_rx,
            commands: commands_tx,
            abort,
        }
    }

    #[instrument(
        name = "verification_session",
        skip_all,
        fields(account_id = %self.identity.account_id(), role = %self.claim.role)
    )]
    async fn run(mut self, updates: watch::Sender<Outcome>, mut commands: mpsc::Receiver<Command>) {
        let started = Instant::now();
        let mut last_sent = started;
        self.machine
            .start(self.identity.account_id().clone(), started);
        info!(timeout_secs = self.settings.timeout.as_secs(), "awaiting email verification");

        let poll = self.settings.poll_interval;
        let mut ticks = tokio::time::interval_at(started + poll, poll);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    if let Some(outcome) = self.on_tick().await {
                        let done = outcome.is_terminal();
                        updates.send_replace(outcome);
                        if done {
                            break;
                        }
                    }
                }
                Some(command) = commands.recv() => match command {
                    Command::Resend(reply) => {
                        let result = self.resend(&mut last_sent).await;
                        // The caller may have stopped waiting.
                        let _ = reply.send(result);
                    }
                    Command::Cancel => {
                        if let Some(outcome) = self.on_cancel().await {
                            updates.send_replace(outcome);
                            break;
                        }
                    }
                },
            }
        }

        self.identity.discard_password();
        debug!(state = ?self.machine.state(), "verification session finished");
    }

    async fn on_tick(&mut self) -> Option<Outcome> {
        let effect = match self.machine.handle(Event::Tick { now: Instant::now() }) {
            Effect::Reload => match self.gateway.reload(self.identity.identity()).await {
                Ok(identity) => self.machine.handle(Event::Reloaded {
                    verified: identity.verified,
                    now: Instant::now(),
                }),
                Err(err) => {
                    warn!(action = "reload", error = %err, "identity reload failed");
                    self.machine.handle(Event::Failed {
                        reason: err.to_string(),
                    })
                }
            },
            other => other,
        };

        match effect {
            Effect::Wait { remaining } => Some(Outcome::Pending {
                remaining_secs: whole_secs(remaining),
            }),
            Effect::Commit => Some(self.commit().await),
            Effect::Rollback => Some(self.rollback().await),
            Effect::Stop => Some(self.stop()),
            Effect::Reload | Effect::Ignore => None,
        }
    }

    async fn on_cancel(&mut self) -> Option<Outcome> {
        let remaining = self.machine.remaining(Instant::now());
        if self.machine.handle(Event::Cancelled) != Effect::Rollback {
            return None;
        }
        info!(
            remaining_secs = remaining.map_or(0, whole_secs),
            "verification cancelled"
        );
        Some(self.rollback().await)
    }

    /// Sign back in and write the profile.
    async fn commit(&mut self) -> Outcome {
        let identity = self.identity.identity().clone();
        info!(action = "commit", email = %identity.email, "email verified");

        let Some(password) = self.identity.take_password() else {
            error!(action = "post-verification-login", "password no longer held");
            return Outcome::Error(ErrorKind::VerifiedLoginFailed);
        };
        let signed_in = self.gateway.sign_in(&identity.email, &password).await;
        drop(password);
        if let Err(err) = signed_in {
            error!(
                action = "post-verification-login",
                email = %identity.email,
                error = %err,
                "sign-in after verification failed"
            );
            return Outcome::Error(ErrorKind::VerifiedLoginFailed);
        }

        let profile = Profile::new(
            identity.account_id,
            identity.email,
            self.claim.clone(),
            Utc::now(),
        );
        match commit_profile(self.store.as_ref(), profile).await {
            Ok(profile) => {
                info!(action = "commit", role = %profile.role, "registration complete");
                Outcome::Success(profile.role)
            }
            Err(StoreError::Conflict(rejection)) => {
                error!(
                    action = "commit",
                    rejection = %rejection,
                    "allocation taken by a concurrent registration"
                );
                Outcome::Error(ErrorKind::CommitFailed)
            }
            Err(err) => {
                error!(action = "commit", error = %err, "profile write failed");
                Outcome::Error(ErrorKind::CommitFailed)
            }
        }
    }

    /// Delete whatever the registration left behind.
    ///
    /// Both deletions are attempted even if the first one fails.
    async fn rollback(&mut self) -> Outcome {
        self.identity.discard_password();
        let identity = self.identity.identity().clone();
        info!(action = "rollback", email = %identity.email, "rolling back provisional identity");

        let mut failures = Vec::new();

        match self.store.delete(&identity.account_id).await {
            Ok(true) => debug!(action = "rollback", "profile deleted"),
            Ok(false) => debug!(action = "rollback", "no profile to delete"),
            Err(err) => {
                warn!(action = "rollback", operation = "delete-profile", error = %err, "profile delete failed");
                failures.push(format!("delete profile: {err}"));
            }
        }

        if let Err(err) = self.gateway.delete(&identity).await {
            warn!(action = "rollback", operation = "delete-identity", error = %err, "identity delete failed");
            failures.push(format!("delete identity: {err}"));
            if let Err(err) = self.gateway.sign_out().await {
                warn!(action = "rollback", operation = "sign-out", error = %err, "sign-out failed");
            }
        }

        if failures.is_empty() {
            info!(action = "rollback", "provisional identity removed");
            Outcome::TimedOut
        } else {
            report_orphaned_identity(&identity, &failures.join("; "));
            Outcome::Error(ErrorKind::ManualCleanupRequired)
        }
    }

    fn stop(&mut self) -> Outcome {
        self.identity.discard_password();
        if let SessionState::Failed(reason) = self.machine.state() {
            report_orphaned_identity(self.identity.identity(), reason);
        }
        Outcome::Error(ErrorKind::Collaborator)
    }

    async fn resend(&mut self, last_sent: &mut Instant) -> Result<(), ResendError> {
        if !self.machine.is_awaiting() {
            return Err(ResendError::SessionClosed);
        }

        let now = Instant::now();
        let ready_at = *last_sent + self.settings.resend_cooldown;
        if now < ready_at {
            return Err(ResendError::CoolingDown {
                retry_in_secs: whole_secs(ready_at - now),
            });
        }

        self.gateway
            .send_verification(self.identity.identity())
            .await
            .inspect_err(|err| {
                warn!(action = "resend-verification", error = %err, "resend failed");
            })?;
        info!(action = "resend-verification", "verification email resent");
        *last_sent = now;
        Ok(())
    }
}

/// The caller's view of a running [`VerificationSession`].
#[derive(Debug)]
pub struct SessionHandle {
    account_id: AccountId,
    updates: watch::Receiver<Outcome>,
    commands: mpsc::Sender<Command>,
    abort: AbortHandle,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resend(_) => f.write_str("Resend"),
            Self::Cancel => f.write_str("Cancel"),
        }
    }
}

impl SessionHandle {
    /// Account being verified.
    #[must_use]
    pub const fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Latest published outcome.
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.updates.borrow().clone()
    }

    /// Wait for the next published outcome.
    ///
    /// Returns `None` once the session task has ended.
    pub async fn changed(&mut self) -> Option<Outcome> {
        self.updates.changed().await.ok()?;
        Some(self.updates.borrow_and_update().clone())
    }

    /// Wait for a terminal outcome.
    ///
    /// A task that ends without one (superseded by a newer session) resolves to
    /// `Outcome::Error(ErrorKind::SessionEnded)`.
    pub async fn wait(mut self) -> Outcome {
        loop {
            let current = self.updates.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.updates.changed().await.is_err() {
                let last = self.updates.borrow().clone();
                return if last.is_terminal() {
                    last
                } else {
                    Outcome::Error(ErrorKind::SessionEnded)
                };
            }
        }
    }

    /// Ask the session to send the verification email again.
    ///
    /// # Errors
    ///
    /// - `ResendError::CoolingDown` if the last email was sent too recently
    /// - `ResendError::SessionClosed` once the session has ended
    /// - `ResendError::Provider` if the provider failed to send
    pub async fn resend_verification(&self) -> Result<(), ResendError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Resend(reply))
            .await
            .map_err(|_| ResendError::SessionClosed)?;
        response.await.map_err(|_| ResendError::SessionClosed)?
    }

    /// Returns `true` once the session task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// Stop observing the session. Polling continues, and so does rollback
    /// when the deadline passes.
    pub fn detach(self) {
        debug!(account_id = %self.account_id, "verification session detached");
    }

    /// Stop polling and roll the provisional identity back now.
    ///
    /// Resolves to the session's terminal outcome: `TimedOut` once the
    /// identity is deleted, `Error(ManualCleanupRequired)` if the rollback
    /// failed, or whatever the session had already reached (a verified
    /// identity is never rolled back).
    pub async fn cancel(self) -> Outcome {
        info!(account_id = %self.account_id, "cancelling verification session");
        // A closed channel means the session has already ended.
        let _ = self.commands.send(Command::Cancel).await;
        self.wait().await
    }
}

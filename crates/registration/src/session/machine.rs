//! Verification state machine.
//!
//! Pure transitions driven by a poll tick, the result of reloading the
//! identity, and an explicit cancel. The machine never performs I/O; it returns an
//! [`Effect`] telling the driver what to do next. Time is passed in with
//! every event so transitions can be tested without timers.

use std::time::Duration;

use tokio::time::Instant;

use canteen_core::AccountId;

/// Where a verification session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    Idle,
    /// Polling the identity provider until `deadline`.
    AwaitingVerification {
        account_id: AccountId,
        deadline: Instant,
    },
    /// The provider reported the email as verified.
    Verified(AccountId),
    /// The deadline passed, or the session was cancelled, without
    /// verification.
    TimedOut(AccountId),
    /// A collaborator failed and polling stopped.
    Failed(String),
}

impl SessionState {
    /// Returns `true` once no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Verified(_) | Self::TimedOut(_) | Self::Failed(_)
        )
    }
}

/// Input to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The poll interval elapsed.
    Tick { now: Instant },
    /// The identity was reloaded.
    Reloaded { verified: bool, now: Instant },
    /// A collaborator call failed.
    Failed { reason: String },
    /// The caller gave up waiting. Treated as an early deadline.
    Cancelled,
}

/// What the driver must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Reload the identity and feed back [`Event::Reloaded`].
    Reload,
    /// Keep waiting; `remaining` is left before the deadline.
    Wait { remaining: Duration },
    /// Commit the profile.
    Commit,
    /// Delete the provisional identity.
    Rollback,
    /// Stop polling and report the failure.
    Stop,
    /// The event does not apply in the current state.
    Ignore,
}

/// State machine for one provisional identity.
#[derive(Debug, Clone)]
pub struct VerificationMachine {
    timeout: Duration,
    state: SessionState,
}

impl VerificationMachine {
    /// Create an idle machine that will allow `timeout` for verification.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            state: SessionState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Returns `true` while polling.
    #[must_use]
    pub const fn is_awaiting(&self) -> bool {
        matches!(self.state, SessionState::AwaitingVerification { .. })
    }

    /// Time left before the deadline, if awaiting verification.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match &self.state {
            SessionState::AwaitingVerification { deadline, .. } => {
                Some(deadline.saturating_duration_since(now))
            }
            _ => None,
        }
    }

    /// Start awaiting verification for `account_id`.
    ///
    /// Only valid from `Idle`; any other state returns `Effect::Ignore`.
    pub fn start(&mut self, account_id: AccountId, now: Instant) -> Effect {
        if self.state != SessionState::Idle {
            return Effect::Ignore;
        }
        self.state = SessionState::AwaitingVerification {
            account_id,
            deadline: now + self.timeout,
        };
        Effect::Wait {
            remaining: self.timeout,
        }
    }

    /// Apply an event.
    pub fn handle(&mut self, event: Event) -> Effect {
        let (account_id, deadline) = match &self.state {
            SessionState::AwaitingVerification {
                account_id,
                deadline,
            } => (account_id.clone(), *deadline),
            SessionState::Idle => {
                if let Event::Failed { reason } = event {
                    self.state = SessionState::Failed(reason);
                    return Effect::Stop;
                }
                return Effect::Ignore;
            }
            SessionState::Verified(_) | SessionState::TimedOut(_) | SessionState::Failed(_) => {
                return Effect::Ignore;
            }
        };

        match event {
            Event::Tick { now } if now >= deadline => {
                self.state = SessionState::TimedOut(account_id);
                Effect::Rollback
            }
            Event::Tick { .. } => Effect::Reload,
            // A verification seen on the same reload that crosses the deadline
            // still wins: a verified identity is never rolled back.
            Event::Reloaded { verified: true, .. } => {
                self.state = SessionState::Verified(account_id);
                Effect::Commit
            }
            Event::Reloaded {
                verified: false,
                now,
            } if now >= deadline => {
                self.state = SessionState::TimedOut(account_id);
                Effect::Rollback
            }
            Event::Reloaded {
                verified: false,
                now,
            } => Effect::Wait {
                remaining: deadline.saturating_duration_since(now),
            },
            Event::Failed { reason } => {
                self.state = SessionState::Failed(reason);
                Effect::Stop
            }
            Event::Cancelled => {
                self.state = SessionState::TimedOut(account_id);
                Effect::Rollback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(300);

    fn awaiting(t0: Instant) -> VerificationMachine {
        let mut machine = VerificationMachine::new(TIMEOUT);
        assert_eq!(
            machine.start(AccountId::new("u1"), t0),
            Effect::Wait { remaining: TIMEOUT }
        );
        machine
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_start_records_deadline() {
        let t0 = Instant::now();
        let machine = awaiting(t0);
        assert_eq!(
            machine.state(),
            &SessionState::AwaitingVerification {
                account_id: AccountId::new("u1"),
                deadline: t0 + TIMEOUT,
            }
        );
        assert_eq!(machine.remaining(t0 + secs(100)), Some(secs(200)));
    }

    #[test]
    fn test_start_twice_is_ignored() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        assert_eq!(
            machine.start(AccountId::new("u2"), t0 + secs(10)),
            Effect::Ignore
        );
    }

    #[test]
    fn test_tick_before_deadline_reloads() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        assert_eq!(machine.handle(Event::Tick { now: t0 + secs(2) }), Effect::Reload);
        assert_eq!(
            machine.handle(Event::Reloaded {
                verified: false,
                now: t0 + secs(2),
            }),
            Effect::Wait {
                remaining: secs(298)
            }
        );
        assert!(machine.is_awaiting());
    }

    #[test]
    fn test_verified_commits() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        machine.handle(Event::Tick { now: t0 + secs(4) });
        assert_eq!(
            machine.handle(Event::Reloaded {
                verified: true,
                now: t0 + secs(4),
            }),
            Effect::Commit
        );
        assert_eq!(machine.state(), &SessionState::Verified(AccountId::new("u1")));
    }

    #[test]
    fn test_deadline_rolls_back() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        assert_eq!(machine.handle(Event::Tick { now: t0 + TIMEOUT }), Effect::Rollback);
        assert_eq!(machine.state(), &SessionState::TimedOut(AccountId::new("u1")));
    }

    #[test]
    fn test_unverified_reload_past_deadline_rolls_back() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        machine.handle(Event::Tick {
            now: t0 + secs(298),
        });
        assert_eq!(
            machine.handle(Event::Reloaded {
                verified: false,
                now: t0 + secs(301),
            }),
            Effect::Rollback
        );
    }

    #[test]
    fn test_verified_reload_past_deadline_still_commits() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        machine.handle(Event::Tick {
            now: t0 + secs(298),
        });
        assert_eq!(
            machine.handle(Event::Reloaded {
                verified: true,
                now: t0 + secs(301),
            }),
            Effect::Commit
        );
    }

    #[test]
    fn test_failure_stops() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        assert_eq!(
            machine.handle(Event::Failed {
                reason: "network error".to_owned()
            }),
            Effect::Stop
        );
        assert_eq!(
            machine.state(),
            &SessionState::Failed("network error".to_owned())
        );
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn test_cancel_rolls_back_before_deadline() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        machine.handle(Event::Tick { now: t0 + secs(2) });

        assert_eq!(machine.handle(Event::Cancelled), Effect::Rollback);
        assert_eq!(machine.state(), &SessionState::TimedOut(AccountId::new("u1")));
        assert_eq!(machine.remaining(t0 + secs(4)), None);
    }

    #[test]
    fn test_cancel_after_commit_is_ignored() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        machine.handle(Event::Reloaded {
            verified: true,
            now: t0 + secs(4),
        });

        assert_eq!(machine.handle(Event::Cancelled), Effect::Ignore);
        assert_eq!(machine.state(), &SessionState::Verified(AccountId::new("u1")));
    }

    #[test]
    fn test_idle_ignores_cancel() {
        let mut machine = VerificationMachine::new(TIMEOUT);
        assert_eq!(machine.handle(Event::Cancelled), Effect::Ignore);
        assert_eq!(machine.state(), &SessionState::Idle);
    }

    #[test]
    fn test_terminal_states_ignore_events() {
        let t0 = Instant::now();
        let mut machine = awaiting(t0);
        machine.handle(Event::Tick { now: t0 + TIMEOUT });

        assert_eq!(
            machine.handle(Event::Reloaded {
                verified: true,
                now: t0 + TIMEOUT,
            }),
            Effect::Ignore
        );
        assert_eq!(
            machine.handle(Event::Tick {
                now: t0 + secs(400)
            }),
            Effect::Ignore
        );
        assert_eq!(
            machine.handle(Event::Failed {
                reason: "late".to_owned()
            }),
            Effect::Ignore
        );
        assert_eq!(machine.state(), &SessionState::TimedOut(AccountId::new("u1")));
    }

    #[test]
    fn test_idle_ignores_ticks() {
        let mut machine = VerificationMachine::new(TIMEOUT);
        assert_eq!(
            machine.handle(Event::Tick {
                now: Instant::now()
            }),
            Effect::Ignore
        );
        assert_eq!(machine.state(), &SessionState::Idle);
        assert_eq!(machine.remaining(Instant::now()), None);
    }
}

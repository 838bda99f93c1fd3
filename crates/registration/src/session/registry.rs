//! One running poller per account.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::warn;

use canteen_core::AccountId;

/// Tracks the verification task running for each account.
///
/// Spawning a task for an account that already has one aborts the earlier
/// task first, so the same identity is never polled, committed, or rolled
/// back twice.
#[derive(Debug, Clone, Default)]
pub struct PollerRegistry {
    tasks: Arc<Mutex<HashMap<AccountId, AbortHandle>>>,
}

impl PollerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` as the poller for `account_id`, aborting any prior one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F>(&self, account_id: AccountId, task: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());

        if let Some(previous) = tasks.remove(&account_id) {
            warn!(account_id = %account_id, "superseding running verification poller");
            previous.abort();
        }

        let handle = tokio::spawn(task).abort_handle();
        tasks.insert(account_id, handle.clone());
        handle
    }

    /// Returns `true` if a poller for `account_id` is still running.
    #[must_use]
    pub fn is_polling(&self, account_id: &AccountId) -> bool {
        self.tasks
            .lock()
            .get(account_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of pollers still running.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    fn counting_task(counter: Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_supersedes_previous_task() {
        let registry = PollerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let account = AccountId::new("u1");

        let first_handle = registry.spawn(account.clone(), counting_task(Arc::clone(&first)));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let first_count = first.load(Ordering::SeqCst);
        assert_eq!(first_count, 2);

        registry.spawn(account.clone(), counting_task(Arc::clone(&second)));
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(first_handle.is_finished());
        assert_eq!(first.load(Ordering::SeqCst), first_count);
        assert!(second.load(Ordering::SeqCst) > 0);
        assert_eq!(registry.active_count(), 1);
        assert!(registry.is_polling(&account));
    }

    #[tokio::test]
    async fn test_finished_tasks_are_pruned() {
        let registry = PollerRegistry::new();
        registry.spawn(AccountId::new("u1"), async {});
        registry.spawn(AccountId::new("u2"), async {});
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.active_count(), 0);
    }
}

//! Per-user serialization of ledger mutations.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use kantor_common::UserId;

/// One async mutex per user.
///
/// The check-mutate-journal sequence of a trade runs while holding the
/// user's guard. Different users never contend. An entry lives only while
/// some task holds or waits for it.
#[derive(Default)]
pub struct UserLocks {
    locks: DashMap<UserId, Arc<Mutex<()>>>,
}

/// Exclusive access to one user's ledger state.
///
/// Dropping the guard releases the mutex and evicts the table entry when no
/// other task is waiting on it.
pub struct UserLockGuard<'a> {
    table: &'a DashMap<UserId, Arc<Mutex<()>>>,
    user_id: UserId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UserLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a user's ledger state.
    pub async fn acquire(&self, user_id: &UserId) -> UserLockGuard<'_> {
        // Clone the Arc so the map shard is released before awaiting.
        let lock = self
            .locks
            .entry(*user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        trace!(user_id = %user_id, "User lock acquired");
        UserLockGuard {
            table: &self.locks,
            user_id: *user_id,
            guard: Some(guard),
        }
    }

    /// Number of users with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Check if no lock is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for UserLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means only the table is left.
        self.table
            .remove_if(&self.user_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

//! Per-subject single-flight guard
//!
//! Refreshes for one subject run one at a time. Callers that queue behind
//! an in-flight refresh re-read the store once they hold the guard and find
//! the new token already there.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub(crate) struct SubjectLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SubjectLocks {
    /// Wait for exclusive access to `subject_id`.
    ///
    /// Entries nobody holds or waits on are pruned on each call, so the map
    /// only grows with concurrently active subjects.
    pub(crate) async fn acquire(&self, subject_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(subject_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_subject_is_serialized() {
        let locks = Arc::new(SubjectLocks::default());
        let guard = locks.acquire("u1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("u1").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second caller must wait for the first");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should proceed once the guard drops")
            .unwrap();
    }

    #[tokio::test]
    async fn different_subjects_do_not_block_each_other() {
        let locks = SubjectLocks::default();
        let _a = locks.acquire("u1").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("u2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = SubjectLocks::default();
        drop(locks.acquire("u1").await);
        drop(locks.acquire("u2").await);
        let _held = locks.acquire("u3").await;
        assert_eq!(locks.tracked(), 1);
    }
}

// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-session turn serialization.
//!
//! Load and save are separate store round trips, so two turns for the same
//! session racing through load → mutate → save would lose one update. Every
//! turn therefore holds that session's async mutex from load until its save
//! or delete has completed. Turns for different sessions never contend.
//!
//! The table maps session ids to *weak* handles, so an id's mutex lives only
//! while some turn holds or awaits it; dead entries are pruned as the table
//! grows.
//!
//! ## Poisoning
//!
//! The table itself sits behind a std `RwLock`. If a thread panicked while
//! holding it, we log a CRITICAL event and recover the guard instead of
//! taking down every other session's turn. The table only holds weak
//! pointers, so the worst case after recovery is a missing entry, which is
//! recreated on demand.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Table size at which dead weak entries are swept.
const PRUNE_THRESHOLD: usize = 1024;

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "security::locks",
                event = "LOCK_POISONED_READ",
                "CRITICAL: session lock table was poisoned during read acquisition. Recovering."
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "security::locks",
                event = "LOCK_POISONED_WRITE",
                "CRITICAL: session lock table was poisoned during write acquisition. Recovering."
            );
            poisoned.into_inner()
        }
    }
}

/// Held for the duration of one turn. Dropping it releases the session.
pub type SessionTurnGuard = OwnedMutexGuard<()>;

/// Lazily populated table of per-session mutexes.
#[derive(Debug, Default)]
pub struct SessionLocks {
    table: RwLock<HashMap<String, Weak<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`.
    pub async fn acquire(&self, session_id: &str) -> SessionTurnGuard {
        let mutex = self.mutex_for(session_id);
        mutex.lock_owned().await
    }

    /// Number of sessions that currently have a live mutex.
    pub fn active_count(&self) -> usize {
        resilient_read(&self.table)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    fn mutex_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = resilient_read(&self.table).get(session_id).and_then(Weak::upgrade) {
            return existing;
        }

        let mut table = resilient_write(&self.table);
        // Another task may have inserted between the read and write locks.
        if let Some(existing) = table.get(session_id).and_then(Weak::upgrade) {
            return existing;
        }

        if table.len() >= PRUNE_THRESHOLD {
            let before = table.len();
            table.retain(|_, weak| weak.strong_count() > 0);
            tracing::debug!(
                target: "security::locks",
                pruned = before - table.len(),
                "Pruned idle session locks"
            );
        }

        let mutex = Arc::new(Mutex::new(()));
        table.insert(session_id.to_string(), Arc::downgrade(&mutex));
        mutex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_resilient_write_poisoned() {
        let lock = Arc::new(RwLock::new(42));
        let lock_clone = Arc::clone(&lock);

        // Poison the lock
        let handle = thread::spawn(move || {
            let _guard = lock_clone.write().unwrap();
            panic!("intentional panic to poison lock");
        });
        let _ = handle.join();

        let mut guard = resilient_write(&lock);
        *guard = 100;
        drop(guard);

        assert_eq!(*resilient_read(&lock), 100);
    }

    #[tokio::test]
    async fn test_same_session_is_exclusive() {
        let locks = SessionLocks::new();
        let guard = locks.acquire("U1").await;

        let second = tokio::time::timeout(Duration::from_millis(50), locks.acquire("U1")).await;
        assert!(second.is_err(), "second turn acquired the session while the first held it");

        drop(guard);
        let third = tokio::time::timeout(Duration::from_millis(50), locks.acquire("U1")).await;
        assert!(third.is_ok());
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_contend() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("U1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("U2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_die_with_their_guards() {
        let locks = SessionLocks::new();
        {
            let _a = locks.acquire("U1").await;
            let _b = locks.acquire("U2").await;
            assert_eq!(locks.active_count(), 2);
        }
        assert_eq!(locks.active_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_critical_section_is_serialized() {
        let locks = Arc::new(SessionLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("shared").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked");
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}

//! Per-session mutual exclusion
//!
//! Turns on the same session run "read session → mutate context/history →
//! write session" under one async mutex, so context versions and history
//! sequence numbers are assigned in turn order. Handles are held weakly
//! and pruned on acquisition, so idle sessions cost nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held for the duration of one turn
pub type SessionGuard = OwnedMutexGuard<()>;

#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `session_id`
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let handle = self.handle(session_id);
        handle.lock_owned().await
    }

    fn handle(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        locks.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = locks.get(session_id).and_then(Weak::upgrade) {
            return existing;
        }

        let handle = Arc::new(AsyncMutex::new(()));
        locks.insert(session_id.to_string(), Arc::downgrade(&handle));
        handle
    }

    /// Number of sessions with a live lock handle
    pub fn len(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.values().filter(|w| w.strong_count() > 0).count(),
            Err(poisoned) => poisoned
                .into_inner()
                .values()
                .filter(|w| w.strong_count() > 0)
                .count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_is_exclusive() {
        let locks = SessionLocks::new();
        let guard = locks.acquire("s-1").await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire("s-1")).await;
        assert!(blocked.is_err());

        drop(guard);
        let reacquired =
            tokio::time::timeout(Duration::from_millis(50), locks.acquire("s-1")).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("s-1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("s-2")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_handles_are_released() {
        let locks = SessionLocks::new();
        {
            let _guard = locks.acquire("s-1").await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }
}

//! Per-key distributed lock.
//!
//! A lock record is a two-state flag stored at `lock:<key>`:
//!
//! ```text
//!            acquire() wins
//! UNLOCKED ─────────────────► LOCKED
//!     ▲                          │
//!     └──────── release() ───────┘
//! ```
//!
//! The record is created lazily, UNLOCKED, the first time a lock touches it,
//! and is never deleted afterwards.
//!
//! # Mutual Exclusion
//!
//! [`KvLock::acquire`] performs the `UNLOCKED → LOCKED` transition with the
//! backend's atomic compare-and-swap, so among any number of concurrent
//! callers (in this process or any other) exactly one observes `true`.
//!
//! # Known Gaps
//!
//! - [`release`](TaskLock::release) is unconditional: any caller can free a
//!   lock it never held. Callers release only locks they believe they hold.
//! - There is no lease expiry. A worker that dies while holding a lock leaves
//!   it LOCKED until someone calls `release`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{KvBackend, SetMode};
use crate::constants::{LOCKED_VALUE, UNLOCKED_VALUE};
use crate::error::StoreError;

/// State of a lock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Some worker holds the lock.
    Locked,
    /// The lock is free.
    Unlocked,
}

impl LockState {
    /// Stored encoding of this state.
    ///
    /// # Examples
    ///
    /// ```
    /// use memo_store::LockState;
    ///
    /// assert_eq!(LockState::Locked.as_bytes(), b"0");
    /// assert_eq!(LockState::Unlocked.as_bytes(), b"1");
    /// ```
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Self::Locked => LOCKED_VALUE,
            Self::Unlocked => UNLOCKED_VALUE,
        }
    }

    /// Parses a stored value. Returns `None` for anything but the two
    /// encodings.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes == LOCKED_VALUE {
            Some(Self::Locked)
        } else if bytes == UNLOCKED_VALUE {
            Some(Self::Unlocked)
        } else {
            None
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "locked"),
            Self::Unlocked => write!(f, "unlocked"),
        }
    }
}

/// Mutual-exclusion primitive for one task key.
///
/// Callers program against this trait so an ownership-checking lock can
/// replace [`KvLock`] without changing them.
#[async_trait]
pub trait TaskLock: Send + Sync {
    /// Attempts `UNLOCKED → LOCKED`.
    ///
    /// Returns `true` only to the caller that performed the transition.
    /// Losing the race is `Ok(false)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendUnavailable`] on transport failures.
    async fn acquire(&self) -> Result<bool, StoreError>;

    /// Sets the lock to UNLOCKED, whoever holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendUnavailable`] on transport failures.
    async fn release(&self) -> Result<(), StoreError>;

    /// Returns whether the lock is currently held. Never changes state.
    ///
    /// # Errors
    ///
    /// - [`StoreError::BackendUnavailable`] on transport failures.
    /// - [`StoreError::Corrupt`] if the record holds neither encoding.
    async fn is_locked(&self) -> Result<bool, StoreError>;
}

/// [`TaskLock`] stored in a [`KvBackend`].
///
/// Obtained from [`ResultStore::getlock`](crate::ResultStore::getlock); shares
/// the store's backend connection, so closing the store also disables its
/// locks.
#[derive(Debug, Clone)]
pub struct KvLock {
    backend: Arc<dyn KvBackend>,
    name: String,
    record_key: String,
}

impl KvLock {
    /// Creates a lock for task `name` whose record lives at `record_key`.
    ///
    /// Performs no I/O; the record is created on first use.
    pub fn new(backend: Arc<dyn KvBackend>, name: impl Into<String>, record_key: String) -> Self {
        Self {
            backend,
            name: name.into(),
            record_key,
        }
    }

    /// The task key this lock guards.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend key of the lock record.
    pub fn record_key(&self) -> &str {
        &self.record_key
    }

    /// Reads the current state. An absent record reads as UNLOCKED.
    ///
    /// # Errors
    ///
    /// - [`StoreError::BackendUnavailable`] on transport failures.
    /// - [`StoreError::Corrupt`] if the record holds neither encoding.
    pub async fn state(&self) -> Result<LockState, StoreError> {
        match self.backend.get(&self.record_key).await? {
            None => Ok(LockState::Unlocked),
            Some(bytes) => LockState::from_bytes(&bytes).ok_or_else(|| {
                tracing::warn!(
                    lock = %self.record_key,
                    value = %String::from_utf8_lossy(&bytes),
                    "unrecognized lock state"
                );
                StoreError::Corrupt {
                    key: self.record_key.clone(),
                    message: "unrecognized lock state".to_string(),
                }
            }),
        }
    }
}

#[async_trait]
impl TaskLock for KvLock {
    async fn acquire(&self) -> Result<bool, StoreError> {
        // First touch creates the record; a no-op once it exists.
        self.backend
            .set(&self.record_key, LockState::Unlocked.as_bytes(), SetMode::IfAbsent)
            .await?;
        let won = self
            .backend
            .compare_and_swap(
                &self.record_key,
                Some(LockState::Unlocked.as_bytes()),
                LockState::Locked.as_bytes(),
            )
            .await?;
        tracing::debug!(lock = %self.name, acquired = won, "lock acquire");
        Ok(won)
    }

    async fn release(&self) -> Result<(), StoreError> {
        self.backend
            .set(&self.record_key, LockState::Unlocked.as_bytes(), SetMode::Always)
            .await?;
        tracing::debug!(lock = %self.name, "lock released");
        Ok(())
    }

    async fn is_locked(&self) -> Result<bool, StoreError> {
        Ok(self.state().await? == LockState::Locked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;

    fn test_lock(backend: &InMemoryBackend, name: &str) -> KvLock {
        KvLock::new(
            Arc::new(backend.new_connection()),
            name,
            format!("lock:{name}"),
        )
    }

    #[test]
    fn lock_state_encoding() {
        assert_eq!(LockState::from_bytes(b"0"), Some(LockState::Locked));
        assert_eq!(LockState::from_bytes(b"1"), Some(LockState::Unlocked));
        assert_eq!(LockState::from_bytes(b"2"), None);
        assert_eq!(LockState::from_bytes(b""), None);
        assert_eq!(LockState::Locked.to_string(), "locked");
    }

    #[tokio::test]
    async fn fresh_lock_is_unlocked_and_has_no_record() {
        let backend = InMemoryBackend::new();
        let lock = test_lock(&backend, "t");
        assert!(!lock.is_locked().await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn acquire_creates_record_and_locks() {
        let backend = InMemoryBackend::new();
        let lock = test_lock(&backend, "t");
        assert!(lock.acquire().await.unwrap());
        assert!(lock.is_locked().await.unwrap());
        assert_eq!(
            backend.get("lock:t").await.unwrap(),
            Some(LOCKED_VALUE.to_vec())
        );
    }

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let backend = InMemoryBackend::new();
        let lock = test_lock(&backend, "t");
        assert!(lock.acquire().await.unwrap());
        assert!(!lock.acquire().await.unwrap());
        lock.release().await.unwrap();
        assert!(!lock.is_locked().await.unwrap());
        assert!(lock.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn release_keeps_record() {
        let backend = InMemoryBackend::new();
        let lock = test_lock(&backend, "t");
        lock.acquire().await.unwrap();
        lock.release().await.unwrap();
        assert_eq!(
            backend.get("lock:t").await.unwrap(),
            Some(UNLOCKED_VALUE.to_vec())
        );
    }

    #[tokio::test]
    async fn release_without_holding_unlocks() {
        let backend = InMemoryBackend::new();
        let holder = test_lock(&backend, "t");
        let stranger = test_lock(&backend, "t");
        assert!(holder.acquire().await.unwrap());
        stranger.release().await.unwrap();
        assert!(!holder.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_state_is_reported() {
        let backend = InMemoryBackend::new();
        backend
            .set("lock:t", b"garbage", SetMode::Always)
            .await
            .unwrap();
        let lock = test_lock(&backend, "t");
        assert!(matches!(
            lock.is_locked().await,
            Err(StoreError::Corrupt { .. })
        ));
        // A corrupt record is never mistaken for UNLOCKED.
        assert!(!lock.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn locks_on_different_keys_are_independent() {
        let backend = InMemoryBackend::new();
        let a = test_lock(&backend, "a");
        let b = test_lock(&backend, "b");
        assert!(a.acquire().await.unwrap());
        assert!(b.acquire().await.unwrap());
        assert!(!b.acquire().await.unwrap());
    }
}

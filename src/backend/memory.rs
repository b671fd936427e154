//! In-memory storage backend.
//!
//! [`InMemoryBackend`] provides a thread-safe [`KvBackend`] implementation
//! using `DashMap<String, Vec<u8>>`. It is a dumb byte store with no domain
//! logic.
//!
//! # Connections
//!
//! The map lives behind an `Arc`. [`InMemoryBackend::new_connection`] hands
//! out another connection to the same data with its own closed flag, which is
//! how tests model several worker processes talking to one server: closing
//! one connection leaves the others usable.
//!
//! # Concurrency
//!
//! `DashMap` locks at shard level, so [`compare_and_swap`](KvBackend::compare_and_swap)
//! and [`SetMode::IfAbsent`] writes are atomic across every connection that
//! shares the map.
//!
//! # Examples
//!
//! ```
//! use memo_store::{InMemoryBackend, ResultStore};
//!
//! let backend = InMemoryBackend::new();
//! let worker_a = ResultStore::new(backend.new_connection());
//! let worker_b = ResultStore::new(backend);
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::backend::{BackendError, KvBackend, SetMode};

/// Thread-safe in-memory storage backend using [`DashMap`].
#[derive(Debug)]
pub struct InMemoryBackend {
    data: Arc<DashMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    ///
    /// # Examples
    ///
    /// ```
    /// use memo_store::InMemoryBackend;
    ///
    /// let backend = InMemoryBackend::new();
    /// assert!(backend.is_empty());
    /// ```
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Opens another connection to the same data.
    ///
    /// The new connection starts open, regardless of this one's state.
    pub fn new_connection(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the number of keys stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the backend contains no keys.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!("operation attempted on a closed in-memory connection");
            return Err(BackendError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.ensure_open()?;
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, data: &[u8], mode: SetMode) -> Result<bool, BackendError> {
        self.ensure_open()?;
        match mode {
            SetMode::Always => {
                self.data.insert(key.to_string(), data.to_vec());
                Ok(true)
            },
            SetMode::IfAbsent => match self.data.entry(key.to_string()) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(data.to_vec());
                    Ok(true)
                },
            },
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, BackendError> {
        self.ensure_open()?;
        // The entry guard holds the shard lock for the whole check-and-write.
        match (self.data.entry(key.to_string()), expected) {
            (Entry::Occupied(mut slot), Some(expected)) if slot.get().as_slice() == expected => {
                slot.insert(new.to_vec());
                Ok(true)
            },
            (Entry::Vacant(slot), None) => {
                slot.insert(new.to_vec());
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        self.ensure_open()?;
        Ok(self.data.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        self.ensure_open()?;
        Ok(self.data.contains_key(key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.ensure_open()?;
        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_always_overwrites() {
        let backend = InMemoryBackend::new();
        assert!(backend.set("k", b"one", SetMode::Always).await.unwrap());
        assert!(backend.set("k", b"two", SetMode::Always).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn set_if_absent_keeps_existing() {
        let backend = InMemoryBackend::new();
        assert!(backend.set("k", b"first", SetMode::IfAbsent).await.unwrap());
        assert!(!backend.set("k", b"second", SetMode::IfAbsent).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_swap_matches_current_value() {
        let backend = InMemoryBackend::new();
        backend.set("k", b"1", SetMode::Always).await.unwrap();

        assert!(!backend.compare_and_swap("k", Some(b"0"), b"x").await.unwrap());
        assert!(backend.compare_and_swap("k", Some(b"1"), b"0").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"0".to_vec()));
        assert!(!backend.compare_and_swap("k", Some(b"1"), b"0").await.unwrap());
    }

    #[tokio::test]
    async fn compare_and_swap_expecting_absent() {
        let backend = InMemoryBackend::new();
        assert!(backend.compare_and_swap("k", None, b"v").await.unwrap());
        assert!(!backend.compare_and_swap("k", None, b"w").await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_swap_on_missing_key_with_expected_value_fails() {
        let backend = InMemoryBackend::new();
        assert!(!backend.compare_and_swap("k", Some(b"1"), b"0").await.unwrap());
        assert!(!backend.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let backend = InMemoryBackend::new();
        backend.set("k", b"v", SetMode::Always).await.unwrap();
        assert!(backend.delete("k").await.unwrap());
        assert!(!backend.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn keys_with_prefix_filters() {
        let backend = InMemoryBackend::new();
        backend.set("result:a", b"1", SetMode::Always).await.unwrap();
        backend.set("result:b", b"2", SetMode::Always).await.unwrap();
        backend.set("lock:a", b"1", SetMode::Always).await.unwrap();

        let mut keys = backend.keys_with_prefix("result:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["result:a".to_string(), "result:b".to_string()]);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_blocks_operations() {
        let backend = InMemoryBackend::new();
        backend.disconnect().await;
        backend.disconnect().await;
        assert!(backend.is_closed());
        assert!(matches!(backend.get("k").await, Err(BackendError::Closed)));
        assert!(matches!(
            backend.set("k", b"v", SetMode::Always).await,
            Err(BackendError::Closed)
        ));
        assert!(matches!(
            backend.keys_with_prefix("").await,
            Err(BackendError::Closed)
        ));
    }

    #[tokio::test]
    async fn connections_share_data_but_not_closed_state() {
        let first = InMemoryBackend::new();
        let second = first.new_connection();

        first.set("k", b"v", SetMode::Always).await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), Some(b"v".to_vec()));

        first.disconnect().await;
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(second.exists("k").await.unwrap());
        assert_eq!(second.len(), 1);
    }
}

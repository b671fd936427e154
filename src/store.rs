//! Namespaced result store.
//!
//! [`ResultStore`] implements the memoization operations (dump, can_load,
//! load, remove, cleanup) on top of any [`KvBackend`], and hands out
//! [`KvLock`]s that share its connection.
//!
//! Backends remain dumb byte stores; key layout and encoding live here.
//!
//! # Missing Keys
//!
//! [`load`](ResultStore::load) relies on the backend's typed miss and
//! returns [`StoreError::NotFound`] before the codec runs. A stored `null`
//! therefore loads as `None`, while a key that was never written is an error.
//!
//! # Garbage Collection
//!
//! [`cleanup`](ResultStore::cleanup) is a best-effort sweep, not a
//! transaction: a `dump` for a key outside the active set that lands while
//! the sweep runs may or may not survive it.
//!
//! # Connection Lifetime
//!
//! The backend connection is owned by the store and shared with its locks.
//! It is released when the last of them is dropped, on every exit path, or
//! earlier by [`close`](ResultStore::close).

use std::collections::HashSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{KvBackend, SetMode};
use crate::codec::{Codec, CodecError, JsonCodec};
use crate::error::StoreError;
use crate::keys::KeySpace;
use crate::lock::KvLock;

/// Result store over a [`KvBackend`].
///
/// # Type Parameters
///
/// * `C` - The [`Codec`] used at the storage boundary ([`JsonCodec`] by default).
///
/// # Examples
///
/// ```
/// use memo_store::{InMemoryBackend, ResultStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), memo_store::StoreError> {
/// let store = ResultStore::new(InMemoryBackend::new()).with_prefix("nightly")?;
///
/// store.dump("taskA", &vec![1, 2, 3]).await?;
/// assert!(store.can_load("taskA").await?);
///
/// let value: Vec<i32> = store.load("taskA").await?;
/// assert_eq!(value, vec![1, 2, 3]);
///
/// assert!(store.remove("taskA").await?);
/// assert!(!store.remove("taskA").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ResultStore<C: Codec = JsonCodec> {
    backend: Arc<dyn KvBackend>,
    codec: C,
    keys: KeySpace,
}

impl ResultStore<JsonCodec> {
    /// Creates a store that owns `backend`, with the JSON codec and the
    /// default key layout.
    pub fn new(backend: impl KvBackend + 'static) -> Self {
        Self::from_shared(Arc::new(backend))
    }

    /// Creates a store over an already shared backend.
    pub fn from_shared(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            codec: JsonCodec,
            keys: KeySpace::default(),
        }
    }
}

impl<C: Codec> ResultStore<C> {
    /// Replaces the codec.
    pub fn with_codec<D: Codec>(self, codec: D) -> ResultStore<D> {
        ResultStore {
            backend: self.backend,
            codec,
            keys: self.keys,
        }
    }

    /// Puts every key of this store under an isolation prefix:
    /// `{prefix}:result:{key}` and `{prefix}:lock:{key}`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPrefix`] for a prefix whose keys could
    /// overlap another store's (see [`KeySpace::validate_prefix`]).
    pub fn with_prefix(mut self, prefix: &str) -> Result<Self, StoreError> {
        self.keys = KeySpace::with_prefix(prefix)?;
        Ok(self)
    }

    /// The key layout in use.
    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    /// Stores `value` under `key`, replacing any previous result.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Encode`] if the codec cannot encode `value`.
    /// - [`StoreError::BackendUnavailable`] on transport failures or after
    ///   [`close`](Self::close).
    pub async fn dump<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = self.codec.encode(value).map_err(|e| StoreError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.backend
            .set(&self.keys.result_key(key), &bytes, SetMode::Always)
            .await?;
        tracing::debug!(key, bytes = bytes.len(), "result stored");
        Ok(())
    }

    /// Returns whether a result exists for `key`, without reading it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendUnavailable`] on transport failures or
    /// after [`close`](Self::close).
    pub async fn can_load(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.backend.exists(&self.keys.result_key(key)).await?)
    }

    /// Loads and decodes the result stored under `key`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if no result exists.
    /// - [`StoreError::Corrupt`] if the stored bytes do not decode into `T`.
    /// - [`StoreError::BackendUnavailable`] on transport failures or after
    ///   [`close`](Self::close).
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T, StoreError> {
        let record_key = self.keys.result_key(key);
        let Some(bytes) = self.backend.get(&record_key).await? else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        };
        self.codec.decode(&bytes).map_err(|e| {
            let message = match e {
                CodecError::Decode(message) | CodecError::Encode(message) => message,
            };
            tracing::warn!(key, error = %message, "stored result failed to decode");
            StoreError::Corrupt {
                key: record_key,
                message,
            }
        })
    }

    /// Deletes the result stored under `key`.
    ///
    /// Returns `true` if a result existed and was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendUnavailable`] on transport failures or
    /// after [`close`](Self::close).
    pub async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let removed = self.backend.delete(&self.keys.result_key(key)).await?;
        tracing::debug!(key, removed, "result remove");
        Ok(removed)
    }

    /// Deletes every result whose key is not in `active`.
    ///
    /// Lock records are never touched. Returns the number of results removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackendUnavailable`] on transport failures or
    /// after [`close`](Self::close). Results deleted before the failure stay
    /// deleted.
    pub async fn cleanup(&self, active: &HashSet<String>) -> Result<usize, StoreError> {
        let existing = self
            .backend
            .keys_with_prefix(self.keys.result_prefix())
            .await?;
        let scanned = existing.len();
        let mut removed = 0;
        for record_key in existing {
            let Some(key) = self.keys.task_key(&record_key) else {
                continue;
            };
            if active.contains(key) {
                continue;
            }
            if self.backend.delete(&record_key).await? {
                removed += 1;
            }
        }
        tracing::info!(scanned, removed, active = active.len(), "result cleanup finished");
        Ok(removed)
    }

    /// Returns the lock guarding `key`, bound to this store's connection.
    ///
    /// Never fails and performs no I/O; the lock record is created on first
    /// use.
    pub fn getlock(&self, key: &str) -> KvLock {
        KvLock::new(Arc::clone(&self.backend), key, self.keys.lock_key(key))
    }

    /// Releases the backend connection.
    ///
    /// Idempotent. Afterwards every operation on this store, its clones, and
    /// the locks it handed out fails with [`StoreError::BackendUnavailable`].
    pub async fn close(&self) {
        if self.backend.is_closed() {
            return;
        }
        self.backend.disconnect().await;
        tracing::info!("result store closed");
    }

    /// Returns `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.backend.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::backend::memory::InMemoryBackend;
    use crate::codec::Payload;
    use crate::lock::TaskLock;

    #[tokio::test]
    async fn dump_writes_under_result_namespace() {
        let backend = InMemoryBackend::new();
        let store = ResultStore::new(backend.new_connection());
        store.dump("taskA", &json!({"x": 1})).await.unwrap();
        assert_eq!(
            backend.get("result:taskA").await.unwrap(),
            Some(br#"{"x":1}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn load_missing_is_not_found() {
        let store = ResultStore::new(InMemoryBackend::new());
        let result: Result<Payload, _> = store.load("missing").await;
        assert!(matches!(result, Err(StoreError::NotFound { key }) if key == "missing"));
    }

    #[tokio::test]
    async fn load_undecodable_is_corrupt() {
        let backend = InMemoryBackend::new();
        backend
            .set("result:bad", b"\x80\x04garbage", SetMode::Always)
            .await
            .unwrap();
        let store = ResultStore::new(backend);
        let result: Result<Payload, _> = store.load("bad").await;
        assert!(matches!(result, Err(StoreError::Corrupt { key, .. }) if key == "result:bad"));
    }

    #[tokio::test]
    async fn empty_stored_value_is_corrupt_not_missing() {
        let backend = InMemoryBackend::new();
        backend.set("result:e", b"", SetMode::Always).await.unwrap();
        let store = ResultStore::new(backend);
        assert!(store.can_load("e").await.unwrap());
        let result: Result<Option<i32>, _> = store.load("e").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn dump_unencodable_value_fails_without_writing() {
        let backend = InMemoryBackend::new();
        let store = ResultStore::new(backend.new_connection());
        let mut value = std::collections::BTreeMap::new();
        value.insert((1, 2), "tuple keys are not JSON");
        let result = store.dump("t", &value).await;
        assert!(matches!(result, Err(StoreError::Encode { .. })));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn getlock_uses_lock_namespace() {
        let backend = InMemoryBackend::new();
        let store = ResultStore::new(backend.new_connection())
            .with_prefix("p")
            .unwrap();
        let lock = store.getlock("taskA");
        assert_eq!(lock.name(), "taskA");
        assert_eq!(lock.record_key(), "p:lock:taskA");
        assert!(lock.acquire().await.unwrap());
        assert!(backend.exists("p:lock:taskA").await.unwrap());
        assert!(!store.can_load("taskA").await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_skips_foreign_keys() {
        let backend = InMemoryBackend::new();
        backend.set("unrelated", b"1", SetMode::Always).await.unwrap();
        let store = ResultStore::new(backend.new_connection());
        store.dump("a", &1).await.unwrap();
        let removed = store.cleanup(&HashSet::new()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(backend.exists("unrelated").await.unwrap());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = ResultStore::new(InMemoryBackend::new());
        assert!(!store.is_closed());
        store.close().await;
        store.close().await;
        assert!(store.is_closed());
        assert!(matches!(
            store.can_load("k").await,
            Err(StoreError::BackendUnavailable { .. })
        ));
    }
}

//! Low-level key-value backend trait and supporting types.
//!
//! The [`KvBackend`] trait defines the contract that every storage engine
//! implements. It exposes 7 operations: [`get`](KvBackend::get),
//! [`set`](KvBackend::set), [`compare_and_swap`](KvBackend::compare_and_swap),
//! [`delete`](KvBackend::delete), [`exists`](KvBackend::exists),
//! [`keys_with_prefix`](KvBackend::keys_with_prefix), and
//! [`disconnect`](KvBackend::disconnect).
//!
//! Domain logic (key namespaces, encoding, lock states) does **not** belong
//! here. Backends are dumb byte stores; the result store and lock build on top.
//!
//! # Atomicity
//!
//! Every single-key write is atomic at the blob level: readers observe either
//! the previous value or the new one, never a mix.
//! [`compare_and_swap`](KvBackend::compare_and_swap) must be linearizable
//! across every connection to the same backend, because the distributed lock
//! relies on it for mutual exclusion between processes.
//!
//! # Backends
//!
//! - [`InMemoryBackend`](memory::InMemoryBackend) -- `DashMap` based, for tests
//!   and single-host runs.
//! - [`RedisBackend`](redis::RedisBackend) -- Redis, for workers spread over
//!   several processes or hosts. Available behind the `redis` feature flag.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;

/// Write mode for [`KvBackend::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Create or overwrite.
    Always,
    /// Write only if the key does not exist yet.
    IfAbsent,
}

/// Errors raised by a [`KvBackend`].
///
/// The result store maps these to [`StoreError`](crate::StoreError) before
/// surfacing them to callers.
///
/// # Examples
///
/// ```
/// use memo_store::BackendError;
///
/// let err = BackendError::Closed;
/// assert_eq!(err.to_string(), "connection closed");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The connection could not be established or was lost.
    #[error("connection error: {message}")]
    Connection {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The connection was released by [`KvBackend::disconnect`].
    #[error("connection closed")]
    Closed,

    /// The backend rejected a command on a specific key.
    #[error("command failed on {key}: {message}")]
    Command {
        /// The key the command targeted.
        key: String,
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Key-value storage backend.
///
/// Implementations provide raw storage primitives over opaque byte values.
/// Keys are stored and returned verbatim. None of the operations retry
/// internally; each is one round trip to the backend.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: a store and the locks derived from
/// it share one backend through an `Arc<dyn KvBackend>`.
#[async_trait]
pub trait KvBackend: Send + Sync + std::fmt::Debug {
    /// Reads the value at `key`.
    ///
    /// Returns `Ok(None)` when the key does not exist; a miss is never
    /// represented as an empty or sentinel value.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Closed`] after [`disconnect`](KvBackend::disconnect).
    /// - [`BackendError::Connection`] on transport failures.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Writes `data` at `key`.
    ///
    /// With [`SetMode::Always`] the value is created or replaced and the call
    /// returns `true`. With [`SetMode::IfAbsent`] the value is written only if
    /// the key does not exist, and the return value says whether it was.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Closed`] after [`disconnect`](KvBackend::disconnect).
    /// - [`BackendError::Connection`] on transport failures.
    async fn set(&self, key: &str, data: &[u8], mode: SetMode) -> Result<bool, BackendError>;

    /// Atomically replaces the value at `key` with `new` if the current value
    /// equals `expected`.
    ///
    /// `expected = None` means the key must not exist. Returns `true` if the
    /// swap happened, `false` if the current value did not match.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Closed`] after [`disconnect`](KvBackend::disconnect).
    /// - [`BackendError::Connection`] on transport failures.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, BackendError>;

    /// Deletes `key`. Returns `true` if the key existed.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Closed`] after [`disconnect`](KvBackend::disconnect).
    /// - [`BackendError::Connection`] on transport failures.
    async fn delete(&self, key: &str) -> Result<bool, BackendError>;

    /// Returns whether `key` exists.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Closed`] after [`disconnect`](KvBackend::disconnect).
    /// - [`BackendError::Connection`] on transport failures.
    async fn exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Lists every key starting with `prefix`, verbatim and in no particular
    /// order.
    ///
    /// # Errors
    ///
    /// - [`BackendError::Closed`] after [`disconnect`](KvBackend::disconnect).
    /// - [`BackendError::Connection`] on transport failures.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, BackendError>;

    /// Releases the connection.
    ///
    /// Idempotent. Every later call on this connection fails with
    /// [`BackendError::Closed`].
    async fn disconnect(&self);

    /// Returns `true` once [`disconnect`](KvBackend::disconnect) has run.
    fn is_closed(&self) -> bool;
}

//! Result store and cross-process task lock for memoized task execution.
//!
//! A distributed task engine hands this crate an opaque task identifier and
//! asks four things of it: does a result already exist, store or fetch that
//! result, make sure at most one worker (across processes and hosts) computes
//! it, and sweep results that are no longer reachable.
//!
//! # Overview
//!
//! ```text
//! engine ──► ResultStore ──► KvBackend (Redis / in-memory)
//!                 │
//!                 └─ getlock() ──► KvLock ──► same KvBackend
//! ```
//!
//! The usual call sequence for one task:
//!
//! 1. [`ResultStore::can_load`] -- if `true`, [`ResultStore::load`] and stop.
//! 2. [`ResultStore::getlock`] then [`TaskLock::acquire`].
//! 3. On `true`: compute, [`ResultStore::dump`], [`TaskLock::release`].
//! 4. On `false`: another worker holds it; the engine polls per its
//!    [`WaitPolicy`] until the result appears or the lock frees up.
//!
//! # Module Organization
//!
//! - [`backend`] - The [`KvBackend`] trait and its Redis and in-memory adapters
//! - [`codec`] - Value encoding at the storage boundary
//! - [`store`] - [`ResultStore`]: dump / can_load / load / remove / cleanup
//! - [`lock`] - [`TaskLock`] and the key-value backed [`KvLock`]
//! - [`keys`] - The `result:` / `lock:` key namespace
//! - [`config`] - Layered settings and the [`open_store`] factory
//! - [`error`] - [`StoreError`]
//!
//! # Example
//!
//! ```
//! use memo_store::{InMemoryBackend, ResultStore, TaskLock};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), memo_store::StoreError> {
//! let store = ResultStore::new(InMemoryBackend::new());
//!
//! if !store.can_load("taskA").await? {
//!     let lock = store.getlock("taskA");
//!     if lock.acquire().await? {
//!         store.dump("taskA", &json!({"x": 1})).await?;
//!         lock.release().await?;
//!     }
//! }
//!
//! let value: serde_json::Value = store.load("taskA").await?;
//! assert_eq!(value, json!({"x": 1}));
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod keys;
pub mod lock;
pub mod store;

// Re-exports for ergonomic access
pub use backend::memory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use backend::redis::RedisBackend;
pub use backend::{BackendError, KvBackend, SetMode};
pub use codec::{Codec, CodecError, JsonCodec, Payload};
pub use config::{open_store, ConfigError, SettingsLayer, StoreSettings, WaitPolicy};
pub use error::StoreError;
pub use keys::KeySpace;
pub use lock::{KvLock, LockState, TaskLock};
pub use store::ResultStore;

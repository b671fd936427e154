//! Backend key layout.
//!
//! Result and lock records live in two disjoint namespaces keyed by the same
//! task key:
//!
//! | Key Pattern | Value |
//! |-------------|-------|
//! | `result:{key}` | Encoded result payload |
//! | `lock:{key}` | Lock state (`"0"` locked, `"1"` unlocked) |
//!
//! An optional isolation prefix is prepended to both, giving
//! `{prefix}:result:{key}` and `{prefix}:lock:{key}`. Task keys are opaque
//! and may themselves contain `:`; they are always the tail of the backend
//! key, so stripping the namespace prefix recovers them verbatim.
//!
//! A prefix is a single segment: it may not contain `:` and may not be one
//! of the namespace names. Either would put a prefixed store's records
//! inside another store's `result:` range, where that store's `cleanup`
//! would delete them, lock records included.

use crate::constants::{KEY_SEPARATOR, LOCK_NAMESPACE, RESULT_NAMESPACE};
use crate::error::StoreError;

/// Builds and parses backend keys for one store.
///
/// # Examples
///
/// ```
/// use memo_store::KeySpace;
///
/// let keys = KeySpace::default();
/// assert_eq!(keys.result_key("taskA"), "result:taskA");
/// assert_eq!(keys.lock_key("taskA"), "lock:taskA");
///
/// let keys = KeySpace::with_prefix("nightly").unwrap();
/// assert_eq!(keys.result_key("taskA"), "nightly:result:taskA");
/// assert_eq!(keys.task_key("nightly:result:taskA"), Some("taskA"));
///
/// assert!(KeySpace::with_prefix("result").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    result_prefix: String,
    lock_prefix: String,
}

impl KeySpace {
    /// Key space with an isolation prefix in front of both namespaces.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPrefix`] if `prefix` fails
    /// [`validate_prefix`](Self::validate_prefix).
    pub fn with_prefix(prefix: &str) -> Result<Self, StoreError> {
        Self::validate_prefix(prefix)?;
        Ok(Self {
            result_prefix: format!("{prefix}{KEY_SEPARATOR}{RESULT_NAMESPACE}{KEY_SEPARATOR}"),
            lock_prefix: format!("{prefix}{KEY_SEPARATOR}{LOCK_NAMESPACE}{KEY_SEPARATOR}"),
        })
    }

    /// Checks that `prefix` keeps its store's keys disjoint from the
    /// unprefixed layout and from every other valid prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPrefix`] if `prefix` is empty, contains
    /// the `:` separator, or equals a namespace name.
    pub fn validate_prefix(prefix: &str) -> Result<(), StoreError> {
        let message = if prefix.is_empty() {
            "prefix must not be empty"
        } else if prefix.contains(KEY_SEPARATOR) {
            "prefix must not contain ':'"
        } else if prefix == RESULT_NAMESPACE || prefix == LOCK_NAMESPACE {
            "prefix must not be a namespace name"
        } else {
            return Ok(());
        };
        Err(StoreError::InvalidPrefix {
            prefix: prefix.to_string(),
            message: message.to_string(),
        })
    }

    /// Backend key of the result record for `key`.
    pub fn result_key(&self, key: &str) -> String {
        format!("{}{key}", self.result_prefix)
    }

    /// Backend key of the lock record for `key`.
    pub fn lock_key(&self, key: &str) -> String {
        format!("{}{key}", self.lock_prefix)
    }

    /// Prefix shared by every result record in this key space.
    pub fn result_prefix(&self) -> &str {
        &self.result_prefix
    }

    /// Recovers the task key from a backend result key.
    ///
    /// Returns `None` for keys outside this key space's result namespace.
    pub fn task_key<'a>(&self, backend_key: &'a str) -> Option<&'a str> {
        backend_key.strip_prefix(self.result_prefix.as_str())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self {
            result_prefix: format!("{RESULT_NAMESPACE}{KEY_SEPARATOR}"),
            lock_prefix: format!("{LOCK_NAMESPACE}{KEY_SEPARATOR}"),
        }
    }
}

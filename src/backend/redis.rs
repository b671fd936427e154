//! Redis storage backend.
//!
//! [`RedisBackend`] implements [`KvBackend`] on a Redis server. Values are
//! plain Redis strings holding the raw bytes; the 7 trait methods map to:
//!
//! | Method | Redis |
//! |--------|-------|
//! | `get` | `GET` (nil → `None`) |
//! | `set` | `SET`, or `SET ... NX` for [`SetMode::IfAbsent`] |
//! | `compare_and_swap` | Lua script: `GET`, compare, `SET` in one atomic step |
//! | `delete` | `DEL` |
//! | `exists` | `EXISTS` |
//! | `keys_with_prefix` | cursor `SCAN ... MATCH {escaped prefix}*` |
//! | `disconnect` | drops the multiplexed connection |
//!
//! Redis runs a script without interleaving other commands, which is what
//! makes [`compare_and_swap`](KvBackend::compare_and_swap) linearizable
//! across every client of the server.
//!
//! # Usage
//!
//! ```rust,no_run
//! use memo_store::{RedisBackend, ResultStore};
//!
//! # async fn example() {
//! let backend = RedisBackend::new("redis://127.0.0.1:6379/0").await.unwrap();
//! let store = ResultStore::new(backend);
//! # }
//! ```

use ::redis::aio::MultiplexedConnection;
use ::redis::{AsyncCommands, RedisError, Script};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::backend::{BackendError, KvBackend, SetMode};
use crate::constants::SCAN_BATCH_SIZE;

// ---------------------------------------------------------------------------
// Lua script constants
// ---------------------------------------------------------------------------

/// Compare-and-swap on a string key.
///
/// KEYS[1] = key.
/// ARGV[1] = "1" if the key must be absent, "0" if it must hold ARGV[2].
/// ARGV[2] = expected value (ignored when ARGV[1] is "1").
/// ARGV[3] = new value.
/// Returns: 1 if swapped, 0 otherwise.
const LUA_COMPARE_AND_SWAP: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current then
        return 0
    end
elseif current ~= ARGV[2] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3])
return 1
"#;

// ---------------------------------------------------------------------------
// RedisBackend struct
// ---------------------------------------------------------------------------

/// Redis storage backend.
///
/// # Connection Model
///
/// Holds one [`MultiplexedConnection`], cloned cheaply per call; all clones
/// share the same TCP connection, so concurrent calls from many tasks are
/// safe. [`disconnect`](KvBackend::disconnect) empties the connection slot,
/// after which every call fails with [`BackendError::Closed`] without
/// touching the network. Dropping the backend closes the socket as well.
#[derive(Debug)]
pub struct RedisBackend {
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisBackend {
    /// Creates a backend by connecting to Redis at the given URL.
    ///
    /// The URL format is `redis://[:<password>@]<host>:<port>[/<db>]`. Fails
    /// fast if the connection cannot be established.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Connection`] if the URL is invalid or the
    /// server cannot be reached.
    pub async fn new(url: &str) -> Result<Self, BackendError> {
        let client = ::redis::Client::open(url).map_err(|e| BackendError::Connection {
            message: format!("failed to create Redis client for {url}: {e}"),
            source: Some(Box::new(e)),
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BackendError::Connection {
                message: format!("failed to connect to Redis at {url}: {e}"),
                source: Some(Box::new(e)),
            })?;
        tracing::debug!(url, "connected to Redis");
        Ok(Self::with_connection(conn))
    }

    /// Creates a backend with a pre-built multiplexed connection.
    ///
    /// ```rust,no_run
    /// use memo_store::RedisBackend;
    ///
    /// # async fn example() {
    /// let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
    /// let conn = client.get_multiplexed_async_connection().await.unwrap();
    /// let backend = RedisBackend::with_connection(conn);
    /// # }
    /// ```
    pub fn with_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn: RwLock::new(Some(conn)),
        }
    }

    /// Clones the live connection out of the slot.
    fn conn(&self) -> Result<MultiplexedConnection, BackendError> {
        self.conn.read().clone().ok_or_else(|| {
            tracing::warn!("operation attempted on a closed Redis connection");
            BackendError::Closed
        })
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Maps a Redis error to a [`BackendError`].
///
/// Transport failures become [`BackendError::Connection`]; anything the
/// server answered with becomes [`BackendError::Command`].
fn map_redis_error(err: RedisError, key: &str) -> BackendError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        BackendError::Connection {
            message: format!("Redis connection lost during operation on {key}: {err}"),
            source: Some(Box::new(err)),
        }
    } else {
        BackendError::Command {
            key: key.to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Escapes Redis glob metacharacters so `prefix` matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Keeps the scanned keys that are valid UTF-8.
///
/// Other clients may write binary keys under the same prefix; those can never
/// be task keys and are skipped rather than failing the whole scan.
fn utf8_keys(batch: Vec<Vec<u8>>) -> impl Iterator<Item = String> {
    batch.into_iter().filter_map(|raw| match String::from_utf8(raw) {
        Ok(key) => Some(key),
        Err(e) => {
            tracing::warn!(
                key = %String::from_utf8_lossy(e.as_bytes()),
                "skipping non-UTF-8 key"
            );
            None
        },
    })
}

// ---------------------------------------------------------------------------
// KvBackend implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let mut conn = self.conn()?;
        conn.get(key).await.map_err(|e| map_redis_error(e, key))
    }

    async fn set(&self, key: &str, data: &[u8], mode: SetMode) -> Result<bool, BackendError> {
        let mut conn = self.conn()?;
        match mode {
            SetMode::Always => {
                let () = conn
                    .set(key, data)
                    .await
                    .map_err(|e| map_redis_error(e, key))?;
                Ok(true)
            },
            SetMode::IfAbsent => conn
                .set_nx(key, data)
                .await
                .map_err(|e| map_redis_error(e, key)),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: &[u8],
    ) -> Result<bool, BackendError> {
        let mut conn = self.conn()?;
        let (expect_absent, expected) = match expected {
            Some(value) => ("0", value),
            None => ("1", &[][..]),
        };
        let swapped: i64 = Script::new(LUA_COMPARE_AND_SWAP)
            .key(key)
            .arg(expect_absent)
            .arg(expected)
            .arg(new)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error(e, key))?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn()?;
        let removed: i64 = conn.del(key).await.map_err(|e| map_redis_error(e, key))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn()?;
        conn.exists(key).await.map_err(|e| map_redis_error(e, key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let mut conn = self.conn()?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<Vec<u8>>) = ::redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(e, prefix))?;
            keys.extend(utf8_keys(batch));
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once while the keyspace is rehashing.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn disconnect(&self) {
        if self.conn.write().take().is_some() {
            tracing::debug!("Redis connection released");
        }
    }

    fn is_closed(&self) -> bool {
        self.conn.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_glob_leaves_plain_text() {
        assert_eq!(escape_glob("result:"), "result:");
        assert_eq!(escape_glob("run-1:result:"), "run-1:result:");
    }

    #[test]
    fn utf8_keys_skips_binary_keys() {
        let batch = vec![
            b"result:a".to_vec(),
            vec![b'r', b'e', b's', b'u', b'l', b't', b':', 0xff, 0xfe],
            "result:\u{e9}t\u{e9}".as_bytes().to_vec(),
        ];
        let keys: Vec<String> = utf8_keys(batch).collect();
        assert_eq!(keys, vec!["result:a".to_string(), "result:\u{e9}t\u{e9}".to_string()]);
    }

    #[test]
    fn escape_glob_escapes_metacharacters() {
        assert_eq!(escape_glob("a*b?"), "a\\*b\\?");
        assert_eq!(escape_glob("[x]"), "\\[x\\]");
        assert_eq!(escape_glob("back\\slash"), "back\\\\slash");
    }
}

// ---------------------------------------------------------------------------
// Integration tests -- Redis backend contract tests
// ---------------------------------------------------------------------------

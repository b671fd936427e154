//! Key namespace names, lock state encodings, and configuration defaults.

/// Namespace segment for result records (`result:<key>`).
pub const RESULT_NAMESPACE: &str = "result";

/// Namespace segment for lock records (`lock:<key>`).
pub const LOCK_NAMESPACE: &str = "lock";

/// Separator between namespace segments and the task key.
pub const KEY_SEPARATOR: char = ':';

/// Stored value of a held lock.
pub const LOCKED_VALUE: &[u8] = b"0";

/// Stored value of a free lock.
pub const UNLOCKED_VALUE: &[u8] = b"1";

/// Backend URL used when neither the caller nor a config file supplies one.
pub const DEFAULT_BACKEND_URL: &str = "redis://127.0.0.1:6379/0";

/// Seconds the engine sleeps between polls of a result held by another worker.
pub const DEFAULT_WAIT_CYCLE_TIME_SECS: u64 = 12;

/// Number of polls before the engine gives up (30 minutes at the default cycle).
pub const DEFAULT_NR_WAIT_CYCLES: u32 = (30 * 60 / DEFAULT_WAIT_CYCLE_TIME_SECS) as u32;

/// Number of keys requested per `SCAN` round trip during prefix enumeration.
pub const SCAN_BATCH_SIZE: usize = 500;

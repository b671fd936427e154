//! Store configuration, resolved once at startup.
//!
//! Settings come from up to three places, highest precedence first:
//!
//! 1. explicit values (typically command-line flags), as a [`SettingsLayer`]
//! 2. a TOML config file, parsed into a [`SettingsLayer`]
//! 3. built-in defaults
//!
//! [`StoreSettings::resolve`] merges the layers field by field and validates
//! the result. The resolved struct is immutable and is what [`open_store`]
//! consumes.
//!
//! # Example TOML
//!
//! ```toml
//! [backend]
//! url = "redis://127.0.0.1:6379/0"
//! key_prefix = "nightly"
//!
//! [execute]
//! wait_cycle_time_secs = 12
//! nr_wait_cycles = 150
//! ```
//!
//! The `[execute]` section is not used by the store itself; it is carried
//! through as a [`WaitPolicy`] for the engine's polling loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::memory::InMemoryBackend;
use crate::backend::KvBackend;
use crate::constants::{DEFAULT_BACKEND_URL, DEFAULT_NR_WAIT_CYCLES, DEFAULT_WAIT_CYCLE_TIME_SECS};
use crate::error::StoreError;
use crate::keys::KeySpace;
use crate::store::ResultStore;

/// Errors that occur while reading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file contains invalid TOML or unknown fields.
    #[error("Failed to parse config TOML: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    /// The config file could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        source: std::io::Error,
        path: String,
    },

    /// The merged settings are invalid.
    #[error("Config validation error: {message}")]
    Validation { message: String },
}

/// `[backend]` section of a settings layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendLayer {
    /// Backend URL: `redis://host:port/db` or `memory://`.
    pub url: Option<String>,
    /// Isolation prefix put in front of every key.
    pub key_prefix: Option<String>,
}

/// `[execute]` section of a settings layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecuteLayer {
    /// Seconds between polls while another worker holds a task.
    pub wait_cycle_time_secs: Option<u64>,
    /// Polls before giving up on a held task.
    pub nr_wait_cycles: Option<u32>,
}

/// One partially specified source of settings.
///
/// Every field is optional; unset fields fall through to the next layer.
///
/// # Examples
///
/// ```
/// use memo_store::SettingsLayer;
///
/// let file = SettingsLayer::from_toml(r#"
///     [backend]
///     url = "redis://cache:6379/2"
/// "#).unwrap();
/// assert_eq!(file.backend.url.as_deref(), Some("redis://cache:6379/2"));
///
/// let cli = SettingsLayer::default().with_key_prefix("nightly");
/// assert_eq!(cli.backend.key_prefix.as_deref(), Some("nightly"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsLayer {
    /// Backend connection settings.
    #[serde(default)]
    pub backend: BackendLayer,
    /// Wait/retry settings for the engine.
    #[serde(default)]
    pub execute: ExecuteLayer,
}

impl SettingsLayer {
    /// Parses a layer from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or unknown fields.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads and parses a layer from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if its content is malformed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Sets the backend URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.backend.url = Some(url.into());
        self
    }

    /// Sets the key isolation prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.backend.key_prefix = Some(prefix.into());
        self
    }

    /// Sets the poll interval in seconds.
    pub fn with_wait_cycle_time_secs(mut self, secs: u64) -> Self {
        self.execute.wait_cycle_time_secs = Some(secs);
        self
    }

    /// Sets the number of polls.
    pub fn with_nr_wait_cycles(mut self, cycles: u32) -> Self {
        self.execute.nr_wait_cycles = Some(cycles);
        self
    }
}

/// How long the engine waits on a task another worker holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Time between polls.
    pub cycle_time: Duration,
    /// Number of polls before giving up.
    pub max_cycles: u32,
}

impl WaitPolicy {
    /// Upper bound on the total time spent waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use memo_store::WaitPolicy;
    /// use std::time::Duration;
    ///
    /// assert_eq!(WaitPolicy::default().total_wait(), Duration::from_secs(30 * 60));
    /// ```
    pub fn total_wait(&self) -> Duration {
        self.cycle_time.saturating_mul(self.max_cycles)
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            cycle_time: Duration::from_secs(DEFAULT_WAIT_CYCLE_TIME_SECS),
            max_cycles: DEFAULT_NR_WAIT_CYCLES,
        }
    }
}

/// Fully resolved store settings.
///
/// # Defaults
///
/// | Setting | Default |
/// |---------|---------|
/// | `backend_url` | `redis://127.0.0.1:6379/0` |
/// | `key_prefix` | none |
/// | `wait.cycle_time` | 12 s |
/// | `wait.max_cycles` | 150 (30 minutes) |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Backend URL.
    pub backend_url: String,
    /// Isolation prefix, if any.
    pub key_prefix: Option<String>,
    /// Wait parameters handed to the engine.
    pub wait: WaitPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            key_prefix: None,
            wait: WaitPolicy::default(),
        }
    }
}

impl StoreSettings {
    /// Merges `explicit` over `file` over the defaults, then validates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the URL does not parse, the
    /// prefix is rejected by [`KeySpace::validate_prefix`], or the wait cycle
    /// time is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use memo_store::{SettingsLayer, StoreSettings};
    ///
    /// let file = SettingsLayer::default()
    ///     .with_url("redis://cache:6379/1")
    ///     .with_nr_wait_cycles(10);
    /// let cli = SettingsLayer::default().with_url("memory://");
    ///
    /// let settings = StoreSettings::resolve(&cli, Some(&file)).unwrap();
    /// assert_eq!(settings.backend_url, "memory://");
    /// assert_eq!(settings.wait.max_cycles, 10);
    /// ```
    pub fn resolve(
        explicit: &SettingsLayer,
        file: Option<&SettingsLayer>,
    ) -> Result<Self, ConfigError> {
        let empty = SettingsLayer::default();
        let file = file.unwrap_or(&empty);
        let defaults = Self::default();

        let settings = Self {
            backend_url: explicit
                .backend
                .url
                .clone()
                .or_else(|| file.backend.url.clone())
                .unwrap_or(defaults.backend_url),
            key_prefix: explicit
                .backend
                .key_prefix
                .clone()
                .or_else(|| file.backend.key_prefix.clone()),
            wait: WaitPolicy {
                cycle_time: explicit
                    .execute
                    .wait_cycle_time_secs
                    .or(file.execute.wait_cycle_time_secs)
                    .map_or(defaults.wait.cycle_time, Duration::from_secs),
                max_cycles: explicit
                    .execute
                    .nr_wait_cycles
                    .or(file.execute.nr_wait_cycles)
                    .unwrap_or(defaults.wait.max_cycles),
            },
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Checks the settings for values no backend can work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.backend_url).map_err(|e| ConfigError::Validation {
            message: format!("invalid backend url '{}': {e}", self.backend_url),
        })?;
        if let Some(prefix) = self.key_prefix.as_deref() {
            KeySpace::validate_prefix(prefix).map_err(|e| ConfigError::Validation {
                message: format!("key_prefix: {e}"),
            })?;
        }
        if self.wait.cycle_time.is_zero() {
            return Err(ConfigError::Validation {
                message: "wait_cycle_time_secs must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Opens a [`ResultStore`] for the resolved settings.
///
/// The backend is chosen by URL scheme:
///
/// | Scheme | Backend |
/// |--------|---------|
/// | `redis`, `rediss`, `redis+unix`, `unix` | [`RedisBackend`](crate::RedisBackend) (feature `redis`) |
/// | `memory` | a fresh, private [`InMemoryBackend`] |
///
/// # Errors
///
/// - [`StoreError::ConfigurationMissing`] if the scheme is unknown, or names
///   a backend this build was compiled without.
/// - [`StoreError::BackendUnavailable`] if the backend cannot be reached.
///
/// # Examples
///
/// ```
/// use memo_store::{open_store, SettingsLayer, StoreSettings};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cli = SettingsLayer::default().with_url("memory://");
/// let settings = StoreSettings::resolve(&cli, None)?;
/// let store = open_store(&settings).await?;
/// assert!(!store.can_load("taskA").await?);
/// # Ok(())
/// # }
/// ```
pub async fn open_store(settings: &StoreSettings) -> Result<ResultStore, StoreError> {
    let url = url::Url::parse(&settings.backend_url).map_err(|e| {
        StoreError::ConfigurationMissing {
            message: format!("invalid backend url '{}': {e}", settings.backend_url),
        }
    })?;
    let backend: Arc<dyn KvBackend> = match url.scheme() {
        "memory" => Arc::new(InMemoryBackend::new()),
        "redis" | "rediss" | "redis+unix" | "unix" => connect_redis(&settings.backend_url).await?,
        other => {
            return Err(StoreError::ConfigurationMissing {
                message: format!("no backend for url scheme '{other}'"),
            })
        },
    };
    tracing::info!(
        scheme = url.scheme(),
        key_prefix = settings.key_prefix.as_deref().unwrap_or(""),
        "result store opened"
    );
    let store = ResultStore::from_shared(backend);
    match settings.key_prefix.as_deref() {
        Some(prefix) => store.with_prefix(prefix),
        None => Ok(store),
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str) -> Result<Arc<dyn KvBackend>, StoreError> {
    let backend = crate::backend::redis::RedisBackend::new(url).await?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(url: &str) -> Result<Arc<dyn KvBackend>, StoreError> {
    Err(StoreError::ConfigurationMissing {
        message: format!("'{url}' needs Redis support, which this build was compiled without"),
    })
}

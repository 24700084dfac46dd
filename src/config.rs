//! Store configuration.
//!
//! Built in code with the fluent setters or loaded from a TOML file. Every
//! field has a default, so an empty file (or no file) is a valid config:
//!
//! ```toml
//! root = "/var/lib/vcsdb"
//! engines = ["sqlite_fs"]
//!
//! [retry]
//! attempts = 5
//! backoff_ms = 50
//!
//! [sqlite]
//! busy_timeout_ms = 2000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{VcsError, VcsResult};

/// Store configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory every engine keeps its data under.
    pub root: PathBuf,
    /// Engines to register; empty means all built-in engines.
    pub engines: Vec<String>,
    /// How lock contention is retried.
    pub retry: RetryPolicy,
    /// SQLite tuning for the `sqlite_fs` engine.
    pub sqlite: SqliteConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./repositories"),
            engines: Vec::new(),
            retry: RetryPolicy::default(),
            sqlite: SqliteConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Create a new configuration rooted at the given path.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Restrict the engines that get registered.
    pub fn engines<I, S>(mut self, engines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.engines = engines.into_iter().map(Into::into).collect();
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry = RetryPolicy {
            attempts,
            backoff_ms: backoff.as_millis() as u64,
        };
        self
    }

    /// Set the SQLite busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.sqlite.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Parse a TOML document.
    pub fn from_toml_str(raw: &str) -> VcsResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> VcsResult<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| VcsError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&raw)
    }

    /// Whether the named engine should be registered.
    pub fn engine_enabled(&self, name: &str) -> bool {
        self.engines.is_empty() || self.engines.iter().any(|e| e == name)
    }

    /// Directory owned by one engine.
    pub fn engine_root(&self, engine: &str) -> PathBuf {
        self.root.join(engine)
    }

    fn validate(&self) -> VcsResult<()> {
        if self.retry.attempts == 0 {
            return Err(VcsError::Config("retry.attempts must be at least 1".to_string()));
        }
        if self.root.as_os_str().is_empty() {
            return Err(VcsError::Config("root must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Bounded retry of lock contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries, including the first.
    pub attempts: u32,
    /// Fixed pause between tries.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 25,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

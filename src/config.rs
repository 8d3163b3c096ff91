//! Thread manager configuration

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::ConfigError;
use crate::zone::MAX_CONTENT_ZONES;

/// Default bounded wait for `try_lock_zone`
pub const DEFAULT_TRY_LOCK_TIMEOUT: Duration = Duration::from_millis(crate::limits::TRY_LOCK_TIMEOUT_MS);

/// Default pause before contending for a zone someone is try-locking
pub const DEFAULT_CONTENDED_BACKOFF: Duration = Duration::from_micros(crate::limits::CONTENDED_BACKOFF_US);

/// Environment variable overriding the content zone count
pub const ENV_CONTENT_ZONES: &str = "BINIX_CONTENT_ZONES";
/// Environment variable overriding the try-lock timeout in milliseconds
pub const ENV_TRY_LOCK_MS: &str = "BINIX_TRY_LOCK_MS";
/// Environment variable enabling stall backtrace dumps
pub const ENV_DUMP_BACKTRACES: &str = "DUMP_BACKTRACES";

const DEFAULT_BACKTRACE_FILE: &str = "backtrace.txt";

/// Configuration for a [`ThreadManager`](crate::ThreadManager)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Number of content zones in the pool
    pub content_zones: usize,
    /// Bounded wait used by `try_lock_zone`
    pub try_lock_timeout: Duration,
    /// Pause taken by a blocking lock when a timed waiter is queued on the zone
    pub contended_backoff: Duration,
    /// File that stall backtraces are appended to, if any
    pub backtrace_file: Option<PathBuf>,
    /// Name prefix for spawned threads
    pub thread_name_prefix: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            content_zones: MAX_CONTENT_ZONES,
            try_lock_timeout: DEFAULT_TRY_LOCK_TIMEOUT,
            contended_backoff: DEFAULT_CONTENDED_BACKOFF,
            backtrace_file: None,
            thread_name_prefix: "zone-exec".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `BINIX_CONTENT_ZONES`, `BINIX_TRY_LOCK_MS`
    /// and `DUMP_BACKTRACES`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_CONTENT_ZONES) {
            config.content_zones = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_CONTENT_ZONES,
                    value: value.clone(),
                })?;
        }

        if let Some(value) = lookup(ENV_TRY_LOCK_MS) {
            let millis: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: ENV_TRY_LOCK_MS,
                value: value.clone(),
            })?;
            config.try_lock_timeout = Duration::from_millis(millis);
        }

        // Any non-empty value turns dumping on; anything but "1" names the file.
        if let Some(value) = lookup(ENV_DUMP_BACKTRACES) {
            let value = value.trim();
            if !value.is_empty() {
                let path = if value == "1" { DEFAULT_BACKTRACE_FILE } else { value };
                config.backtrace_file = Some(PathBuf::from(path));
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the content zone count
    pub fn with_content_zones(mut self, count: usize) -> Self {
        self.content_zones = count;
        self
    }

    /// Set the try-lock timeout
    pub fn with_try_lock_timeout(mut self, timeout: Duration) -> Self {
        self.try_lock_timeout = timeout;
        self
    }

    /// Set the contended backoff
    pub fn with_contended_backoff(mut self, backoff: Duration) -> Self {
        self.contended_backoff = backoff;
        self
    }

    /// Append stall backtraces to `path`
    pub fn with_backtrace_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.backtrace_file = Some(path.into());
        self
    }

    /// Set the spawned thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: &str) -> Self {
        self.thread_name_prefix = prefix.to_string();
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_zones == 0 || self.content_zones > MAX_CONTENT_ZONES {
            return Err(ConfigError::ContentZones(self.content_zones));
        }
        if self.try_lock_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

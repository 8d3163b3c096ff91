//! Error types for the Binix thread manager
//!
//! Only recoverable failures live here. Misuse of the zone locks
//! (double release, wrong-thread release, bad zone ids) panics instead.

use std::io;

/// Main error type for thread manager operations
#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    /// The manager was never initialised or has already shut down
    #[error("thread manager is not initialized")]
    NotInitialized,
    /// The target thread no longer accepts events
    #[error("thread {0} is shut down")]
    ShutDown(String),
    /// The OS refused to start a thread
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
    /// A dispatched task was dropped before it produced a reply
    #[error("reply channel for thread {0} disconnected")]
    Disconnected(String),
    /// Invalid manager configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration-specific errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Content zone count outside `1..=MAX_CONTENT_ZONES`
    #[error("content zone count {0} is out of range (1..={max})", max = crate::zone::MAX_CONTENT_ZONES)]
    ContentZones(usize),
    /// Try-lock timeout must be non-zero
    #[error("try-lock timeout must be greater than zero")]
    ZeroTimeout,
    /// An environment override could not be parsed
    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Convenience Result type for thread manager operations
pub type Result<T> = std::result::Result<T, ThreadError>;

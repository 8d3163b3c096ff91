//! # Binix Threads - Zone Locking and Thread Management
//!
//! The concurrency core of the Binix engine. Engine state is split into
//! *zones*: one privileged chrome zone for trusted host execution and a
//! fixed pool of content zones handed out to isolated execution contexts.
//! Threads take zones with reentrant, optionally sticky locks.
//!
//! ## Architecture
//!
//! - **zone**: zone identifiers, the per-zone lock and the zone table
//! - **thread**: thread tokens, managed threads with event queues, and the registry
//! - **manager**: the [`ThreadManager`] context with the locking engine and allocator
//! - **guards**: scoped lock guards
//! - **thread_utils**: convenience functions for dispatch and zone queries
//! - **diagnostics**: stall reports and backtrace dumps
//! - **config**: manager configuration
//! - **utils**: shared utilities and error types

pub mod config;
pub mod diagnostics;
pub mod guards;
pub mod manager;
pub mod thread;
pub mod thread_utils;
pub mod utils;
pub mod zone;

// Re-export main types for convenience
pub use config::ManagerConfig;
pub use manager::{LockProfile, LockProfiles, ThreadManager};
pub use thread::{ManagedThread, ThreadKind, ThreadToken};
pub use utils::error::{ConfigError, Result, ThreadError};
pub use zone::{ZoneDepth, ZoneId};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = "Binix Threads";

/// Fixed limits of the zone model
pub mod limits {
    /// Maximum number of content zones
    pub const MAX_CONTENT_ZONES: usize = crate::zone::MAX_CONTENT_ZONES;
    /// Default try-lock timeout in milliseconds
    pub const TRY_LOCK_TIMEOUT_MS: u64 = 1000;
    /// Default backoff before contending with a timed waiter, in microseconds
    pub const CONTENDED_BACKOFF_US: u64 = 400;
}

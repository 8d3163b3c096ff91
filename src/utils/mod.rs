//! Shared utilities: error types and native stack probing

pub mod error;
pub mod stack;

pub use error::{ConfigError, Result, ThreadError};
pub use stack::current_stack_position;

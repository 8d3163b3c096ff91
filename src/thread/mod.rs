//! Managed threads and the registry mapping OS threads to them
//!
//! - [`ThreadToken`]: native identity of an OS thread
//! - [`ManagedThread`]: shared handle with an event queue for posting work
//! - [`ThreadRegistry`]: table of managed threads plus the thread-local
//!   "current thread" slot

mod managed;
mod registry;
mod token;

pub use managed::{ManagedThread, Task, ThreadKind, ThreadState};
pub use registry::ThreadRegistry;
pub use token::ThreadToken;

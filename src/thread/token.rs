//! Native thread identity

use std::cell::Cell;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_TOKEN: Cell<u64> = const { Cell::new(0) };
}

/// Identity of an OS thread, stable for the thread's lifetime.
///
/// Tokens are never reused, so a stale token can only ever fail to match.
/// The raw value fits in an atomic, which is how zones record their owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadToken(NonZeroU64);

impl ThreadToken {
    /// Token of the calling thread, assigned on first use
    pub fn current() -> Self {
        CURRENT_TOKEN.with(|cell| {
            let raw = cell.get();
            if raw != 0 {
                return Self::from_nonzero(raw);
            }
            let raw = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
            cell.set(raw);
            Self::from_nonzero(raw)
        })
    }

    /// Reserve a token for a thread that has not started yet
    pub(crate) fn reserve() -> Self {
        Self::from_nonzero(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Make `self` the calling thread's token. Must run before the thread
    /// asks for its token any other way.
    pub(crate) fn adopt(self) {
        CURRENT_TOKEN.with(|cell| {
            assert_eq!(cell.get(), 0, "thread already has a token");
            cell.set(self.as_u64());
        });
    }

    /// Raw value, never zero
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }

    /// Inverse of [`as_u64`](Self::as_u64); zero means "no thread"
    pub fn from_u64(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    fn from_nonzero(raw: u64) -> Self {
        Self(NonZeroU64::new(raw).expect("thread tokens start at 1"))
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

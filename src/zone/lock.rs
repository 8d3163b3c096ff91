//! A single zone lock: reentrant, optionally sticky, with timed acquisition

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RawMutex;
use parking_lot::lock_api::{RawMutex as _, RawMutexTimed as _};

use super::{ZoneId, ZoneSnapshot};
use crate::thread::ThreadToken;
use crate::utils::current_stack_position;

/// Result of [`Zone::try_acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryAcquire {
    /// Caller already owned the zone; depth bumped
    Reentered,
    /// Raw lock taken within the timeout
    Acquired { waited: Duration },
    /// Timed out; the zone is now marked stalled
    TimedOut {
        waited: Duration,
        holder: Option<ThreadToken>,
        /// Releases observed while waiting
        releases: u64,
    },
    /// Zone was already stalled and still held, so no wait was attempted
    StillStalled { holder: Option<ThreadToken> },
}

impl TryAcquire {
    pub fn succeeded(&self) -> bool {
        matches!(self, TryAcquire::Reentered | TryAcquire::Acquired { .. })
    }
}

/// One exclusion domain.
///
/// `raw` is the only real synchronisation. `depth`, `sticky` and `stalled`
/// are written by the owner, or by a thread that has just taken `raw`;
/// they are atomics so other threads may read them for diagnostics.
pub struct Zone {
    id: ZoneId,
    raw: RawMutex,
    owner: AtomicU64,
    depth: AtomicUsize,
    sticky: AtomicBool,
    stalled: AtomicBool,
    waiting: AtomicBool,
    stack_position: AtomicUsize,
    unlock_count: AtomicU64,
}

impl Zone {
    pub fn new(id: ZoneId) -> Self {
        Self {
            id,
            raw: RawMutex::INIT,
            owner: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
            sticky: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            waiting: AtomicBool::new(false),
            stack_position: AtomicUsize::new(0),
            unlock_count: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ZoneId {
        self.id
    }

    /// Current holder. Racy for other threads, but a thread can never see
    /// itself become or stop being the owner behind its back.
    pub fn owner(&self) -> Option<ThreadToken> {
        ThreadToken::from_u64(self.owner.load(Ordering::Acquire))
    }

    pub fn is_owned_by(&self, token: ThreadToken) -> bool {
        self.owner.load(Ordering::Acquire) == token.as_u64()
    }

    /// Raw depth including the sticky hold
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn is_sticky(&self) -> bool {
        self.sticky.load(Ordering::Relaxed)
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Relaxed)
    }

    /// A thread is inside a timed wait for this zone
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Stack position of the thread that last fully released the zone
    pub fn stack_position(&self) -> usize {
        self.stack_position.load(Ordering::Relaxed)
    }

    pub fn unlock_count(&self) -> u64 {
        self.unlock_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> ZoneSnapshot {
        ZoneSnapshot {
            id: self.id,
            owner: self.owner(),
            depth: self.depth(),
            sticky: self.is_sticky(),
            stalled: self.is_stalled(),
            waiting: self.is_waiting(),
            unlock_count: self.unlock_count(),
            stack_position: self.stack_position(),
        }
    }

    /// Acquire for the calling thread, blocking as long as it takes.
    pub fn acquire(&self, sticky: bool) {
        let current = ThreadToken::current();
        if self.is_owned_by(current) {
            self.reenter(sticky);
        } else {
            self.lock_exclusive(current, sticky);
        }
    }

    /// Acquire with a bounded wait. Never blocks longer than `timeout`.
    pub fn try_acquire(&self, sticky: bool, timeout: Duration) -> TryAcquire {
        let current = ThreadToken::current();
        if self.is_owned_by(current) {
            self.reenter(sticky);
            return TryAcquire::Reentered;
        }

        let holder = self.owner();
        if self.is_stalled() && holder.is_some() {
            return TryAcquire::StillStalled { holder };
        }

        let releases_before = self.unlock_count();
        let start = Instant::now();

        self.waiting.store(true, Ordering::Relaxed);
        let locked = self.raw.try_lock_for(timeout);
        self.waiting.store(false, Ordering::Relaxed);

        let waited = start.elapsed();
        if locked {
            self.take_ownership(current, 1, sticky);
            self.stalled.store(false, Ordering::Relaxed);
            TryAcquire::Acquired { waited }
        } else {
            self.stalled.store(true, Ordering::Relaxed);
            TryAcquire::TimedOut {
                waited,
                holder: self.owner(),
                releases: self.unlock_count().wrapping_sub(releases_before),
            }
        }
    }

    /// Drop one level of the caller's hold. When the zone becomes free,
    /// returns the caller's stack position recorded at the release.
    pub fn release(&self) -> Option<usize> {
        let current = ThreadToken::current();
        assert!(
            self.is_owned_by(current),
            "zone {} released by thread {} but owned by {:?}",
            self.id,
            current,
            self.owner()
        );
        let depth = self.depth();
        assert!(depth > 0, "zone {} released with zero depth", self.id);
        assert!(
            !(self.is_sticky() && depth == 1),
            "zone {} released below its sticky hold; unstick it instead",
            self.id
        );

        self.depth.store(depth - 1, Ordering::Relaxed);
        (depth == 1).then(|| self.release_fully())
    }

    /// Remove the caller's sticky hold. Fatal if the caller does not hold
    /// the zone sticky. Returns the stack position when the zone became free.
    pub fn unstick(&self) -> Option<usize> {
        let current = ThreadToken::current();
        assert!(
            self.is_owned_by(current),
            "zone {} unstuck by non-owner {}",
            self.id,
            current
        );
        assert!(
            self.is_sticky(),
            "zone {} unstuck without a sticky hold",
            self.id
        );

        self.sticky.store(false, Ordering::Relaxed);
        let depth = self.depth();
        debug_assert!(depth > 0);
        self.depth.store(depth - 1, Ordering::Relaxed);
        (depth == 1).then(|| self.release_fully())
    }

    /// Fully release the caller's hold, remembering it for [`SavedZone::restore`]
    pub fn save(&self) -> SavedZone<'_> {
        let current = ThreadToken::current();
        assert!(
            self.is_owned_by(current),
            "zone {} saved by non-owner {}",
            self.id,
            current
        );
        let saved = SavedZone {
            zone: self,
            depth: self.depth(),
            sticky: self.is_sticky(),
        };
        self.depth.store(0, Ordering::Relaxed);
        self.sticky.store(false, Ordering::Relaxed);
        self.unlock_raw();
        saved
    }

    pub(crate) fn reenter(&self, sticky: bool) {
        // A sticky request on a zone already held sticky adds nothing.
        if !sticky || !self.is_sticky() {
            self.depth.fetch_add(1, Ordering::Relaxed);
        }
        if sticky {
            self.sticky.store(true, Ordering::Relaxed);
        }
    }

    pub(crate) fn lock_exclusive(&self, owner: ThreadToken, sticky: bool) {
        self.raw.lock();
        self.take_ownership(owner, 1, sticky);
    }

    fn take_ownership(&self, owner: ThreadToken, depth: usize, sticky: bool) {
        assert!(
            self.owner().is_none(),
            "zone {} locked while still owned by {:?}",
            self.id,
            self.owner()
        );
        self.depth.store(depth, Ordering::Relaxed);
        self.sticky.store(sticky, Ordering::Relaxed);
        self.owner.store(owner.as_u64(), Ordering::Release);
    }

    fn release_fully(&self) -> usize {
        let position = current_stack_position();
        self.stack_position.store(position, Ordering::Relaxed);
        self.unlock_raw();
        position
    }

    fn unlock_raw(&self) {
        self.owner.store(0, Ordering::Release);
        self.stalled.store(false, Ordering::Relaxed);
        self.unlock_count.fetch_add(1, Ordering::Relaxed);
        // SAFETY: callers checked that this thread owns the zone, and the
        // owner field is only set while `raw` is held.
        unsafe { self.raw.unlock() };
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("id", &self.id)
            .field("owner", &self.owner())
            .field("depth", &self.depth())
            .field("sticky", &self.is_sticky())
            .field("stalled", &self.is_stalled())
            .finish()
    }
}

/// A zone released for relocking, with the accounting needed to put it back
#[must_use = "a saved zone stays released until restored"]
#[derive(Debug)]
pub struct SavedZone<'a> {
    zone: &'a Zone,
    depth: usize,
    sticky: bool,
}

impl SavedZone<'_> {
    pub fn zone(&self) -> ZoneId {
        self.zone.id
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn sticky(&self) -> bool {
        self.sticky
    }

    /// Block until the zone is free, then reinstate the saved depth and
    /// stickiness for `owner`.
    pub fn restore(self, owner: ThreadToken) {
        self.zone.raw.lock();
        self.zone.take_ownership(owner, self.depth, self.sticky);
    }
}

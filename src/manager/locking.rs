//! Zone locking engine
//!
//! Blocking acquisition of a content zone first releases every zone the
//! caller holds that comes later in the lock order (chrome, then content
//! zones with a lower index), and reacquires them afterwards. The lock
//! order is content zones from high to low index, then chrome.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{LockProfile, ThreadManager};
use crate::diagnostics::StallReport;
use crate::thread::ThreadToken;
use crate::zone::{HeldZones, SavedZone, TryAcquire, Zone, ZoneDepth, ZoneId, has_bit};

impl ThreadManager {
    /// Acquire `zone` for the calling thread, blocking until it is free
    pub fn lock_zone(&self, zone: ZoneId, sticky: bool) {
        assert!(
            !sticky || zone.is_content(),
            "sticky locks are only allowed on content zones, not {}",
            zone
        );
        let current = ThreadToken::current();
        let target = self.zones.get(zone);

        if target.is_owned_by(current) {
            self.profiles.bump(LockProfile::classify(zone, false, true));
            target.reenter(sticky);
            log::trace!("Thread {} relocked {} (depth {})", current, zone, target.depth());
            return;
        }
        self.profiles.bump(LockProfile::classify(zone, false, false));

        let relock = self.zones_to_relock(zone, current);
        assert!(
            relock.is_empty() || !self.everything_locked_flag(),
            "zone {} needs relocking while everything is locked",
            zone
        );
        if !relock.is_empty() {
            log::debug!(
                "Thread {} releasing {} zones to lock {}",
                current,
                relock.len(),
                zone
            );
        }

        let saved: Vec<SavedZone<'_>> = relock.into_iter().map(Zone::save).collect();

        if target.is_waiting() {
            // Let a timed waiter get in first
            std::thread::sleep(self.config.contended_backoff);
        }
        target.lock_exclusive(current, sticky);

        for zone in saved.into_iter().rev() {
            zone.restore(current);
        }
        log::trace!("Thread {} locked {}", current, zone);
    }

    /// Acquire `zone` waiting at most the configured timeout.
    ///
    /// Returns `false` on timeout, or immediately when the zone is already
    /// known to be stalled by its current holder. Either way the stall is
    /// reported to the observer.
    pub fn try_lock_zone(&self, zone: ZoneId, sticky: bool) -> bool {
        assert!(
            !sticky || zone.is_content(),
            "sticky locks are only allowed on content zones, not {}",
            zone
        );
        let current = ThreadToken::current();
        let target = self.zones.get(zone);

        if target.is_owned_by(current) {
            self.profiles.bump(LockProfile::classify(zone, true, true));
            target.reenter(sticky);
            return true;
        }
        self.profiles.bump(LockProfile::classify(zone, true, false));

        let holder = target.owner();
        if target.is_stalled() && holder.is_some() {
            self.report_stall(StallReport {
                zone,
                waiter: current,
                holder,
                waited: Duration::ZERO,
                releases: 0,
                fast_fail: true,
            });
            return false;
        }

        let chrome = self.zones.chrome();
        let release_chrome = chrome.is_owned_by(current) && self.can_lock_new_content_flag();
        let saved_chrome = release_chrome.then(|| chrome.save());

        let outcome = target.try_acquire(sticky, self.config.try_lock_timeout);

        if let Some(saved) = saved_chrome {
            saved.restore(current);
        }

        match outcome {
            TryAcquire::Reentered | TryAcquire::Acquired { .. } => {
                log::trace!("Thread {} try-locked {}", current, zone);
                true
            }
            TryAcquire::TimedOut {
                waited,
                holder,
                releases,
            } => {
                self.report_stall(StallReport {
                    zone,
                    waiter: current,
                    holder,
                    waited,
                    releases,
                    fast_fail: false,
                });
                false
            }
            TryAcquire::StillStalled { holder } => {
                self.report_stall(StallReport {
                    zone,
                    waiter: current,
                    holder,
                    waited: Duration::ZERO,
                    releases: 0,
                    fast_fail: true,
                });
                false
            }
        }
    }

    /// Drop one level of the caller's hold on `zone`
    pub fn unlock_zone(&self, zone: ZoneId) {
        let current = ThreadToken::current();
        let target = self.zones.get(zone);

        let releases_fully =
            target.is_owned_by(current) && target.depth() == 1 && !target.is_sticky();
        if releases_fully {
            assert!(
                !self.is_everything_locked_by(current),
                "zone {} fully released while everything is locked",
                zone
            );
            assert!(
                !zone.is_chrome() || self.can_lock_new_content_flag(),
                "chrome released while new content locking is blocked"
            );
        }

        if let Some(position) = target.release() {
            self.record_stack_position(position);
            log::trace!("Thread {} unlocked {}", current, zone);
        }
    }

    /// Depth of the caller's hold, not counting a sticky hold. Zero when
    /// the caller does not own the zone.
    pub fn zone_lock_depth(&self, zone: ZoneId) -> ZoneDepth {
        let target = self.zones.get(zone);
        if !target.is_owned_by(ThreadToken::current()) {
            return ZoneDepth::default();
        }
        let sticky = target.is_sticky();
        let depth = target.depth();
        ZoneDepth {
            depth: if sticky { depth - 1 } else { depth },
            sticky,
        }
    }

    pub fn is_owning_thread(&self, zone: ZoneId) -> bool {
        self.zones.get(zone).is_owned_by(ThreadToken::current())
    }

    /// Zones held by the calling thread
    pub fn held_zones(&self) -> HeldZones {
        self.zones.held_by(ThreadToken::current())
    }

    /// Remove the sticky hold from every content zone the caller holds.
    /// Every content zone the caller owns must be held sticky.
    pub fn unstick_all_content(&self) {
        let current = ThreadToken::current();
        for zone in self.zones.content_zones() {
            if !zone.is_owned_by(current) {
                continue;
            }
            assert!(
                zone.is_sticky(),
                "zone {} held without a sticky hold during unstick",
                zone.id()
            );
            let releases_fully = zone.depth() == 1;
            if releases_fully {
                assert!(
                    !self.is_everything_locked_by(current),
                    "zone {} unstuck while everything is locked",
                    zone.id()
                );
            }
            if let Some(position) = zone.unstick() {
                self.record_stack_position(position);
            }
            log::trace!("Thread {} unstuck {}", current, zone.id());
        }
    }

    /// Take every allocated content zone plus chrome.
    ///
    /// Content zones are only try-locked, so this never deadlocks. On
    /// failure every zone is left exactly as it was.
    pub fn lock_everything(&self) -> bool {
        let current = ThreadToken::current();
        assert!(
            !self.is_everything_locked_by(current),
            "lock_everything called while already holding everything"
        );

        self.lock_zone(ZoneId::Chrome, false);
        let mask = self.zones.allocated_mask();
        self.unlock_zone(ZoneId::Chrome);

        let allocated: Vec<usize> = (0..self.zones.content_count())
            .filter(|index| has_bit(mask, *index))
            .collect();

        for (position, index) in allocated.iter().enumerate().rev() {
            if !self.try_lock_zone(ZoneId::content(*index), false) {
                log::debug!(
                    "lock_everything by {} failed on {}",
                    current,
                    ZoneId::content(*index)
                );
                for index in &allocated[position + 1..] {
                    self.unlock_zone(ZoneId::content(*index));
                }
                return false;
            }
        }

        self.lock_zone(ZoneId::Chrome, false);

        if self.zones.allocated_mask() != mask {
            log::debug!("lock_everything by {} raced with allocation", current);
            for index in &allocated {
                self.unlock_zone(ZoneId::content(*index));
            }
            self.unlock_zone(ZoneId::Chrome);
            return false;
        }

        let previous = self
            .everything_owner
            .swap(current.as_u64(), Ordering::AcqRel);
        assert!(
            previous == 0,
            "everything already locked by {:?}",
            ThreadToken::from_u64(previous)
        );
        log::debug!("Thread {} locked everything ({} content zones)", current, allocated.len());
        true
    }

    /// Release everything taken by [`lock_everything`](Self::lock_everything)
    pub fn unlock_everything(&self) {
        let current = ThreadToken::current();
        assert!(
            self.is_everything_locked_by(current),
            "unlock_everything by {} without holding everything",
            current
        );
        self.everything_owner.store(0, Ordering::Release);

        let mask = self.zones.allocated_mask();
        for index in 0..self.zones.content_count() {
            if has_bit(mask, index) {
                self.unlock_zone(ZoneId::content(index));
            }
        }
        self.unlock_zone(ZoneId::Chrome);
        log::debug!("Thread {} unlocked everything", current);
    }

    /// Some thread holds the lock-everything state, or the manager is gone
    pub fn is_everything_locked(&self) -> bool {
        self.everything_locked_flag() || !self.is_initialized()
    }

    /// Run `f` holding `zone`
    pub fn with_zone_locked<R>(&self, zone: ZoneId, f: impl FnOnce() -> R) -> R {
        let _guard = crate::guards::ZoneLockGuard::lock(self, zone);
        f()
    }

    /// Run `f` with every non-sticky level of `zone` released
    pub fn with_zone_unlocked<R>(&self, zone: ZoneId, f: impl FnOnce() -> R) -> R {
        let _guard = crate::guards::ZoneUnlockGuard::new(self, zone);
        f()
    }

    /// Run `f` holding `zone` if it can be taken in time
    pub fn try_with_zone_locked<R>(&self, zone: ZoneId, f: impl FnOnce() -> R) -> Option<R> {
        let guard = crate::guards::TryZoneLockGuard::new(self, zone);
        guard.acquired().then(f)
    }

    pub(crate) fn is_everything_locked_by(&self, token: ThreadToken) -> bool {
        self.everything_owner.load(Ordering::Acquire) == token.as_u64()
    }

    fn everything_locked_flag(&self) -> bool {
        self.everything_owner.load(Ordering::Acquire) != 0
    }

    fn zones_to_relock(&self, zone: ZoneId, current: ThreadToken) -> Vec<&Zone> {
        let Some(index) = zone.content_index() else {
            return Vec::new();
        };
        let mut relock = Vec::new();

        let chrome = self.zones.chrome();
        if chrome.is_owned_by(current) {
            assert!(
                self.can_lock_new_content_flag(),
                "content zone {} locked while new content locking is blocked",
                zone
            );
            relock.push(chrome);
        }
        relock.extend(
            self.zones
                .content_zones()
                .take(index)
                .filter(|z| z.is_owned_by(current)),
        );
        relock
    }

    fn record_stack_position(&self, position: usize) {
        if let Some(thread) = self.registry.current_registered() {
            thread.record_stack_position(position);
        }
    }

    fn report_stall(&self, report: StallReport) {
        self.observer.on_stall(&report);
    }
}

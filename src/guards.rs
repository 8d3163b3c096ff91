//! Scoped lock guards
//!
//! Every guard undoes its work in `Drop`, so zones are released on early
//! returns and during unwinding.

use crate::manager::ThreadManager;
use crate::zone::{ZoneDepth, ZoneId};

/// Holds one level of a zone for its lifetime
#[must_use = "the zone is released when the guard is dropped"]
pub struct ZoneLockGuard<'a> {
    manager: &'a ThreadManager,
    zone: ZoneId,
}

impl<'a> ZoneLockGuard<'a> {
    pub fn lock(manager: &'a ThreadManager, zone: ZoneId) -> Self {
        manager.lock_zone(zone, false);
        Self { manager, zone }
    }

    pub fn chrome(manager: &'a ThreadManager) -> Self {
        Self::lock(manager, ZoneId::Chrome)
    }

    pub fn zone(&self) -> ZoneId {
        self.zone
    }
}

impl Drop for ZoneLockGuard<'_> {
    fn drop(&mut self) {
        self.manager.unlock_zone(self.zone);
    }
}

/// Releases every non-sticky level the caller holds on a zone and takes
/// them back on drop
#[must_use = "the zone is reacquired when the guard is dropped"]
pub struct ZoneUnlockGuard<'a> {
    manager: &'a ThreadManager,
    zone: ZoneId,
    depth: usize,
}

impl<'a> ZoneUnlockGuard<'a> {
    pub fn new(manager: &'a ThreadManager, zone: ZoneId) -> Self {
        let depth = manager.zone_lock_depth(zone).depth;
        for _ in 0..depth {
            manager.unlock_zone(zone);
        }
        Self {
            manager,
            zone,
            depth,
        }
    }

    pub fn chrome(manager: &'a ThreadManager) -> Self {
        Self::new(manager, ZoneId::Chrome)
    }

    /// Levels that will be reacquired
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for ZoneUnlockGuard<'_> {
    fn drop(&mut self) {
        for _ in 0..self.depth {
            self.manager.lock_zone(self.zone, false);
        }
    }
}

/// Timed acquisition that may fail
#[must_use = "the zone is released when the guard is dropped"]
pub struct TryZoneLockGuard<'a> {
    manager: &'a ThreadManager,
    zone: ZoneId,
    acquired: bool,
}

impl<'a> TryZoneLockGuard<'a> {
    pub fn new(manager: &'a ThreadManager, zone: ZoneId) -> Self {
        let acquired = manager.try_lock_zone(zone, false);
        Self {
            manager,
            zone,
            acquired,
        }
    }

    pub fn acquired(&self) -> bool {
        self.acquired
    }
}

impl Drop for TryZoneLockGuard<'_> {
    fn drop(&mut self) {
        if self.acquired {
            self.manager.unlock_zone(self.zone);
        }
    }
}

/// Holds the lock-everything state if it could be taken
#[must_use = "everything is unlocked when the guard is dropped"]
pub struct EverythingLockGuard<'a> {
    manager: &'a ThreadManager,
    locked: bool,
}

impl<'a> EverythingLockGuard<'a> {
    pub fn new(manager: &'a ThreadManager) -> Self {
        let locked = manager.lock_everything();
        Self { manager, locked }
    }

    pub fn locked(&self) -> bool {
        self.locked
    }
}

impl Drop for EverythingLockGuard<'_> {
    fn drop(&mut self) {
        if self.locked {
            self.manager.unlock_everything();
        }
    }
}

/// Best effort: the chrome owner try-locks every content zone, highest
/// index first, and keeps whichever it got.
#[must_use = "acquired zones are released when the guard is dropped"]
pub struct TryLockEverythingGuard<'a> {
    manager: &'a ThreadManager,
    locked: Vec<bool>,
}

impl<'a> TryLockEverythingGuard<'a> {
    pub fn new(manager: &'a ThreadManager) -> Self {
        assert!(
            manager.is_owning_thread(ZoneId::Chrome),
            "try-lock of every content zone without holding chrome"
        );
        let count = manager.content_zone_count();
        let mut locked = vec![false; count];
        for index in (0..count).rev() {
            locked[index] = manager.try_lock_zone(ZoneId::content(index), false);
        }
        Self { manager, locked }
    }

    /// Whether content zone `index` was acquired
    pub fn is_locked(&self, index: usize) -> bool {
        self.locked.get(index).copied().unwrap_or(false)
    }

    pub fn locked_count(&self) -> usize {
        self.locked.iter().filter(|locked| **locked).count()
    }
}

impl Drop for TryLockEverythingGuard<'_> {
    fn drop(&mut self) {
        for (index, locked) in self.locked.iter().enumerate() {
            if *locked {
                self.manager.unlock_zone(ZoneId::content(index));
            }
        }
    }
}

/// Releases every zone the chrome owner holds, sticky holds included, and
/// reinstates them exactly on drop
#[must_use = "zones are reacquired when the guard is dropped"]
pub struct UnlockEverythingGuard<'a> {
    manager: &'a ThreadManager,
    chrome_depth: usize,
    content: Vec<ZoneDepth>,
}

impl<'a> UnlockEverythingGuard<'a> {
    pub fn new(manager: &'a ThreadManager) -> Self {
        assert!(
            manager.is_owning_thread(ZoneId::Chrome),
            "unlock of every zone without holding chrome"
        );
        let chrome_depth = manager.zone_lock_depth(ZoneId::Chrome).depth;

        let content: Vec<ZoneDepth> = (0..manager.content_zone_count())
            .map(|index| {
                let zone = ZoneId::content(index);
                let held = manager.zone_lock_depth(zone);
                for _ in 0..held.depth {
                    manager.unlock_zone(zone);
                }
                held
            })
            .collect();
        manager.unstick_all_content();

        for _ in 0..chrome_depth {
            manager.unlock_zone(ZoneId::Chrome);
        }
        log::trace!("Released chrome x{} and all content zones", chrome_depth);

        Self {
            manager,
            chrome_depth,
            content,
        }
    }
}

impl Drop for UnlockEverythingGuard<'_> {
    fn drop(&mut self) {
        // Highest content zone first, chrome last, so nothing needs relocking
        for (index, held) in self.content.iter().enumerate().rev() {
            let zone = ZoneId::content(index);
            for _ in 0..held.depth {
                self.manager.lock_zone(zone, false);
            }
            if held.sticky {
                self.manager.lock_zone(zone, true);
            }
        }
        for _ in 0..self.chrome_depth {
            self.manager.lock_zone(ZoneId::Chrome, false);
        }
    }
}

/// Keeps the cant-lock-new-content gate closed
#[must_use = "the gate reopens when the guard is dropped"]
pub struct CantLockNewContentGuard<'a> {
    manager: &'a ThreadManager,
}

impl<'a> CantLockNewContentGuard<'a> {
    pub fn new(manager: &'a ThreadManager) -> Self {
        manager.begin_cant_lock_new_content();
        Self { manager }
    }
}

impl Drop for CantLockNewContentGuard<'_> {
    fn drop(&mut self) {
        self.manager.end_cant_lock_new_content();
    }
}

/// Locks chrome from a state holding no zones. Content zones stuck while
/// the guard lives are unstuck when it drops.
#[must_use = "chrome is released when the guard is dropped"]
pub struct ChromeUnstickContentGuard<'a> {
    manager: &'a ThreadManager,
}

impl<'a> ChromeUnstickContentGuard<'a> {
    pub fn new(manager: &'a ThreadManager) -> Self {
        manager.lock_zone(ZoneId::Chrome, false);
        let held = manager.held_zones();
        assert!(
            held.chrome && held.content == 0,
            "content zones held on entry to a chrome unstick scope: {:#x}",
            held.content
        );
        Self { manager }
    }
}

impl Drop for ChromeUnstickContentGuard<'_> {
    fn drop(&mut self) {
        self.manager.unstick_all_content();
        debug_assert_eq!(self.manager.held_zones().content, 0);
        self.manager.unlock_zone(ZoneId::Chrome);
    }
}

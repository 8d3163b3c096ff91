//! Content zone allocation and the cant-lock-new-content gate

use std::sync::atomic::Ordering;

use super::ThreadManager;
use crate::thread::ThreadToken;
use crate::zone::ZoneId;

impl ThreadManager {
    /// Hand out the lowest free content zone, held sticky by the caller.
    ///
    /// The caller must hold chrome. Running out of zones is fatal.
    pub fn allocate_content_zone(&self) -> ZoneId {
        let current = ThreadToken::current();
        assert!(
            self.zones.chrome().is_owned_by(current),
            "content zone allocated by {} without holding chrome",
            current
        );

        let index = self.zones.find_free(current).unwrap_or_else(|| {
            panic!(
                "content zone pool exhausted: {} of {} allocated",
                self.zones.allocated_count(),
                self.zones.content_count()
            )
        });
        self.zones.mark_allocated(index);

        let zone = ZoneId::content(index);
        let target = self.zones.get(zone);
        if !target.is_owned_by(current) {
            // Free, so this cannot wait on another thread
            target.lock_exclusive(current, true);
        }
        log::debug!("Thread {} allocated {}", current, zone);
        zone
    }

    /// Return `zone` to the pool. The caller keeps whatever hold it has.
    pub fn free_content_zone(&self, zone: ZoneId) {
        let current = ThreadToken::current();
        assert!(
            self.zones.chrome().is_owned_by(current),
            "content zone freed by {} without holding chrome",
            current
        );
        let Some(index) = zone.content_index() else {
            panic!("chrome cannot be freed");
        };
        assert!(
            self.zones.get(zone).is_owned_by(current),
            "zone {} freed by {} without owning it",
            zone,
            current
        );
        self.zones.mark_free(index);
        log::debug!("Thread {} freed {}", current, zone);
    }

    /// Close the gate. Nests; the caller must hold chrome.
    pub fn begin_cant_lock_new_content(&self) {
        assert!(
            self.zones.chrome().is_owned_by(ThreadToken::current()),
            "new content locking blocked without holding chrome"
        );
        self.cant_lock_new_content.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_cant_lock_new_content(&self) {
        assert!(
            self.zones.chrome().is_owned_by(ThreadToken::current()),
            "new content locking unblocked without holding chrome"
        );
        let reopened = self
            .cant_lock_new_content
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        assert!(reopened.is_ok(), "unbalanced end_cant_lock_new_content");
    }

    /// Whether the chrome owner may take content zones it does not hold
    pub fn can_lock_new_content(&self) -> bool {
        assert!(
            self.zones.chrome().is_owned_by(ThreadToken::current()),
            "can_lock_new_content asked without holding chrome"
        );
        self.can_lock_new_content_flag() && !self.is_everything_locked()
    }

    pub(crate) fn can_lock_new_content_flag(&self) -> bool {
        self.cant_lock_new_content.load(Ordering::Acquire) == 0
    }
}

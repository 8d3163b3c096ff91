//! Zone table: the chrome zone plus a fixed pool of content zones

use std::sync::atomic::{AtomicU64, Ordering};

use super::{HeldZones, MAX_CONTENT_ZONES, Zone, ZoneId, clear_bit, has_bit, set_bit};
use crate::thread::ThreadToken;

/// Fixed set of zones and the content allocation bitmask.
///
/// The bitmask is only written while the writer holds the chrome zone;
/// the atomic just makes unsynchronised reads well defined.
pub struct ZoneTable {
    chrome: Zone,
    content: Box<[Zone]>,
    allocated: AtomicU64,
}

impl ZoneTable {
    /// Create a table with `content_zones` content zones
    pub fn new(content_zones: usize) -> Self {
        assert!(
            content_zones > 0 && content_zones <= MAX_CONTENT_ZONES,
            "content zone count {} out of range",
            content_zones
        );
        Self {
            chrome: Zone::new(ZoneId::Chrome),
            content: (0..content_zones)
                .map(|i| Zone::new(ZoneId::content(i)))
                .collect(),
            allocated: AtomicU64::new(0),
        }
    }

    /// Look a zone up. An id outside the configured pool is fatal.
    pub fn get(&self, id: ZoneId) -> &Zone {
        match id {
            ZoneId::Chrome => &self.chrome,
            ZoneId::Content(index) => self.content.get(index as usize).unwrap_or_else(|| {
                panic!(
                    "zone {} out of range, pool has {} content zones",
                    id,
                    self.content.len()
                )
            }),
        }
    }

    pub fn chrome(&self) -> &Zone {
        &self.chrome
    }

    pub fn content_count(&self) -> usize {
        self.content.len()
    }

    /// Content zones in index order
    pub fn content_zones(&self) -> impl DoubleEndedIterator<Item = &Zone> {
        self.content.iter()
    }

    pub fn allocated_mask(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn is_allocated(&self, index: usize) -> bool {
        has_bit(self.allocated_mask(), index)
    }

    /// Number of content zones currently allocated
    pub fn allocated_count(&self) -> usize {
        self.allocated_mask().count_ones() as usize
    }

    /// Lowest unallocated zone that is free or already held by `claimant`
    pub fn find_free(&self, claimant: ThreadToken) -> Option<usize> {
        let mask = self.allocated_mask();
        self.content.iter().position(|zone| {
            let index = zone.id().content_index().unwrap_or_default();
            !has_bit(mask, index) && zone.owner().is_none_or(|owner| owner == claimant)
        })
    }

    /// Caller must hold chrome
    pub(crate) fn mark_allocated(&self, index: usize) {
        let mut mask = self.allocated_mask();
        assert!(!has_bit(mask, index), "content zone {} already allocated", index);
        set_bit(&mut mask, index);
        self.allocated.store(mask, Ordering::Relaxed);
    }

    /// Caller must hold chrome
    pub(crate) fn mark_free(&self, index: usize) {
        let mut mask = self.allocated_mask();
        assert!(has_bit(mask, index), "content zone {} is not allocated", index);
        clear_bit(&mut mask, index);
        self.allocated.store(mask, Ordering::Relaxed);
    }

    /// Zones currently owned by `token`
    pub fn held_by(&self, token: ThreadToken) -> HeldZones {
        let mut held = HeldZones {
            chrome: self.chrome.is_owned_by(token),
            content: 0,
        };
        for (index, zone) in self.content.iter().enumerate() {
            if zone.is_owned_by(token) {
                set_bit(&mut held.content, index);
            }
        }
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        let table = ZoneTable::new(4);
        assert_eq!(table.content_count(), 4);
        assert_eq!(table.get(ZoneId::Chrome).id(), ZoneId::Chrome);
        assert_eq!(table.get(ZoneId::content(3)).id(), ZoneId::content(3));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_table_lookup_out_of_range() {
        let table = ZoneTable::new(4);
        table.get(ZoneId::content(4));
    }

    #[test]
    fn test_allocation_bits() {
        let table = ZoneTable::new(4);
        let me = ThreadToken::current();
        assert_eq!(table.find_free(me), Some(0));

        table.mark_allocated(0);
        table.mark_allocated(1);
        assert_eq!(table.find_free(me), Some(2));
        assert_eq!(table.allocated_count(), 2);

        table.mark_free(0);
        assert_eq!(table.find_free(me), Some(0));
        assert!(!table.is_allocated(0));
        assert!(table.is_allocated(1));
    }

    #[test]
    fn test_find_free_skips_zones_held_elsewhere() {
        let table = std::sync::Arc::new(ZoneTable::new(2));
        let (tx, rx) = std::sync::mpsc::channel();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

        let remote = table.clone();
        let handle = std::thread::spawn(move || {
            remote.get(ZoneId::content(0)).acquire(false);
            tx.send(()).unwrap();
            done_rx.recv().unwrap();
            remote.get(ZoneId::content(0)).release();
        });
        rx.recv().unwrap();

        assert_eq!(table.find_free(ThreadToken::current()), Some(1));

        done_tx.send(()).unwrap();
        handle.join().unwrap();
        assert_eq!(table.find_free(ThreadToken::current()), Some(0));
    }

    #[test]
    fn test_held_by() {
        let table = ZoneTable::new(4);
        let me = ThreadToken::current();
        table.chrome().acquire(false);
        table.get(ZoneId::content(2)).acquire(false);

        let held = table.held_by(me);
        assert!(held.chrome);
        assert_eq!(held.content, 0b100);

        table.get(ZoneId::content(2)).release();
        table.chrome().release();
        assert!(table.held_by(me).is_empty());
    }

    #[test]
    #[should_panic(expected = "already allocated")]
    fn test_double_allocate_panics() {
        let table = ZoneTable::new(2);
        table.mark_allocated(1);
        table.mark_allocated(1);
    }
}

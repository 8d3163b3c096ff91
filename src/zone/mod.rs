//! Zones: exclusion domains partitioning engine state
//!
//! There is one privileged *chrome* zone for trusted host execution and a
//! fixed pool of *content* zones handed out to isolated execution contexts.
//!
//! - [`Zone`]: one reentrant, optionally sticky, exclusive lock
//! - [`ZoneTable`]: the chrome zone, the content pool and its allocation bitmask

mod lock;
mod table;

pub use lock::{SavedZone, TryAcquire, Zone};
pub use table::ZoneTable;

use std::fmt;

use crate::thread::ThreadToken;

/// Hard upper bound on content zones; allocation state fits one `u64`
pub const MAX_CONTENT_ZONES: usize = 64;

/// Identifies a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ZoneId {
    /// The single privileged zone
    Chrome,
    /// Content zone by index, below [`MAX_CONTENT_ZONES`]
    Content(u8),
}

impl ZoneId {
    /// Content zone `index`. Panics if the index can never be valid.
    pub fn content(index: usize) -> Self {
        assert!(
            index < MAX_CONTENT_ZONES,
            "content zone index {} exceeds the limit of {}",
            index,
            MAX_CONTENT_ZONES
        );
        ZoneId::Content(index as u8)
    }

    pub fn is_chrome(&self) -> bool {
        matches!(self, ZoneId::Chrome)
    }

    pub fn is_content(&self) -> bool {
        matches!(self, ZoneId::Content(_))
    }

    /// Pool index for content zones
    pub fn content_index(&self) -> Option<usize> {
        match self {
            ZoneId::Chrome => None,
            ZoneId::Content(index) => Some(*index as usize),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneId::Chrome => "chrome",
            ZoneId::Content(_) => "content",
        }
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneId::Chrome => write!(f, "chrome"),
            ZoneId::Content(index) => write!(f, "content:{}", index),
        }
    }
}

/// Lock depth as seen by the owning thread.
///
/// `depth` excludes the extra hold that backs a sticky lock, so a zone
/// that is only held sticky reports `depth == 0, sticky == true`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneDepth {
    pub depth: usize,
    pub sticky: bool,
}

/// Zones owned by one thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeldZones {
    pub chrome: bool,
    /// Bit `i` set when content zone `i` is held
    pub content: u64,
}

impl HeldZones {
    pub fn is_empty(&self) -> bool {
        !self.chrome && self.content == 0
    }

    pub fn contains(&self, zone: ZoneId) -> bool {
        match zone {
            ZoneId::Chrome => self.chrome,
            ZoneId::Content(index) => has_bit(self.content, index as usize),
        }
    }

    pub fn content_count(&self) -> usize {
        self.content.count_ones() as usize
    }
}

/// Point-in-time view of a zone's bookkeeping, for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneSnapshot {
    pub id: ZoneId,
    pub owner: Option<ThreadToken>,
    /// Raw depth including the sticky hold
    pub depth: usize,
    pub sticky: bool,
    pub stalled: bool,
    pub waiting: bool,
    pub unlock_count: u64,
    pub stack_position: usize,
}

pub(crate) fn has_bit(mask: u64, bit: usize) -> bool {
    assert!(bit < MAX_CONTENT_ZONES);
    mask & (1u64 << bit) != 0
}

pub(crate) fn set_bit(mask: &mut u64, bit: usize) {
    assert!(bit < MAX_CONTENT_ZONES);
    *mask |= 1u64 << bit;
}

pub(crate) fn clear_bit(mask: &mut u64, bit: usize) {
    assert!(bit < MAX_CONTENT_ZONES);
    *mask &= !(1u64 << bit);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_id_content() {
        let zone = ZoneId::content(3);
        assert_eq!(zone, ZoneId::Content(3));
        assert_eq!(zone.content_index(), Some(3));
        assert!(zone.is_content());
        assert_eq!(ZoneId::Chrome.content_index(), None);
    }

    #[test]
    #[should_panic(expected = "exceeds the limit")]
    fn test_zone_id_out_of_range() {
        let _ = ZoneId::content(MAX_CONTENT_ZONES);
    }

    #[test]
    fn test_zone_id_display() {
        assert_eq!(ZoneId::Chrome.to_string(), "chrome");
        assert_eq!(ZoneId::content(12).to_string(), "content:12");
    }

    #[test]
    fn test_bit_helpers() {
        let mut mask = 0u64;
        set_bit(&mut mask, 0);
        set_bit(&mut mask, 63);
        assert!(has_bit(mask, 0));
        assert!(has_bit(mask, 63));
        assert!(!has_bit(mask, 31));
        clear_bit(&mut mask, 0);
        assert_eq!(mask, 1u64 << 63);
    }

    #[test]
    fn test_held_zones() {
        let held = HeldZones {
            chrome: true,
            content: 0b101,
        };
        assert!(held.contains(ZoneId::Chrome));
        assert!(held.contains(ZoneId::content(2)));
        assert!(!held.contains(ZoneId::content(1)));
        assert_eq!(held.content_count(), 2);
        assert!(HeldZones::default().is_empty());
    }
}

//! Lock path counters

use std::sync::atomic::{AtomicU64, Ordering};

use crate::zone::ZoneId;

/// Which path a lock request took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockProfile {
    /// Fresh blocking acquisition of chrome
    LockChrome,
    /// Fresh blocking acquisition of a content zone
    LockContent,
    /// Reentrant acquisition of chrome
    RelockChrome,
    /// Reentrant acquisition of a content zone
    RelockContent,
    /// Timed acquisition of chrome
    TryLockChrome,
    /// Timed acquisition of a content zone
    TryLockContent,
    /// Reentrant timed acquisition of chrome
    TryRelockChrome,
    /// Reentrant timed acquisition of a content zone
    TryRelockContent,
}

impl LockProfile {
    pub const ALL: [LockProfile; 8] = [
        LockProfile::LockContent,
        LockProfile::LockChrome,
        LockProfile::RelockContent,
        LockProfile::RelockChrome,
        LockProfile::TryLockContent,
        LockProfile::TryLockChrome,
        LockProfile::TryRelockContent,
        LockProfile::TryRelockChrome,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LockProfile::LockChrome => "LockChrome",
            LockProfile::LockContent => "LockContent",
            LockProfile::RelockChrome => "RelockChrome",
            LockProfile::RelockContent => "RelockContent",
            LockProfile::TryLockChrome => "TryLockChrome",
            LockProfile::TryLockContent => "TryLockContent",
            LockProfile::TryRelockChrome => "TryRelockChrome",
            LockProfile::TryRelockContent => "TryRelockContent",
        }
    }

    /// Pick the profile for a request on `zone`
    pub fn classify(zone: ZoneId, timed: bool, reentrant: bool) -> Self {
        match (timed, reentrant, zone.is_chrome()) {
            (false, false, true) => LockProfile::LockChrome,
            (false, false, false) => LockProfile::LockContent,
            (false, true, true) => LockProfile::RelockChrome,
            (false, true, false) => LockProfile::RelockContent,
            (true, false, true) => LockProfile::TryLockChrome,
            (true, false, false) => LockProfile::TryLockContent,
            (true, true, true) => LockProfile::TryRelockChrome,
            (true, true, false) => LockProfile::TryRelockContent,
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Counters for every [`LockProfile`]
#[derive(Debug, Default)]
pub struct LockProfiles {
    counts: [AtomicU64; 8],
}

impl LockProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self, profile: LockProfile) {
        self.counts[profile.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self, profile: LockProfile) -> u64 {
        self.counts[profile.index()].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        LockProfile::ALL.iter().map(|p| self.count(*p)).sum()
    }

    /// Every counter, in the order of [`LockProfile::ALL`]
    pub fn snapshot(&self) -> Vec<(LockProfile, u64)> {
        LockProfile::ALL
            .iter()
            .map(|p| (*p, self.count(*p)))
            .collect()
    }

    pub fn log_summary(&self) {
        for (profile, count) in self.snapshot() {
            log::info!("Lock {}: {}", profile.as_str(), count);
        }
    }

    pub fn reset(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }
}

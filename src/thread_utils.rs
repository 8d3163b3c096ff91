//! Convenience functions over a [`ThreadManager`]
//!
//! Thin wrappers for the common cases: posting work to the right thread,
//! pumping a thread's queue, and asking which zones the caller may use.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::manager::ThreadManager;
use crate::thread::{ManagedThread, Task};
use crate::utils::{Result, ThreadError};
use crate::zone::ZoneId;

/// Start a thread, optionally posting a first task to it
pub fn new_thread(manager: &ThreadManager, initial_task: Option<Task>) -> Result<Arc<ManagedThread>> {
    let thread = manager.new_thread()?;
    if let Some(task) = initial_task {
        thread.dispatch_task(task)?;
    }
    Ok(thread)
}

/// Post `task` to the calling thread. Execute threads post to the main
/// thread instead.
pub fn dispatch_to_current_thread<F>(manager: &ThreadManager, task: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    if is_execute_thread(manager) {
        return dispatch_to_main_thread(manager, task, ZoneId::Chrome);
    }
    manager
        .current_thread()
        .ok_or(ThreadError::NotInitialized)?
        .dispatch(task)
}

/// Post `task` to the thread executing `zone`
pub fn dispatch_to_main_thread<F>(manager: &ThreadManager, task: F, zone: ZoneId) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    manager.execute_thread(zone)?.dispatch(task)
}

/// Run queued events on the calling thread until the queue is empty or
/// `timeout` has passed. Returns how many ran.
pub fn process_pending_events(thread: &ManagedThread, timeout: Duration) -> usize {
    let start = Instant::now();
    let mut processed = 0;
    while thread.has_pending_events() && start.elapsed() < timeout {
        if !thread.process_next_event(false) {
            break;
        }
        processed += 1;
    }
    processed
}

pub fn has_pending_events(thread: &ManagedThread) -> bool {
    thread.has_pending_events()
}

pub fn process_next_event(thread: &ManagedThread, may_wait: bool) -> bool {
    thread.process_next_event(may_wait)
}

/// Non-sticky depth of the caller's hold. The zone must not be held sticky.
pub fn thread_lock_depth(manager: &ThreadManager, zone: ZoneId) -> usize {
    let held = manager.zone_lock_depth(zone);
    assert!(!held.sticky, "lock depth of sticky zone {} requested", zone);
    held.depth
}

/// Take a sticky hold on a content zone
pub fn stick_content_lock(manager: &ThreadManager, zone: ZoneId) {
    assert!(zone.is_content(), "only content zones can be stuck, not {}", zone);
    manager.lock_zone(zone, true);
}

pub fn try_stick_content_lock(manager: &ThreadManager, zone: ZoneId) -> bool {
    assert!(zone.is_content(), "only content zones can be stuck, not {}", zone);
    manager.try_lock_zone(zone, true)
}

pub fn is_chrome_owning_thread(manager: &ThreadManager) -> bool {
    manager.is_owning_thread(ZoneId::Chrome)
}

/// The main thread or a content zone's execute thread
pub fn is_execute_thread(manager: &ThreadManager) -> bool {
    manager.is_main_thread() || manager.find_execute_thread_zone().is_some()
}

pub fn can_block_on_content(manager: &ThreadManager) -> bool {
    !manager.is_main_thread() && manager.find_execute_thread_zone() != Some(ZoneId::Chrome)
}

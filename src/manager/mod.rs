//! Thread manager: zones, threads and the locking engine in one context
//!
//! A [`ThreadManager`] is created on the thread that becomes the main
//! thread and torn down there with [`ThreadManager::shutdown`]. Nothing is
//! global; share it between threads with an `Arc`.

mod allocator;
mod locking;
mod profile;

pub use profile::{LockProfile, LockProfiles};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::ManagerConfig;
use crate::diagnostics::{LogStallObserver, StallObserver};
use crate::thread::{ManagedThread, ThreadKind, ThreadRegistry, ThreadToken};
use crate::utils::{Result, ThreadError};
use crate::zone::{ZoneId, ZoneSnapshot, ZoneTable};

/// Owner of the zone table, the thread registry and the main thread
pub struct ThreadManager {
    config: ManagerConfig,
    zones: ZoneTable,
    registry: ThreadRegistry,
    main: Arc<ManagedThread>,
    /// Dedicated executor per content zone, started on first request
    execute_threads: Mutex<HashMap<usize, Arc<ManagedThread>>>,
    /// Token of the thread holding the lock-everything state, 0 if none
    everything_owner: AtomicU64,
    cant_lock_new_content: AtomicUsize,
    initialized: AtomicBool,
    spawned: AtomicUsize,
    profiles: LockProfiles,
    observer: Box<dyn StallObserver>,
}

impl ThreadManager {
    /// Create a manager. The calling thread becomes the main thread.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let registry = ThreadRegistry::new();
        let main = ManagedThread::new(ThreadToken::current(), ThreadKind::Main, "main".to_string());
        registry.register_current_thread(&main);

        log::info!(
            "Thread manager initialized: {} content zones, try-lock timeout {:?}",
            config.content_zones,
            config.try_lock_timeout
        );

        Ok(Self {
            zones: ZoneTable::new(config.content_zones),
            observer: Box::new(LogStallObserver::new(config.backtrace_file.clone())),
            config,
            registry,
            main,
            execute_threads: Mutex::new(HashMap::new()),
            everything_owner: AtomicU64::new(0),
            cant_lock_new_content: AtomicUsize::new(0),
            initialized: AtomicBool::new(true),
            spawned: AtomicUsize::new(0),
            profiles: LockProfiles::new(),
        })
    }

    /// Replace the stall observer
    pub fn with_observer(mut self, observer: impl StallObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    pub fn profiles(&self) -> &LockProfiles {
        &self.profiles
    }

    pub fn content_zone_count(&self) -> usize {
        self.zones.content_count()
    }

    /// Raw bookkeeping of one zone
    pub fn zone_state(&self, zone: ZoneId) -> ZoneSnapshot {
        self.zones.get(zone).snapshot()
    }

    /// Bitmask of allocated content zones
    pub fn allocated_mask(&self) -> u64 {
        self.zones.allocated_mask()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Start a general purpose thread with its own event loop
    pub fn new_thread(&self) -> Result<Arc<ManagedThread>> {
        if !self.is_initialized() {
            return Err(ThreadError::NotInitialized);
        }
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-thread-{}", self.config.thread_name_prefix, n);
        ManagedThread::spawn(&self.registry, ThreadKind::Spawned, name)
    }

    /// Handle for the calling thread; `None` after shutdown for threads
    /// that were never registered
    pub fn current_thread(&self) -> Option<Arc<ManagedThread>> {
        self.registry.current_thread()
    }

    pub fn main_thread(&self) -> Result<Arc<ManagedThread>> {
        if !self.is_initialized() {
            return Err(ThreadError::NotInitialized);
        }
        Ok(self.main.clone())
    }

    /// Works after shutdown too
    pub fn is_main_thread(&self) -> bool {
        self.main.is_current()
    }

    /// Managed thread by native identity
    pub fn thread_for(&self, token: ThreadToken) -> Option<Arc<ManagedThread>> {
        self.registry.get(token)
    }

    pub fn register_current_thread(&self, thread: &Arc<ManagedThread>) {
        self.registry.register_current_thread(thread);
    }

    pub fn unregister_current_thread(&self, thread: &Arc<ManagedThread>) {
        self.registry.unregister_current_thread(thread);
    }

    /// Thread that executes work for `zone`: the main thread for chrome,
    /// a dedicated thread per content zone otherwise
    pub fn execute_thread(&self, zone: ZoneId) -> Result<Arc<ManagedThread>> {
        let Some(index) = zone.content_index() else {
            return self.main_thread();
        };
        // Validates the index
        self.zones.get(zone);

        let mut threads = self.execute_threads.lock();
        if let Some(thread) = threads.get(&index) {
            return Ok(thread.clone());
        }
        if !self.is_initialized() {
            return Err(ThreadError::NotInitialized);
        }

        let name = format!("{}-{}", self.config.thread_name_prefix, index);
        let thread = ManagedThread::spawn(&self.registry, ThreadKind::Execute(zone), name)?;
        threads.insert(index, thread.clone());
        Ok(thread)
    }

    /// Zone whose execute thread is the calling thread
    pub fn find_execute_thread_zone(&self) -> Option<ZoneId> {
        if self.is_main_thread() {
            return Some(ZoneId::Chrome);
        }
        let current = ThreadToken::current();
        self.execute_threads
            .lock()
            .iter()
            .find(|(_, thread)| thread.token() == current)
            .map(|(index, _)| ZoneId::content(*index))
    }

    /// Stack position `thread` recorded when it last fully released a
    /// zone, 0 if unknown
    pub fn native_stack_top_for_thread(&self, thread: ThreadToken) -> usize {
        if thread == self.main.token() {
            return self.main.stack_position();
        }
        self.registry
            .get(thread)
            .map(|t| t.stack_position())
            .unwrap_or(0)
    }

    /// Shut every thread down. Must be called on the main thread.
    pub fn shutdown(&self) {
        assert!(
            self.is_main_thread(),
            "thread manager shut down from thread {}",
            ThreadToken::current()
        );
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return;
        }
        log::info!("Thread manager shutting down");

        self.drain_main_events();
        self.teardown_threads();
        self.drain_main_events();

        self.registry.clear();
        self.main.shutdown();
        self.registry.unregister_current_thread(&self.main);

        self.profiles.log_summary();
        log::info!("Thread manager shut down");
    }

    fn drain_main_events(&self) {
        while self.main.process_next_event(false) {}
    }

    fn teardown_threads(&self) {
        // Gather first so the registry lock is not held while joining
        let threads = self.registry.shutdown();
        self.execute_threads.lock().clear();

        for thread in threads {
            if thread.kind().shutdown_required() && !thread.is_current() {
                log::debug!("Shutting down thread {}", thread.name());
                thread.shutdown();
            }
        }
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            log::debug!("Thread manager dropped without shutdown; joining threads");
            self.teardown_threads();
        }
    }
}

//! Thread registry: native thread identity to managed thread handle
//!
//! The registry table holds weak references. The strong reference for a
//! thread lives in that thread's thread-local slot, and the slot's
//! destructor removes the table entry when the OS thread exits, so a
//! thread that never unregisters does not leak.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{ManagedThread, ThreadKind, ThreadToken};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<CurrentSlots> = RefCell::new(CurrentSlots::default());
}

/// Per-OS-thread handles, one per live registry
#[derive(Default)]
struct CurrentSlots {
    slots: Vec<CurrentSlot>,
}

struct CurrentSlot {
    registry_id: u64,
    registry: Weak<RegistryInner>,
    thread: Arc<ManagedThread>,
}

impl CurrentSlots {
    fn find(&self, registry_id: u64) -> Option<Arc<ManagedThread>> {
        self.slots
            .iter()
            .find(|slot| slot.registry_id == registry_id)
            .map(|slot| slot.thread.clone())
    }

    fn take(&mut self, registry_id: u64) -> Option<CurrentSlot> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.registry_id == registry_id)?;
        Some(self.slots.swap_remove(index))
    }
}

impl Drop for CurrentSlots {
    // Thread exit hook
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            if let Some(registry) = slot.registry.upgrade() {
                registry.forget(&slot.thread);
            }
        }
    }
}

struct RegistryInner {
    id: u64,
    threads: Mutex<HashMap<ThreadToken, Weak<ManagedThread>>>,
    accepting: AtomicBool,
}

impl RegistryInner {
    fn forget(&self, thread: &Arc<ManagedThread>) {
        let mut threads = self.threads.lock();
        let matches = threads
            .get(&thread.token())
            .is_some_and(|entry| std::ptr::eq(entry.as_ptr(), Arc::as_ptr(thread)));
        if matches {
            threads.remove(&thread.token());
        }
    }
}

/// Table of managed threads keyed by native identity.
///
/// Cloning yields another handle to the same table. The table's mutex is
/// never held while a zone lock is being acquired.
#[derive(Clone)]
pub struct ThreadRegistry {
    inner: Arc<RegistryInner>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
                threads: Mutex::new(HashMap::new()),
                accepting: AtomicBool::new(true),
            }),
        }
    }

    /// Whether new foreign threads are still wrapped on demand
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Record `thread` as the calling thread. Must run on that thread.
    pub fn register_current_thread(&self, thread: &Arc<ManagedThread>) {
        assert!(
            thread.is_current(),
            "thread {} registered from thread {}",
            thread.name(),
            ThreadToken::current()
        );

        self.inner
            .threads
            .lock()
            .insert(thread.token(), Arc::downgrade(thread));

        let previous = CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            let previous = current.take(self.inner.id);
            current.slots.push(CurrentSlot {
                registry_id: self.inner.id,
                registry: Arc::downgrade(&self.inner),
                thread: thread.clone(),
            });
            previous
        });
        // Dropped outside the RefCell borrow
        drop(previous);
    }

    /// Forget `thread`. Must run on that thread.
    pub fn unregister_current_thread(&self, thread: &Arc<ManagedThread>) {
        assert!(
            thread.is_current(),
            "thread {} unregistered from thread {}",
            thread.name(),
            ThreadToken::current()
        );

        self.inner.forget(thread);
        let slot = CURRENT
            .try_with(|current| current.borrow_mut().take(self.inner.id))
            .ok()
            .flatten();
        drop(slot);
    }

    /// Handle for the calling thread, wrapping a foreign thread on first
    /// use. `None` once the registry has shut down.
    pub fn current_thread(&self) -> Option<Arc<ManagedThread>> {
        if let Some(thread) = self.current_registered() {
            return Some(thread);
        }
        if !self.is_accepting() {
            return None;
        }

        let token = ThreadToken::current();
        let thread = ManagedThread::new(token, ThreadKind::Foreign, format!("foreign-{}", token.as_u64()));
        self.register_current_thread(&thread);
        log::debug!("Wrapped foreign thread {}", token);
        Some(thread)
    }

    /// Handle for the calling thread if it is already registered
    pub fn current_registered(&self) -> Option<Arc<ManagedThread>> {
        CURRENT
            .try_with(|current| current.borrow().find(self.inner.id))
            .ok()
            .flatten()
    }

    /// Look a thread up by native identity
    pub fn get(&self, token: ThreadToken) -> Option<Arc<ManagedThread>> {
        self.inner.threads.lock().get(&token).and_then(Weak::upgrade)
    }

    /// Live registered threads
    pub fn threads(&self) -> Vec<Arc<ManagedThread>> {
        self.inner
            .threads
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.threads.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop wrapping new threads and empty the table, returning the
    /// threads that were still alive.
    pub fn shutdown(&self) -> Vec<Arc<ManagedThread>> {
        self.inner.accepting.store(false, Ordering::Release);
        let drained: Vec<_> = self.inner.threads.lock().drain().collect();
        drained
            .into_iter()
            .filter_map(|(_, thread)| thread.upgrade())
            .collect()
    }

    /// Empty the table without stopping registration
    pub fn clear(&self) {
        self.inner.threads.lock().clear();
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_current_thread_is_lazy_and_stable() {
        let registry = ThreadRegistry::new();
        assert!(registry.current_registered().is_none());

        let first = registry.current_thread().unwrap();
        let second = registry.current_thread().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.kind(), ThreadKind::Foreign);
        assert_eq!(first.token(), ThreadToken::current());
        assert_eq!(registry.len(), 1);

        registry.unregister_current_thread(&first);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ThreadRegistry::new();
        let b = ThreadRegistry::new();
        let in_a = a.current_thread().unwrap();
        assert!(b.current_registered().is_none());
        let in_b = b.current_thread().unwrap();
        assert!(!Arc::ptr_eq(&in_a, &in_b));
        a.unregister_current_thread(&in_a);
        b.unregister_current_thread(&in_b);
    }

    #[test]
    fn test_lookup_by_token() {
        let registry = ThreadRegistry::new();
        let thread = registry.current_thread().unwrap();
        let found = registry.get(ThreadToken::current()).unwrap();
        assert!(Arc::ptr_eq(&thread, &found));
        registry.unregister_current_thread(&thread);
        assert!(registry.get(ThreadToken::current()).is_none());
    }

    #[test]
    fn test_thread_exit_removes_entry() {
        let registry = ThreadRegistry::new();
        let (tx, rx) = channel();

        let remote = registry.clone();
        std::thread::spawn(move || {
            let thread = remote.current_thread().unwrap();
            tx.send(thread.token()).unwrap();
            // Exits without unregistering
        })
        .join()
        .unwrap();

        let token = rx.recv().unwrap();
        assert!(registry.get(token).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_shutdown_stops_lazy_wrapping() {
        let registry = ThreadRegistry::new();
        let here = registry.current_thread().unwrap();

        let live = registry.shutdown();
        assert_eq!(live.len(), 1);
        assert!(!registry.is_accepting());

        // Still registered in TLS on this thread
        assert!(registry.current_thread().is_some());

        let remote = registry.clone();
        let other = std::thread::spawn(move || remote.current_thread().is_none())
            .join()
            .unwrap();
        assert!(other);

        registry.unregister_current_thread(&here);
        assert!(registry.current_thread().is_none());
    }

    #[test]
    fn test_register_from_wrong_thread_panics() {
        let registry = ThreadRegistry::new();
        let thread = ManagedThread::new(ThreadToken::current(), ThreadKind::Foreign, "x".into());
        let result = std::thread::spawn(move || registry.register_current_thread(&thread)).join();
        assert!(result.is_err());
    }
}

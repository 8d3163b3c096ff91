//! Managed threads and their event queues

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

use super::{ThreadRegistry, ThreadToken};
use crate::utils::{Result, ThreadError};
use crate::zone::ZoneId;

/// A unit of work posted to a thread
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// What a managed thread is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadKind {
    /// The thread that created the manager; executes chrome work
    Main,
    /// Dedicated executor for one content zone
    Execute(ZoneId),
    /// General purpose thread started by the manager
    Spawned,
    /// Thread started elsewhere and wrapped on first use
    Foreign,
}

impl ThreadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadKind::Main => "Main",
            ThreadKind::Execute(_) => "Execute",
            ThreadKind::Spawned => "Spawned",
            ThreadKind::Foreign => "Foreign",
        }
    }

    /// Threads the manager started itself and must join
    pub fn shutdown_required(&self) -> bool {
        matches!(self, ThreadKind::Execute(_) | ThreadKind::Spawned)
    }
}

/// Thread lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    ShuttingDown,
    Terminated,
}

struct EventQueue {
    tasks: VecDeque<Task>,
    state: ThreadState,
}

/// Handle to a thread known to the manager.
///
/// Work is posted with [`dispatch`](Self::dispatch) and friends. Spawned
/// and execute threads drain their queue in a loop; main and foreign
/// threads drain theirs by calling [`process_next_event`](Self::process_next_event).
pub struct ManagedThread {
    token: ThreadToken,
    kind: ThreadKind,
    name: String,
    queue: Mutex<EventQueue>,
    available: Condvar,
    stack_position: AtomicUsize,
    join: Mutex<Option<JoinHandle<()>>>,
    created: Instant,
}

impl ManagedThread {
    /// Wrap an existing OS thread identified by `token`
    pub(crate) fn new(token: ThreadToken, kind: ThreadKind, name: String) -> Arc<Self> {
        Arc::new(Self {
            token,
            kind,
            name,
            queue: Mutex::new(EventQueue {
                tasks: VecDeque::new(),
                state: ThreadState::Running,
            }),
            available: Condvar::new(),
            stack_position: AtomicUsize::new(0),
            join: Mutex::new(None),
            created: Instant::now(),
        })
    }

    /// Start an OS thread running an event loop. Returns once the new
    /// thread has registered itself with `registry`.
    pub(crate) fn spawn(
        registry: &ThreadRegistry,
        kind: ThreadKind,
        name: String,
    ) -> Result<Arc<Self>> {
        let token = ThreadToken::reserve();
        let thread = Self::new(token, kind, name.clone());

        let worker = thread.clone();
        let worker_registry = registry.clone();
        let (ready_tx, ready_rx) = channel();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                token.adopt();
                worker_registry.register_current_thread(&worker);
                let _ = ready_tx.send(());

                worker.run_event_loop();

                worker_registry.unregister_current_thread(&worker);
                log::debug!("Thread {} ({}) exiting", worker.name, worker.token);
            })?;

        *thread.join.lock() = Some(handle);

        ready_rx
            .recv()
            .map_err(|_| ThreadError::Disconnected(name))?;

        log::debug!(
            "Spawned {} thread {} ({})",
            kind.as_str(),
            thread.name,
            thread.token
        );
        Ok(thread)
    }

    pub fn token(&self) -> ThreadToken {
        self.token
    }

    pub fn kind(&self) -> ThreadKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.queue.lock().state
    }

    /// Is the calling thread this thread?
    pub fn is_current(&self) -> bool {
        self.token == ThreadToken::current()
    }

    pub fn uptime(&self) -> Duration {
        self.created.elapsed()
    }

    /// Stack position recorded the last time this thread fully released a zone
    pub fn stack_position(&self) -> usize {
        self.stack_position.load(Ordering::Relaxed)
    }

    pub(crate) fn record_stack_position(&self, position: usize) {
        self.stack_position.store(position, Ordering::Relaxed);
    }

    /// Post `task` without waiting for it
    pub fn dispatch<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch_task(Box::new(task))
    }

    /// Post an already boxed task
    pub fn dispatch_task(&self, task: Task) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.state != ThreadState::Running {
            return Err(ThreadError::ShutDown(self.name.clone()));
        }
        queue.tasks.push_back(task);
        self.available.notify_one();
        Ok(())
    }

    /// Post `task` and get a channel that yields its result
    pub fn dispatch_with_reply<F, T>(&self, task: F) -> Result<oneshot::Receiver<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatch(move || {
            let _ = tx.send(task());
        })?;
        Ok(rx)
    }

    /// Run `task` on this thread and wait for its result.
    ///
    /// Runs inline when called on this thread. Must not be called from
    /// inside an async runtime; await [`dispatch_with_reply`](Self::dispatch_with_reply) there.
    pub fn dispatch_sync<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_current() {
            return Ok(task());
        }
        self.dispatch_with_reply(task)?
            .blocking_recv()
            .map_err(|_| ThreadError::Disconnected(self.name.clone()))
    }

    pub fn has_pending_events(&self) -> bool {
        !self.queue.lock().tasks.is_empty()
    }

    pub fn pending_events(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    /// Run one queued task on the calling thread, which must be this thread.
    /// With `may_wait` blocks until a task arrives or the thread shuts down.
    pub fn process_next_event(&self, may_wait: bool) -> bool {
        assert!(
            self.is_current(),
            "events of thread {} processed from thread {}",
            self.name,
            ThreadToken::current()
        );
        match self.next_task(may_wait) {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Stop accepting events. Threads the manager started are woken,
    /// allowed to drain their queue, and joined.
    pub fn shutdown(&self) {
        {
            let mut queue = self.queue.lock();
            if queue.state == ThreadState::Terminated {
                return;
            }
            queue.state = ThreadState::ShuttingDown;
            self.available.notify_all();
        }

        if self.kind.shutdown_required() {
            assert!(
                !self.is_current(),
                "thread {} cannot shut itself down",
                self.name
            );
            let handle = self.join.lock().take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    log::error!("Thread {} panicked before shutdown", self.name);
                }
            }
        }

        let dropped = {
            let mut queue = self.queue.lock();
            queue.state = ThreadState::Terminated;
            std::mem::take(&mut queue.tasks)
        };
        if !dropped.is_empty() {
            log::debug!(
                "Dropping {} unprocessed events for thread {}",
                dropped.len(),
                self.name
            );
        }
    }

    fn next_task(&self, may_wait: bool) -> Option<Task> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(task) = queue.tasks.pop_front() {
                return Some(task);
            }
            if !may_wait || queue.state != ThreadState::Running {
                return None;
            }
            self.available.wait(&mut queue);
        }
    }

    fn run_event_loop(&self) {
        while let Some(task) = self.next_task(true) {
            task();
        }
    }
}

impl std::fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedThread")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish()
    }
}

impl Drop for ManagedThread {
    fn drop(&mut self) {
        log::trace!("Released thread handle {} ({})", self.name, self.token);
    }
}

//! Shared helpers for integration tests

use std::sync::Arc;
use std::time::Duration;

use binix_threads::{ManagerConfig, ThreadManager};

/// Route `log` output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Manager with a small pool and a short try-lock timeout
pub fn test_manager(zones: usize) -> Arc<ThreadManager> {
    init_logging();
    let config = ManagerConfig::new()
        .with_content_zones(zones)
        .with_try_lock_timeout(Duration::from_millis(50))
        .with_thread_name_prefix("test-exec");
    Arc::new(ThreadManager::new(config).expect("valid test config"))
}

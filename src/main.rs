//! Binix Threads - zone locking demo
//!
//! Runs a short contention workload and prints the lock profile.

use std::env;
use std::process;
use std::sync::Arc;

use binix_threads::guards::{ChromeUnstickContentGuard, EverythingLockGuard, ZoneLockGuard};
use binix_threads::{LockProfile, ManagerConfig, NAME, ThreadManager, VERSION, ZoneId};

const DEFAULT_WORKERS: usize = 4;
const ITERATIONS: usize = 500;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let workers = env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_WORKERS);

    let config = match ManagerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    println!("🚀 {} v{}", NAME, VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if let Err(e) = run(config, workers) {
        eprintln!("❌ Demo failed: {}", e);
        process::exit(1);
    }
}

fn run(config: ManagerConfig, workers: usize) -> binix_threads::Result<()> {
    let mgr = Arc::new(ThreadManager::new(config)?);
    println!("✅ Thread manager initialized ({} content zones)", mgr.content_zone_count());

    // Allocate one content zone per worker, up to the pool size
    let zones: Vec<ZoneId> = {
        let _scope = ChromeUnstickContentGuard::new(&mgr);
        (0..workers.min(mgr.content_zone_count()))
            .map(|_| mgr.allocate_content_zone())
            .collect()
    };

    let mut handles = Vec::new();
    for i in 0..workers {
        let thread = mgr.new_thread()?;
        let remote = mgr.clone();
        let own = zones[i % zones.len()];
        let reply = thread.dispatch_with_reply(move || {
            for n in 0..ITERATIONS {
                let _content = ZoneLockGuard::lock(&remote, own);
                if n % 10 == 0 {
                    let _chrome = ZoneLockGuard::chrome(&remote);
                }
            }
        })?;
        handles.push((thread, reply));
    }

    let mut everything = 0;
    for _ in 0..20 {
        let guard = EverythingLockGuard::new(&mgr);
        if guard.locked() {
            everything += 1;
        }
    }

    for (thread, reply) in handles {
        if reply.blocking_recv().is_err() {
            eprintln!("⚠️  Worker {} did not finish", thread.name());
        }
    }

    println!("📊 Lock profile:");
    for (profile, count) in mgr.profiles().snapshot() {
        println!("   • {:<18} {}", profile.as_str(), count);
    }
    println!(
        "   • lock_everything succeeded {} of 20 times ({} content try-locks)",
        everything,
        mgr.profiles().count(LockProfile::TryLockContent)
    );

    mgr.shutdown();
    println!("✅ Shut down cleanly");
    Ok(())
}

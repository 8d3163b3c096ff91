//! Integration tests for the Binix zone locking core
//!
//! These tests drive the public API from several threads at once.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::thread;
use std::time::{Duration, Instant};

use binix_threads::diagnostics::{StallObserver, StallReport};
use binix_threads::guards::{EverythingLockGuard, ZoneLockGuard};
use binix_threads::thread_utils;
use binix_threads::{ManagerConfig, ThreadManager, ThreadToken, ZoneDepth, ZoneId};
use common::{init_logging, test_manager};
use mockall::mock;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

mock! {
    pub Observer {}
    impl StallObserver for Observer {
        fn on_stall(&self, report: &StallReport);
    }
}

/// Lock `zone` on a helper thread and keep it until the sender fires
fn hold_on_other_thread(
    mgr: &Arc<ThreadManager>,
    zone: ZoneId,
) -> (std::sync::mpsc::Sender<()>, thread::JoinHandle<ThreadToken>) {
    let (held_tx, held_rx) = channel();
    let (done_tx, done_rx) = channel::<()>();
    let remote = mgr.clone();
    let handle = thread::spawn(move || {
        remote.lock_zone(zone, false);
        held_tx.send(()).unwrap();
        done_rx.recv().unwrap();
        remote.unlock_zone(zone);
        ThreadToken::current()
    });
    held_rx.recv().unwrap();
    (done_tx, handle)
}

#[test]
fn test_manager_lifecycle() {
    let mgr = test_manager(8);
    assert!(mgr.is_initialized());
    assert!(mgr.is_main_thread());
    assert_eq!(mgr.content_zone_count(), 8);

    let worker = mgr.new_thread().unwrap();
    assert!(mgr.registry().get(worker.token()).is_some());

    mgr.shutdown();
    assert!(!mgr.is_initialized());
    assert!(mgr.registry().is_empty());
    assert!(mgr.new_thread().is_err());
}

#[test]
fn test_sticky_scenario() {
    let mgr = test_manager(4);
    let zone = ZoneId::content(0);

    mgr.lock_zone(zone, true);
    assert_eq!(mgr.zone_state(zone).depth, 1);
    mgr.lock_zone(zone, false);
    assert_eq!(mgr.zone_state(zone).depth, 2);
    mgr.unlock_zone(zone);

    let state = mgr.zone_state(zone);
    assert!(mgr.is_owning_thread(zone));
    assert_eq!((state.depth, state.sticky), (1, true));

    mgr.unstick_all_content();
    assert!(!mgr.is_owning_thread(zone));
    mgr.shutdown();
}

#[test]
fn test_relock_keeps_depths_under_contention() {
    let mgr = test_manager(4);
    mgr.lock_zone(ZoneId::Chrome, false);
    mgr.lock_zone(ZoneId::content(0), false);
    mgr.lock_zone(ZoneId::content(1), true);
    mgr.lock_zone(ZoneId::content(1), false);

    let before: Vec<ZoneDepth> = [ZoneId::Chrome, ZoneId::content(0), ZoneId::content(1)]
        .iter()
        .map(|zone| mgr.zone_lock_depth(*zone))
        .collect();

    let (done, holder) = hold_on_other_thread(&mgr, ZoneId::content(3));
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        done.send(()).unwrap();
    });

    mgr.lock_zone(ZoneId::content(3), false);
    releaser.join().unwrap();
    holder.join().unwrap();

    let after: Vec<ZoneDepth> = [ZoneId::Chrome, ZoneId::content(0), ZoneId::content(1)]
        .iter()
        .map(|zone| mgr.zone_lock_depth(*zone))
        .collect();
    assert_eq!(before, after);

    mgr.unlock_zone(ZoneId::content(3));
    mgr.unlock_zone(ZoneId::content(1));
    mgr.unlock_zone(ZoneId::content(0));
    mgr.unstick_all_content();
    mgr.unlock_zone(ZoneId::Chrome);
    assert!(mgr.held_zones().is_empty());
    mgr.shutdown();
}

#[test]
fn test_no_two_owners() {
    let mgr = test_manager(2);
    let owners = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let mgr = mgr.clone();
            let owners = owners.clone();
            thread::spawn(move || {
                let zone = ZoneId::content(i % 2);
                for _ in 0..100 {
                    let _guard = ZoneLockGuard::lock(&mgr, zone);
                    let _chrome = ZoneLockGuard::chrome(&mgr);
                    assert_eq!(owners.fetch_add(1, Ordering::SeqCst), 0);
                    owners.fetch_sub(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    mgr.shutdown();
}

#[test]
fn test_try_lock_bounded_wait() {
    init_logging();
    let timeout = Duration::from_millis(80);
    let mut observer = MockObserver::new();
    observer
        .expect_on_stall()
        .withf(|report| report.zone == ZoneId::content(2) && report.holder.is_some())
        .times(1)
        .return_const(());

    let mgr = Arc::new(
        ThreadManager::new(
            ManagerConfig::new()
                .with_content_zones(4)
                .with_try_lock_timeout(timeout),
        )
        .unwrap()
        .with_observer(observer),
    );

    let (done, holder) = hold_on_other_thread(&mgr, ZoneId::content(2));
    let start = Instant::now();
    assert!(!mgr.try_lock_zone(ZoneId::content(2), false));
    let waited = start.elapsed();
    assert!(waited >= timeout);
    assert!(waited < timeout * 10);

    done.send(()).unwrap();
    holder.join().unwrap();
    mgr.shutdown();
}

#[test]
fn test_try_lock_acquires_on_midway_release() {
    init_logging();
    let timeout = Duration::from_millis(500);
    let mgr = Arc::new(
        ThreadManager::new(
            ManagerConfig::new()
                .with_content_zones(2)
                .with_try_lock_timeout(timeout),
        )
        .unwrap(),
    );
    let (done, holder) = hold_on_other_thread(&mgr, ZoneId::content(1));
    let releaser = thread::spawn(move || {
        thread::sleep(timeout / 4);
        done.send(()).unwrap();
    });

    let start = Instant::now();
    assert!(mgr.try_lock_zone(ZoneId::content(1), false));
    assert!(start.elapsed() < timeout);
    mgr.unlock_zone(ZoneId::content(1));

    releaser.join().unwrap();
    holder.join().unwrap();
    mgr.shutdown();
}

#[test]
fn test_lock_everything_is_all_or_nothing() {
    let mgr = test_manager(4);
    mgr.lock_zone(ZoneId::Chrome, false);
    let zones: Vec<ZoneId> = (0..3).map(|_| mgr.allocate_content_zone()).collect();
    mgr.unstick_all_content();
    mgr.unlock_zone(ZoneId::Chrome);

    let (done, holder) = hold_on_other_thread(&mgr, zones[1]);
    let before: Vec<_> = zones.iter().map(|zone| mgr.zone_state(*zone)).collect();

    assert!(!mgr.lock_everything());
    let after: Vec<_> = zones.iter().map(|zone| mgr.zone_state(*zone)).collect();
    for (b, a) in before.iter().zip(&after) {
        assert_eq!((b.owner, b.depth), (a.owner, a.depth));
    }
    assert!(!mgr.is_owning_thread(ZoneId::Chrome));

    done.send(()).unwrap();
    holder.join().unwrap();

    {
        let guard = EverythingLockGuard::new(&mgr);
        assert!(guard.locked());
        for zone in &zones {
            assert!(mgr.is_owning_thread(*zone));
        }
        assert!(mgr.is_owning_thread(ZoneId::Chrome));
    }
    assert!(mgr.held_zones().is_empty());
    mgr.shutdown();
}

#[test]
fn test_everything_locked_blocks_other_threads() {
    let mgr = test_manager(2);
    assert!(mgr.lock_everything());

    let entered = Arc::new(AtomicBool::new(false));
    let remote = mgr.clone();
    let flag = entered.clone();
    let waiter = thread::spawn(move || {
        remote.lock_zone(ZoneId::Chrome, false);
        flag.store(true, Ordering::SeqCst);
        remote.unlock_zone(ZoneId::Chrome);
    });

    thread::sleep(Duration::from_millis(30));
    assert!(!entered.load(Ordering::SeqCst));
    mgr.unlock_everything();
    waiter.join().unwrap();
    assert!(entered.load(Ordering::SeqCst));
    mgr.shutdown();
}

#[test]
fn test_stack_position_recorded_per_thread() {
    let mgr = test_manager(2);
    let worker = mgr.new_thread().unwrap();
    let remote = mgr.clone();
    worker
        .dispatch_sync(move || {
            remote.lock_zone(ZoneId::content(0), false);
            remote.unlock_zone(ZoneId::content(0));
        })
        .unwrap();
    assert_ne!(mgr.native_stack_top_for_thread(worker.token()), 0);
    assert_eq!(worker.stack_position(), mgr.native_stack_top_for_thread(worker.token()));
    mgr.shutdown();
}

#[test]
fn test_foreign_thread_registry_cleanup() {
    let mgr = test_manager(2);
    let remote = mgr.clone();
    let token = thread::spawn(move || {
        let me = remote.current_thread().unwrap();
        assert_eq!(me.kind(), binix_threads::ThreadKind::Foreign);
        me.token()
    })
    .join()
    .unwrap();
    assert!(mgr.thread_for(token).is_none());
    mgr.shutdown();
}

#[test]
fn test_dispatch_to_execute_thread_blocking() {
    let mgr = test_manager(4);
    let exec = mgr.execute_thread(ZoneId::content(1)).unwrap();
    let remote = mgr.clone();
    let rx = exec
        .dispatch_with_reply(move || {
            remote.with_zone_locked(ZoneId::content(1), || remote.find_execute_thread_zone())
        })
        .unwrap();
    let zone = tokio_test::block_on(rx).unwrap();
    assert_eq!(zone, Some(ZoneId::content(1)));
    mgr.shutdown();
}

#[tokio::test]
async fn test_dispatch_with_reply_async() {
    let mgr = test_manager(2);
    let worker = thread_utils::new_thread(&mgr, None).unwrap();

    let replies: Vec<_> = (0..5)
        .map(|i| worker.dispatch_with_reply(move || i * 2).unwrap())
        .collect();
    let mut results = Vec::new();
    for reply in replies {
        results.push(reply.await.unwrap());
    }
    assert_eq!(results, vec![0, 2, 4, 6, 8]);
    mgr.shutdown();
}

#[derive(Debug, Clone)]
enum AllocOp {
    Allocate,
    Free(usize),
}

fn alloc_ops() -> impl Strategy<Value = Vec<AllocOp>> {
    prop::collection::vec(
        prop_oneof![Just(AllocOp::Allocate), (0usize..16).prop_map(AllocOp::Free)],
        1..60,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_allocator_cycling_stays_in_bounds(ops in alloc_ops()) {
        let capacity = 6;
        let mgr = test_manager(capacity);
        mgr.lock_zone(ZoneId::Chrome, false);

        let mut live: Vec<ZoneId> = Vec::new();
        for op in ops {
            match op {
                AllocOp::Allocate if live.len() < capacity => {
                    let zone = mgr.allocate_content_zone();
                    prop_assert!(!live.contains(&zone));
                    live.push(zone);
                }
                AllocOp::Allocate => {}
                AllocOp::Free(pick) if !live.is_empty() => {
                    let zone = live.swap_remove(pick % live.len());
                    mgr.free_content_zone(zone);
                }
                AllocOp::Free(_) => {}
            }
            prop_assert_eq!(mgr.allocated_mask().count_ones() as usize, live.len());
            prop_assert!(live.len() <= capacity);
        }

        for zone in live.drain(..) {
            mgr.free_content_zone(zone);
        }
        mgr.unstick_all_content();
        mgr.unlock_zone(ZoneId::Chrome);
        prop_assert!(mgr.held_zones().is_empty());
        mgr.shutdown();
    }

    #[test]
    fn test_reentrancy_balances(index in 0usize..4, depth in 1usize..24, sticky in any::<bool>()) {
        let mgr = test_manager(4);
        let zone = ZoneId::content(index);
        if sticky {
            thread_utils::stick_content_lock(&mgr, zone);
        }
        for _ in 0..depth {
            mgr.lock_zone(zone, false);
        }
        prop_assert_eq!(mgr.zone_lock_depth(zone), ZoneDepth { depth, sticky });
        for _ in 0..depth {
            mgr.unlock_zone(zone);
        }
        prop_assert_eq!(mgr.is_owning_thread(zone), sticky);
        mgr.unstick_all_content();
        prop_assert!(!mgr.is_owning_thread(zone));
        mgr.shutdown();
    }
}

//! Behavior-driven tests for tick admission and processing under load.
//!
//! These tests verify WHAT the backpressure stage guarantees to the feed
//! thread: it never blocks, it sheds load observably, and it never runs
//! stale work.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use tickguard_core::{
    BackpressureConfig, BackpressureManager, InMemoryMetrics, InstrumentId, NoopMetrics,
    ProcessingError, ProcessingTask,
};
use tickguard_tests::{eventually, id};

fn ibm() -> InstrumentId {
    id("IBM.N")
}

fn fast_config() -> BackpressureConfig {
    BackpressureConfig {
        poll_interval: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(2),
        ..BackpressureConfig::default()
    }
}

/// Occupies the single worker until the returned sender is used or dropped.
fn block_worker(manager: &BackpressureManager) -> channel::Sender<()> {
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    assert!(manager.offer(ProcessingTask::new(ibm(), move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    })));
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker picks up the blocking task");
    release_tx
}

// =============================================================================
// Backpressure: Queue Boundedness
// =============================================================================

#[test]
fn when_queue_is_full_system_rejects_each_extra_offer_and_counts_it_once() {
    // Given: One busy worker in front of a queue of five
    let metrics = Arc::new(InMemoryMetrics::new());
    let manager = BackpressureManager::start(
        BackpressureConfig {
            queue_capacity: 5,
            worker_count: 1,
            processing_permits: 1,
            ..fast_config()
        },
        metrics.clone(),
    )
    .expect("manager starts");
    let release = block_worker(&manager);

    // When: The feed offers eight more updates without any draining
    let accepted: Vec<bool> = (0..8)
        .map(|_| manager.offer(ProcessingTask::new(ibm(), || Ok(()))))
        .collect();

    // Then: Exactly the first five are accepted
    assert_eq!(accepted, vec![true, true, true, true, true, false, false, false]);
    assert_eq!(manager.queue_size(), 5);
    assert_eq!(manager.queue_utilization(), 1.0);

    // And: Each rejection is counted exactly once
    assert_eq!(manager.dropped_updates(), 3);
    assert_eq!(metrics.snapshot().dropped, 3);

    // And: Accepted work still runs once the worker frees up
    drop(release);
    assert!(eventually(|| manager.processed_updates() == 6));
    assert_eq!(manager.queue_utilization(), 0.0);
    assert!(manager.shutdown());
}

#[test]
fn when_offer_is_rejected_caller_gets_the_task_back() {
    // Given: A saturated single-slot queue
    let manager = BackpressureManager::start(
        BackpressureConfig {
            queue_capacity: 1,
            worker_count: 1,
            processing_permits: 1,
            ..fast_config()
        },
        Arc::new(NoopMetrics),
    )
    .expect("manager starts");
    let release = block_worker(&manager);
    assert!(manager.offer(ProcessingTask::new(ibm(), || Ok(()))));

    // When: Another update is offered
    let ran_inline = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran_inline);
    let rejected = manager
        .try_offer(ProcessingTask::new(ibm(), move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }))
        .expect_err("queue is full");

    // Then: The caller can still execute it synchronously
    rejected.run().expect("inline run succeeds");
    assert!(ran_inline.load(Ordering::SeqCst));

    drop(release);
    assert!(manager.shutdown());
}

// =============================================================================
// Backpressure: Staleness
// =============================================================================

#[test]
fn when_task_is_older_than_threshold_system_never_executes_it() {
    // Given: A fresh task queued behind a stale one
    let manager = BackpressureManager::start(
        BackpressureConfig {
            stale_after: Duration::from_millis(200),
            ..fast_config()
        },
        Arc::new(NoopMetrics),
    )
    .expect("manager starts");
    let stale_ran = Arc::new(AtomicBool::new(false));
    let fresh_ran = Arc::new(AtomicBool::new(false));
    let long_ago = Instant::now()
        .checked_sub(Duration::from_secs(10))
        .expect("monotonic clock has a past");

    // When: Both are offered
    let flag = Arc::clone(&stale_ran);
    manager.offer(ProcessingTask::created_at(ibm(), long_ago, move || {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }));
    let flag = Arc::clone(&fresh_ran);
    manager.offer(ProcessingTask::new(ibm(), move || {
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }));

    // Then: Only the fresh one runs; the stale one is a silent skip
    assert!(eventually(|| fresh_ran.load(Ordering::SeqCst)));
    assert!(eventually(|| manager.stale_discarded() == 1));
    assert!(!stale_ran.load(Ordering::SeqCst));
    assert_eq!(manager.processed_updates(), 1);
    assert_eq!(manager.dropped_updates(), 0);
    assert!(manager.shutdown());
}

// =============================================================================
// Backpressure: Concurrency Cap and Fault Isolation
// =============================================================================

#[test]
fn when_many_tasks_arrive_at_most_permit_count_run_concurrently() {
    // Given: Five workers sharing two processing permits
    let manager = BackpressureManager::start(
        BackpressureConfig {
            worker_count: 5,
            processing_permits: 2,
            permit_timeout: Duration::from_millis(20),
            ..fast_config()
        },
        Arc::new(NoopMetrics),
    )
    .expect("manager starts");
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    // When: Ten slow updates are offered at once
    for _ in 0..10 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        assert!(manager.offer(ProcessingTask::new(ibm(), move || {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(15));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })));
    }

    // Then: All of them complete, never more than two at a time
    assert!(eventually(|| manager.processed_updates() == 10));
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(manager.dropped_updates(), 0);
    assert!(manager.shutdown());
}

#[test]
fn when_an_action_fails_or_panics_workers_keep_processing() {
    // Given: A running manager
    let metrics = Arc::new(InMemoryMetrics::new());
    let manager =
        BackpressureManager::start(fast_config(), metrics.clone()).expect("manager starts");

    // When: A failing and a panicking update precede a good one
    manager.offer(ProcessingTask::new(ibm(), || {
        Err(ProcessingError::Action {
            instrument: String::from("IBM.N"),
            message: String::from("snapshot rejected"),
        })
    }));
    manager.offer(ProcessingTask::new(ibm(), || panic!("corrupt tick")));
    manager.offer(ProcessingTask::new(ibm(), || Ok(())));

    // Then: Failures are counted and the good update is processed
    assert!(eventually(|| manager.processed_updates() == 1 && manager.failed_updates() == 2));
    assert_eq!(metrics.snapshot().failed, 2);
    assert!(manager.is_running());
    assert!(manager.shutdown());
}

// =============================================================================
// Backpressure: Shutdown
// =============================================================================

#[test]
fn when_shutting_down_system_lets_in_flight_work_finish() {
    // Given: A task that is mid-flight
    let manager = BackpressureManager::start(fast_config(), Arc::new(NoopMetrics))
        .expect("manager starts");
    let finished = Arc::new(AtomicBool::new(false));
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    let flag = Arc::clone(&finished);
    manager.offer(ProcessingTask::new(ibm(), move || {
        let _ = started_tx.send(());
        thread::sleep(Duration::from_millis(100));
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }));
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("task starts");

    // When: The manager shuts down
    let clean = manager.shutdown();

    // Then: It waited for the task and stopped accepting work
    assert!(clean);
    assert!(finished.load(Ordering::SeqCst));
    assert!(!manager.is_running());
    assert!(!manager.offer(ProcessingTask::new(ibm(), || Ok(()))));
}

//! Backpressure for inbound tick processing.
//!
//! The feed thread hands work to [`BackpressureManager::offer`], which never
//! blocks: a task either lands in the bounded queue or is rejected and
//! counted. A fixed pool of worker threads drains the queue, skipping tasks
//! that went stale while queued, and a counting permit pool caps how many
//! actions run at once.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::panic_message;
use crate::metrics::MetricsRecorder;
use crate::{InstrumentId, ProcessingError};

/// What the submitter does with a task the queue rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Shed the update. It stays counted as dropped.
    #[default]
    Drop,
    /// Run the action on the submitting thread.
    ExecuteInline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub queue_capacity: usize,
    pub worker_count: usize,
    /// Actions allowed to execute concurrently across all workers.
    pub processing_permits: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub stale_after: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub poll_interval: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub permit_timeout: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub shutdown_grace: Duration,
    pub overflow_policy: OverflowPolicy,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            worker_count: 5,
            processing_permits: 10,
            stale_after: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
            permit_timeout: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(5),
            overflow_policy: OverflowPolicy::Drop,
        }
    }
}

type TaskAction = Box<dyn FnOnce() -> Result<(), ProcessingError> + Send + 'static>;

/// Deferred work for one instrument.
pub struct ProcessingTask {
    instrument: InstrumentId,
    action: TaskAction,
    created_at: Instant,
}

impl std::fmt::Debug for ProcessingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingTask")
            .field("instrument", &self.instrument)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl ProcessingTask {
    pub fn new<F>(instrument: InstrumentId, action: F) -> Self
    where
        F: FnOnce() -> Result<(), ProcessingError> + Send + 'static,
    {
        Self::created_at(instrument, Instant::now(), action)
    }

    pub fn created_at<F>(instrument: InstrumentId, created_at: Instant, action: F) -> Self
    where
        F: FnOnce() -> Result<(), ProcessingError> + Send + 'static,
    {
        Self {
            instrument,
            action: Box::new(action),
            created_at,
        }
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Runs the action, converting a panic into [`ProcessingError::Panicked`].
    pub fn run(self) -> Result<(), ProcessingError> {
        let Self {
            instrument, action, ..
        } = self;
        match catch_unwind(AssertUnwindSafe(action)) {
            Ok(result) => result,
            Err(payload) => Err(ProcessingError::Panicked {
                instrument: instrument.to_string(),
                message: panic_message(payload.as_ref()),
            }),
        }
    }
}

/// Point-in-time view of the manager's counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BackpressureStats {
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub queue_utilization: f64,
    pub enqueued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
    pub stale_discarded: u64,
    pub running: bool,
}

struct Shared {
    config: BackpressureConfig,
    queue_tx: Sender<ProcessingTask>,
    queue_rx: Receiver<ProcessingTask>,
    permits_tx: Sender<()>,
    permits_rx: Receiver<()>,
    running: AtomicBool,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    stale_discarded: AtomicU64,
    recorder: Arc<dyn MetricsRecorder>,
}

impl Shared {
    fn worker_loop(&self) {
        while self.running.load(Ordering::Acquire) {
            match self.queue_rx.recv_timeout(self.config.poll_interval) {
                Ok(task) => self.handle(task),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle(&self, task: ProcessingTask) {
        let age = task.age();
        if age > self.config.stale_after {
            self.stale_discarded.fetch_add(1, Ordering::Relaxed);
            self.recorder.record_stale_discarded();
            debug!(
                instrument = %task.instrument,
                age_ms = age.as_millis() as u64,
                "discarding stale update"
            );
            return;
        }

        if self.permits_rx.recv_timeout(self.config.permit_timeout).is_err() {
            self.requeue(task);
            return;
        }

        let instrument = task.instrument.clone();
        let outcome = task.run();
        let _ = self.permits_tx.send(());

        match outcome {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
                self.recorder.record_processed();
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.recorder.record_failed(&instrument);
                warn!(instrument = %instrument, error = %err, "update processing failed");
            }
        }
        self.recorder.record_queue_depth(self.queue_rx.len());
    }

    /// All permits busy: put the task back rather than discard it. The
    /// re-offer is non-blocking, so a full queue sheds it as a drop.
    fn requeue(&self, task: ProcessingTask) {
        match self.queue_tx.try_send(task) {
            Ok(()) => trace!("no processing permit available, task requeued"),
            Err(TrySendError::Full(task) | TrySendError::Disconnected(task)) => {
                self.record_drop(&task.instrument, "requeue");
            }
        }
    }

    fn record_drop(&self, instrument: &InstrumentId, stage: &'static str) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        self.recorder.record_dropped(instrument);
        debug!(instrument = %instrument, stage, dropped, "update dropped, queue full");
    }
}

/// Bounded queue plus worker pool.
pub struct BackpressureManager {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    exited_rx: Receiver<()>,
}

impl std::fmt::Debug for BackpressureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureManager")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl BackpressureManager {
    /// Creates the queue and starts the worker threads.
    pub fn start(
        config: BackpressureConfig,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, ProcessingError> {
        let (queue_tx, queue_rx) = channel::bounded(config.queue_capacity.max(1));
        let permit_count = config.processing_permits.max(1);
        let (permits_tx, permits_rx) = channel::bounded(permit_count);
        for _ in 0..permit_count {
            let _ = permits_tx.try_send(());
        }

        let worker_count = config.worker_count.max(1);
        let shared = Arc::new(Shared {
            config,
            queue_tx,
            queue_rx,
            permits_tx,
            permits_rx,
            running: AtomicBool::new(true),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            stale_discarded: AtomicU64::new(0),
            recorder,
        });

        let (exited_tx, exited_rx) = channel::bounded(worker_count);
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = Arc::clone(&shared);
            let exited_tx = exited_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("tickguard-worker-{index}"))
                .spawn(move || {
                    worker_shared.worker_loop();
                    let _ = exited_tx.send(());
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.running.store(false, Ordering::Release);
                    return Err(ProcessingError::WorkerSpawn(err.to_string()));
                }
            }
        }

        info!(
            workers = worker_count,
            capacity = shared.config.queue_capacity,
            permits = permit_count,
            "backpressure manager started"
        );
        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            exited_rx,
        })
    }

    /// Non-blocking enqueue. Returns `false` when the queue is full or the
    /// manager has shut down.
    pub fn offer(&self, task: ProcessingTask) -> bool {
        self.try_offer(task).is_ok()
    }

    /// Like [`Self::offer`] but hands a rejected task back to the caller.
    pub fn try_offer(&self, task: ProcessingTask) -> Result<(), ProcessingTask> {
        if !self.is_running() {
            self.shared.record_drop(&task.instrument, "shutdown");
            return Err(task);
        }

        match self.shared.queue_tx.try_send(task) {
            Ok(()) => {
                self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
                self.shared.recorder.record_enqueued();
                self.shared.recorder.record_queue_depth(self.queue_size());
                Ok(())
            }
            Err(TrySendError::Full(task) | TrySendError::Disconnected(task)) => {
                self.shared.record_drop(&task.instrument, "offer");
                Err(task)
            }
        }
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.shared.config
    }

    pub fn queue_size(&self) -> usize {
        self.shared.queue_rx.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.config.queue_capacity.max(1)
    }

    /// Current depth as a fraction of capacity, in `[0, 1]`.
    pub fn queue_utilization(&self) -> f64 {
        self.queue_size() as f64 / self.queue_capacity() as f64
    }

    pub fn enqueued_updates(&self) -> u64 {
        self.shared.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped_updates(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn processed_updates(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    pub fn failed_updates(&self) -> u64 {
        self.shared.failed.load(Ordering::Relaxed)
    }

    pub fn stale_discarded(&self) -> u64 {
        self.shared.stale_discarded.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> BackpressureStats {
        BackpressureStats {
            queue_size: self.queue_size(),
            queue_capacity: self.queue_capacity(),
            queue_utilization: self.queue_utilization(),
            enqueued: self.enqueued_updates(),
            dropped: self.dropped_updates(),
            processed: self.processed_updates(),
            failed: self.failed_updates(),
            stale_discarded: self.stale_discarded(),
            running: self.is_running(),
        }
    }

    /// Stops the workers, waiting up to the configured grace period for
    /// in-flight actions. Queued tasks are abandoned. Returns `true` when
    /// every worker exited within the grace period.
    pub fn shutdown(&self) -> bool {
        self.shutdown_within(self.shared.config.shutdown_grace)
    }

    pub fn shutdown_within(&self, grace: Duration) -> bool {
        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return true;
        }
        self.shared.running.store(false, Ordering::Release);

        // A grace too large to represent as an instant means wait indefinitely.
        let deadline = Instant::now().checked_add(grace);
        let mut exited = 0;
        while exited < workers.len() {
            let received = match deadline {
                Some(deadline) => self.exited_rx.recv_deadline(deadline).is_ok(),
                None => self.exited_rx.recv().is_ok(),
            };
            if !received {
                break;
            }
            exited += 1;
        }

        let abandoned = self.queue_size();
        if exited == workers.len() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
            info!(abandoned, "backpressure manager stopped");
            true
        } else {
            warn!(
                stuck = workers.len() - exited,
                grace_ms = grace.as_millis() as u64,
                abandoned,
                "workers did not stop within grace period, detaching"
            );
            workers.clear();
            false
        }
    }
}

impl Drop for BackpressureManager {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
    }
}

//! Metrics sink.
//!
//! Core components report through an injected [`MetricsRecorder`]; metric
//! names and export format belong to whoever implements it. Every method has
//! a no-op default so recorders only override what they export.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::quality::{Dimension, Severity};
use crate::resilience::CircuitState;
use crate::InstrumentId;

pub trait MetricsRecorder: Send + Sync {
    fn record_queue_depth(&self, _depth: usize) {}
    fn record_enqueued(&self) {}
    fn record_dropped(&self, _instrument: &InstrumentId) {}
    fn record_processed(&self) {}
    fn record_failed(&self, _instrument: &InstrumentId) {}
    fn record_stale_discarded(&self) {}

    fn record_validation(&self, _instrument: &InstrumentId, _valid: bool) {}
    fn record_issue(&self, _instrument: &InstrumentId, _severity: Severity, _dimension: Dimension) {}
    fn record_missing_fields(&self, _instrument: &InstrumentId, _count: usize) {}
    fn record_validation_system_error(&self, _instrument: &InstrumentId) {}
    fn record_quality_score(&self, _score: f64) {}

    fn record_circuit_transition(&self, _resource: &str, _from: CircuitState, _to: CircuitState) {}
    fn record_rate_limited(&self, _resource: &str) {}
    fn record_retry(&self, _resource: &str, _attempt: u32) {}
    fn record_active_subscriptions(&self, _count: usize) {}
    fn record_price_update(&self, _instrument: &InstrumentId) {}
}

/// Recorder that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsRecorder for NoopMetrics {}

/// Circuit transition as observed by [`InMemoryMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub resource: String,
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Atomic in-process recorder with a point-in-time [`MetricsSnapshot`].
#[derive(Debug)]
pub struct InMemoryMetrics {
    queue_depth: AtomicUsize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    stale_discarded: AtomicU64,
    valid: AtomicU64,
    invalid: AtomicU64,
    missing_fields: AtomicU64,
    validation_system_errors: AtomicU64,
    quality_score_bits: AtomicU64,
    rate_limited: AtomicU64,
    retries: AtomicU64,
    active_subscriptions: AtomicUsize,
    price_updates: AtomicU64,
    issues_by_dimension: Mutex<BTreeMap<Dimension, u64>>,
    transitions: Mutex<Vec<TransitionRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub queue_depth: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
    pub stale_discarded: u64,
    pub valid: u64,
    pub invalid: u64,
    pub missing_fields: u64,
    pub validation_system_errors: u64,
    pub quality_score: f64,
    pub rate_limited: u64,
    pub retries: u64,
    pub active_subscriptions: usize,
    pub price_updates: u64,
    pub issues_by_dimension: BTreeMap<Dimension, u64>,
    pub circuit_transitions: Vec<TransitionRecord>,
}

impl Default for InMemoryMetrics {
    /// No validations yet, so the quality score starts at 100.
    fn default() -> Self {
        Self {
            queue_depth: AtomicUsize::new(0),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            stale_discarded: AtomicU64::new(0),
            valid: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            missing_fields: AtomicU64::new(0),
            validation_system_errors: AtomicU64::new(0),
            quality_score_bits: AtomicU64::new(100.0_f64.to_bits()),
            rate_limited: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            active_subscriptions: AtomicUsize::new(0),
            price_updates: AtomicU64::new(0),
            issues_by_dimension: Mutex::new(BTreeMap::new()),
            transitions: Mutex::new(Vec::new()),
        }
    }
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            valid: self.valid.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            missing_fields: self.missing_fields.load(Ordering::Relaxed),
            validation_system_errors: self.validation_system_errors.load(Ordering::Relaxed),
            quality_score: f64::from_bits(self.quality_score_bits.load(Ordering::Relaxed)),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
            price_updates: self.price_updates.load(Ordering::Relaxed),
            issues_by_dimension: self.issues_by_dimension.lock().clone(),
            circuit_transitions: self.transitions.lock().clone(),
        }
    }
}

impl MetricsRecorder for InMemoryMetrics {
    fn record_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self, _instrument: &InstrumentId) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self, _instrument: &InstrumentId) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_stale_discarded(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_validation(&self, _instrument: &InstrumentId, valid: bool) {
        if valid {
            self.valid.fetch_add(1, Ordering::Relaxed);
        } else {
            self.invalid.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_issue(&self, _instrument: &InstrumentId, _severity: Severity, dimension: Dimension) {
        *self.issues_by_dimension.lock().entry(dimension).or_insert(0) += 1;
    }

    fn record_missing_fields(&self, _instrument: &InstrumentId, count: usize) {
        self.missing_fields.fetch_add(count as u64, Ordering::Relaxed);
    }

    fn record_validation_system_error(&self, _instrument: &InstrumentId) {
        self.validation_system_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_quality_score(&self, score: f64) {
        self.quality_score_bits.store(score.to_bits(), Ordering::Relaxed);
    }

    fn record_circuit_transition(&self, resource: &str, from: CircuitState, to: CircuitState) {
        self.transitions.lock().push(TransitionRecord {
            resource: resource.to_owned(),
            from,
            to,
        });
    }

    fn record_rate_limited(&self, _resource: &str) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self, _resource: &str, _attempt: u32) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_active_subscriptions(&self, count: usize) {
        self.active_subscriptions.store(count, Ordering::Relaxed);
    }

    fn record_price_update(&self, _instrument: &InstrumentId) {
        self.price_updates.fetch_add(1, Ordering::Relaxed);
    }
}

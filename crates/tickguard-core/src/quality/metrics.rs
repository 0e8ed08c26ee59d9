use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::metrics::MetricsRecorder;
use crate::quality::ValidationResult;
use crate::InstrumentId;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counts {
    total: u64,
    invalid: u64,
}

impl Counts {
    fn record(&mut self, valid: bool) {
        self.total += 1;
        if !valid {
            self.invalid += 1;
        }
    }

    /// No validations means no failing data, so the empty score is 100.
    fn score(self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.total - self.invalid) as f64 * 100.0 / self.total as f64
    }
}

/// Running quality score over every validation seen, globally and per
/// instrument.
pub struct QualityMetrics {
    min_quality_score: f64,
    overall: Mutex<Counts>,
    by_instrument: RwLock<HashMap<InstrumentId, Counts>>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl std::fmt::Debug for QualityMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityMetrics")
            .field("min_quality_score", &self.min_quality_score)
            .field("overall", &*self.overall.lock())
            .finish_non_exhaustive()
    }
}

impl QualityMetrics {
    pub fn new(min_quality_score: f64, recorder: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            min_quality_score,
            overall: Mutex::new(Counts::default()),
            by_instrument: RwLock::new(HashMap::new()),
            recorder,
        }
    }

    /// Counts one validation outcome and returns the recomputed score.
    pub fn record(&self, result: &ValidationResult) -> f64 {
        let valid = result.is_valid();
        let score = {
            let mut overall = self.overall.lock();
            overall.record(valid);
            overall.score()
        };
        self.by_instrument
            .write()
            .entry(result.instrument.clone())
            .or_default()
            .record(valid);

        self.recorder.record_validation(&result.instrument, valid);
        self.recorder.record_quality_score(score);
        score
    }

    pub fn score(&self) -> f64 {
        self.overall.lock().score()
    }

    pub fn instrument_score(&self, instrument: &InstrumentId) -> f64 {
        self.by_instrument
            .read()
            .get(instrument)
            .copied()
            .unwrap_or_default()
            .score()
    }

    pub fn total_validations(&self) -> u64 {
        self.overall.lock().total
    }

    pub fn invalid_validations(&self) -> u64 {
        self.overall.lock().invalid
    }

    /// Share of validations that failed, as a percentage.
    pub fn error_rate(&self) -> f64 {
        100.0 - self.score()
    }

    pub fn is_healthy(&self) -> bool {
        self.score() >= self.min_quality_score
    }

    pub fn reset(&self) {
        *self.overall.lock() = Counts::default();
        self.by_instrument.write().clear();
        self.recorder.record_quality_score(100.0);
    }
}

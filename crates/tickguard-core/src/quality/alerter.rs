use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::quality::{IssueTracker, QualityConfig, ValidationResult};
use crate::InstrumentId;

#[derive(Debug, Clone, Copy)]
struct AlertState {
    last_alert: Instant,
    suppressed: u64,
}

/// Raises alerts for invalid ticks, at most one per instrument per throttle
/// window.
///
/// Emitted alerts are recorded in the [`IssueTracker`]. Alerts inside the
/// window are counted and the count is reported with the next emitted alert.
#[derive(Debug)]
pub struct QualityAlerter {
    enabled: bool,
    throttle: Duration,
    tracker: Arc<IssueTracker>,
    state: Mutex<HashMap<InstrumentId, AlertState>>,
}

impl QualityAlerter {
    pub fn new(config: &QualityConfig, tracker: Arc<IssueTracker>) -> Self {
        Self {
            enabled: config.alerting_enabled,
            throttle: config.alert_throttle,
            tracker,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn tracker(&self) -> &Arc<IssueTracker> {
        &self.tracker
    }

    /// Returns `true` when an alert was emitted for `result`.
    pub fn on_invalid(&self, result: &ValidationResult) -> bool {
        self.on_invalid_at(result, Instant::now())
    }

    pub fn on_invalid_at(&self, result: &ValidationResult, now: Instant) -> bool {
        let instrument = &result.instrument;
        if !self.enabled {
            self.tracker.record_issue(instrument, result.clone());
            return false;
        }

        let suppressed = {
            let mut state = self.state.lock();
            match state.get_mut(instrument) {
                Some(entry) if now.saturating_duration_since(entry.last_alert) < self.throttle => {
                    entry.suppressed += 1;
                    return false;
                }
                Some(entry) => {
                    let suppressed = entry.suppressed;
                    *entry = AlertState {
                        last_alert: now,
                        suppressed: 0,
                    };
                    suppressed
                }
                None => {
                    state.insert(
                        instrument.clone(),
                        AlertState {
                            last_alert: now,
                            suppressed: 0,
                        },
                    );
                    0
                }
            }
        };

        self.tracker.record_issue(instrument, result.clone());
        error!(
            instrument = %instrument,
            errors = result.error_count(),
            warnings = result.warning_count(),
            validated_at = %result.validated_at,
            details = %result.summary(),
            "data quality alert"
        );
        if suppressed > 0 {
            info!(
                instrument = %instrument,
                suppressed,
                window_ms = self.throttle.as_millis() as u64,
                "suppressed data quality alerts"
            );
        }
        true
    }

    /// Alerts suppressed for `instrument` since its last emitted alert.
    pub fn suppressed_count(&self, instrument: &InstrumentId) -> u64 {
        self.state
            .lock()
            .get(instrument)
            .map_or(0, |entry| entry.suppressed)
    }
}

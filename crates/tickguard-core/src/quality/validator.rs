use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::panic_message;
use crate::metrics::{MetricsRecorder, NoopMetrics};
use crate::quality::{Dimension, Issue, QualityConfig, QualityMetrics, ValidationResult};
use crate::{InstrumentId, PriceTick, UtcDateTime};

/// Checks ticks against the configured quality thresholds.
///
/// Validation is a pure function of the tick, the configuration and the
/// validation instant. Its only side effects are metric updates.
pub struct QualityValidator {
    config: QualityConfig,
    metrics: Arc<QualityMetrics>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl std::fmt::Debug for QualityValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityValidator")
            .field("config", &self.config)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl QualityValidator {
    pub fn new(
        config: QualityConfig,
        metrics: Arc<QualityMetrics>,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            config,
            metrics,
            recorder,
        }
    }

    /// Validator with its own score tracking and no metric export.
    pub fn standalone(config: QualityConfig) -> Self {
        let recorder: Arc<dyn MetricsRecorder> = Arc::new(NoopMetrics);
        let metrics = Arc::new(QualityMetrics::new(
            config.min_quality_score,
            Arc::clone(&recorder),
        ));
        Self::new(config, metrics, recorder)
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<QualityMetrics> {
        &self.metrics
    }

    pub fn validate(&self, instrument: &InstrumentId, tick: &PriceTick) -> ValidationResult {
        self.validate_at(instrument, tick, UtcDateTime::now())
    }

    /// Validates `tick` as if the current time were `now`.
    pub fn validate_at(
        &self,
        instrument: &InstrumentId,
        tick: &PriceTick,
        now: UtcDateTime,
    ) -> ValidationResult {
        let issues = match catch_unwind(AssertUnwindSafe(|| self.run_checks(instrument, tick, now)))
        {
            Ok(issues) => issues,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(instrument = %instrument, error = %message, "tick validation failed");
                self.recorder.record_validation_system_error(instrument);
                vec![Issue::error(
                    Dimension::System,
                    format!("validation error: {message}"),
                )]
            }
        };

        let result = ValidationResult::new(instrument.clone(), now, issues);
        for issue in &result.issues {
            self.recorder
                .record_issue(instrument, issue.severity, issue.dimension);
        }
        let score = self.metrics.record(&result);
        if !result.is_valid() {
            debug!(
                instrument = %instrument,
                errors = result.error_count(),
                warnings = result.warning_count(),
                score,
                "tick failed validation"
            );
        }
        result
    }

    pub fn validate_batch(
        &self,
        ticks: &BTreeMap<InstrumentId, PriceTick>,
    ) -> BTreeMap<InstrumentId, ValidationResult> {
        let now = UtcDateTime::now();
        ticks
            .iter()
            .map(|(id, tick)| (id.clone(), self.validate_at(id, tick, now)))
            .collect()
    }

    fn run_checks(
        &self,
        instrument: &InstrumentId,
        tick: &PriceTick,
        now: UtcDateTime,
    ) -> Vec<Issue> {
        let mut issues = Vec::new();
        self.check_completeness(instrument, tick, &mut issues);
        self.check_validity(tick, &mut issues);
        self.check_consistency(tick, &mut issues);
        self.check_timeliness(tick, now, &mut issues);
        self.check_accuracy(tick, &mut issues);
        issues
    }

    fn check_completeness(&self, instrument: &InstrumentId, tick: &PriceTick, issues: &mut Vec<Issue>) {
        let missing: Vec<&str> = [
            ("bid", tick.bid.is_none()),
            ("ask", tick.ask.is_none()),
            ("last", tick.last.is_none()),
            ("timestamp", tick.timestamp.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        if !missing.is_empty() {
            self.recorder
                .record_missing_fields(instrument, missing.len());
            issues.push(Issue::error(
                Dimension::Completeness,
                format!("missing required fields: {}", missing.join(", ")),
            ));
        }
    }

    fn check_validity(&self, tick: &PriceTick, issues: &mut Vec<Issue>) {
        for (name, price) in [("bid", tick.bid), ("ask", tick.ask)] {
            let Some(price) = price else { continue };
            if price <= 0.0 {
                issues.push(Issue::error(
                    Dimension::Validity,
                    format!("{name} price must be positive: {price}"),
                ));
            } else if price < self.config.min_price || price > self.config.max_price {
                issues.push(Issue::warning(
                    Dimension::Validity,
                    format!(
                        "{name} price {price} outside expected range [{}, {}]",
                        self.config.min_price, self.config.max_price
                    ),
                ));
            }
        }

        if let Some(volume) = tick.volume.filter(|volume| *volume < 0.0) {
            issues.push(Issue::error(
                Dimension::Validity,
                format!("volume cannot be negative: {volume}"),
            ));
        }
    }

    fn check_consistency(&self, tick: &PriceTick, issues: &mut Vec<Issue>) {
        let (Some(bid), Some(ask)) = (tick.bid, tick.ask) else {
            return;
        };

        if bid > ask {
            issues.push(Issue::error(
                Dimension::Consistency,
                format!("inverted spread: bid {bid} is above ask {ask}"),
            ));
            return;
        }

        // A zero bid gives an unbounded spread. A negative bid gives a
        // negative one and is already a validity error.
        let spread = (ask - bid) / bid * 100.0;
        if spread > self.config.max_spread_percentage {
            issues.push(Issue::warning(
                Dimension::Consistency,
                format!(
                    "spread {spread:.2}% exceeds maximum {}%",
                    self.config.max_spread_percentage
                ),
            ));
        }

        if let Some(last) = tick.last {
            if last < bid || last > ask {
                issues.push(Issue::warning(
                    Dimension::Consistency,
                    format!("last price {last} outside bid/ask range [{bid}, {ask}]"),
                ));
            }
        }
    }

    fn check_timeliness(&self, tick: &PriceTick, now: UtcDateTime, issues: &mut Vec<Issue>) {
        let Some(timestamp) = tick.timestamp else {
            return;
        };

        match timestamp.age_at(now) {
            None => issues.push(Issue::warning(
                Dimension::Timeliness,
                format!("timestamp {timestamp} is in the future"),
            )),
            Some(age) if age > self.config.max_age => issues.push(Issue::warning(
                Dimension::Timeliness,
                format!(
                    "data is stale: {} ms old, maximum {} ms",
                    age.as_millis(),
                    self.config.max_age.as_millis()
                ),
            )),
            Some(_) => {}
        }
    }

    fn check_accuracy(&self, tick: &PriceTick, issues: &mut Vec<Issue>) {
        for (name, price) in [("bid", tick.bid), ("ask", tick.ask)] {
            let Some(price) = price else { continue };
            let places = decimal_places(price);
            if places > self.config.max_decimal_places {
                issues.push(Issue::warning(
                    Dimension::Accuracy,
                    format!(
                        "{name} price has {places} decimal places, maximum {}",
                        self.config.max_decimal_places
                    ),
                ));
            }
        }
    }
}

/// Significant decimal places of `value` when rendered to ten places.
fn decimal_places(value: f64) -> u32 {
    let rendered = format!("{value:.10}");
    match rendered.split_once('.') {
        Some((_, fraction)) => fraction.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

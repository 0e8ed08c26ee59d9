//! Pipeline configuration.
//!
//! Every threshold has a default matching production behaviour. Serialized
//! durations are whole milliseconds, and missing keys fall back to the
//! defaults, so a partial JSON document is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backpressure::BackpressureConfig;
use crate::quality::{IssueTrackerConfig, QualityConfig};
use crate::resilience::{Backoff, CircuitBreakerConfig, RateLimitConfig, RetryConfig};
use crate::ConfigError;

/// Logical resource name the upstream feed policies are registered under.
pub const DEFAULT_RESOURCE_NAME: &str = "marketDataProvider";

/// Upper bound for every configured duration.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub resource_name: String,
    pub backpressure: BackpressureConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    pub quality: QualityConfig,
    pub issue_tracker: IssueTrackerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resource_name: String::from(DEFAULT_RESOURCE_NAME),
            backpressure: BackpressureConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            quality: QualityConfig::default(),
            issue_tracker: IssueTrackerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Rejects settings that would stall or disable a subsystem outright.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bp = &self.backpressure;
        require_positive("backpressure.queue_capacity", bp.queue_capacity)?;
        require_positive("backpressure.worker_count", bp.worker_count)?;
        require_positive("backpressure.processing_permits", bp.processing_permits)?;

        let cb = &self.circuit_breaker;
        require_positive("circuit_breaker.sliding_window_size", cb.sliding_window_size)?;
        require_positive("circuit_breaker.minimum_calls", cb.minimum_calls)?;
        require_positive(
            "circuit_breaker.half_open_permitted_calls",
            cb.half_open_permitted_calls as usize,
        )?;
        if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 100.0) {
            return Err(ConfigError::OutOfRange {
                field: "circuit_breaker.failure_rate_threshold",
                value: cb.failure_rate_threshold,
            });
        }

        require_positive("rate_limit.limit_for_period", self.rate_limit.limit_for_period as usize)?;
        require_positive("retry.max_attempts", self.retry.max_attempts as usize)?;

        let q = &self.quality;
        if !(q.min_price <= q.max_price) {
            return Err(ConfigError::OutOfRange {
                field: "quality.min_price",
                value: q.min_price,
            });
        }
        if !(0.0..=100.0).contains(&q.min_quality_score) {
            return Err(ConfigError::OutOfRange {
                field: "quality.min_quality_score",
                value: q.min_quality_score,
            });
        }

        require_positive(
            "issue_tracker.max_issues_per_instrument",
            self.issue_tracker.max_issues_per_instrument,
        )?;
        require_positive("issue_tracker.cleanup_every", self.issue_tracker.cleanup_every)?;

        self.validate_durations()
    }

    fn validate_durations(&self) -> Result<(), ConfigError> {
        let bp = &self.backpressure;
        let mut durations = vec![
            ("backpressure.stale_after", bp.stale_after),
            ("backpressure.poll_interval", bp.poll_interval),
            ("backpressure.permit_timeout", bp.permit_timeout),
            ("backpressure.shutdown_grace", bp.shutdown_grace),
            ("circuit_breaker.open_wait", self.circuit_breaker.open_wait),
            ("rate_limit.refresh_period", self.rate_limit.refresh_period),
            ("rate_limit.timeout", self.rate_limit.timeout),
            ("quality.max_age", self.quality.max_age),
            ("quality.alert_throttle", self.quality.alert_throttle),
            ("issue_tracker.retention", self.issue_tracker.retention),
            ("issue_tracker.summary_window", self.issue_tracker.summary_window),
        ];
        match self.retry.backoff {
            Backoff::Fixed { delay } => durations.push(("retry.backoff.delay", delay)),
            Backoff::Exponential { base, max, .. } => {
                durations.push(("retry.backoff.base", base));
                durations.push(("retry.backoff.max", max));
            }
        }

        match durations.into_iter().find(|(_, value)| *value > MAX_DURATION) {
            Some((field, _)) => Err(ConfigError::DurationTooLong {
                field,
                max_ms: MAX_DURATION.as_millis() as u64,
            }),
            None => Ok(()),
        }
    }
}

fn require_positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NonPositive { field });
    }
    Ok(())
}

/// Serde adapter storing a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

//! # Data Quality Engine
//!
//! Every tick is checked along five independent dimensions by the
//! [`QualityValidator`]. Results feed the running [`QualityMetrics`] score,
//! the rolling [`IssueTracker`] history and the throttled
//! [`QualityAlerter`].
//!
//! | Dimension | Error | Warning |
//! |-----------|-------|---------|
//! | Completeness | bid/ask/last/timestamp missing | |
//! | Validity | non-positive bid/ask, negative volume | bid/ask outside price range |
//! | Consistency | bid above ask | spread too wide, last outside bid/ask |
//! | Timeliness | | future timestamp, tick too old |
//! | Accuracy | | too many decimal places |
//!
//! A validator fault is reported as a single `SYSTEM` error rather than
//! propagated.

use std::time::Duration;

use serde::{Deserialize, Serialize};

mod alerter;
mod metrics;
mod result;
mod tracker;
mod validator;

pub use alerter::QualityAlerter;
pub use metrics::QualityMetrics;
pub use result::{Dimension, Issue, Severity, ValidationResult};
pub use tracker::{IssueRecord, IssueTracker, QualitySummary, SymbolIssueCount};
pub use validator::QualityValidator;

/// Thresholds applied by the validator and alerter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// When false, validation is skipped and every tick is admitted.
    pub enabled: bool,
    pub min_price: f64,
    pub max_price: f64,
    pub max_spread_percentage: f64,
    #[serde(with = "crate::config::duration_ms")]
    pub max_age: Duration,
    pub max_decimal_places: u32,
    pub min_quality_score: f64,
    pub alerting_enabled: bool,
    #[serde(with = "crate::config::duration_ms")]
    pub alert_throttle: Duration,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_price: 0.01,
            max_price: 1_000_000.0,
            max_spread_percentage: 10.0,
            max_age: Duration::from_secs(60),
            max_decimal_places: 6,
            min_quality_score: 95.0,
            alerting_enabled: true,
            alert_throttle: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueTrackerConfig {
    pub max_issues_per_instrument: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub retention: Duration,
    /// Time-based eviction runs once every this many inserts.
    pub cleanup_every: usize,
    #[serde(with = "crate::config::duration_ms")]
    pub summary_window: Duration,
    pub top_offenders: usize,
}

impl Default for IssueTrackerConfig {
    fn default() -> Self {
        Self {
            max_issues_per_instrument: 1000,
            retention: Duration::from_secs(24 * 60 * 60),
            cleanup_every: 100,
            summary_window: Duration::from_secs(60 * 60),
            top_offenders: 10,
        }
    }
}

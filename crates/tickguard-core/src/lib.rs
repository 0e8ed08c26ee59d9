//! # Tickguard Core
//!
//! Hot-path components for a live price tick pipeline.
//!
//! ## Overview
//!
//! - **Backpressure**: bounded, non-blocking admission of tick processing
//!   with a worker pool and a concurrency cap
//! - **Resilient feed access**: rate limiter, circuit breaker and retry in
//!   front of an upstream feed, failing open
//! - **Data quality**: per-tick validation, running quality score and a
//!   rolling issue history
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backpressure`] | Bounded queue, worker pool, processing permits |
//! | [`config`] | Pipeline configuration and defaults |
//! | [`domain`] | Instrument ids, ticks, timestamps |
//! | [`error`] | Core error types |
//! | [`events`] | Price-updated notifications |
//! | [`feed`] | Upstream feed contract and in-memory feed |
//! | [`metrics`] | Metrics sink trait and recorders |
//! | [`pipeline`] | Facade wiring everything together |
//! | [`quality`] | Validator, quality score, issue tracker, alerts |
//! | [`resilience`] | Circuit breaker, rate limiter, retry, resilient feed |
//! | [`store`] | Latest snapshot per instrument |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tickguard_core::{fields, InstrumentId, NoopMetrics, PipelineConfig, PricingPipeline, RawFields};
//!
//! let pipeline = PricingPipeline::start(PipelineConfig::default(), Arc::new(NoopMetrics))?;
//! let ibm = InstrumentId::parse("IBM.N")?;
//! let raw = RawFields::from([
//!     (fields::BID.to_owned(), "150.25".to_owned()),
//!     (fields::ASK.to_owned(), "150.30".to_owned()),
//! ]);
//! pipeline.handle_update(&ibm, &raw);
//! ```

pub mod backpressure;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod feed;
pub mod metrics;
pub mod pipeline;
pub mod quality;
pub mod resilience;
pub mod store;

pub use backpressure::{
    BackpressureConfig, BackpressureManager, BackpressureStats, OverflowPolicy, ProcessingTask,
};
pub use config::{PipelineConfig, DEFAULT_RESOURCE_NAME};
pub use domain::{fields, InstrumentId, PriceSnapshot, PriceTick, RawFields, UtcDateTime};
pub use error::{ConfigError, CoreError, ProcessingError, ValidationError};
pub use events::{PriceEventBus, PriceUpdateEvent};
pub use feed::{FeedError, FeedErrorKind, FeedFuture, MarketDataFeed, PriceMap, SnapshotFeed};
pub use metrics::{InMemoryMetrics, MetricsRecorder, MetricsSnapshot, NoopMetrics};
pub use pipeline::{Admission, PricingPipeline, UpdateReceipt};
pub use quality::{
    Dimension, Issue, IssueRecord, IssueTracker, IssueTrackerConfig, QualityAlerter,
    QualityConfig, QualityMetrics, QualitySummary, QualityValidator, Severity, SymbolIssueCount,
    ValidationResult,
};
pub use resilience::{
    Backoff, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig,
    RateLimitGate, ResiliencePolicies, ResilienceRegistry, ResilientFeed, RetryConfig,
};
pub use store::SnapshotStore;

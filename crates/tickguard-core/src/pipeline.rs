//! Pipeline facade wiring validation, backpressure, storage and the
//! resilient feed together.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::backpressure::{BackpressureManager, OverflowPolicy, ProcessingTask};
use crate::events::{PriceEventBus, PriceUpdateEvent};
use crate::feed::{MarketDataFeed, SnapshotFeed};
use crate::metrics::MetricsRecorder;
use crate::quality::{
    IssueTracker, QualityAlerter, QualityMetrics, QualitySummary, QualityValidator,
    ValidationResult,
};
use crate::resilience::{ResilienceRegistry, ResilientFeed};
use crate::store::SnapshotStore;
use crate::{CoreError, InstrumentId, PipelineConfig, PriceTick, RawFields, UtcDateTime};

/// How an update was admitted for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Queue was full and the overflow policy ran the update on the caller.
    ExecutedInline,
    Dropped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReceipt {
    pub admission: Admission,
    /// `None` when quality checks are disabled.
    pub validation: Option<ValidationResult>,
}

pub struct PricingPipeline {
    config: PipelineConfig,
    store: SnapshotStore,
    events: PriceEventBus,
    backpressure: BackpressureManager,
    validator: QualityValidator,
    tracker: Arc<IssueTracker>,
    alerter: QualityAlerter,
    registry: Arc<ResilienceRegistry>,
    feed: Arc<ResilientFeed>,
    recorder: Arc<dyn MetricsRecorder>,
}

impl std::fmt::Debug for PricingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingPipeline")
            .field("resource", &self.config.resource_name)
            .field("backpressure", &self.backpressure)
            .field("snapshots", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl PricingPipeline {
    /// Starts a pipeline whose upstream feed serves reads from its own
    /// snapshot store.
    pub fn start(
        config: PipelineConfig,
        recorder: Arc<dyn MetricsRecorder>,
    ) -> Result<Self, CoreError> {
        let store = SnapshotStore::new();
        let delegate: Arc<dyn MarketDataFeed> =
            Arc::new(SnapshotFeed::new(store.clone(), Arc::clone(&recorder)));
        Self::assemble(config, recorder, store, delegate)
    }

    /// Starts a pipeline in front of an external upstream feed.
    pub fn with_feed(
        config: PipelineConfig,
        recorder: Arc<dyn MetricsRecorder>,
        delegate: Arc<dyn MarketDataFeed>,
    ) -> Result<Self, CoreError> {
        Self::assemble(config, recorder, SnapshotStore::new(), delegate)
    }

    fn assemble(
        config: PipelineConfig,
        recorder: Arc<dyn MetricsRecorder>,
        store: SnapshotStore,
        delegate: Arc<dyn MarketDataFeed>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let quality_metrics = Arc::new(QualityMetrics::new(
            config.quality.min_quality_score,
            Arc::clone(&recorder),
        ));
        let validator = QualityValidator::new(
            config.quality.clone(),
            quality_metrics,
            Arc::clone(&recorder),
        );
        let tracker = Arc::new(IssueTracker::new(config.issue_tracker.clone()));
        let alerter = QualityAlerter::new(&config.quality, Arc::clone(&tracker));

        let registry = Arc::new(ResilienceRegistry::new(
            config.circuit_breaker.clone(),
            config.rate_limit.clone(),
            config.retry.clone(),
            Arc::clone(&recorder),
        ));
        let feed = Arc::new(ResilientFeed::new(
            config.resource_name.clone(),
            delegate,
            Arc::clone(&registry),
        ));

        let backpressure =
            BackpressureManager::start(config.backpressure.clone(), Arc::clone(&recorder))?;

        Ok(Self {
            config,
            store,
            events: PriceEventBus::default(),
            backpressure,
            validator,
            tracker,
            alerter,
            registry,
            feed,
            recorder,
        })
    }

    /// Entry point for the feed adapter. Never blocks on downstream work.
    pub fn handle_update(&self, instrument: &InstrumentId, raw: &RawFields) -> UpdateReceipt {
        let tick = PriceTick::from_raw_fields(instrument.clone(), raw, UtcDateTime::now());
        let validation = self
            .config
            .quality
            .enabled
            .then(|| self.check_quality(instrument, &tick));

        let task = self.snapshot_task(instrument, tick);
        let admission = match self.backpressure.try_offer(task) {
            Ok(()) => Admission::Queued,
            Err(rejected) => match self.config.backpressure.overflow_policy {
                OverflowPolicy::Drop => Admission::Dropped,
                OverflowPolicy::ExecuteInline => {
                    if let Err(err) = rejected.run() {
                        warn!(instrument = %instrument, error = %err, "inline update failed");
                    }
                    Admission::ExecutedInline
                }
            },
        };

        UpdateReceipt {
            admission,
            validation,
        }
    }

    fn check_quality(&self, instrument: &InstrumentId, tick: &PriceTick) -> ValidationResult {
        let result = self.validator.validate(instrument, tick);
        if !result.is_valid() {
            self.alerter.on_invalid(&result);
        } else if result.has_warnings() {
            debug!(
                instrument = %instrument,
                warnings = result.warning_count(),
                "data quality warnings"
            );
            self.tracker.record_issue(instrument, result.clone());
        }
        result
    }

    fn snapshot_task(&self, instrument: &InstrumentId, tick: PriceTick) -> ProcessingTask {
        let store = self.store.clone();
        let events = self.events.clone();
        let recorder = Arc::clone(&self.recorder);
        ProcessingTask::new(instrument.clone(), move || {
            let snapshot = store.upsert(tick);
            recorder.record_price_update(&snapshot.instrument);
            events.publish(snapshot.instrument.clone(), snapshot);
            Ok(())
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PriceUpdateEvent> {
        self.events.subscribe()
    }

    pub fn backpressure(&self) -> &BackpressureManager {
        &self.backpressure
    }

    pub fn validator(&self) -> &QualityValidator {
        &self.validator
    }

    pub fn quality_metrics(&self) -> &Arc<QualityMetrics> {
        self.validator.metrics()
    }

    pub fn issue_tracker(&self) -> &Arc<IssueTracker> {
        &self.tracker
    }

    pub fn quality_summary(&self) -> QualitySummary {
        self.tracker.summary()
    }

    pub fn registry(&self) -> &Arc<ResilienceRegistry> {
        &self.registry
    }

    pub fn resilient_feed(&self) -> &Arc<ResilientFeed> {
        &self.feed
    }

    /// Stops the backpressure workers. See [`BackpressureManager::shutdown`].
    pub fn shutdown(&self) -> bool {
        self.backpressure.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::fields;
    use crate::metrics::NoopMetrics;

    fn raw(pairs: &[(&str, &str)]) -> RawFields {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn pipeline() -> PricingPipeline {
        let mut config = PipelineConfig::default();
        config.backpressure.poll_interval = Duration::from_millis(10);
        PricingPipeline::start(config, Arc::new(NoopMetrics)).expect("pipeline starts")
    }

    fn wait_for_snapshot(pipeline: &PricingPipeline, id: &InstrumentId) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if pipeline.store().get(id).is_some() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn valid_update_is_stored() {
        let pipeline = pipeline();
        let id = InstrumentId::parse("IBM.N").expect("valid");

        let receipt = pipeline.handle_update(
            &id,
            &raw(&[
                (fields::BID, "150.25"),
                (fields::ASK, "150.30"),
                (fields::LAST, "150.27"),
            ]),
        );

        assert_eq!(receipt.admission, Admission::Queued);
        assert!(receipt.validation.expect("quality enabled").is_valid());
        assert!(wait_for_snapshot(&pipeline, &id));
        assert_eq!(pipeline.store().get(&id).and_then(|s| s.bid), Some(150.25));
        assert!(pipeline.shutdown());
    }

    #[test]
    fn invalid_update_is_tracked_and_still_stored() {
        let pipeline = pipeline();
        let id = InstrumentId::parse("EUR=").expect("valid");

        let receipt = pipeline.handle_update(&id, &raw(&[(fields::BID, "1.09")]));

        assert!(!receipt.validation.expect("quality enabled").is_valid());
        assert_eq!(pipeline.issue_tracker().issue_count(&id), 1);
        assert!(wait_for_snapshot(&pipeline, &id));
        assert!(pipeline.shutdown());
    }

    #[test]
    fn disabled_quality_skips_validation() {
        let mut config = PipelineConfig::default();
        config.quality.enabled = false;
        let pipeline = PricingPipeline::start(config, Arc::new(NoopMetrics)).expect("starts");
        let id = InstrumentId::parse("VOD.L").expect("valid");

        let receipt = pipeline.handle_update(&id, &RawFields::new());

        assert_eq!(receipt.validation, None);
        assert_eq!(pipeline.quality_metrics().total_validations(), 0);
    }
}

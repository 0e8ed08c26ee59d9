//! Behavior-driven tests for the end-to-end tick pipeline: a raw update goes
//! in, a stored snapshot and a price event come out, and readers see it
//! through the resilient feed.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use tickguard_core::{
    fields, Admission, ConfigError, CoreError, InMemoryMetrics, NoopMetrics,
    OverflowPolicy, PipelineConfig, PricingPipeline, ProcessingTask, RawFields, UtcDateTime,
};
use tickguard_tests::{eventually, id};

fn quote(bid: &str, ask: &str, last: &str, timestamp: &str) -> RawFields {
    RawFields::from([
        (fields::BID.to_owned(), bid.to_owned()),
        (fields::ASK.to_owned(), ask.to_owned()),
        (fields::LAST.to_owned(), last.to_owned()),
        (fields::VOLUME.to_owned(), String::from("1200")),
        (fields::TIMESTAMP.to_owned(), timestamp.to_owned()),
    ])
}

fn fresh_quote(bid: &str, ask: &str, last: &str) -> RawFields {
    quote(bid, ask, last, &UtcDateTime::now().format_rfc3339())
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.backpressure.poll_interval = Duration::from_millis(10);
    config.backpressure.shutdown_grace = Duration::from_secs(2);
    config
}

// =============================================================================
// Pipeline: Snapshot Storage and Events
// =============================================================================

#[tokio::test]
async fn when_update_arrives_system_stores_snapshot_and_notifies_listeners() {
    // Given: A running pipeline with one listener
    let metrics = Arc::new(InMemoryMetrics::new());
    let pipeline = PricingPipeline::start(fast_config(), metrics.clone()).expect("pipeline starts");
    let mut events = pipeline.subscribe_events();
    let ibm = id("IBM.N");

    // When: A valid quote is handed in
    let receipt = pipeline.handle_update(&ibm, &fresh_quote("150.25", "150.30", "150.27"));

    // Then: It was queued and passed validation
    assert_eq!(receipt.admission, Admission::Queued);
    assert!(receipt.validation.expect("quality is enabled").is_valid());

    // And: Listeners receive the stored snapshot
    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event arrives in time")
        .expect("bus is open");
    assert_eq!(event.instrument, ibm);
    assert_eq!(event.snapshot.bid, Some(150.25));
    assert_eq!(event.snapshot.ask, Some(150.30));
    assert_eq!(pipeline.store().get(&ibm), Some(event.snapshot));

    // And: The update shows up in the metrics
    assert!(eventually(|| metrics.snapshot().price_updates == 1));
    assert_eq!(metrics.snapshot().valid, 1);
    assert!(pipeline.shutdown());
}

#[test]
fn when_same_update_is_applied_twice_store_holds_one_equal_snapshot() {
    // Given: A running pipeline
    let pipeline = PricingPipeline::start(fast_config(), Arc::new(NoopMetrics))
        .expect("pipeline starts");
    let eur = id("EUR=");
    let stamp = UtcDateTime::now().format_rfc3339();
    let update = quote("1.0921", "1.0923", "1.0922", &stamp);

    // When: The identical update is handled twice
    pipeline.handle_update(&eur, &update);
    assert!(eventually(|| pipeline.backpressure().processed_updates() == 1));
    let first = pipeline.store().get(&eur).expect("first snapshot stored");
    pipeline.handle_update(&eur, &update);
    assert!(eventually(|| pipeline.backpressure().processed_updates() == 2));

    // Then: One entry remains and it equals the first write
    let second = pipeline.store().get(&eur).expect("snapshot still stored");
    assert_eq!(pipeline.store().len(), 1);
    assert_eq!(*first, *second);
    assert!(pipeline.shutdown());
}

#[test]
fn when_newer_update_arrives_system_replaces_the_snapshot() {
    // Given: A stored quote
    let pipeline = PricingPipeline::start(fast_config(), Arc::new(NoopMetrics))
        .expect("pipeline starts");
    let vod = id("VOD.L");
    pipeline.handle_update(&vod, &fresh_quote("72.10", "72.12", "72.11"));
    assert!(eventually(|| pipeline.store().get(&vod).is_some()));

    // When: A newer quote is handled
    pipeline.handle_update(&vod, &fresh_quote("72.20", "72.22", "72.21"));

    // Then: Readers see the latest values
    assert!(eventually(|| pipeline
        .store()
        .get(&vod)
        .is_some_and(|snapshot| snapshot.bid == Some(72.20))));
    assert!(pipeline.shutdown());
}

// =============================================================================
// Pipeline: Data Quality Is Observational
// =============================================================================

#[test]
fn when_update_is_invalid_system_still_stores_it_and_tracks_the_issue() {
    // Given: A running pipeline
    let pipeline = PricingPipeline::start(fast_config(), Arc::new(NoopMetrics))
        .expect("pipeline starts");
    let ibm = id("IBM.N");

    // When: An inverted quote arrives
    let receipt = pipeline.handle_update(&ibm, &fresh_quote("151.00", "150.00", "150.50"));

    // Then: Validation failed but the snapshot is stored regardless
    assert!(!receipt.validation.expect("quality is enabled").is_valid());
    assert!(eventually(|| pipeline.store().get(&ibm).is_some()));

    // And: The score and issue history reflect the failure
    assert_eq!(pipeline.quality_metrics().score(), 0.0);
    assert_eq!(pipeline.issue_tracker().issue_count(&ibm), 1);
    let summary = pipeline.quality_summary();
    assert_eq!(summary.total_errors, 1);
    assert_eq!(summary.affected_instruments, 1);
    assert!(pipeline.shutdown());
}

#[test]
fn when_update_only_has_warnings_system_records_it_without_alerting() {
    // Given: A running pipeline
    let pipeline = PricingPipeline::start(fast_config(), Arc::new(NoopMetrics))
        .expect("pipeline starts");
    let eur = id("EUR=");

    // When: A quote with a wide spread arrives
    let receipt = pipeline.handle_update(&eur, &fresh_quote("1.00", "1.20", "1.10"));

    // Then: It is valid, counted as good data, and still kept in the history
    let validation = receipt.validation.expect("quality is enabled");
    assert!(validation.is_valid());
    assert!(validation.has_warnings());
    assert_eq!(pipeline.quality_metrics().score(), 100.0);
    assert_eq!(pipeline.issue_tracker().issue_count(&eur), 1);
    assert!(pipeline.shutdown());
}

// =============================================================================
// Pipeline: Overflow Handling
// =============================================================================

#[test]
fn when_queue_is_full_and_policy_is_inline_caller_applies_the_update() {
    // Given: A one-slot queue whose only worker is busy and whose slot is taken
    let mut config = fast_config();
    config.backpressure.queue_capacity = 1;
    config.backpressure.worker_count = 1;
    config.backpressure.processing_permits = 1;
    config.backpressure.overflow_policy = OverflowPolicy::ExecuteInline;
    let pipeline = PricingPipeline::start(config, Arc::new(NoopMetrics)).expect("pipeline starts");
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    let blocker = id("BLOCK.X");
    assert!(pipeline.backpressure().offer(ProcessingTask::new(blocker.clone(), move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    })));
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker is busy");
    assert!(pipeline
        .backpressure()
        .offer(ProcessingTask::new(blocker, || Ok(()))));

    // When: An update arrives
    let ibm = id("IBM.N");
    let receipt = pipeline.handle_update(&ibm, &fresh_quote("150.25", "150.30", "150.27"));

    // Then: It ran on the caller and is visible immediately
    assert_eq!(receipt.admission, Admission::ExecutedInline);
    assert!(pipeline.store().get(&ibm).is_some());
    assert_eq!(pipeline.backpressure().dropped_updates(), 1);

    drop(release_tx);
    assert!(pipeline.shutdown());
}

#[test]
fn when_queue_is_full_and_policy_is_drop_update_is_shed() {
    // Given: The same saturated setup under the default policy
    let mut config = fast_config();
    config.backpressure.queue_capacity = 1;
    config.backpressure.worker_count = 1;
    config.backpressure.processing_permits = 1;
    let pipeline = PricingPipeline::start(config, Arc::new(NoopMetrics)).expect("pipeline starts");
    let (release_tx, release_rx) = channel::bounded::<()>(1);
    let (started_tx, started_rx) = channel::bounded::<()>(1);
    let blocker = id("BLOCK.X");
    assert!(pipeline.backpressure().offer(ProcessingTask::new(blocker.clone(), move || {
        let _ = started_tx.send(());
        let _ = release_rx.recv();
        Ok(())
    })));
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("worker is busy");
    assert!(pipeline
        .backpressure()
        .offer(ProcessingTask::new(blocker, || Ok(()))));

    // When: An update arrives
    let ibm = id("IBM.N");
    let receipt = pipeline.handle_update(&ibm, &fresh_quote("150.25", "150.30", "150.27"));

    // Then: It is dropped, counted, and never stored
    assert_eq!(receipt.admission, Admission::Dropped);
    assert_eq!(pipeline.backpressure().dropped_updates(), 1);
    assert!(pipeline.store().get(&ibm).is_none());

    drop(release_tx);
    assert!(pipeline.shutdown());
}

// =============================================================================
// Pipeline: Reads Through the Resilient Feed
// =============================================================================

#[tokio::test]
async fn when_reading_through_the_resilient_feed_callers_see_stored_prices() {
    // Given: Two stored instruments
    let pipeline = PricingPipeline::start(fast_config(), Arc::new(NoopMetrics))
        .expect("pipeline starts");
    let (ibm, eur, msft) = (id("IBM.N"), id("EUR="), id("MSFT.O"));
    pipeline.handle_update(&ibm, &fresh_quote("150.25", "150.30", "150.27"));
    pipeline.handle_update(&eur, &fresh_quote("1.0921", "1.0923", "1.0922"));
    assert!(eventually(|| pipeline.store().len() == 2));

    // When: A reader asks for three instruments, one never seen
    let prices = pipeline
        .resilient_feed()
        .latest_prices(vec![ibm.clone(), eur.clone(), msft.clone()])
        .await;

    // Then: Only instruments with a snapshot are returned
    assert_eq!(prices.len(), 2);
    assert_eq!(prices[&ibm].bid, Some(150.25));
    assert!(!prices.contains_key(&msft));
    assert!(pipeline.shutdown());
}

#[tokio::test]
async fn when_subscribing_through_the_resilient_feed_subscription_set_is_updated() {
    // Given: A running pipeline
    let pipeline = PricingPipeline::start(fast_config(), Arc::new(NoopMetrics))
        .expect("pipeline starts");
    let feed = pipeline.resilient_feed();
    let (ibm, eur) = (id("IBM.N"), id("EUR="));

    // When: Two instruments are subscribed and one is removed
    feed.subscribe(vec![ibm.clone(), eur.clone()]).await;
    feed.unsubscribe(vec![eur]).await;

    // Then: The subscription set holds the remaining instrument
    let symbols = feed.subscribed_symbols().await;
    assert_eq!(symbols.into_iter().collect::<Vec<_>>(), vec![ibm]);
    assert!(pipeline.shutdown());
}

// =============================================================================
// Pipeline: Configuration
// =============================================================================

#[test]
fn when_config_disables_a_subsystem_outright_pipeline_refuses_to_start() {
    // Given: A config with no workers
    let mut config = PipelineConfig::default();
    config.backpressure.worker_count = 0;

    // When: The pipeline is started
    let err = PricingPipeline::start(config, Arc::new(NoopMetrics)).expect_err("config rejected");

    // Then: The failure names the offending field
    assert!(matches!(
        err,
        CoreError::Config(ConfigError::NonPositive {
            field: "backpressure.worker_count"
        })
    ));
}

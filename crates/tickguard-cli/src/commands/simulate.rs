use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tickguard_core::{
    Admission, BackpressureStats, CircuitState, InMemoryMetrics, InstrumentId, MetricsSnapshot,
    PipelineConfig, PriceSnapshot, PricingPipeline, QualitySummary,
};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cli::SimulateArgs;
use crate::error::CliError;
use crate::generator::TickGenerator;

use super::CommandOutput;

/// Simulation run identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
struct RunId(Uuid);

impl RunId {
    fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct AdmissionCounts {
    queued: u64,
    executed_inline: u64,
    dropped: u64,
}

impl AdmissionCounts {
    fn count(&mut self, admission: Admission) {
        match admission {
            Admission::Queued => self.queued += 1,
            Admission::ExecutedInline => self.executed_inline += 1,
            Admission::Dropped => self.dropped += 1,
        }
    }
}

#[derive(Debug, Serialize)]
struct QualityReport {
    score: f64,
    min_quality_score: f64,
    healthy: bool,
    total_validations: u64,
    invalid_validations: u64,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    run_id: RunId,
    elapsed_ms: u64,
    ticks_generated: u64,
    defects_injected: u64,
    admissions: AdmissionCounts,
    backpressure: BackpressureStats,
    quality: QualityReport,
    summary: QualitySummary,
    circuit_state: CircuitState,
    subscribed: Vec<InstrumentId>,
    latest_prices: BTreeMap<String, PriceSnapshot>,
    metrics: MetricsSnapshot,
    clean_shutdown: bool,
}

pub async fn run(args: &SimulateArgs, config: PipelineConfig) -> Result<CommandOutput, CliError> {
    if args.rate == 0 {
        return Err(CliError::Command(String::from(
            "--rate must be greater than zero",
        )));
    }
    if !(0.0..=1.0).contains(&args.defect_ratio) {
        return Err(CliError::Command(format!(
            "--defect-ratio must be between 0 and 1, got {}",
            args.defect_ratio
        )));
    }
    let instruments = args
        .instruments
        .iter()
        .map(|raw| InstrumentId::parse(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let run_id = RunId::new_v4();
    let min_quality_score = config.quality.min_quality_score;
    let drain_budget = config.backpressure.shutdown_grace;
    let metrics = Arc::new(InMemoryMetrics::new());
    let pipeline = PricingPipeline::start(config, metrics.clone())?;
    let feed = pipeline.resilient_feed();
    info!(
        %run_id,
        instruments = instruments.len(),
        rate = args.rate,
        duration_ms = args.duration_ms,
        "simulation started"
    );

    feed.subscribe(instruments.clone()).await;

    let mut generator = TickGenerator::new(instruments.clone(), args.defect_ratio, args.seed);
    let mut admissions = AdmissionCounts::default();
    let mut ticks_generated = 0_u64;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(args.rate)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let started = Instant::now();
    let deadline = started + Duration::from_millis(args.duration_ms);
    while Instant::now() < deadline {
        ticker.tick().await;
        let Some((instrument, raw)) = generator.next_tick() else {
            break;
        };
        let receipt = pipeline.handle_update(&instrument, &raw);
        admissions.count(receipt.admission);
        ticks_generated += 1;
    }

    drain(&pipeline, drain_budget).await;
    let latest = feed.latest_prices(instruments).await;
    let subscribed = feed.subscribed_symbols().await;
    let circuit_state = feed.circuit_state();
    let clean_shutdown = pipeline.shutdown();
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let quality_metrics = pipeline.quality_metrics();
    let report = SimulationReport {
        run_id,
        elapsed_ms,
        ticks_generated,
        defects_injected: generator.defects_injected(),
        admissions,
        backpressure: pipeline.backpressure().stats(),
        quality: QualityReport {
            score: quality_metrics.score(),
            min_quality_score,
            healthy: quality_metrics.is_healthy(),
            total_validations: quality_metrics.total_validations(),
            invalid_validations: quality_metrics.invalid_validations(),
        },
        summary: pipeline.quality_summary(),
        circuit_state,
        subscribed: subscribed.into_iter().collect(),
        latest_prices: latest
            .into_iter()
            .map(|(id, snapshot)| (id.to_string(), (*snapshot).clone()))
            .collect(),
        metrics: metrics.snapshot(),
        clean_shutdown,
    };
    info!(
        %run_id,
        ticks = report.ticks_generated,
        dropped = report.backpressure.dropped,
        score = report.quality.score,
        "simulation finished"
    );

    let warnings = report_warnings(&report);
    for warning in &warnings {
        warn!(%run_id, "{warning}");
    }
    Ok(CommandOutput::ok(serde_json::to_value(&report)?).with_warnings(warnings))
}

/// Waits for queued updates to be processed, up to `budget`.
async fn drain(pipeline: &PricingPipeline, budget: Duration) {
    let deadline = Instant::now() + budget;
    while pipeline.backpressure().queue_size() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn report_warnings(report: &SimulationReport) -> Vec<String> {
    let mut warnings = Vec::new();
    if !report.quality.healthy {
        warnings.push(format!(
            "quality score {:.2} is below minimum {:.2}",
            report.quality.score, report.quality.min_quality_score
        ));
    }
    if report.backpressure.dropped > 0 {
        warnings.push(format!(
            "{} updates dropped under backpressure",
            report.backpressure.dropped
        ));
    }
    if report.circuit_state != CircuitState::Closed {
        warnings.push(format!(
            "upstream circuit finished {:?}",
            report.circuit_state
        ));
    }
    if !report.clean_shutdown {
        warnings.push(String::from(
            "workers did not stop within the shutdown grace period",
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(instruments: &[&str], defect_ratio: f64) -> SimulateArgs {
        SimulateArgs {
            duration_ms: 200,
            instruments: instruments.iter().map(|raw| (*raw).to_owned()).collect(),
            rate: 200,
            defect_ratio,
            seed: Some(11),
        }
    }

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.backpressure.poll_interval = Duration::from_millis(10);
        config
    }

    #[tokio::test]
    async fn clean_feed_reports_every_instrument_without_warnings() {
        let output = run(&args(&["IBM.N", "EUR="], 0.0), fast_config())
            .await
            .expect("simulation runs");

        let data = &output.data;
        assert!(data["ticks_generated"].as_u64().expect("count") > 0);
        assert_eq!(data["defects_injected"], 0);
        assert!(data["latest_prices"]["IBM.N"]["bid"].is_number());
        assert!(data["latest_prices"]["EUR="]["ask"].is_number());
        assert_eq!(data["quality"]["score"], 100.0);
        assert_eq!(data["circuit_state"], "CLOSED");
        assert_eq!(data["subscribed"].as_array().map(Vec::len), Some(2));
        assert!(data["clean_shutdown"].as_bool().expect("flag"));
        assert!(output.warnings.is_empty(), "{:?}", output.warnings);
    }

    #[tokio::test]
    async fn defective_feed_lowers_the_score_and_warns() {
        let output = run(&args(&["VOD.L"], 1.0), fast_config())
            .await
            .expect("simulation runs");

        let score = output.data["quality"]["score"].as_f64().expect("score");
        assert!(score < 95.0);
        assert!(output.data["summary"]["total_issues"].as_u64().expect("issues") > 0);
        assert!(output
            .warnings
            .iter()
            .any(|warning| warning.starts_with("quality score")));
    }

    #[tokio::test]
    async fn zero_rate_is_rejected() {
        let mut bad = args(&["IBM.N"], 0.0);
        bad.rate = 0;
        let err = run(&bad, fast_config()).await.expect_err("rejected");
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn malformed_instrument_is_rejected() {
        let err = run(&args(&["IBM N"], 0.0), fast_config())
            .await
            .expect_err("rejected");
        assert!(matches!(err, CliError::Validation(_)));
    }
}

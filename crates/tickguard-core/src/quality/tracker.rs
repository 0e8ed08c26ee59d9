use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::quality::{Dimension, IssueTrackerConfig, ValidationResult};
use crate::{InstrumentId, UtcDateTime};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRecord {
    pub instrument: InstrumentId,
    pub result: ValidationResult,
    pub recorded_at: UtcDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolIssueCount {
    pub instrument: InstrumentId,
    pub issue_count: usize,
}

/// Aggregate over the issues recorded in the summary window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitySummary {
    pub window_start: UtcDateTime,
    pub total_issues: usize,
    pub affected_instruments: usize,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub top_offenders: Vec<SymbolIssueCount>,
    pub issues_by_dimension: BTreeMap<Dimension, usize>,
}

impl QualitySummary {
    pub fn to_formatted_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Data quality summary since {}", self.window_start);
        let _ = writeln!(out, "  total issues:         {}", self.total_issues);
        let _ = writeln!(out, "  affected instruments: {}", self.affected_instruments);
        let _ = writeln!(out, "  errors:               {}", self.total_errors);
        let _ = writeln!(out, "  warnings:             {}", self.total_warnings);
        if !self.top_offenders.is_empty() {
            let _ = writeln!(out, "  top offenders:");
            for offender in &self.top_offenders {
                let _ = writeln!(out, "    {}: {}", offender.instrument, offender.issue_count);
            }
        }
        if !self.issues_by_dimension.is_empty() {
            let _ = writeln!(out, "  by dimension:");
            for (dimension, count) in &self.issues_by_dimension {
                let _ = writeln!(out, "    {dimension}: {count}");
            }
        }
        out
    }
}

/// Rolling history of validation results with issues.
///
/// Each instrument keeps at most `max_issues_per_instrument` records (oldest
/// evicted on insert). Records older than `retention` are removed lazily,
/// once every `cleanup_every` inserts.
#[derive(Debug)]
pub struct IssueTracker {
    config: IssueTrackerConfig,
    by_instrument: RwLock<HashMap<InstrumentId, VecDeque<IssueRecord>>>,
    all: Mutex<VecDeque<IssueRecord>>,
    inserts: AtomicUsize,
}

impl Default for IssueTracker {
    fn default() -> Self {
        Self::new(IssueTrackerConfig::default())
    }
}

impl IssueTracker {
    pub fn new(config: IssueTrackerConfig) -> Self {
        Self {
            config,
            by_instrument: RwLock::new(HashMap::new()),
            all: Mutex::new(VecDeque::new()),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn record_issue(&self, instrument: &InstrumentId, result: ValidationResult) {
        self.record_issue_at(instrument, result, UtcDateTime::now());
    }

    pub fn record_issue_at(
        &self,
        instrument: &InstrumentId,
        result: ValidationResult,
        now: UtcDateTime,
    ) {
        let record = IssueRecord {
            instrument: instrument.clone(),
            result,
            recorded_at: now,
        };

        {
            let mut by_instrument = self.by_instrument.write();
            let history = by_instrument.entry(instrument.clone()).or_default();
            history.push_back(record.clone());
            while history.len() > self.config.max_issues_per_instrument {
                history.pop_front();
            }
        }
        self.all.lock().push_back(record);

        let inserted = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserted % self.config.cleanup_every.max(1) == 0 {
            self.cleanup_at(now);
        }
    }

    /// Drops records older than the retention period.
    pub fn cleanup_at(&self, now: UtcDateTime) {
        let cutoff = now.minus(self.config.retention);

        let removed = {
            let mut all = self.all.lock();
            let before = all.len();
            all.retain(|record| record.recorded_at >= cutoff);
            before - all.len()
        };

        self.by_instrument.write().retain(|_, history| {
            history.retain(|record| record.recorded_at >= cutoff);
            !history.is_empty()
        });

        if removed > 0 {
            debug!(removed, cutoff = %cutoff, "evicted expired quality issues");
        }
    }

    pub fn issues(&self, instrument: &InstrumentId) -> Vec<IssueRecord> {
        self.by_instrument
            .read()
            .get(instrument)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn issues_since(&self, instrument: &InstrumentId, since: UtcDateTime) -> Vec<IssueRecord> {
        self.by_instrument
            .read()
            .get(instrument)
            .map(|history| {
                history
                    .iter()
                    .filter(|record| record.recorded_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_issues(&self) -> Vec<IssueRecord> {
        self.all.lock().iter().cloned().collect()
    }

    pub fn all_issues_since(&self, since: UtcDateTime) -> Vec<IssueRecord> {
        self.all
            .lock()
            .iter()
            .filter(|record| record.recorded_at >= since)
            .cloned()
            .collect()
    }

    pub fn issue_count(&self, instrument: &InstrumentId) -> usize {
        self.by_instrument
            .read()
            .get(instrument)
            .map_or(0, VecDeque::len)
    }

    pub fn summary(&self) -> QualitySummary {
        self.summary_at(UtcDateTime::now())
    }

    pub fn summary_at(&self, now: UtcDateTime) -> QualitySummary {
        let window_start = now.minus(self.config.summary_window);
        let recent = self.all_issues_since(window_start);

        let affected: HashSet<&InstrumentId> =
            recent.iter().map(|record| &record.instrument).collect();
        let total_errors: usize = recent.iter().map(|r| r.result.error_count()).sum();
        let total_warnings: usize = recent.iter().map(|r| r.result.warning_count()).sum();

        QualitySummary {
            window_start,
            total_issues: recent.len(),
            affected_instruments: affected.len(),
            total_errors,
            total_warnings,
            top_offenders: rank_offenders(&recent, self.config.top_offenders),
            issues_by_dimension: count_by_dimension(&recent),
        }
    }

    /// Instruments with the most records in the summary window.
    pub fn top_offenders(&self, limit: usize) -> Vec<SymbolIssueCount> {
        let window_start = UtcDateTime::now().minus(self.config.summary_window);
        rank_offenders(&self.all_issues_since(window_start), limit)
    }

    /// Issue counts per dimension in the summary window.
    pub fn issues_by_dimension(&self) -> BTreeMap<Dimension, usize> {
        let window_start = UtcDateTime::now().minus(self.config.summary_window);
        count_by_dimension(&self.all_issues_since(window_start))
    }

    pub fn clear(&self) {
        self.by_instrument.write().clear();
        self.all.lock().clear();
        self.inserts.store(0, Ordering::Relaxed);
    }
}

fn rank_offenders(records: &[IssueRecord], limit: usize) -> Vec<SymbolIssueCount> {
    let mut counts: HashMap<&InstrumentId, usize> = HashMap::new();
    for record in records {
        *counts.entry(&record.instrument).or_insert(0) += 1;
    }

    let mut ranked: Vec<SymbolIssueCount> = counts
        .into_iter()
        .map(|(instrument, issue_count)| SymbolIssueCount {
            instrument: instrument.clone(),
            issue_count,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.issue_count
            .cmp(&a.issue_count)
            .then_with(|| a.instrument.cmp(&b.instrument))
    });
    ranked.truncate(limit);
    ranked
}

fn count_by_dimension(records: &[IssueRecord]) -> BTreeMap<Dimension, usize> {
    let mut counts = BTreeMap::new();
    for issue in records.iter().flat_map(|record| &record.result.issues) {
        *counts.entry(issue.dimension).or_insert(0) += 1;
    }
    counts
}

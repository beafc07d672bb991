//! Detection orchestrator: one pass pulls new lines through extraction,
//! signature matching, flood windowing and optional scoring, then dispatches
//! deduplicated alerts to the sink.
//!
//! A pass is an ordinary synchronous call so tests and embedders can run one
//! directly; the binary wraps it in an interval scheduler.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::anomaly::{AnomalyModel, AnomalyScorer};
use crate::cursor::LogCursor;
use crate::parser::{extract, LogRecord};
use crate::rules::RuleSet;
use crate::sink::AlertSink;
use crate::window::FloodTracker;
use crate::{Alert, AlertKey, Severity, WardenConfig};

pub const REQUEST_FLOOD: &str = "Request flood";
pub const STATISTICAL_ANOMALY: &str = "Statistical anomaly";

/// What one pass did, for logs and assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub lines_read: usize,
    pub records: usize,
    pub alerts: usize,
    pub skipped_records: usize,
    pub dispatch_failures: usize,
}

/// Dedupe identity within one pass: alerts sharing category, key and window
/// start collapse to one. Non-windowed categories use `None`.
type AlertIdentity = (String, AlertKey, Option<DateTime<Utc>>);

pub struct DetectionEngine {
    cursor: LogCursor,
    rules: RuleSet,
    tracker: FloodTracker,
    scorer: Option<AnomalyScorer>,
    sink: Box<dyn AlertSink>,
}

impl DetectionEngine {
    pub fn new(config: &WardenConfig, cursor: LogCursor, sink: Box<dyn AlertSink>) -> Self {
        let mut rules = RuleSet::builtin();
        if let Some(dir) = &config.rules_directory {
            if let Err(e) = rules.load_directory(dir) {
                warn!("Custom rules unavailable, continuing with built-ins: {e:#}");
            }
        }

        Self {
            cursor,
            rules,
            tracker: FloodTracker::new(
                config.time_window_secs,
                config.flood_threshold,
                config.per_key_capacity,
            ),
            scorer: None,
            sink,
        }
    }

    /// Attach a trained model. Without one, detection is signature-only.
    pub fn set_model(&mut self, model: Box<dyn AnomalyModel>, threshold: f64) {
        self.scorer = Some(AnomalyScorer::new(model, threshold));
    }

    /// Run one detection pass over everything appended since the last commit.
    ///
    /// An unreadable source makes the pass a completed no-op; it is retried
    /// on the next tick. A failing record is skipped, not fatal to the batch.
    pub fn run_pass(&mut self) -> Result<PassSummary> {
        let mut summary = PassSummary::default();

        debug!("pass: fetching");
        let lines = match self.cursor.fetch_new() {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Log source unavailable, skipping pass: {e:#}");
                return Ok(summary);
            }
        };
        if lines.is_empty() {
            debug!("pass: no new lines");
            return Ok(summary);
        }
        summary.lines_read = lines.len();

        debug!("pass: extracting {} lines", lines.len());
        let records: Vec<LogRecord> = lines.iter().map(|l| extract(l)).collect();
        summary.records = records.len();

        let mut alerts: Vec<Alert> = Vec::new();
        let mut seen: HashSet<AlertIdentity> = HashSet::new();

        debug!("pass: matching");
        for record in &records {
            if let Err(e) = self.match_record(record, &mut alerts, &mut seen) {
                summary.skipped_records += 1;
                warn!("Skipping record during matching: {e:#}");
            }
        }

        debug!("pass: windowing");
        for record in &records {
            if let Err(e) = self.window_record(record, &mut alerts, &mut seen) {
                summary.skipped_records += 1;
                warn!("Skipping record during windowing: {e:#}");
            }
        }

        if self.scorer.is_some() {
            debug!("pass: scoring");
            for record in &records {
                if let Err(e) = self.score_record(record, &mut alerts, &mut seen) {
                    summary.skipped_records += 1;
                    warn!("Skipping record during scoring: {e:#}");
                }
            }
        }

        debug!("pass: dispatching {} alerts", alerts.len());
        summary.alerts = alerts.len();
        for alert in &alerts {
            if let Err(e) = self.sink.notify(alert) {
                summary.dispatch_failures += 1;
                warn!("Alert delivery failed ({}): {e:#}", alert.category);
            }
        }

        self.cursor
            .commit()
            .context("persist cursor after pass")?;

        info!(
            "Pass complete: {} lines, {} alerts ({} undelivered)",
            summary.lines_read, summary.alerts, summary.dispatch_failures,
        );
        Ok(summary)
    }

    fn match_record(
        &self,
        record: &LogRecord,
        alerts: &mut Vec<Alert>,
        seen: &mut HashSet<AlertIdentity>,
    ) -> Result<()> {
        let key = AlertKey::new(&record.source_addr, &record.resource);
        for finding in self.rules.evaluate(record) {
            push_alert(
                alerts,
                seen,
                Alert {
                    category: finding.category,
                    key: key.clone(),
                    detail: finding.detail,
                    timestamp: record.timestamp,
                    severity: finding.severity,
                },
                None,
            );
        }
        Ok(())
    }

    fn window_record(
        &self,
        record: &LogRecord,
        alerts: &mut Vec<Alert>,
        seen: &mut HashSet<AlertIdentity>,
    ) -> Result<()> {
        let key = AlertKey::new(&record.source_addr, &record.resource);
        if let Some(hit) = self.tracker.observe(&key, record.timestamp) {
            let window_start = hit.window_start;
            push_alert(
                alerts,
                seen,
                Alert {
                    category: REQUEST_FLOOD.to_string(),
                    key: hit.key,
                    detail: format!(
                        "{} requests in window starting {}",
                        hit.count,
                        window_start.format("%Y-%m-%d %H:%M:%S"),
                    ),
                    timestamp: record.timestamp,
                    severity: Severity::Critical,
                },
                Some(window_start),
            );
        }
        Ok(())
    }

    fn score_record(
        &self,
        record: &LogRecord,
        alerts: &mut Vec<Alert>,
        seen: &mut HashSet<AlertIdentity>,
    ) -> Result<()> {
        let Some(scorer) = &self.scorer else {
            return Ok(());
        };
        if !scorer.is_anomalous(record) {
            return Ok(());
        }
        let key = AlertKey::new(&record.source_addr, &record.resource);
        push_alert(
            alerts,
            seen,
            Alert {
                category: STATISTICAL_ANOMALY.to_string(),
                key,
                detail: format!(
                    "score {:.4} | {}",
                    scorer.score(record),
                    AnomalyScorer::reasons(record),
                ),
                timestamp: record.timestamp,
                severity: Severity::Warning,
            },
            None,
        );
        Ok(())
    }
}

fn push_alert(
    alerts: &mut Vec<Alert>,
    seen: &mut HashSet<AlertIdentity>,
    alert: Alert,
    window_start: Option<DateTime<Utc>>,
) {
    let identity = (alert.category.clone(), alert.key.clone(), window_start);
    if seen.insert(identity) {
        alerts.push(alert);
    }
}

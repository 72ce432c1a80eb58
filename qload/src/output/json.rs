use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use qload_core::{Plan, RunOutcome, ScheduleSpec, Summary, ThresholdViolation};
use serde::Serialize;

use super::OutputFormatter;
use crate::progress::{ProgressFn, ProgressUpdate};

/// One JSON object per line on stdout.
pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan: &Plan, _spec: &ScheduleSpec) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            emit_json_line(&JsonProgressLine::from(&u));
        }))
    }

    fn print_summary(&self, summary: &Summary, outcome: &RunOutcome) -> anyhow::Result<()> {
        emit_json_line(&JsonSummaryLine {
            kind: "summary",
            outcome: JsonOutcome::from(outcome),
            summary,
        });
        Ok(())
    }

    fn print_threshold_violations(&self, violations: &[ThresholdViolation]) {
        for v in violations {
            emit_json_line(&JsonThresholdLine {
                kind: "threshold_violation",
                metric: &v.metric,
                expression: &v.expression,
                observed: v.observed,
            });
        }
    }

    fn print_artifact(&self, kind: &'static str, path: &Path) {
        emit_json_line(&JsonArtifactLine {
            kind: "artifact",
            artifact: kind,
            path: path.display().to_string(),
        });
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub elapsed_secs: f64,
    pub interval_secs: f64,
    pub total_secs: f64,

    pub iterations_total: u64,
    pub iterations_per_sec: f64,
    pub failures_total: u64,
    pub dropped_total: u64,
    pub requests_total: u64,
    pub requests_per_sec: f64,

    pub active_workers: i64,
    pub workers: i64,
}

impl From<&ProgressUpdate> for JsonProgressLine {
    fn from(u: &ProgressUpdate) -> Self {
        Self {
            kind: "progress",
            elapsed_secs: u.elapsed.as_secs_f64(),
            interval_secs: u.interval.as_secs_f64(),
            total_secs: u.total.as_secs_f64(),
            iterations_total: u.iterations_total,
            iterations_per_sec: u.iterations_per_sec(),
            failures_total: u.failures_total,
            dropped_total: u.dropped_total,
            requests_total: u.requests_total,
            requests_per_sec: u.requests_per_sec(),
            active_workers: u.active_workers,
            workers: u.workers,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonOutcome {
    pub elapsed_secs: f64,
    pub scheduled: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub lagged: u64,
    pub dropped: u64,
    pub workers: u64,
}

impl From<&RunOutcome> for JsonOutcome {
    fn from(o: &RunOutcome) -> Self {
        Self {
            elapsed_secs: o.elapsed.as_secs_f64(),
            scheduled: o.scheduled,
            started: o.started,
            completed: o.completed,
            failed: o.failed,
            lagged: o.lagged,
            dropped: o.dropped,
            workers: o.workers,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    pub outcome: JsonOutcome,
    pub summary: &'a Summary,
}

#[derive(Debug, Serialize)]
struct JsonThresholdLine<'a> {
    kind: &'static str,
    metric: &'a str,
    expression: &'a str,
    observed: Option<f64>,
}

#[derive(Debug, Serialize)]
struct JsonArtifactLine {
    kind: &'static str,
    artifact: &'static str,
    path: String,
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

use std::path::Path;

use qload_core::{Plan, RunOutcome, ScheduleSpec, Summary, ThresholdViolation};

use crate::cli::OutputFormat;
use crate::progress::ProgressFn;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan: &Plan, spec: &ScheduleSpec);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, summary: &Summary, outcome: &RunOutcome) -> anyhow::Result<()>;
    fn print_threshold_violations(&self, violations: &[ThresholdViolation]);
    /// A file written by the run (summary export, HTML report).
    fn print_artifact(&self, kind: &'static str, path: &Path);
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}

use std::path::Path;
use std::sync::Arc;

use qload_core::{Plan, RunOutcome, ScheduleSpec, Summary, ThresholdViolation};

mod format;
mod progress;
mod summary;

use format::{format_duration_single, format_rate};
use progress::HumanProgress;
use summary::render;

use super::OutputFormatter;
use crate::progress::ProgressFn;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan: &Plan, spec: &ScheduleSpec) {
        println!("plan: {}", plan.name.as_deref().unwrap_or("(unnamed)"));
        for s in plan.steps() {
            println!("step: {} {} {}", s.name, s.method, s.url);
        }
        println!(
            "schedule: rate={}/s duration={} workers={}..{} queue={} grace={}",
            spec.target_rate,
            format_duration_single(spec.duration),
            spec.pre_allocated_workers,
            spec.max_workers,
            spec.max_queue_depth,
            format_duration_single(spec.grace_period),
        );
        println!();
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        Some(Arc::new(move |u| {
            let message = format!(
                "workers={}/{} elapsed={} iters/s={} rps={} dropped={} failed={}",
                u.active_workers,
                u.workers,
                format_duration_single(u.elapsed),
                format_rate(u.iterations_per_sec()),
                format_rate(u.requests_per_sec()),
                u.dropped_total,
                u.failures_total,
            );
            progress.update(u.total, u.elapsed, message);
        }))
    }

    fn print_summary(&self, summary: &Summary, outcome: &RunOutcome) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(summary, outcome));
        Ok(())
    }

    fn print_threshold_violations(&self, violations: &[ThresholdViolation]) {
        if violations.is_empty() {
            return;
        }
        eprintln!("thresholds failed:");
        for v in violations {
            match v.observed {
                Some(obs) => eprintln!("  {}: {} (observed {obs})", v.metric, v.expression),
                None => eprintln!("  {}: {} (missing series)", v.metric, v.expression),
            }
        }
    }

    fn print_artifact(&self, kind: &'static str, path: &Path) {
        println!("{kind}: {}", path.display());
    }
}

use std::time::Duration;

use qload_metrics::{Counter, Gauge, Registry, Trend};

use crate::error::Result;

pub(crate) const ITERATIONS: &str = "iterations";
pub(crate) const ITERATION_DURATION: &str = "iteration_duration";
pub(crate) const ITERATION_FAILURES: &str = "iteration_failures";
pub(crate) const ITERATION_FAULTS: &str = "iteration_faults";
pub(crate) const SCHEDULING_LAG: &str = "iteration_scheduling_lag";
pub(crate) const LAGGED_ITERATIONS: &str = "lagged_iterations";
pub(crate) const DROPPED_ITERATIONS: &str = "dropped_iterations";
pub(crate) const VUS: &str = "vus";
pub(crate) const VUS_MAX: &str = "vus_max";

/// Handles for the metrics every run records, resolved once per run.
#[derive(Debug, Clone)]
pub(crate) struct IterationMetrics {
    pub(crate) iterations: Counter,
    /// Milliseconds.
    pub(crate) duration: Trend,
    pub(crate) failures: Counter,
    pub(crate) faults: Counter,
    /// Milliseconds between scheduled and actual start.
    pub(crate) lag: Trend,
    pub(crate) lagged: Counter,
    pub(crate) dropped: Counter,
    pub(crate) vus: Gauge,
    pub(crate) vus_max: Gauge,
}

impl IterationMetrics {
    pub(crate) fn register(metrics: &Registry) -> Result<Self> {
        Ok(Self {
            iterations: metrics.counter(ITERATIONS)?,
            duration: metrics.trend(ITERATION_DURATION)?,
            failures: metrics.counter(ITERATION_FAILURES)?,
            faults: metrics.counter(ITERATION_FAULTS)?,
            lag: metrics.trend(SCHEDULING_LAG)?,
            lagged: metrics.counter(LAGGED_ITERATIONS)?,
            dropped: metrics.counter(DROPPED_ITERATIONS)?,
            vus: metrics.gauge(VUS)?,
            vus_max: metrics.gauge(VUS_MAX)?,
        })
    }

    /// Records the start lag; returns whether it exceeded `tolerance`.
    pub(crate) fn record_start(&self, lag: Duration, tolerance: Duration) -> bool {
        self.lag.add_duration(lag);
        let lagged = lag > tolerance;
        if lagged {
            self.lagged.increment();
        }
        lagged
    }

    pub(crate) fn record_end(&self, duration: Duration) {
        self.iterations.increment();
        self.duration.add_duration(duration);
    }
}

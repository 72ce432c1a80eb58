use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use qload_metrics::{MetricValue, Registry};
use serde::{Deserialize, Serialize};

use crate::config::ScheduleSpec;
use crate::error::{Error, Result};

/// Key under which a trend exports percentile `p`, e.g. `p(95)`.
pub fn percentile_key(p: f64) -> String {
    format!("p({p})")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub target_rate: f64,
    pub duration_ms: f64,
    pub pre_allocated_workers: u64,
    pub max_workers: u64,
    pub max_queue_depth: u64,
}

impl RunMeta {
    pub fn from_spec(spec: &ScheduleSpec) -> Self {
        Self {
            name: None,
            target_rate: spec.target_rate,
            duration_ms: spec.duration.as_secs_f64() * 1000.0,
            pre_allocated_workers: spec.pre_allocated_workers,
            max_workers: spec.max_workers,
            max_queue_depth: spec.max_queue_depth,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryState {
    #[serde(rename = "testRunDurationMs")]
    pub test_run_duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    /// `p(N)` keys.
    #[serde(flatten)]
    pub percentiles: BTreeMap<String, f64>,
}

impl TrendStats {
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if (p - 50.0).abs() < f64::EPSILON {
            return Some(self.med);
        }
        self.percentiles.get(&percentile_key(p)).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Counter { count: u64, rate: f64 },
    Gauge { value: i64, min: i64, max: i64 },
    Rate { passes: u64, fails: u64, value: f64 },
    Trend(TrendStats),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSummary {
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RootGroup {
    pub checks: BTreeMap<String, CheckSummary>,
}

/// Read-only snapshot of a finished run; the JSON interchange format consumed by the
/// report renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub run: RunMeta,
    pub state: SummaryState,
    /// Keyed by `name` or `name{tag:value}`.
    pub metrics: BTreeMap<String, MetricSummary>,
    pub root_group: RootGroup,
}

impl Summary {
    pub fn metric(&self, key: &str) -> Option<&MetricSummary> {
        self.metrics.get(key)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Drains a run's registry into a [`Summary`]. Draining is allowed once; later calls fail
/// with [`Error::AlreadyDrained`].
#[derive(Debug)]
pub struct SummaryAggregator {
    metrics: Arc<Registry>,
    percentiles: Vec<f64>,
    drained: AtomicBool,
}

impl SummaryAggregator {
    pub const DEFAULT_PERCENTILES: [f64; 3] = [90.0, 95.0, 99.0];

    pub fn new(metrics: Arc<Registry>) -> Self {
        Self {
            metrics,
            percentiles: Self::DEFAULT_PERCENTILES.to_vec(),
            drained: AtomicBool::new(false),
        }
    }

    /// Adds percentiles to export for every trend (e.g. ones referenced by thresholds).
    #[must_use]
    pub fn with_percentiles(mut self, extra: impl IntoIterator<Item = f64>) -> Self {
        self.percentiles
            .extend(extra.into_iter().filter(|p| (0.0..=100.0).contains(p)));
        self.percentiles.sort_by(f64::total_cmp);
        self.percentiles.dedup();
        self
    }

    pub fn drain(&self, run: RunMeta, elapsed: Duration) -> Result<Summary> {
        if self.drained.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyDrained);
        }

        let secs = elapsed.as_secs_f64();
        let per_second = |count: u64| {
            if secs > 0.0 {
                count as f64 / secs
            } else {
                0.0
            }
        };

        let mut metrics = BTreeMap::new();
        for snap in self.metrics.snapshot(&self.percentiles) {
            let summary = match &snap.value {
                MetricValue::Counter(count) => MetricSummary::Counter {
                    count: *count,
                    rate: per_second(*count),
                },
                MetricValue::Gauge(g) => MetricSummary::Gauge {
                    value: g.value,
                    min: g.min,
                    max: g.max,
                },
                MetricValue::Rate(r) => MetricSummary::Rate {
                    passes: r.passes,
                    fails: r.fails(),
                    value: r.rate(),
                },
                MetricValue::Trend(t) => MetricSummary::Trend(TrendStats {
                    count: t.count,
                    avg: t.avg,
                    min: t.min,
                    med: t.med,
                    max: t.max,
                    percentiles: t
                        .percentiles
                        .iter()
                        .map(|(p, v)| (percentile_key(*p), *v))
                        .collect(),
                }),
            };
            metrics.insert(snap.key(), summary);
        }

        let checks = self
            .metrics
            .checks_snapshot()
            .into_iter()
            .map(|c| {
                (
                    c.name,
                    CheckSummary {
                        passes: c.passes,
                        fails: c.fails,
                    },
                )
            })
            .collect();

        Ok(Summary {
            run,
            state: SummaryState {
                test_run_duration_ms: secs * 1000.0,
            },
            metrics,
            root_group: RootGroup { checks },
        })
    }
}

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::sink::{
    Counter, DEFAULT_EXACT_SAMPLES, Gauge, MetricKind, MetricValue, Rate, Sink, Trend,
};
use crate::tags::TagSet;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub name: String,
    pub tags: TagSet,
    pub value: MetricValue,
}

impl MetricSnapshot {
    /// `name` or `name{k:v,...}` for tagged series.
    pub fn key(&self) -> String {
        self.tags.series_key(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSnapshot {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// Name-keyed store of metric sinks shared by every worker of a run.
///
/// A name is bound to one [`MetricKind`] the first time it is used; each distinct tag set
/// under that name gets its own sink. Checks live in a separate namespace.
#[derive(Debug)]
pub struct Registry {
    kinds: DashMap<Arc<str>, MetricKind>,
    series: DashMap<(Arc<str>, TagSet), Sink>,
    checks: DashMap<Arc<str>, Rate>,
    trend_capacity: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_trend_capacity(DEFAULT_EXACT_SAMPLES)
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(['{', '}']) {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

impl Registry {
    pub fn with_trend_capacity(trend_capacity: usize) -> Self {
        Self {
            kinds: DashMap::new(),
            series: DashMap::new(),
            checks: DashMap::new(),
            trend_capacity,
        }
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.kinds.get(name).map(|k| *k.value())
    }

    fn sink(&self, name: &str, tags: &[(&str, &str)], kind: MetricKind) -> Result<Sink> {
        validate_name(name)?;

        let name: Arc<str> = Arc::from(name);
        let registered = *self.kinds.entry(name.clone()).or_insert(kind).value();
        if registered != kind {
            return Err(Error::KindMismatch {
                name: name.to_string(),
                registered,
                requested: kind,
            });
        }

        let cap = self.trend_capacity;
        let sink = self
            .series
            .entry((name, TagSet::new(tags)))
            .or_insert_with(|| Sink::new(kind, cap))
            .value()
            .clone();
        Ok(sink)
    }

    fn mismatch(name: &str, sink: &Sink, requested: MetricKind) -> Error {
        Error::KindMismatch {
            name: name.to_string(),
            registered: sink.kind(),
            requested,
        }
    }

    pub fn counter(&self, name: &str) -> Result<Counter> {
        self.counter_with(name, &[])
    }

    pub fn counter_with(&self, name: &str, tags: &[(&str, &str)]) -> Result<Counter> {
        match self.sink(name, tags, MetricKind::Counter)? {
            Sink::Counter(c) => Ok(c),
            other => Err(Self::mismatch(name, &other, MetricKind::Counter)),
        }
    }

    pub fn gauge(&self, name: &str) -> Result<Gauge> {
        self.gauge_with(name, &[])
    }

    pub fn gauge_with(&self, name: &str, tags: &[(&str, &str)]) -> Result<Gauge> {
        match self.sink(name, tags, MetricKind::Gauge)? {
            Sink::Gauge(g) => Ok(g),
            other => Err(Self::mismatch(name, &other, MetricKind::Gauge)),
        }
    }

    pub fn rate(&self, name: &str) -> Result<Rate> {
        self.rate_with(name, &[])
    }

    pub fn rate_with(&self, name: &str, tags: &[(&str, &str)]) -> Result<Rate> {
        match self.sink(name, tags, MetricKind::Rate)? {
            Sink::Rate(r) => Ok(r),
            other => Err(Self::mismatch(name, &other, MetricKind::Rate)),
        }
    }

    pub fn trend(&self, name: &str) -> Result<Trend> {
        self.trend_with(name, &[])
    }

    pub fn trend_with(&self, name: &str, tags: &[(&str, &str)]) -> Result<Trend> {
        match self.sink(name, tags, MetricKind::Trend)? {
            Sink::Trend(t) => Ok(t),
            other => Err(Self::mismatch(name, &other, MetricKind::Trend)),
        }
    }

    /// Named check; a pass/fail rate outside the metric namespace.
    pub fn check(&self, name: &str) -> Rate {
        self.checks
            .entry(Arc::from(name))
            .or_default()
            .value()
            .clone()
    }

    /// Reads every series, sorted by name then tags.
    pub fn snapshot(&self, percentiles: &[f64]) -> Vec<MetricSnapshot> {
        let mut out: Vec<MetricSnapshot> = self
            .series
            .iter()
            .map(|entry| {
                let (name, tags) = entry.key();
                MetricSnapshot {
                    name: name.to_string(),
                    tags: tags.clone(),
                    value: entry.value().snapshot(percentiles),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }

    pub fn checks_snapshot(&self) -> Vec<CheckSnapshot> {
        let mut out: Vec<CheckSnapshot> = self
            .checks
            .iter()
            .map(|entry| {
                let s = entry.value().snapshot();
                CheckSnapshot {
                    name: entry.key().to_string(),
                    passes: s.passes,
                    fails: s.fails(),
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

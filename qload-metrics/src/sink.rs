use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Number of samples a [`Trend`] keeps verbatim before folding into a histogram.
pub const DEFAULT_EXACT_SAMPLES: usize = 100_000;

// Histogram values are stored in thousandths of the recorded unit.
const HISTOGRAM_SCALE: f64 = 1000.0;
const HISTOGRAM_SIGFIG: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Trend,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Counter(u64),
    Gauge(GaugeSnapshot),
    Rate(RateSnapshot),
    Trend(TrendSnapshot),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Rate(_) => MetricKind::Rate,
            MetricValue::Trend(_) => MetricKind::Trend,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Counter {
    inner: Arc<AtomicU64>,
}

impl Counter {
    #[inline]
    pub fn add(&self, n: u64) {
        self.inner.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    pub fn value(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateSnapshot {
    pub passes: u64,
    pub total: u64,
}

impl RateSnapshot {
    pub fn fails(&self) -> u64 {
        self.total.saturating_sub(self.passes)
    }

    /// Fraction of `true` samples; zero when nothing was recorded.
    pub fn rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passes as f64 / self.total as f64
    }
}

#[derive(Debug, Default)]
struct RateInner {
    passes: AtomicU64,
    total: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct Rate {
    inner: Arc<RateInner>,
}

impl Rate {
    #[inline]
    pub fn add(&self, pass: bool) {
        if pass {
            self.inner.passes.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.inner.total.load(Ordering::Relaxed)
    }

    pub fn rate(&self) -> f64 {
        self.snapshot().rate()
    }

    pub fn snapshot(&self) -> RateSnapshot {
        RateSnapshot {
            passes: self.passes(),
            total: self.total(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaugeSnapshot {
    pub value: i64,
    pub min: i64,
    pub max: i64,
}

#[derive(Debug)]
struct GaugeInner {
    value: AtomicI64,
    min: AtomicI64,
    max: AtomicI64,
    touched: AtomicBool,
}

impl Default for GaugeInner {
    fn default() -> Self {
        Self {
            value: AtomicI64::new(0),
            min: AtomicI64::new(i64::MAX),
            max: AtomicI64::new(i64::MIN),
            touched: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Gauge {
    inner: Arc<GaugeInner>,
}

impl Gauge {
    pub fn set(&self, value: i64) {
        self.inner.value.store(value, Ordering::Relaxed);
        self.observe(value);
    }

    pub fn add(&self, delta: i64) {
        let value = self
            .inner
            .value
            .fetch_add(delta, Ordering::Relaxed)
            .saturating_add(delta);
        self.observe(value);
    }

    fn observe(&self, value: i64) {
        self.inner.min.fetch_min(value, Ordering::Relaxed);
        self.inner.max.fetch_max(value, Ordering::Relaxed);
        self.inner.touched.store(true, Ordering::Release);
    }

    pub fn value(&self) -> i64 {
        self.inner.value.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> GaugeSnapshot {
        if !self.inner.touched.load(Ordering::Acquire) {
            return GaugeSnapshot::default();
        }
        GaugeSnapshot {
            value: self.value(),
            min: self.inner.min.load(Ordering::Relaxed),
            max: self.inner.max.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrendSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub med: f64,
    /// `(p, value)` for every requested percentile, in request order.
    pub percentiles: Vec<(f64, f64)>,
}

impl TrendSnapshot {
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|(q, _)| (q - p).abs() < f64::EPSILON)
            .map(|(_, v)| *v)
    }
}

#[derive(Debug)]
struct TrendState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    exact_capacity: usize,
    samples: Vec<f64>,
    histogram: Option<Histogram<u64>>,
}

/// Distribution sink.
///
/// `count`, `sum`, `min` and `max` are always exact. Percentiles are exact (linear
/// interpolation on sorted samples) until `exact_capacity` samples were recorded; after
/// that every sample goes into an HDR histogram with 3 significant digits, bounding
/// percentile error to 0.1% of the reported value while memory stays constant.
#[derive(Debug, Clone)]
pub struct Trend {
    inner: Arc<Mutex<TrendState>>,
}

impl Default for Trend {
    fn default() -> Self {
        Self::with_exact_capacity(DEFAULT_EXACT_SAMPLES)
    }
}

pub(crate) fn new_histogram() -> Histogram<u64> {
    // Auto-resizing; only fails for sigfig > 5.
    match Histogram::<u64>::new(HISTOGRAM_SIGFIG) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

fn record_scaled(h: &mut Histogram<u64>, value: f64) {
    let scaled = (value.max(0.0) * HISTOGRAM_SCALE).round() as u64;
    let _ = h.record(scaled);
}

/// Linear interpolation between the closest ranks of an ascending slice.
pub(crate) fn interpolate(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

impl Trend {
    pub fn with_exact_capacity(exact_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrendState {
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                exact_capacity,
                samples: Vec::new(),
                histogram: None,
            })),
        }
    }

    pub fn add(&self, value: f64) {
        if !value.is_finite() {
            return;
        }

        let mut s = self.inner.lock();
        s.count = s.count.saturating_add(1);
        s.sum += value;
        s.min = s.min.min(value);
        s.max = s.max.max(value);

        if let Some(h) = s.histogram.as_mut() {
            record_scaled(h, value);
        } else if s.samples.len() < s.exact_capacity {
            s.samples.push(value);
        } else {
            let mut h = new_histogram();
            for sample in s.samples.drain(..) {
                record_scaled(&mut h, sample);
            }
            record_scaled(&mut h, value);
            s.samples = Vec::new();
            s.histogram = Some(h);
        }
    }

    /// Convenience for durations, recorded in milliseconds.
    pub fn add_duration(&self, d: std::time::Duration) {
        self.add(d.as_secs_f64() * 1000.0);
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    pub fn min(&self) -> Option<f64> {
        let s = self.inner.lock();
        (s.count > 0).then_some(s.min)
    }

    pub fn max(&self) -> Option<f64> {
        let s = self.inner.lock();
        (s.count > 0).then_some(s.max)
    }

    pub fn avg(&self) -> Option<f64> {
        let s = self.inner.lock();
        (s.count > 0).then(|| s.sum / s.count as f64)
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.count() == 0 {
            return None;
        }
        self.snapshot(&[p]).percentile(p)
    }

    /// Aggregates the distribution, computing `med` plus every requested percentile.
    pub fn snapshot(&self, percentiles: &[f64]) -> TrendSnapshot {
        enum Source {
            Exact(Vec<f64>),
            Histogram(Histogram<u64>),
        }

        let (count, sum, min, max, source) = {
            let s = self.inner.lock();
            if s.count == 0 {
                return TrendSnapshot {
                    percentiles: percentiles.iter().map(|p| (*p, 0.0)).collect(),
                    ..TrendSnapshot::default()
                };
            }
            let source = match &s.histogram {
                Some(h) => Source::Histogram(h.clone()),
                None => Source::Exact(s.samples.clone()),
            };
            (s.count, s.sum, s.min, s.max, source)
        };

        let quantile: Box<dyn Fn(f64) -> f64> = match source {
            Source::Exact(mut samples) => {
                samples.sort_by(f64::total_cmp);
                Box::new(move |p| interpolate(&samples, p))
            }
            Source::Histogram(h) => Box::new(move |p| {
                let v = h.value_at_quantile((p / 100.0).clamp(0.0, 1.0)) as f64 / HISTOGRAM_SCALE;
                v.clamp(min, max)
            }),
        };

        TrendSnapshot {
            count,
            sum,
            min,
            max,
            avg: sum / count as f64,
            med: quantile(50.0),
            percentiles: percentiles.iter().map(|p| (*p, quantile(*p))).collect(),
        }
    }
}

/// Type-erased sink as stored by the registry.
#[derive(Debug, Clone)]
pub(crate) enum Sink {
    Counter(Counter),
    Gauge(Gauge),
    Rate(Rate),
    Trend(Trend),
}

impl Sink {
    pub(crate) fn new(kind: MetricKind, trend_capacity: usize) -> Self {
        match kind {
            MetricKind::Counter => Sink::Counter(Counter::default()),
            MetricKind::Gauge => Sink::Gauge(Gauge::default()),
            MetricKind::Rate => Sink::Rate(Rate::default()),
            MetricKind::Trend => Sink::Trend(Trend::with_exact_capacity(trend_capacity)),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Sink::Counter(_) => MetricKind::Counter,
            Sink::Gauge(_) => MetricKind::Gauge,
            Sink::Rate(_) => MetricKind::Rate,
            Sink::Trend(_) => MetricKind::Trend,
        }
    }

    pub(crate) fn snapshot(&self, percentiles: &[f64]) -> MetricValue {
        match self {
            Sink::Counter(c) => MetricValue::Counter(c.value()),
            Sink::Gauge(g) => MetricValue::Gauge(g.snapshot()),
            Sink::Rate(r) => MetricValue::Rate(r.snapshot()),
            Sink::Trend(t) => MetricValue::Trend(t.snapshot(percentiles)),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn rate_is_zero_when_empty() {
        let r = Rate::default();
        assert_eq!(r.total(), 0);
        assert_eq!(r.rate(), 0.0);
    }

    #[test]
    fn rate_counts_passes_and_total() {
        let r = Rate::default();
        r.add(true);
        r.add(false);
        r.add(true);
        r.add(true);
        let s = r.snapshot();
        assert_eq!(s, RateSnapshot { passes: 3, total: 4 });
        assert_eq!(s.fails(), 1);
        assert!((s.rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn counter_accumulates() {
        let c = Counter::default();
        c.increment();
        c.add(41);
        assert_eq!(c.value(), 42);
    }

    #[test]
    fn gauge_tracks_min_and_max() {
        let g = Gauge::default();
        assert_eq!(g.snapshot(), GaugeSnapshot::default());
        g.set(5);
        g.add(3);
        g.add(-6);
        assert_eq!(
            g.snapshot(),
            GaugeSnapshot {
                value: 2,
                min: 2,
                max: 8
            }
        );
    }

    #[test]
    fn trend_median_of_one_to_ten_interpolates() {
        let t = Trend::default();
        for v in 1..=10 {
            t.add(f64::from(v));
        }
        let s = t.snapshot(&[90.0]);
        assert_eq!(s.count, 10);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 10.0);
        assert!((s.avg - 5.5).abs() < 1e-12);
        assert!(s.med > 5.0 && s.med < 6.0, "med={}", s.med);
        assert!((s.percentile(90.0).unwrap() - 9.1).abs() < 1e-9);
    }

    #[test]
    fn trend_min_max_exact_in_any_order() {
        let t = Trend::default();
        for v in [7.5, -2.0, 100.25, 3.0, 0.0] {
            t.add(v);
        }
        assert_eq!(t.min(), Some(-2.0));
        assert_eq!(t.max(), Some(100.25));
    }

    #[test]
    fn trend_ignores_non_finite_values() {
        let t = Trend::default();
        t.add(f64::NAN);
        t.add(f64::INFINITY);
        assert_eq!(t.count(), 0);
        assert_eq!(t.avg(), None);
        assert_eq!(t.percentile(50.0), None);
    }

    #[test]
    fn trend_switches_to_histogram_with_bounded_error() {
        let t = Trend::with_exact_capacity(100);
        for v in 1..=10_000 {
            t.add(f64::from(v));
        }
        let s = t.snapshot(&[95.0, 99.0]);
        assert_eq!(s.count, 10_000);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 10_000.0);
        assert!((s.avg - 5000.5).abs() < 1e-9);

        let p95 = s.percentile(95.0).unwrap();
        assert!((p95 - 9500.0).abs() / 9500.0 < 0.002, "p95={p95}");
        let p99 = s.percentile(99.0).unwrap();
        assert!((p99 - 9900.0).abs() / 9900.0 < 0.002, "p99={p99}");
    }

    #[test]
    fn interpolate_edges() {
        assert_eq!(interpolate(&[], 50.0), 0.0);
        assert_eq!(interpolate(&[4.0], 99.0), 4.0);
        assert_eq!(interpolate(&[1.0, 3.0], 0.0), 1.0);
        assert_eq!(interpolate(&[1.0, 3.0], 100.0), 3.0);
        assert_eq!(interpolate(&[1.0, 3.0], 50.0), 2.0);
    }
}

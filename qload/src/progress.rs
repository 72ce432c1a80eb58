use std::sync::Arc;
use std::time::Duration;

use qload_core::Registry;
use qload_metrics::{Counter, Gauge};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(crate) const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Point-in-time view of a running test, sampled from the metrics registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProgressUpdate {
    pub elapsed: Duration,
    pub interval: Duration,
    pub total: Duration,

    pub iterations_total: u64,
    pub iterations_delta: u64,
    pub failures_total: u64,
    pub dropped_total: u64,
    pub requests_total: u64,
    pub requests_delta: u64,

    pub active_workers: i64,
    pub workers: i64,
}

impl ProgressUpdate {
    pub(crate) fn iterations_per_sec(&self) -> f64 {
        self.iterations_delta as f64 / self.interval.as_secs_f64().max(1e-9)
    }

    pub(crate) fn requests_per_sec(&self) -> f64 {
        self.requests_delta as f64 / self.interval.as_secs_f64().max(1e-9)
    }
}

pub(crate) type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

struct Sampler {
    iterations: Counter,
    failures: Counter,
    dropped: Counter,
    requests: Counter,
    vus: Gauge,
    vus_max: Gauge,
}

impl Sampler {
    fn register(registry: &Registry) -> qload_metrics::Result<Self> {
        Ok(Self {
            iterations: registry.counter("iterations")?,
            failures: registry.counter("iteration_failures")?,
            dropped: registry.counter("dropped_iterations")?,
            requests: registry.counter("http_reqs")?,
            vus: registry.gauge("vus")?,
            vus_max: registry.gauge("vus_max")?,
        })
    }
}

/// Calls `on_update` every `interval` until the returned task is aborted.
pub(crate) fn spawn(
    registry: &Arc<Registry>,
    total: Duration,
    interval: Duration,
    on_update: ProgressFn,
) -> anyhow::Result<JoinHandle<()>> {
    let sampler = Sampler::register(registry)?;

    Ok(tokio::spawn(async move {
        let started = Instant::now();
        let mut ticker = tokio::time::interval_at(started + interval, interval);
        let mut last = started;
        let mut prev_iterations = 0u64;
        let mut prev_requests = 0u64;

        loop {
            let now = ticker.tick().await;

            let iterations_total = sampler.iterations.value();
            let requests_total = sampler.requests.value();

            on_update(ProgressUpdate {
                elapsed: now.duration_since(started),
                interval: now.duration_since(last),
                total,
                iterations_total,
                iterations_delta: iterations_total.saturating_sub(prev_iterations),
                failures_total: sampler.failures.value(),
                dropped_total: sampler.dropped.value(),
                requests_total,
                requests_delta: requests_total.saturating_sub(prev_requests),
                active_workers: sampler.vus.value(),
                workers: sampler.vus_max.value(),
            });

            last = now;
            prev_iterations = iterations_total;
            prev_requests = requests_total;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn spawn_reports_deltas_per_interval() {
        let registry = Arc::new(Registry::default());
        let iterations = match registry.counter("iterations") {
            Ok(c) => c,
            Err(err) => panic!("counter: {err}"),
        };

        let seen: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = match spawn(
            &registry,
            Duration::from_secs(10),
            Duration::from_secs(1),
            Arc::new(move |u| {
                sink.lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(u);
            }),
        ) {
            Ok(h) => h,
            Err(err) => panic!("spawn: {err}"),
        };

        iterations.add(5);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        iterations.add(3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.abort();

        let seen = seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].iterations_delta, 5);
        assert_eq!(seen[1].iterations_total, 8);
        assert_eq!(seen[1].iterations_delta, 3);
        assert_eq!(seen[1].elapsed, Duration::from_secs(2));
        assert!((seen[1].iterations_per_sec() - 3.0).abs() < 1e-9);
    }
}

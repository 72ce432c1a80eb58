use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt as _;
use qload_http::{HttpCallResult, HttpClient, HttpRequest};
use qload_metrics::{Counter, Rate, Registry, Trend};

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::events::{EventSink, RunEvent};
use crate::iteration_metrics::IterationMetrics;
use crate::pacer::Tick;
use crate::request_metrics::RequestMetrics;
use crate::step::{StepError, StepResult, SuccessCriteria};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    Success,
    /// The workload returned a step error.
    Failure(StepError),
    /// The workload panicked.
    Fault(String),
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

struct Shared {
    client: HttpClient,
    metrics: Arc<Registry>,
    requests: RequestMetrics,
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
}

/// Runs one workload invocation per tick inside a panic boundary and folds the result
/// into the built-in iteration metrics.
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
    iteration: IterationMetrics,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("retry", &self.shared.retry)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "workload panicked".to_string()
    }
}

impl Executor {
    pub fn new(
        client: HttpClient,
        metrics: Arc<Registry>,
        retry: RetryPolicy,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let iteration = IterationMetrics::register(&metrics)?;
        let requests = RequestMetrics::register(metrics.clone())?;
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                metrics,
                requests,
                retry,
                events,
            }),
            iteration,
        })
    }

    pub fn metrics(&self) -> &Arc<Registry> {
        &self.shared.metrics
    }

    pub(crate) fn iteration_metrics(&self) -> &IterationMetrics {
        &self.iteration
    }

    pub(crate) fn events(&self) -> &Arc<dyn EventSink> {
        &self.shared.events
    }

    pub async fn run<W, Fut>(&self, workload: &W, tick: Tick) -> IterationOutcome
    where
        W: Fn(IterationContext) -> Fut,
        Fut: Future<Output = StepResult<()>>,
    {
        let started_at = Instant::now();
        let ctx = IterationContext {
            seq: tick.seq,
            scheduled_at: tick.scheduled_at,
            started_at,
            shared: self.shared.clone(),
        };

        let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| workload(ctx))) {
            Err(payload) => IterationOutcome::Fault(panic_message(payload.as_ref())),
            Ok(fut) => match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => IterationOutcome::Success,
                Ok(Err(err)) => IterationOutcome::Failure(err),
                Err(payload) => IterationOutcome::Fault(panic_message(payload.as_ref())),
            },
        };

        self.iteration.record_end(started_at.elapsed());
        match &outcome {
            IterationOutcome::Success => {}
            IterationOutcome::Failure(err) => {
                self.iteration.failures.increment();
                self.shared.events.emit(&RunEvent::IterationFailed {
                    seq: tick.seq,
                    error: err.to_string(),
                });
            }
            IterationOutcome::Fault(message) => {
                self.iteration.failures.increment();
                self.iteration.faults.increment();
                self.shared.events.emit(&RunEvent::IterationFault {
                    seq: tick.seq,
                    message: message.clone(),
                });
            }
        }
        outcome
    }
}

/// Handed to the workload for one iteration. Cheap to clone.
#[derive(Clone)]
pub struct IterationContext {
    seq: u64,
    scheduled_at: Instant,
    started_at: Instant,
    shared: Arc<Shared>,
}

impl IterationContext {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn scheduled_at(&self) -> Instant {
        self.scheduled_at
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn metrics(&self) -> &Registry {
        &self.shared.metrics
    }

    pub fn counter(&self, name: &str) -> StepResult<Counter> {
        Ok(self.shared.metrics.counter(name)?)
    }

    pub fn rate(&self, name: &str) -> StepResult<Rate> {
        Ok(self.shared.metrics.rate(name)?)
    }

    pub fn trend(&self, name: &str) -> StepResult<Trend> {
        Ok(self.shared.metrics.trend(name)?)
    }

    /// Issues `req`, retrying transport failures per the run's [`RetryPolicy`].
    /// The last attempt's result is returned whatever its status.
    pub async fn execute(&self, req: HttpRequest) -> HttpCallResult {
        self.execute_ref(&req).await
    }

    async fn execute_ref(&self, req: &HttpRequest) -> HttpCallResult {
        let retry = self.shared.retry;
        let mut attempt: u32 = 0;
        loop {
            let res = self.shared.client.execute(req.clone()).await;
            self.shared.requests.record_call(req, &res);

            if !res.is_transport_failure() || attempt >= retry.max_retries {
                return res;
            }

            attempt = attempt.saturating_add(1);
            let backoff = retry.delay();
            self.shared.requests.record_retry(req);
            self.shared.events.emit(&RunEvent::TransportRetry {
                seq: self.seq,
                attempt,
                url: req.url.clone(),
                kind: res.error,
                backoff,
            });
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
        }
    }

    /// [`IterationContext::execute`] plus a success predicate. Records
    /// `http_req_success` and fails the step when the predicate does not hold.
    pub async fn call(
        &self,
        req: HttpRequest,
        criteria: &SuccessCriteria,
    ) -> StepResult<HttpCallResult> {
        let res = self.execute_ref(&req).await;
        let endpoint = req.name.as_deref().unwrap_or(req.url.as_str());
        let verdict = criteria.evaluate(&res, endpoint);
        self.shared.requests.record_success(&req, verdict.is_ok());
        verdict.map(|()| res)
    }

    /// Records a named check and returns `pass`.
    pub fn check(&self, name: &str, pass: bool) -> bool {
        self.shared.metrics.check(name).add(pass);
        pass
    }

    /// Suspends this iteration only.
    pub async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

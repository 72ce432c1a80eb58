use std::sync::Arc;

use dashmap::DashMap;
use qload_http::{HttpCallResult, HttpRequest};
use qload_metrics::{Counter, Rate, Registry, Trend};

use crate::error::Result;

pub(crate) const HTTP_REQS: &str = "http_reqs";
pub(crate) const HTTP_REQ_DURATION: &str = "http_req_duration";
pub(crate) const HTTP_REQ_BLOCKED: &str = "http_req_blocked";
pub(crate) const HTTP_REQ_WAITING: &str = "http_req_waiting";
pub(crate) const HTTP_REQ_RECEIVING: &str = "http_req_receiving";
pub(crate) const HTTP_REQ_FAILED: &str = "http_req_failed";
pub(crate) const HTTP_REQ_SUCCESS: &str = "http_req_success";
pub(crate) const HTTP_REQ_RETRIES: &str = "http_req_retries";
pub(crate) const DATA_RECEIVED: &str = "data_received";

/// One series of the per-request metrics (untagged or `endpoint:NAME`).
#[derive(Debug, Clone)]
struct RequestSeries {
    reqs: Counter,
    duration: Trend,
    blocked: Trend,
    waiting: Trend,
    receiving: Trend,
    failed: Rate,
    success: Rate,
    retries: Counter,
    data_received: Counter,
}

impl RequestSeries {
    fn register(metrics: &Registry, tags: &[(&str, &str)]) -> Result<Self> {
        Ok(Self {
            reqs: metrics.counter_with(HTTP_REQS, tags)?,
            duration: metrics.trend_with(HTTP_REQ_DURATION, tags)?,
            blocked: metrics.trend_with(HTTP_REQ_BLOCKED, tags)?,
            waiting: metrics.trend_with(HTTP_REQ_WAITING, tags)?,
            receiving: metrics.trend_with(HTTP_REQ_RECEIVING, tags)?,
            failed: metrics.rate_with(HTTP_REQ_FAILED, tags)?,
            success: metrics.rate_with(HTTP_REQ_SUCCESS, tags)?,
            retries: metrics.counter_with(HTTP_REQ_RETRIES, tags)?,
            data_received: metrics.counter_with(DATA_RECEIVED, tags)?,
        })
    }

    fn record(&self, res: &HttpCallResult) {
        self.reqs.increment();
        self.duration.add_duration(res.duration);
        self.blocked.add_duration(res.timings.blocked);
        self.waiting.add_duration(res.timings.waiting);
        self.receiving.add_duration(res.timings.receiving);
        self.failed.add(res.is_failed());
        self.data_received.add(res.body.len() as u64);
    }
}

/// Built-in HTTP metrics, recorded once untagged and once per named endpoint.
#[derive(Debug)]
pub(crate) struct RequestMetrics {
    metrics: Arc<Registry>,
    all: RequestSeries,
    endpoints: DashMap<String, RequestSeries>,
}

impl RequestMetrics {
    pub(crate) fn register(metrics: Arc<Registry>) -> Result<Self> {
        let all = RequestSeries::register(&metrics, &[])?;
        Ok(Self {
            metrics,
            all,
            endpoints: DashMap::new(),
        })
    }

    fn endpoint(&self, name: &str) -> Option<RequestSeries> {
        if let Some(series) = self.endpoints.get(name) {
            return Some(series.value().clone());
        }
        // Fails only if a workload claimed a built-in name with another kind.
        let series = RequestSeries::register(&self.metrics, &[("endpoint", name)]).ok()?;
        Some(
            self.endpoints
                .entry(name.to_string())
                .or_insert(series)
                .value()
                .clone(),
        )
    }

    fn each(&self, req: &HttpRequest, f: impl Fn(&RequestSeries)) {
        f(&self.all);
        if let Some(series) = req.name.as_deref().and_then(|n| self.endpoint(n)) {
            f(&series);
        }
    }

    pub(crate) fn record_call(&self, req: &HttpRequest, res: &HttpCallResult) {
        self.each(req, |s| s.record(res));
    }

    pub(crate) fn record_retry(&self, req: &HttpRequest) {
        self.each(req, |s| s.retries.increment());
    }

    pub(crate) fn record_success(&self, req: &HttpRequest, ok: bool) {
        self.each(req, |s| s.success.add(ok));
    }
}

use std::time::Duration;

use bytes::Bytes;
use qload_http::{DEFAULT_TIMEOUT, HttpRequest};

use crate::error::{Error, Result};
use crate::executor::IterationContext;
use crate::step::{StepResult, SuccessCriteria};

/// One HTTP call of an iteration.
#[derive(Debug, Clone)]
pub struct PlanStep {
    /// Endpoint label for per-endpoint metrics and the default check name.
    pub name: String,
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Duration,
    pub criteria: SuccessCriteria,
    pub sleep_after: Option<Duration>,
    /// Check recorded with the step verdict. Defaults to `API-<name>`.
    pub check: Option<String>,
}

impl PlanStep {
    pub fn new(name: impl Into<String>, method: http::Method, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: DEFAULT_TIMEOUT,
            criteria: SuccessCriteria::default(),
            sleep_after: None,
            check: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_criteria(mut self, criteria: SuccessCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    #[must_use]
    pub fn with_sleep_after(mut self, sleep: Duration) -> Self {
        self.sleep_after = Some(sleep);
        self
    }

    #[must_use]
    pub fn with_check(mut self, check: impl Into<String>) -> Self {
        self.check = Some(check.into());
        self
    }

    pub fn check_name(&self) -> String {
        self.check
            .clone()
            .unwrap_or_else(|| format!("API-{}", self.name))
    }

    fn request(&self) -> HttpRequest {
        let mut req = HttpRequest::new(self.method.clone(), self.url.clone())
            .with_body(self.body.clone())
            .with_timeout(self.timeout)
            .with_name(self.name.clone());
        for (k, v) in &self.headers {
            req = req.with_header(k.clone(), v.clone());
        }
        req
    }
}

/// An ordered list of steps run once per iteration. A failing step skips the rest.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: Option<String>,
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(name: Option<String>, steps: Vec<PlanStep>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::EmptyPlan);
        }
        Ok(Self { name, steps })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub async fn run_iteration(&self, ctx: IterationContext) -> StepResult<()> {
        for step in &self.steps {
            let verdict = ctx.call(step.request(), &step.criteria).await;
            ctx.check(&step.check_name(), verdict.is_ok());
            verdict?;

            if let Some(d) = step.sleep_after {
                ctx.sleep(d).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_plan_is_rejected() {
        assert!(matches!(Plan::new(None, Vec::new()), Err(Error::EmptyPlan)));
    }

    #[test]
    fn check_name_defaults_to_api_prefix() {
        let step = PlanStep::new("chat", http::Method::POST, "http://localhost/chat");
        assert_eq!(step.check_name(), "API-chat");
        assert_eq!(step.clone().with_check("chat ok").check_name(), "chat ok");
    }

    #[test]
    fn request_carries_step_settings() {
        let req = PlanStep::new("session", http::Method::POST, "http://localhost/s")
            .with_header("content-type", "application/json")
            .with_body("{}")
            .with_timeout(Duration::from_secs(5))
            .request();
        assert_eq!(req.method, http::Method::POST);
        assert_eq!(req.name.as_deref(), Some("session"));
        assert_eq!(req.timeout, Duration::from_secs(5));
        assert_eq!(req.body, Bytes::from_static(b"{}"));
        assert_eq!(req.headers.len(), 1);
    }
}

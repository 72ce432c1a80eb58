use std::path::Path;
use std::str::FromStr as _;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context as _;
use qload_core::{
    DEFAULT_GRACE_PERIOD, Executor, HttpClient, Plan, PlanStep, Registry, RetryPolicy, RunMeta,
    ScheduleSpec, Scheduler, SuccessCriteria, SummaryAggregator, ThresholdSet,
    evaluate_thresholds,
};
use qload_report::LoadedSummary;

use crate::cli::RunArgs;
use crate::events::TracingEvents;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan_yaml::{self, DEFAULT_RETRY_BACKOFF, PlanFile, YamlDuration};
use crate::progress::{self, PROGRESS_INTERVAL};
use crate::run_error::RunError;

/// Everything a run needs, resolved from flags, environment, and the plan file.
#[derive(Debug)]
pub(crate) struct RunConfig {
    pub plan: Plan,
    pub spec: ScheduleSpec,
    pub retry: RetryPolicy,
    pub thresholds: Vec<ThresholdSet>,
}

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let file = match &args.plan {
        Some(path) => Some(
            plan_yaml::load_plan_yaml(path)
                .await
                .map_err(RunError::InvalidInput)?,
        ),
        None => None,
    };
    let cfg = resolve(&args, file).map_err(RunError::InvalidInput)?;

    let registry = Arc::new(Registry::default());
    let executor = Executor::new(
        HttpClient::default(),
        registry.clone(),
        cfg.retry,
        Arc::new(TracingEvents),
    )
    .map_err(|e| RunError::RuntimeError(e.into()))?;
    let scheduler =
        Scheduler::new(cfg.spec.clone(), executor).map_err(|e| RunError::InvalidInput(e.into()))?;

    out.print_header(&cfg.plan, &cfg.spec);

    let progress_task = match out.progress() {
        Some(on_update) => Some(
            progress::spawn(&registry, cfg.spec.duration, PROGRESS_INTERVAL, on_update)
                .map_err(RunError::RuntimeError)?,
        ),
        None => None,
    };

    let plan = Arc::new(cfg.plan);
    let workload_plan = plan.clone();
    let outcome = scheduler
        .run(move |ctx| {
            let plan = workload_plan.clone();
            async move { plan.run_iteration(ctx).await }
        })
        .await;

    if let Some(task) = progress_task {
        task.abort();
    }
    let outcome = outcome.map_err(|e| RunError::RuntimeError(e.into()))?;

    let mut meta = RunMeta::from_spec(&cfg.spec);
    if let Some(name) = &plan.name {
        meta = meta.with_name(name.clone());
    }
    let summary = SummaryAggregator::new(registry)
        .with_percentiles(ThresholdSet::required_percentiles(&cfg.thresholds))
        .drain(meta, outcome.elapsed)
        .map_err(|e| RunError::RuntimeError(e.into()))?;

    tracing::info!(
        scheduled = outcome.scheduled,
        completed = outcome.completed,
        failed = outcome.failed,
        dropped = outcome.dropped,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "run finished"
    );

    out.print_summary(&summary, &outcome)
        .map_err(RunError::RuntimeError)?;

    if let Some(path) = &args.summary_export {
        let json = summary
            .to_json_pretty()
            .context("failed to encode summary")
            .map_err(RunError::RuntimeError)?;
        write_artifact(path, json.as_bytes())
            .await
            .map_err(RunError::RuntimeError)?;
        out.print_artifact("summary", path);
    }

    if let Some(path) = &args.report {
        let value = serde_json::to_value(&summary)
            .context("failed to encode summary")
            .map_err(RunError::RuntimeError)?;
        let loaded = LoadedSummary::from_json(&value, path)
            .map_err(|e| RunError::RuntimeError(e.into()))?;
        let html = qload_report::render(&loaded, SystemTime::now());
        write_artifact(path, html.as_bytes())
            .await
            .map_err(RunError::RuntimeError)?;
        out.print_artifact("report", path);
    }

    let violations = evaluate_thresholds(&summary, &cfg.thresholds)
        .map_err(|e| RunError::InvalidInput(e.into()))?;
    out.print_threshold_violations(&violations);

    Ok(ExitCode::from_thresholds(violations.len()))
}

/// Flags (and their environment variables) win over the plan file; unset values fall back
/// to defaults derived from the rate.
pub(crate) fn resolve(args: &RunArgs, file: Option<PlanFile>) -> anyhow::Result<RunConfig> {
    let (plan, schedule, file_retry, mut thresholds) = match file {
        Some(f) => {
            if args.url.is_some() {
                anyhow::bail!("use either a plan file or --url, not both");
            }
            let retry = f.retry_policy();
            (f.plan, f.schedule, retry, f.thresholds)
        }
        None => {
            let url = args
                .url
                .clone()
                .context("either a plan file or --url is required")?;
            (
                single_request_plan(args, url)?,
                Default::default(),
                None,
                Vec::new(),
            )
        }
    };

    let plan = match args.timeout {
        Some(timeout) => Plan::new(
            plan.name.clone(),
            plan.steps()
                .iter()
                .cloned()
                .map(|s| s.with_timeout(timeout))
                .collect(),
        )?,
        None => plan,
    };

    let rate = args
        .rate
        .or(schedule.rate)
        .context("a rate is required (--rate, TARGET_QPS, or schedule.rate)")?;
    let duration = args
        .duration
        .or(schedule.duration.map(YamlDuration::into_inner))
        .context("a duration is required (--duration, DURATION, or schedule.duration)")?;

    let pre_allocated = args
        .pre_allocated_workers
        .or(schedule.pre_allocated_workers)
        .unwrap_or_else(|| default_pre_allocated(rate));
    let max_workers = args
        .max_workers
        .or(schedule.max_workers)
        .unwrap_or_else(|| default_max_workers(rate, pre_allocated));

    let mut spec = ScheduleSpec::new(rate, duration, pre_allocated, max_workers)
        .with_grace_period(
            args.grace_period
                .or(schedule.grace_period.map(YamlDuration::into_inner))
                .unwrap_or(DEFAULT_GRACE_PERIOD),
        );
    if let Some(depth) = args.max_queue_depth.or(schedule.max_queue_depth) {
        spec = spec.with_max_queue_depth(depth);
    }
    spec.validate()?;

    let base_retry = file_retry.unwrap_or(RetryPolicy::fixed(0, DEFAULT_RETRY_BACKOFF));
    let mut retry = RetryPolicy::fixed(
        args.retries.unwrap_or(base_retry.max_retries),
        args.retry_backoff.unwrap_or(base_retry.backoff),
    )
    .with_jitter(base_retry.jitter);
    if retry.max_retries == 0 {
        retry = RetryPolicy::NONE;
    }

    for (metric, expr) in &args.thresholds {
        match thresholds.iter_mut().find(|s| &s.metric == metric) {
            Some(set) => set.expressions.push(expr.clone()),
            None => thresholds.push(ThresholdSet {
                metric: metric.clone(),
                expressions: vec![expr.clone()],
            }),
        }
    }

    Ok(RunConfig {
        plan,
        spec,
        retry,
        thresholds,
    })
}

fn default_pre_allocated(rate: f64) -> u64 {
    (rate.ceil() as u64).max(1)
}

fn default_max_workers(rate: f64, pre_allocated: u64) -> u64 {
    ((rate * 3.0).ceil() as u64).max(pre_allocated)
}

fn single_request_plan(args: &RunArgs, url: String) -> anyhow::Result<Plan> {
    let method = http::Method::from_str(&args.method.to_ascii_uppercase())
        .with_context(|| format!("invalid method `{}`", args.method))?;

    let name = args.name.clone().unwrap_or_else(|| endpoint_name(&url));
    let mut step = PlanStep::new(name.clone(), method, url)
        .with_criteria(SuccessCriteria::Status(args.expect_status));
    for (k, v) in &args.headers {
        step = step.with_header(k.clone(), v.clone());
    }
    if let Some(body) = &args.body {
        step = step.with_body(body.clone());
    }

    Ok(Plan::new(Some(name), vec![step])?)
}

/// `http://host/api/chat?x=1` -> `/api/chat`; the host when the path is empty.
fn endpoint_name(url: &str) -> String {
    match http::Uri::from_str(url) {
        Ok(uri) if uri.path() != "/" && !uri.path().is_empty() => uri.path().to_string(),
        Ok(uri) => uri.host().unwrap_or(url).to_string(),
        Err(_) => url.to_string(),
    }
}

pub(crate) async fn write_artifact(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use qload_core::{
    Executor, HttpClient, IterationContext, MetricSummary, NoopEvents, Plan, PlanStep, Registry,
    RetryPolicy, RunMeta, ScheduleSpec, Scheduler, SuccessCriteria, SummaryAggregator,
    ThresholdSet, evaluate_thresholds,
};
use qload_testserver::{CODE_OK, TestServer};

fn business_ok() -> SuccessCriteria {
    SuccessCriteria::JsonField {
        status: 200,
        pointer: "/code".to_string(),
        expected: serde_json::Value::String(CODE_OK.to_string()),
    }
}

fn executor(registry: &Arc<Registry>) -> anyhow::Result<Executor> {
    Ok(Executor::new(
        HttpClient::default(),
        registry.clone(),
        RetryPolicy::NONE,
        Arc::new(NoopEvents),
    )?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn custom_workload_hits_target_rate() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let url = server.urls().ok.clone();

    let registry = Arc::new(Registry::default());
    let spec = ScheduleSpec::new(5.0, Duration::from_secs(5), 5, 15);
    let scheduler = Scheduler::new(spec.clone(), executor(&registry)?)?;

    let outcome = scheduler
        .run(move |ctx: IterationContext| {
            let url = url.clone();
            async move {
                ctx.counter("attempts")?.increment();
                let req = qload_core::HttpRequest::get(url).with_name("ok");
                let res = ctx.call(req, &SuccessCriteria::Status(200)).await?;
                ctx.check("API-ok", res.status == 200);
                Ok(())
            }
        })
        .await?;

    let summary = SummaryAggregator::new(registry.clone())
        .drain(RunMeta::from_spec(&spec), outcome.elapsed)?;
    server.shutdown().await;

    let attempts = registry.counter("attempts")?.value();
    anyhow::ensure!((20..=30).contains(&attempts), "attempts: {attempts}");

    match summary.metric("http_req_success{endpoint:ok}") {
        Some(MetricSummary::Rate { value, .. }) => {
            anyhow::ensure!(*value == 1.0, "success rate: {value}")
        }
        other => anyhow::bail!("unexpected http_req_success: {other:?}"),
    }
    let check = summary
        .root_group
        .checks
        .get("API-ok")
        .context("API-ok check")?;
    anyhow::ensure!(check.fails == 0 && check.passes == attempts);

    let violations = evaluate_thresholds(
        &summary,
        &[ThresholdSet {
            metric: "http_req_failed".to_string(),
            expressions: vec!["rate<0.01".to_string()],
        }],
    )?;
    anyhow::ensure!(violations.is_empty(), "{violations:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn session_then_chat_plan_records_per_endpoint_metrics() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let urls = server.urls().clone();

    let plan = Arc::new(Plan::new(
        Some("chat".to_string()),
        vec![
            PlanStep::new("create-session", http::Method::POST, urls.session.clone())
                .with_header("content-type", "application/json")
                .with_body("{}")
                .with_criteria(business_ok())
                .with_sleep_after(Duration::from_millis(100)),
            PlanStep::new("chat", http::Method::POST, urls.chat.clone())
                .with_body(r#"{"message":"hi"}"#)
                .with_criteria(business_ok()),
        ],
    )?);

    let registry = Arc::new(Registry::default());
    let spec = ScheduleSpec::new(5.0, Duration::from_secs(2), 5, 15);
    let scheduler = Scheduler::new(spec.clone(), executor(&registry)?)?;
    let outcome = scheduler
        .run(move |ctx: IterationContext| {
            let plan = plan.clone();
            async move { plan.run_iteration(ctx).await }
        })
        .await?;
    let sessions = server.stats().sessions_created();
    let chats = server.stats().chats_total();
    server.shutdown().await;

    anyhow::ensure!(outcome.completed == 10, "{outcome:?}");
    anyhow::ensure!(sessions == 10 && chats == 10, "{sessions} / {chats}");
    anyhow::ensure!(registry.counter("http_reqs")?.value() == 20);
    anyhow::ensure!(
        registry
            .trend_with("http_req_duration", &[("endpoint", "chat")])?
            .count()
            == 10
    );
    let check = registry.check("API-create-session");
    anyhow::ensure!(check.passes() == 10 && check.total() == 10);
    anyhow::ensure!(registry.counter("iteration_failures")?.value() == 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_business_code_skips_remaining_steps() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    let urls = server.urls().clone();

    let plan = Arc::new(Plan::new(
        None,
        vec![
            PlanStep::new("chat", http::Method::POST, urls.chat_busy.clone())
                .with_criteria(business_ok()),
            PlanStep::new("never", http::Method::GET, urls.ok.clone()),
        ],
    )?);

    let registry = Arc::new(Registry::default());
    let spec = ScheduleSpec::new(10.0, Duration::from_millis(500), 2, 4);
    let scheduler = Scheduler::new(spec, executor(&registry)?)?;
    let outcome = scheduler
        .run(move |ctx: IterationContext| {
            let plan = plan.clone();
            async move { plan.run_iteration(ctx).await }
        })
        .await?;
    server.shutdown().await;

    anyhow::ensure!(outcome.failed == outcome.completed, "{outcome:?}");
    anyhow::ensure!(registry.counter("iteration_failures")?.value() == outcome.completed);

    // HTTP 200, so transport-level failure stays at zero.
    let failed = registry.rate("http_req_failed")?;
    anyhow::ensure!(failed.passes() == 0);
    let success = registry.rate_with("http_req_success", &[("endpoint", "chat")])?;
    anyhow::ensure!(success.passes() == 0 && success.total() == outcome.completed);
    anyhow::ensure!(registry.check("API-never").total() == 0);
    Ok(())
}

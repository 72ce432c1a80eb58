#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use qload_core::{
    DropReason, Error, EventSink, Executor, HttpClient, IterationContext, NoopEvents, Registry,
    RetryPolicy, RunEvent, ScheduleSpec, Scheduler, SchedulerState,
};

#[derive(Debug, Default)]
struct RecordingEvents {
    events: Mutex<Vec<RunEvent>>,
}

impl RecordingEvents {
    fn snapshot(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingEvents {
    fn emit(&self, event: &RunEvent) {
        self.events.lock().push(event.clone());
    }
}

fn dropped_seqs(events: &RecordingEvents, want: DropReason) -> Vec<u64> {
    events
        .snapshot()
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::IterationDropped { seq, reason } if reason == want => Some(seq),
            _ => None,
        })
        .collect()
}

fn scheduler(spec: ScheduleSpec, events: Arc<dyn EventSink>) -> (Scheduler, Arc<Registry>) {
    let registry = Arc::new(Registry::default());
    let executor = Executor::new(
        HttpClient::default(),
        registry.clone(),
        RetryPolicy::NONE,
        events,
    )
    .unwrap();
    (Scheduler::new(spec, executor).unwrap(), registry)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admits_one_iteration_per_tick() -> anyhow::Result<()> {
    let spec = ScheduleSpec::new(20.0, Duration::from_secs(1), 5, 10);
    let (scheduler, registry) = scheduler(spec, Arc::new(NoopEvents));

    let outcome = scheduler
        .run(|_ctx: IterationContext| async move { Ok(()) })
        .await?;

    anyhow::ensure!(outcome.scheduled == 20, "scheduled: {}", outcome.scheduled);
    anyhow::ensure!(
        (19..=21).contains(&outcome.started),
        "started: {}",
        outcome.started
    );
    anyhow::ensure!(outcome.dropped == 0, "dropped: {}", outcome.dropped);
    anyhow::ensure!(outcome.elapsed >= Duration::from_secs(1));
    anyhow::ensure!(registry.counter("iterations")?.value() == outcome.completed);
    anyhow::ensure!(registry.gauge("vus_max")?.value() == 10);
    anyhow::ensure!(scheduler.state() == SchedulerState::Stopped);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn saturated_pool_drops_instead_of_failing() -> anyhow::Result<()> {
    let spec = ScheduleSpec::new(10.0, Duration::from_secs(1), 1, 1)
        .with_grace_period(Duration::from_secs(5));
    let events = Arc::new(RecordingEvents::default());
    let (scheduler, registry) = scheduler(spec, events.clone());

    let outcome = scheduler
        .run(|ctx: IterationContext| async move {
            ctx.sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await?;

    let accounted = outcome.lagged + outcome.dropped + outcome.completed;
    anyhow::ensure!((9..=11).contains(&accounted), "{outcome:?}");
    anyhow::ensure!(
        !dropped_seqs(&events, DropReason::QueueFull).is_empty(),
        "{outcome:?}"
    );

    anyhow::ensure!(outcome.workers == 1, "pool grew past max: {}", outcome.workers);
    anyhow::ensure!(outcome.dropped >= 8, "dropped: {}", outcome.dropped);
    anyhow::ensure!(
        outcome.started + outcome.dropped == outcome.scheduled,
        "{outcome:?}"
    );
    anyhow::ensure!(registry.counter("dropped_iterations")?.value() == outcome.dropped);
    anyhow::ensure!(registry.counter("iteration_failures")?.value() == 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_grows_on_demand_up_to_max() -> anyhow::Result<()> {
    let spec = ScheduleSpec::new(20.0, Duration::from_secs(1), 1, 10);
    let events = Arc::new(RecordingEvents::default());
    let (scheduler, registry) = scheduler(spec, events.clone());

    let outcome = scheduler
        .run(|ctx: IterationContext| async move {
            ctx.sleep(Duration::from_millis(200)).await;
            Ok(())
        })
        .await?;

    anyhow::ensure!(
        (2..=10).contains(&outcome.workers),
        "workers: {}",
        outcome.workers
    );
    anyhow::ensure!(outcome.dropped == 0, "dropped: {}", outcome.dropped);
    anyhow::ensure!(registry.gauge("vus")?.value() == i64::try_from(outcome.workers)?);

    let spawned = events
        .snapshot()
        .iter()
        .filter(|e| matches!(e, RunEvent::WorkerSpawned { .. }))
        .count();
    anyhow::ensure!(spawned as u64 == outcome.workers - 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn grace_expiry_abandons_running_iterations() -> anyhow::Result<()> {
    let spec = ScheduleSpec::new(2.0, Duration::from_secs(1), 2, 2)
        .with_grace_period(Duration::from_millis(200));
    let events = Arc::new(RecordingEvents::default());
    let (scheduler, _registry) = scheduler(spec, events.clone());

    let outcome = scheduler
        .run(|ctx: IterationContext| async move {
            ctx.sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await?;

    anyhow::ensure!(outcome.started == 2, "{outcome:?}");
    anyhow::ensure!(outcome.completed == 0, "{outcome:?}");
    anyhow::ensure!(outcome.dropped == 2, "{outcome:?}");
    anyhow::ensure!(outcome.elapsed < Duration::from_secs(3), "{outcome:?}");
    anyhow::ensure!(
        events
            .snapshot()
            .contains(&RunEvent::GraceExpired { abandoned: 2 })
    );
    let abandoned = dropped_seqs(&events, DropReason::GraceExpired);
    anyhow::ensure!(abandoned == vec![0, 1], "{abandoned:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backlogged_ticks_start_late_and_are_drained_at_the_end() -> anyhow::Result<()> {
    let spec = ScheduleSpec::new(10.0, Duration::from_secs(1), 1, 1)
        .with_max_queue_depth(10)
        .with_grace_period(Duration::from_secs(5));
    let tolerance_ms = spec.lag_tolerance.as_secs_f64() * 1000.0;
    let events = Arc::new(RecordingEvents::default());
    let (scheduler, registry) = scheduler(spec, events.clone());

    let outcome = scheduler
        .run(|ctx: IterationContext| async move {
            ctx.sleep(Duration::from_millis(150)).await;
            Ok(())
        })
        .await?;

    // One worker serving 150ms iterations falls 50ms further behind every tick.
    anyhow::ensure!(outcome.lagged >= 3, "{outcome:?}");
    anyhow::ensure!(registry.counter("lagged_iterations")?.value() == outcome.lagged);

    let lag = registry.trend("iteration_scheduling_lag")?;
    anyhow::ensure!(lag.count() == outcome.started, "{outcome:?}");
    let lag_max = lag.max().unwrap_or_default();
    anyhow::ensure!(lag_max > tolerance_ms, "lag max: {lag_max}");
    anyhow::ensure!(lag_max >= 100.0, "lag max: {lag_max}");

    // Ticks still in the backlog when the window closes never start.
    let drained = dropped_seqs(&events, DropReason::Drained);
    anyhow::ensure!(drained.len() >= 3, "{drained:?}");
    anyhow::ensure!(drained.windows(2).all(|w| w[0] < w[1]), "{drained:?}");
    anyhow::ensure!(dropped_seqs(&events, DropReason::QueueFull).is_empty());
    anyhow::ensure!(outcome.dropped == drained.len() as u64, "{outcome:?}");

    anyhow::ensure!(outcome.completed + outcome.dropped == outcome.scheduled, "{outcome:?}");
    anyhow::ensure!(registry.counter("dropped_iterations")?.value() == outcome.dropped);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn states_are_emitted_in_order() -> anyhow::Result<()> {
    let spec = ScheduleSpec::new(10.0, Duration::from_millis(300), 1, 2);
    let events = Arc::new(RecordingEvents::default());
    let (scheduler, _registry) = scheduler(spec, events.clone());

    anyhow::ensure!(scheduler.state() == SchedulerState::Idle);
    scheduler
        .run(|_ctx: IterationContext| async move { Ok(()) })
        .await?;

    let states: Vec<(SchedulerState, SchedulerState)> = events
        .snapshot()
        .into_iter()
        .filter_map(|e| match e {
            RunEvent::StateChanged { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    anyhow::ensure!(
        states
            == vec![
                (SchedulerState::Idle, SchedulerState::Running),
                (SchedulerState::Running, SchedulerState::Draining),
                (SchedulerState::Draining, SchedulerState::Stopped),
            ],
        "{states:?}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_runs_once() -> anyhow::Result<()> {
    let spec = ScheduleSpec::new(10.0, Duration::from_millis(100), 1, 1);
    let (scheduler, _registry) = scheduler(spec, Arc::new(NoopEvents));

    scheduler
        .run(|_ctx: IterationContext| async move { Ok(()) })
        .await?;
    let again = scheduler
        .run(|_ctx: IterationContext| async move { Ok(()) })
        .await;
    anyhow::ensure!(matches!(again, Err(Error::AlreadyStarted)));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_workload_does_not_stop_the_run() -> anyhow::Result<()> {
    let spec = ScheduleSpec::new(10.0, Duration::from_millis(500), 2, 2);
    let (scheduler, registry) = scheduler(spec, Arc::new(NoopEvents));

    let outcome = scheduler
        .run(|ctx: IterationContext| async move {
            if ctx.seq() % 2 == 0 {
                panic!("iteration {} exploded", ctx.seq());
            }
            Ok(())
        })
        .await?;

    anyhow::ensure!(outcome.scheduled == 5);
    let faults = registry.counter("iteration_faults")?.value();
    anyhow::ensure!(faults == 3, "faults: {faults}");
    anyhow::ensure!(outcome.failed == faults);
    anyhow::ensure!(scheduler.state() == SchedulerState::Stopped);
    Ok(())
}

#[test]
fn invalid_specs_are_rejected_before_running() {
    let executor = Executor::new(
        HttpClient::default(),
        Arc::new(Registry::default()),
        RetryPolicy::NONE,
        Arc::new(NoopEvents),
    )
    .unwrap();

    let cases = [
        (
            ScheduleSpec::new(0.0, Duration::from_secs(1), 1, 1),
            "target_rate",
        ),
        (ScheduleSpec::new(1.0, Duration::ZERO, 1, 1), "duration"),
        (
            ScheduleSpec::new(1.0, Duration::from_secs(1), 0, 1),
            "pre_allocated_workers",
        ),
        (
            ScheduleSpec::new(1.0, Duration::from_secs(1), 4, 2),
            "max_workers",
        ),
        (
            ScheduleSpec::new(1.0, Duration::from_secs(1), 1, 1).with_max_queue_depth(0),
            "max_queue_depth",
        ),
    ];
    for (spec, field) in cases {
        let err = Scheduler::new(spec, executor.clone()).unwrap_err();
        assert!(err.to_string().contains(field), "{field}: {err}");
    }
}

#[test]
fn drop_reasons_render_snake_case() {
    assert_eq!(DropReason::QueueFull.to_string(), "queue_full");
    assert_eq!(DropReason::GraceExpired.to_string(), "grace_expired");
    assert_eq!(SchedulerState::Draining.to_string(), "draining");
}

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::config::ScheduleSpec;
use crate::error::{Error, Result};
use crate::events::{DropReason, RunEvent};
use crate::executor::{Executor, IterationContext};
use crate::pacer::{Admission, ArrivalPacer, Tick};
use crate::step::StepResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Totals of one finished run. `started + dropped` covers every scheduled tick, except
/// ticks dropped after they started (grace expiry), which count in both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub elapsed: Duration,
    pub scheduled: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub lagged: u64,
    pub dropped: u64,
    pub workers: u64,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    lagged: AtomicU64,
}

/// Open-model arrival-rate scheduler.
///
/// A single ticker admits iteration starts at `target_rate` onto a worker pool that is
/// created with `pre_allocated_workers` and grows on demand up to `max_workers`.
/// Saturation turns ticks into lagged or dropped iterations; it never fails the run.
pub struct Scheduler {
    spec: ScheduleSpec,
    executor: Executor,
    state: Mutex<SchedulerState>,
    started: AtomicBool,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("spec", &self.spec)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(spec: ScheduleSpec, executor: Executor) -> Result<Self> {
        spec.validate()?;
        Ok(Self {
            spec,
            executor,
            state: Mutex::new(SchedulerState::Idle),
            started: AtomicBool::new(false),
        })
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    fn transition(&self, to: SchedulerState) {
        let from = std::mem::replace(&mut *self.state.lock(), to);
        self.executor
            .events()
            .emit(&RunEvent::StateChanged { from, to });
    }

    fn drop_ticks(&self, ticks: impl IntoIterator<Item = u64>, reason: DropReason) -> u64 {
        let mut n = 0u64;
        for seq in ticks {
            n = n.saturating_add(1);
            self.executor
                .events()
                .emit(&RunEvent::IterationDropped { seq, reason });
        }
        self.executor.iteration_metrics().dropped.add(n);
        n
    }

    pub async fn run<W, Fut>(&self, workload: W) -> Result<RunOutcome>
    where
        W: Fn(IterationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult<()>> + Send + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }

        let spec = &self.spec;
        let metrics = self.executor.iteration_metrics().clone();
        let workload = Arc::new(workload);
        let counters = Arc::new(Counters::default());
        let pacer = Arc::new(ArrivalPacer::new(
            spec.pre_allocated_workers,
            spec.max_workers,
            spec.max_queue_depth,
        ));

        let spawn_worker = |workers: &mut JoinSet<()>, ready: Option<Arc<Barrier>>| {
            workers.spawn(worker_loop(
                self.executor.clone(),
                workload.clone(),
                pacer.clone(),
                counters.clone(),
                spec.lag_tolerance,
                ready,
            ));
        };

        // Pre-allocated workers are parked before the clock starts so the first
        // iterations do not pay for task start-up.
        let mut workers: JoinSet<()> = JoinSet::new();
        let ready_count = usize::try_from(spec.pre_allocated_workers)
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        let ready = Arc::new(Barrier::new(ready_count));
        for _ in 0..spec.pre_allocated_workers {
            spawn_worker(&mut workers, Some(ready.clone()));
        }
        ready.wait().await;

        metrics.vus_max.set(i64::try_from(spec.max_workers).unwrap_or(i64::MAX));
        metrics.vus.set(i64::try_from(spec.pre_allocated_workers).unwrap_or(i64::MAX));
        self.transition(SchedulerState::Running);

        let start = Instant::now();
        let start_std = start.into_std();
        let total = spec.total_ticks();
        let mut seq: u64 = 0;
        let mut dropped: u64 = 0;

        while seq < total {
            tokio::time::sleep_until(start + spec.tick_offset(seq)).await;

            // Timer granularity can make several ticks due at once; admit all of them
            // in tick order.
            let now = Instant::now();
            while seq < total && start + spec.tick_offset(seq) <= now {
                let tick = Tick {
                    seq,
                    scheduled_at: start_std + spec.tick_offset(seq),
                };
                match pacer.admit(tick) {
                    Admission::Queued | Admission::Backlogged => {}
                    Admission::Grow => {
                        spawn_worker(&mut workers, None);
                        let n = pacer.workers();
                        metrics.vus.set(i64::try_from(n).unwrap_or(i64::MAX));
                        self.executor
                            .events()
                            .emit(&RunEvent::WorkerSpawned { workers: n });
                    }
                    Admission::Dropped => {
                        dropped = dropped.saturating_add(self.drop_ticks([seq], DropReason::QueueFull));
                    }
                }
                seq = seq.saturating_add(1);
            }
        }

        tokio::time::sleep_until(start + spec.duration).await;
        self.transition(SchedulerState::Draining);

        let queued = pacer.close();
        dropped = dropped.saturating_add(
            self.drop_ticks(queued.iter().map(|t| t.seq), DropReason::Drained),
        );

        let deadline = Instant::now() + spec.grace_period;
        loop {
            match tokio::time::timeout_at(deadline, workers.join_next()).await {
                Ok(Some(res)) => res?,
                Ok(None) => break,
                Err(_) => {
                    workers.abort_all();
                    while workers.join_next().await.is_some() {}

                    // Aborted workers never reach `finish`, so what is left ran out of grace.
                    let abandoned = self.drop_ticks(pacer.running(), DropReason::GraceExpired);
                    dropped = dropped.saturating_add(abandoned);
                    self.executor
                        .events()
                        .emit(&RunEvent::GraceExpired { abandoned });
                    break;
                }
            }
        }

        let elapsed = start.elapsed();
        self.transition(SchedulerState::Stopped);

        Ok(RunOutcome {
            elapsed,
            scheduled: total,
            started: counters.started.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            lagged: counters.lagged.load(Ordering::Relaxed),
            dropped,
            workers: pacer.workers(),
        })
    }
}

async fn worker_loop<W, Fut>(
    executor: Executor,
    workload: Arc<W>,
    pacer: Arc<ArrivalPacer>,
    counters: Arc<Counters>,
    lag_tolerance: Duration,
    ready: Option<Arc<Barrier>>,
) where
    W: Fn(IterationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult<()>> + Send + 'static,
{
    if let Some(ready) = ready {
        ready.wait().await;
    }

    while let Some(tick) = pacer.claim_next().await {
        counters.started.fetch_add(1, Ordering::Relaxed);
        let lag = tick.scheduled_at.elapsed();
        if executor.iteration_metrics().record_start(lag, lag_tolerance) {
            counters.lagged.fetch_add(1, Ordering::Relaxed);
        }

        let outcome = executor.run(workload.as_ref(), tick).await;

        counters.completed.fetch_add(1, Ordering::Relaxed);
        if !outcome.is_success() {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        pacer.finish(tick.seq);
    }
}

use std::time::Duration;

use qload_http::HttpTransportErrorKind;

use crate::scheduler::SchedulerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DropReason {
    /// All workers busy and the backlog at `max_queue_depth`.
    QueueFull,
    /// Still queued when the run entered draining.
    Drained,
    /// Still running when the grace period ran out.
    GraceExpired,
}

/// Structured events emitted by the scheduler and executor.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    StateChanged {
        from: SchedulerState,
        to: SchedulerState,
    },
    WorkerSpawned {
        workers: u64,
    },
    IterationDropped {
        seq: u64,
        reason: DropReason,
    },
    IterationFailed {
        seq: u64,
        error: String,
    },
    IterationFault {
        seq: u64,
        message: String,
    },
    TransportRetry {
        seq: u64,
        attempt: u32,
        url: String,
        kind: Option<HttpTransportErrorKind>,
        backoff: Duration,
    },
    GraceExpired {
        abandoned: u64,
    },
}

/// Receives [`RunEvent`]s; the scheduler and executor never format or print on their own.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEvents;

impl EventSink for NoopEvents {
    fn emit(&self, _event: &RunEvent) {}
}

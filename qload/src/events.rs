use qload_core::{EventSink, RunEvent};

/// Forwards scheduler and executor events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TracingEvents;

impl EventSink for TracingEvents {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::StateChanged { from, to } => {
                tracing::info!(%from, %to, "scheduler state changed");
            }
            RunEvent::WorkerSpawned { workers } => {
                tracing::debug!(workers, "worker spawned");
            }
            RunEvent::IterationDropped { seq, reason } => {
                tracing::debug!(seq, %reason, "iteration dropped");
            }
            RunEvent::IterationFailed { seq, error } => {
                tracing::debug!(seq, %error, "iteration failed");
            }
            RunEvent::IterationFault { seq, message } => {
                tracing::warn!(seq, %message, "iteration faulted");
            }
            RunEvent::TransportRetry {
                seq,
                attempt,
                url,
                kind,
                backoff,
            } => {
                tracing::debug!(
                    seq,
                    attempt,
                    %url,
                    kind = ?kind,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying request"
                );
            }
            RunEvent::GraceExpired { abandoned } => {
                tracing::warn!(abandoned, "grace period expired; abandoning running iterations");
            }
        }
    }
}

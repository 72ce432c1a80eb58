pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("`target_rate` must be a positive, finite number of iterations per second")]
    InvalidRate,

    #[error("`duration` must be a positive duration")]
    InvalidDuration,

    #[error("`pre_allocated_workers` must be a positive integer")]
    InvalidPreAllocatedWorkers,

    #[error("`max_workers` must be >= `pre_allocated_workers`")]
    InvalidMaxWorkers,

    #[error("`max_queue_depth` must be a positive integer")]
    InvalidQueueDepth,

    #[error("scheduler already ran; a scheduler drives exactly one run")]
    AlreadyStarted,

    #[error("metrics were already drained into a summary")]
    AlreadyDrained,

    #[error("invalid threshold expression for metric `{metric}`: {error}")]
    InvalidThresholdExpr { metric: String, error: String },

    #[error("plan has no steps")]
    EmptyPlan,

    #[error("metrics error: {0}")]
    Metrics(#[from] qload_metrics::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

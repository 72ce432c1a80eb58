mod config;
mod error;
mod events;
mod executor;
mod iteration_metrics;
mod pacer;
mod plan;
mod request_metrics;
mod scheduler;
mod step;
mod summary;
mod thresholds;
mod thresholds_eval;

pub use config::{DEFAULT_GRACE_PERIOD, DEFAULT_LAG_TOLERANCE, RetryPolicy, ScheduleSpec};
pub use error::{Error, Result};
pub use events::{DropReason, EventSink, NoopEvents, RunEvent};
pub use executor::{Executor, IterationContext, IterationOutcome};
pub use pacer::Tick;
pub use plan::{Plan, PlanStep};
pub use scheduler::{RunOutcome, Scheduler, SchedulerState};
pub use step::{StepError, StepResult, SuccessCriteria};
pub use summary::{
    CheckSummary, MetricSummary, RootGroup, RunMeta, Summary, SummaryAggregator, SummaryState,
    TrendStats, percentile_key,
};
pub use thresholds::{
    ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSet, ThresholdViolation,
    parse_threshold_expr,
};
pub use thresholds_eval::evaluate_thresholds;

pub use qload_http::{HttpCallResult, HttpClient, HttpRequest, HttpTimings};
pub use qload_metrics::Registry;

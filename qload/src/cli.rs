use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit() && *ch != '.')
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let invalid = || format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)");

    let unit_nanos: u64 = match unit_str.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1_000_000_000,
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => 1_000_000,
        "us" | "µs" | "usec" | "usecs" | "microsecond" | "microseconds" => 1_000,
        "m" | "min" | "mins" | "minute" | "minutes" => 60 * 1_000_000_000,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600 * 1_000_000_000,
        _ => return Err(invalid()),
    };

    if let Ok(whole) = number_str.parse::<u64>() {
        let nanos = whole
            .checked_mul(unit_nanos)
            .ok_or_else(|| format!("duration '{s}' is too large"))?;
        return Ok(Duration::from_nanos(nanos));
    }

    let value: f64 = number_str.parse().map_err(|_| invalid())?;
    Duration::try_from_secs_f64(value * unit_nanos as f64 / 1e9)
        .map_err(|_| format!("duration '{s}' is too large"))
}

fn parse_rate(input: &str) -> Result<f64, String> {
    let v: f64 = input
        .trim()
        .parse()
        .map_err(|_| format!("invalid rate '{input}' (expected iterations per second, e.g. 30)"))?;
    if !v.is_finite() || v <= 0.0 {
        return Err(format!("rate must be a positive number (got {input})"));
    }
    Ok(v)
}

pub(crate) fn parse_header(input: &str) -> Result<(String, String), String> {
    let (k, v) = input
        .split_once(':')
        .ok_or_else(|| format!("invalid header '{input}' (expected NAME:VALUE)"))?;
    let k = k.trim();
    if k.is_empty() {
        return Err(format!("invalid header '{input}' (empty name)"));
    }
    Ok((k.to_string(), v.trim().to_string()))
}

/// `METRIC:EXPR`, e.g. `http_req_duration{endpoint:chat}:p(95)<2000`. Expressions never
/// contain `:`, so the split happens at the last one.
pub(crate) fn parse_threshold(input: &str) -> Result<(String, String), String> {
    let (metric, expr) = input
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid threshold '{input}' (expected METRIC:EXPR)"))?;
    if metric.trim().is_empty() || expr.trim().is_empty() {
        return Err(format!("invalid threshold '{input}' (expected METRIC:EXPR)"));
    }
    qload_core::parse_threshold_expr(expr)?;
    Ok((metric.trim().to_string(), expr.trim().to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar and human-readable summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) and the summary to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "qload",
    author,
    version,
    about = "Open-model HTTP load generator with summary and HTML reports",
    long_about = "qload drives a fixed arrival rate of iterations against HTTP endpoints.\n\nEach iteration runs the steps of a plan (a YAML file, or a single request given by flags). Iterations start on schedule whether or not earlier ones finished; when all workers are busy, iterations are queued or dropped and reported as such.",
    after_help = "Examples:\n  qload run --url http://localhost:8080/health --rate 50 --duration 30s\n  TARGET_QPS=30 qload run plans/guest-chat.yaml --summary-export out/summary.json --report out/report.html\n  qload report out/summary.json"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load test
    #[command(
        long_about = "Run a load test from a YAML plan or from a single request given with --url.\n\nCLI flags and their environment variables override values from the plan."
    )]
    Run(RunArgs),

    /// Render an HTML report from a summary JSON file
    Report(ReportArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to a YAML plan (.yaml/.yml)
    pub plan: Option<PathBuf>,

    /// Request URL (single-request plan when no plan file is given)
    #[arg(long, env = "QLOAD_URL")]
    pub url: Option<String>,

    /// HTTP method for --url
    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Request body for --url
    #[arg(long)]
    pub body: Option<String>,

    /// Request header for --url (repeatable, NAME:VALUE)
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Endpoint name for --url (per-endpoint metrics and the `API-<name>` check)
    #[arg(long)]
    pub name: Option<String>,

    /// Expected HTTP status for --url
    #[arg(long, default_value_t = 200)]
    pub expect_status: u16,

    /// Target iterations per second
    #[arg(long, env = "TARGET_QPS", value_parser = parse_rate)]
    pub rate: Option<f64>,

    /// Test duration (e.g. 10s, 250ms, 5m)
    #[arg(long, env = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Workers started before the clock starts (default: max(rate, 1))
    #[arg(long, env = "PRE_ALLOCATED_WORKERS")]
    pub pre_allocated_workers: Option<u64>,

    /// Upper bound of the worker pool (default: 3 * rate)
    #[arg(long, env = "MAX_WORKERS")]
    pub max_workers: Option<u64>,

    /// Iterations allowed to wait once every worker is busy (default: max workers)
    #[arg(long, env = "MAX_QUEUE_DEPTH")]
    pub max_queue_depth: Option<u64>,

    /// How long running iterations may finish after the duration (default: 30s)
    #[arg(long, value_parser = parse_duration)]
    pub grace_period: Option<Duration>,

    /// Request timeout; with a plan file it replaces every step's timeout (default: 60s)
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Retries of a request that failed at the transport level
    #[arg(long, env = "RETRIES")]
    pub retries: Option<u32>,

    /// Pause between retries (default: 1s)
    #[arg(long, value_parser = parse_duration)]
    pub retry_backoff: Option<Duration>,

    /// Threshold (repeatable, METRIC:EXPR, e.g. http_req_failed:rate<0.01)
    #[arg(long = "threshold", value_name = "METRIC:EXPR", value_parser = parse_threshold)]
    pub thresholds: Vec<(String, String)>,

    /// Write the summary JSON to this path
    #[arg(long, env = "SUMMARY_EXPORT")]
    pub summary_export: Option<PathBuf>,

    /// Write the HTML report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Summary JSON written by `qload run --summary-export`
    pub summary: PathBuf,

    /// Output path (default: <reports-dir>/core-metrics-report_<timestamp>.html)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Directory for timestamped reports when --out is not given
    #[arg(long, default_value = qload_report::DEFAULT_REPORTS_DIR)]
    pub reports_dir: PathBuf,
}

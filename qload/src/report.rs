use std::time::SystemTime;

use qload_report::{load_summary, render, report_file_name};

use crate::cli::ReportArgs;
use crate::exit_codes::ExitCode;
use crate::run::write_artifact;
use crate::run_error::RunError;

pub async fn report(args: ReportArgs) -> Result<ExitCode, RunError> {
    let summary = load_summary(&args.summary)?;

    let generated_at = SystemTime::now();
    let out = args
        .out
        .unwrap_or_else(|| args.reports_dir.join(report_file_name(generated_at)));

    let html = render(&summary, generated_at);
    write_artifact(&out, html.as_bytes())
        .await
        .map_err(RunError::RuntimeError)?;

    tracing::info!(
        path = %out.display(),
        diagnostics = summary.diagnostics.len(),
        "report written"
    );
    println!("report: {}", out.display());

    Ok(ExitCode::Success)
}

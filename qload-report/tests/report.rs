use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use qload_report::{
    Field, LoadedSummary, ReportInputError, ReportInputErrorKind, load_summary, render,
};

fn fixed_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_750_000_000)
}

fn full_summary() -> serde_json::Value {
    serde_json::json!({
        "run": {
            "name": "guest chat",
            "targetRate": 5.0,
            "durationMs": 5000.0,
            "preAllocatedWorkers": 5,
            "maxWorkers": 15,
            "maxQueueDepth": 15
        },
        "state": {"testRunDurationMs": 5012.4},
        "metrics": {
            "http_reqs": {"type": "counter", "count": 50, "rate": 9.97},
            "http_reqs{endpoint:chat}": {"type": "counter", "count": 25, "rate": 4.99},
            "http_reqs{endpoint:create-session}": {"type": "counter", "count": 25, "rate": 4.99},
            "http_req_duration": {"type": "trend", "count": 50, "avg": 41.2, "min": 3.0, "med": 35.0, "max": 180.7, "p(90)": 90.0, "p(95)": 120.4, "p(99)": 170.0},
            "http_req_duration{endpoint:chat}": {"type": "trend", "count": 25, "avg": 60.0, "min": 20.0, "med": 55.0, "max": 180.7, "p(90)": 100.0, "p(95)": 150.0, "p(99)": 175.0},
            "http_req_duration{endpoint:create-session}": {"type": "trend", "count": 25, "avg": 22.4, "min": 3.0, "med": 20.0, "max": 60.0, "p(90)": 40.0, "p(95)": 50.0, "p(99)": 58.0},
            "http_req_success{endpoint:chat}": {"type": "rate", "passes": 24, "fails": 1, "value": 0.96},
            "http_req_success{endpoint:create-session}": {"type": "rate", "passes": 25, "fails": 0, "value": 1.0},
            "http_req_failed": {"type": "rate", "passes": 0, "fails": 50, "value": 0.0},
            "vus": {"type": "gauge", "value": 5, "min": 5, "max": 7},
            "dropped_iterations": {"type": "counter", "count": 0, "rate": 0.0},
            "lagged_iterations": {"type": "counter", "count": 2, "rate": 0.4},
            "iterations": {"type": "counter", "count": 25, "rate": 4.99},
            "iteration_scheduling_lag": {"type": "trend", "count": 25, "avg": 0.3, "min": 0.0, "med": 0.2, "max": 12.0, "p(95)": 1.5}
        },
        "root_group": {
            "checks": {
                "API-chat": {"passes": 24, "fails": 1},
                "API-create-session": {"passes": 25, "fails": 0},
                "latency < 2s": {"passes": 10, "fails": 40}
            }
        }
    })
}

fn loaded(value: &serde_json::Value) -> anyhow::Result<LoadedSummary> {
    Ok(LoadedSummary::from_json(value, Path::new("<memory>"))?)
}

#[test]
fn render_is_idempotent() -> anyhow::Result<()> {
    let summary = loaded(&full_summary())?;
    let a = render(&summary, fixed_time());
    let b = render(&summary, fixed_time());
    anyhow::ensure!(a == b, "render output differs between calls");
    Ok(())
}

#[test]
fn pre_epoch_timestamp_renders_as_na() -> anyhow::Result<()> {
    let html = render(
        &loaded(&full_summary())?,
        UNIX_EPOCH - Duration::from_secs(1),
    );
    anyhow::ensure!(html.contains("Generated at <span class=\"na\">n/a</span>"));
    Ok(())
}

#[test]
fn overview_follows_summary_values() -> anyhow::Result<()> {
    let html = render(&loaded(&full_summary())?, fixed_time());

    for needle in [
        "<td>guest chat</td>",
        // vus.max wins over vus.value
        "<td>7</td>",
        "<td>5.01</td>",
        "<td>50</td>",
        "<td>41</td>",
        "<td>120</td>",
        "<td>181</td>",
        // API- checks only: 49 of 50
        "<td>98.00%</td>",
        "<td>9.97</td>",
        "id=\"endpoint-chat\"",
        "id=\"endpoint-create-session\"",
        "id=\"scheduler\"",
        "latency &lt; 2s",
    ] {
        anyhow::ensure!(html.contains(needle), "missing {needle:?} in report");
    }
    anyhow::ensure!(!html.contains("id=\"diagnostics\""));
    Ok(())
}

#[test]
fn missing_chat_metrics_render_only_create_session() -> anyhow::Result<()> {
    let mut value = full_summary();
    let metrics = value
        .get_mut("metrics")
        .and_then(|m| m.as_object_mut())
        .context("metrics object")?;
    metrics.retain(|k, _| !k.contains("endpoint:chat"));

    let html = render(&loaded(&value)?, fixed_time());
    anyhow::ensure!(html.contains("id=\"endpoint-create-session\""));
    anyhow::ensure!(!html.contains("id=\"endpoint-chat\""));
    anyhow::ensure!(html.ends_with("</html>\n"));
    Ok(())
}

#[test]
fn bare_summary_still_renders() -> anyhow::Result<()> {
    let html = render(
        &loaded(&serde_json::json!({"metrics": {}}))?,
        fixed_time(),
    );
    anyhow::ensure!(html.contains("id=\"overview\""));
    // No API- checks: success rate defaults to 100%.
    anyhow::ensure!(html.contains("<td>100.00%</td>"));
    anyhow::ensure!(!html.contains("class=\"endpoint\""));
    anyhow::ensure!(!html.contains("id=\"checks\""));
    anyhow::ensure!(!html.contains("id=\"scheduler\""));
    Ok(())
}

#[test]
fn malformed_fields_render_as_na_with_diagnostics() -> anyhow::Result<()> {
    let mut value = full_summary();
    value["metrics"]["http_req_duration"]["p(95)"] = serde_json::json!("fast");
    value["run"]["name"] = serde_json::json!("<script>");

    let summary = loaded(&value)?;
    anyhow::ensure!(summary.diagnostics.len() == 1, "{:?}", summary.diagnostics);
    anyhow::ensure!(
        summary.doc.value("http_req_duration", "p(95)")
            == Field::Malformed("metrics.http_req_duration.p(95)".to_string())
    );

    let html = render(&summary, fixed_time());
    anyhow::ensure!(html.contains("id=\"diagnostics\""));
    anyhow::ensure!(html.contains("n/a"));
    anyhow::ensure!(!html.contains("<script>"));
    anyhow::ensure!(html.contains("&lt;script&gt;"));
    Ok(())
}

#[test]
fn input_errors_are_distinguished() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let kind = |path: &Path| -> anyhow::Result<ReportInputErrorKind> {
        match load_summary(path) {
            Ok(_) => anyhow::bail!("expected {} to fail", path.display()),
            Err(e) => Ok(e.kind()),
        }
    };

    let missing = dir.path().join("nope.json");
    anyhow::ensure!(kind(&missing)? == ReportInputErrorKind::InputFileMissing);

    let empty = dir.path().join("empty.json");
    std::fs::write(&empty, "")?;
    anyhow::ensure!(kind(&empty)? == ReportInputErrorKind::InputFileEmpty);

    let blank = dir.path().join("blank.json");
    std::fs::write(&blank, " \n\t")?;
    anyhow::ensure!(kind(&blank)? == ReportInputErrorKind::InputFileEmpty);

    let malformed = dir.path().join("malformed.json");
    std::fs::write(&malformed, "{not json")?;
    anyhow::ensure!(kind(&malformed)? == ReportInputErrorKind::InputFileMalformedJson);

    let no_metrics = dir.path().join("no-metrics.json");
    std::fs::write(&no_metrics, r#"{"root_group": {}}"#)?;
    anyhow::ensure!(kind(&no_metrics)? == ReportInputErrorKind::InputMissingRequiredField);

    match load_summary(&no_metrics) {
        Err(ReportInputError::InputMissingRequiredField { field, .. }) => {
            anyhow::ensure!(field == "metrics")
        }
        other => anyhow::bail!("unexpected: {other:?}"),
    }
    Ok(())
}

#[test]
fn summary_file_round_trips_through_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("summary.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&full_summary())?)?;

    let from_disk = load_summary(&path)?;
    let in_memory = loaded(&full_summary())?;
    anyhow::ensure!(render(&from_disk, fixed_time()) == render(&in_memory, fixed_time()));
    Ok(())
}

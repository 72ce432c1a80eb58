use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::decode::SummaryDoc;
use crate::field::Field;
use crate::load::LoadedSummary;

pub const DEFAULT_REPORTS_DIR: &str = "reports";

const STYLE: &str = include_str!("../assets/report.css");
const NA: &str = r#"<span class="na">n/a</span>"#;
const API_CHECK_PREFIX: &str = "API-";

/// `core-metrics-report_<UTC timestamp>.html`.
pub fn report_file_name(generated_at: SystemTime) -> String {
    let ts: String = rfc3339(generated_at)
        .unwrap_or_else(|| "unknown-time".to_string())
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    format!("core-metrics-report_{ts}.html")
}

/// Renders a self-contained HTML report. Output depends only on the arguments.
pub fn render(summary: &LoadedSummary, generated_at: SystemTime) -> String {
    let doc = &summary.doc;
    let generated = rfc3339(generated_at).unwrap_or_else(|| NA.to_string());
    let title = doc
        .run
        .name
        .present()
        .map_or_else(|| "load test".to_string(), |n| escape(n));

    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    out.push_str("<meta charset=\"utf-8\">\n");
    out.push_str(
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
    );
    writeln!(out, "<title>Core metrics report: {title}</title>").ok();
    writeln!(out, "<style>\n{STYLE}</style>\n</head>\n<body>").ok();
    out.push_str("<div class=\"container\">\n");
    writeln!(
        out,
        "<header class=\"header\"><h1>Core metrics report</h1><div class=\"subtitle\">{title} &middot; {generated}</div></header>"
    )
    .ok();
    out.push_str("<main class=\"content\">\n");

    render_overview(doc, &mut out);
    for endpoint in doc.endpoints() {
        render_endpoint(doc, &endpoint, &mut out);
    }
    render_checks(doc, &mut out);
    render_scheduler(doc, &mut out);
    render_diagnostics(summary, &mut out);

    out.push_str("</main>\n");
    writeln!(
        out,
        "<footer class=\"footer\">Generated at {generated} by qload</footer>"
    )
    .ok();
    out.push_str("</div>\n</body>\n</html>\n");
    out
}

fn render_overview(doc: &SummaryDoc, out: &mut String) {
    let interface = match doc.run.name.present() {
        Some(name) => escape(name),
        None => {
            let endpoints = doc.endpoints();
            if endpoints.is_empty() {
                "all requests".to_string()
            } else {
                escape(&endpoints.join(", "))
            }
        }
    };
    let vus = doc.value("vus", "max").or(doc.value("vus", "value"));
    let duration_s = doc
        .test_run_duration_ms
        .clone()
        .or(doc.run.duration_ms.clone())
        .map(|ms| ms / 1000.0);

    let headers = [
        "Interface",
        "Virtual users",
        "Duration (s)",
        "Total requests",
        "Avg latency (ms)",
        "p95 latency (ms)",
        "Max latency (ms)",
        "API success rate",
        "Throughput (req/s)",
    ];
    let cells = [
        interface,
        fmt_round(&vus),
        fmt_2(&duration_s),
        fmt_round(&doc.value("http_reqs", "count")),
        fmt_round(&doc.value("http_req_duration", "avg")),
        fmt_round(&doc.value("http_req_duration", "p(95)")),
        fmt_round(&doc.value("http_req_duration", "max")),
        format!("{:.2}%", api_success_rate(doc)),
        fmt_2(&doc.value("http_reqs", "rate")),
    ];

    out.push_str("<section id=\"overview\">\n<h2>Overview</h2>\n");
    table(&headers, &[cells.to_vec()], out);
    out.push_str("</section>\n");
}

fn render_endpoint(doc: &SummaryDoc, endpoint: &str, out: &mut String) {
    let key = |metric: &str| SummaryDoc::endpoint_key(metric, endpoint);
    let duration = key("http_req_duration");

    let success = doc.value(&key("http_req_success"), "value").map(|v| v * 100.0);
    let success = if success.is_present() {
        fmt_pct(&success)
    } else {
        check_rate(doc, &format!("{API_CHECK_PREFIX}{endpoint}"))
            .map_or_else(|| NA.to_string(), |v| format!("{v:.2}%"))
    };

    let headers = [
        "Requests",
        "Avg (ms)",
        "Med (ms)",
        "p95 (ms)",
        "p99 (ms)",
        "Max (ms)",
        "Success rate",
        "HTTP failed",
        "Throughput (req/s)",
    ];
    let cells = vec![
        fmt_round(&doc.value(&key("http_reqs"), "count")),
        fmt_2(&doc.value(&duration, "avg")),
        fmt_2(&doc.value(&duration, "med")),
        fmt_2(&doc.value(&duration, "p(95)")),
        fmt_2(&doc.value(&duration, "p(99)")),
        fmt_2(&doc.value(&duration, "max")),
        success,
        fmt_pct(&doc.value(&key("http_req_failed"), "value").map(|v| v * 100.0)),
        fmt_2(&doc.value(&key("http_reqs"), "rate")),
    ];

    let name = escape(endpoint);
    writeln!(
        out,
        "<section class=\"endpoint\" id=\"endpoint-{name}\">\n<h2>Endpoint: {name}</h2>"
    )
    .ok();
    table(&headers, &[cells], out);
    out.push_str("</section>\n");
}

fn render_checks(doc: &SummaryDoc, out: &mut String) {
    if doc.checks.is_empty() {
        return;
    }

    let rows: Vec<Vec<String>> = doc
        .checks
        .iter()
        .map(|(name, c)| {
            vec![
                escape(name),
                fmt_round(&c.passes),
                fmt_round(&c.fails),
                check_rate(doc, name).map_or_else(|| NA.to_string(), |v| format!("{v:.2}%")),
            ]
        })
        .collect();

    out.push_str("<section id=\"checks\">\n<h2>Checks</h2>\n");
    table(&["Check", "Passes", "Fails", "Pass rate"], &rows, out);
    out.push_str("</section>\n");
}

fn render_scheduler(doc: &SummaryDoc, out: &mut String) {
    let present = ["dropped_iterations", "lagged_iterations", "iteration_scheduling_lag"]
        .iter()
        .any(|m| doc.metric(m).is_some());
    if !present {
        return;
    }

    let rows = vec![
        row("Target rate (it/s)", fmt_2(&doc.run.target_rate)),
        row(
            "Workers (pre-allocated / max)",
            format!(
                "{} / {}",
                fmt_round(&doc.run.pre_allocated_workers),
                fmt_round(&doc.run.max_workers)
            ),
        ),
        row("Iterations", fmt_round(&doc.value("iterations", "count"))),
        row(
            "Failed iterations",
            fmt_round(&doc.value("iteration_failures", "count")),
        ),
        row(
            "Dropped iterations",
            fmt_round(&doc.value("dropped_iterations", "count")),
        ),
        row(
            "Lagged iterations",
            fmt_round(&doc.value("lagged_iterations", "count")),
        ),
        row(
            "Scheduling lag p95 (ms)",
            fmt_2(&doc.value("iteration_scheduling_lag", "p(95)")),
        ),
    ];

    out.push_str("<section id=\"scheduler\">\n<h2>Scheduler</h2>\n");
    table(&["Metric", "Value"], &rows, out);
    out.push_str("</section>\n");
}

fn render_diagnostics(summary: &LoadedSummary, out: &mut String) {
    if summary.diagnostics.is_empty() {
        return;
    }
    out.push_str("<section id=\"diagnostics\">\n<h2>Ignored summary fields</h2>\n<ul class=\"diagnostics\">\n");
    for d in &summary.diagnostics {
        writeln!(out, "<li>{}</li>", escape(&d.to_string())).ok();
    }
    out.push_str("</ul>\n</section>\n");
}

/// `None` outside the range humantime formats (the Unix epoch through year 9999).
fn rfc3339(at: SystemTime) -> Option<String> {
    at.duration_since(UNIX_EPOCH).ok()?;
    let mut out = String::new();
    write!(out, "{}", humantime::format_rfc3339_seconds(at)).ok()?;
    Some(out)
}

fn row(label: &str, value: String) -> Vec<String> {
    vec![escape(label), value]
}

/// Cells are already escaped.
fn table(headers: &[&str], rows: &[Vec<String>], out: &mut String) {
    out.push_str("<table class=\"metrics-table\">\n<thead><tr>");
    for h in headers {
        write!(out, "<th>{}</th>", escape(h)).ok();
    }
    out.push_str("</tr></thead>\n<tbody>\n");
    for cells in rows {
        out.push_str("<tr>");
        for c in cells {
            write!(out, "<td>{c}</td>").ok();
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</tbody>\n</table>\n");
}

/// Passed share of `API-` checks in percent; 100 when there are none.
fn api_success_rate(doc: &SummaryDoc) -> f64 {
    let (passes, total) = doc
        .checks
        .iter()
        .filter(|(name, _)| name.starts_with(API_CHECK_PREFIX))
        .fold((0.0, 0.0), |(p, t), (_, c)| {
            let passes = c.passes.value().unwrap_or(0.0);
            let fails = c.fails.value().unwrap_or(0.0);
            (p + passes, t + passes + fails)
        });
    if total > 0.0 {
        passes / total * 100.0
    } else {
        100.0
    }
}

fn check_rate(doc: &SummaryDoc, name: &str) -> Option<f64> {
    let c = doc.checks.get(name)?;
    let passes = c.passes.value()?;
    let total = passes + c.fails.value().unwrap_or(0.0);
    (total > 0.0).then(|| passes / total * 100.0)
}

fn fmt_round(v: &Field<f64>) -> String {
    v.value()
        .map_or_else(|| NA.to_string(), |v| format!("{:.0}", v.round()))
}

fn fmt_2(v: &Field<f64>) -> String {
    v.value()
        .map_or_else(|| NA.to_string(), |v| format!("{v:.2}"))
}

fn fmt_pct(v: &Field<f64>) -> String {
    v.value()
        .map_or_else(|| NA.to_string(), |v| format!("{v:.2}%"))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

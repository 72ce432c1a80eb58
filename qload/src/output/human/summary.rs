use std::fmt::Write as _;

use qload_core::{MetricSummary, RunOutcome, Summary, TrendStats};
use qload_metrics::TagSet;

use super::format::*;

pub(crate) fn render(summary: &Summary, outcome: &RunOutcome) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    if let Some(name) = &summary.run.name {
        writeln!(&mut out, "plan: {name}").ok();
    }

    writeln!(
        &mut out,
        "  iterations: scheduled {} started {} completed {} failed {}",
        outcome.scheduled, outcome.started, outcome.completed, outcome.failed
    )
    .ok();
    writeln!(
        &mut out,
        "  scheduling: dropped {} lagged {} workers {}",
        outcome.dropped, outcome.lagged, outcome.workers
    )
    .ok();

    match summary.metric("http_reqs") {
        Some(MetricSummary::Counter { count, rate }) => {
            let failed = match summary.metric("http_req_failed") {
                Some(MetricSummary::Rate { passes, .. }) => *passes,
                _ => 0,
            };
            writeln!(
                &mut out,
                "  requests: {count} (failed {failed}) rps={}",
                format_rate(*rate)
            )
            .ok();
        }
        _ => out.push_str("  requests: 0\n"),
    }

    match summary.metric("http_req_duration") {
        Some(MetricSummary::Trend(t)) => {
            writeln!(&mut out, "  latency = {}", trend_line(t)).ok();
        }
        _ => out.push_str("  latency: n/a\n"),
    }

    render_endpoints(summary, &mut out);
    render_checks(summary, &mut out);

    out
}

fn trend_line(t: &TrendStats) -> String {
    format!(
        "avg={} p90={} p95={} p99={} max={} (n={})",
        format_ms(t.avg),
        format_ms_opt(t.percentile(90.0)),
        format_ms_opt(t.percentile(95.0)),
        format_ms_opt(t.percentile(99.0)),
        format_ms(t.max),
        t.count
    )
}

fn render_endpoints(summary: &Summary, out: &mut String) {
    let endpoints: Vec<String> = summary
        .metrics
        .keys()
        .filter_map(|k| TagSet::parse_series_key(k))
        .filter(|(name, _)| *name == "http_req_duration")
        .filter_map(|(_, tags)| {
            tags.into_iter()
                .find(|(k, _)| k == "endpoint")
                .map(|(_, v)| v.into_owned())
        })
        .collect();

    if endpoints.is_empty() {
        return;
    }

    out.push_str("\nendpoints\n");
    for endpoint in endpoints {
        let key = |metric: &str| TagSet::new(&[("endpoint", endpoint.as_str())]).series_key(metric);

        let reqs = match summary.metric(&key("http_reqs")) {
            Some(MetricSummary::Counter { count, .. }) => *count,
            _ => 0,
        };
        let failed = match summary.metric(&key("http_req_failed")) {
            Some(MetricSummary::Rate { value, .. }) => format_percent(*value),
            _ => "n/a".to_string(),
        };

        writeln!(out, "  {endpoint}: requests={reqs} failed={failed}").ok();
        if let Some(MetricSummary::Trend(t)) = summary.metric(&key("http_req_duration")) {
            writeln!(out, "    latency = {}", trend_line(t)).ok();
        }
    }
}

fn render_checks(summary: &Summary, out: &mut String) {
    let checks = &summary.root_group.checks;
    if checks.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    for (name, c) in checks {
        let mark = if c.fails == 0 { "✓" } else { "✗" };
        let total = c.passes.saturating_add(c.fails);
        writeln!(out, "  {mark} {name}: {}/{total}", c.passes).ok();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;
    use std::time::Duration;

    use qload_core::{Registry, RunMeta, ScheduleSpec, SummaryAggregator};

    use super::*;

    fn summary() -> Summary {
        let r = Arc::new(Registry::default());
        r.counter("http_reqs").unwrap().add(4);
        r.counter_with("http_reqs", &[("endpoint", "chat")])
            .unwrap()
            .add(4);
        let failed = r.rate_with("http_req_failed", &[("endpoint", "chat")]).unwrap();
        for pass in [true, false, false, false] {
            failed.add(pass);
        }
        let d = r.trend_with("http_req_duration", &[("endpoint", "chat")]).unwrap();
        for v in [10.0, 20.0, 30.0, 40.0] {
            d.add(v);
        }
        r.check("API-chat").add(true);
        r.check("API-chat").add(false);

        let meta = RunMeta::from_spec(&ScheduleSpec::new(4.0, Duration::from_secs(1), 1, 4))
            .with_name("smoke");
        SummaryAggregator::new(r)
            .drain(meta, Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn render_lists_endpoints_and_checks() {
        let outcome = RunOutcome {
            scheduled: 4,
            started: 4,
            completed: 3,
            failed: 1,
            workers: 1,
            ..RunOutcome::default()
        };
        let text = render(&summary(), &outcome);

        assert!(text.contains("plan: smoke"));
        assert!(text.contains("scheduled 4 started 4 completed 3 failed 1"));
        assert!(text.contains("requests: 4 (failed 0) rps=4"));
        assert!(text.contains("latency: n/a"));
        assert!(text.contains("  chat: requests=4 failed=25.00%"));
        assert!(text.contains("✗ API-chat: 1/2"));
    }
}

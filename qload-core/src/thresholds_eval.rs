use crate::error::{Error, Result};
use crate::summary::{MetricSummary, Summary};
use crate::thresholds::{ThresholdAgg, ThresholdSet, ThresholdViolation, parse_threshold_expr};

pub fn evaluate_thresholds(
    summary: &Summary,
    sets: &[ThresholdSet],
) -> Result<Vec<ThresholdViolation>> {
    let mut out: Vec<ThresholdViolation> = Vec::new();

    for set in sets {
        let metric = summary.metric(&set.metric);

        for expr_raw in &set.expressions {
            let expr =
                parse_threshold_expr(expr_raw).map_err(|error| Error::InvalidThresholdExpr {
                    metric: set.metric.clone(),
                    error,
                })?;

            // Missing metric => every expression fails.
            let observed = metric.and_then(|m| observed_value(m, expr.agg));

            let passed = observed.is_some_and(|v| expr.holds(v));
            if !passed {
                out.push(ThresholdViolation {
                    metric: set.metric.clone(),
                    expression: expr_raw.clone(),
                    observed,
                });
            }
        }
    }

    Ok(out)
}

fn observed_value(metric: &MetricSummary, agg: ThresholdAgg) -> Option<f64> {
    match (metric, agg) {
        (MetricSummary::Counter { count, .. }, ThresholdAgg::Count | ThresholdAgg::Value) => {
            Some(*count as f64)
        }
        (MetricSummary::Counter { rate, .. }, ThresholdAgg::Rate) => Some(*rate),

        (MetricSummary::Gauge { value, .. }, ThresholdAgg::Value) => Some(*value as f64),
        (MetricSummary::Gauge { min, .. }, ThresholdAgg::Min) => Some(*min as f64),
        (MetricSummary::Gauge { max, .. }, ThresholdAgg::Max) => Some(*max as f64),

        (MetricSummary::Rate { value, .. }, ThresholdAgg::Rate | ThresholdAgg::Value) => {
            Some(*value)
        }
        (MetricSummary::Rate { passes, fails, .. }, ThresholdAgg::Count) => {
            Some(passes.saturating_add(*fails) as f64)
        }

        (MetricSummary::Trend(t), ThresholdAgg::Avg) => Some(t.avg),
        (MetricSummary::Trend(t), ThresholdAgg::Min) => Some(t.min),
        (MetricSummary::Trend(t), ThresholdAgg::Max) => Some(t.max),
        (MetricSummary::Trend(t), ThresholdAgg::Med) => Some(t.med),
        (MetricSummary::Trend(t), ThresholdAgg::Count) => Some(t.count as f64),
        (MetricSummary::Trend(t), ThresholdAgg::P(p)) => t.percentile(p),

        _ => None,
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use qload_metrics::TagSet;
use serde_json::{Map, Value};

use crate::field::Field;

const ENDPOINT_TAG: &str = "endpoint";

/// A tolerated defect in an optional summary field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Dotted JSON path, e.g. `metrics.vus.max`.
    pub path: String,
    pub problem: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.problem)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunDoc {
    pub name: Field<String>,
    pub target_rate: Field<f64>,
    pub duration_ms: Field<f64>,
    pub pre_allocated_workers: Field<f64>,
    pub max_workers: Field<f64>,
    pub max_queue_depth: Field<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDoc {
    pub kind: Field<String>,
    pub values: BTreeMap<String, Field<f64>>,
}

impl MetricDoc {
    pub fn get(&self, field: &str) -> Field<f64> {
        self.values.get(field).cloned().unwrap_or(Field::Absent)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckDoc {
    pub passes: Field<f64>,
    pub fails: Field<f64>,
}

/// Read side of the summary interchange format. Only `metrics` is required; everything
/// else may be absent or malformed.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryDoc {
    pub run: RunDoc,
    pub test_run_duration_ms: Field<f64>,
    /// Keyed by `name` or `name{tag:value}`.
    pub metrics: BTreeMap<String, MetricDoc>,
    pub checks: BTreeMap<String, CheckDoc>,
}

impl SummaryDoc {
    pub fn metric(&self, key: &str) -> Option<&MetricDoc> {
        self.metrics.get(key)
    }

    pub fn value(&self, metric: &str, field: &str) -> Field<f64> {
        self.metric(metric)
            .map(|m| m.get(field))
            .unwrap_or(Field::Absent)
    }

    pub fn endpoint_key(metric: &str, endpoint: &str) -> String {
        TagSet::new(&[(ENDPOINT_TAG, endpoint)]).series_key(metric)
    }

    /// Endpoint names found in `metric{endpoint:NAME}` keys, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut out = BTreeSet::new();
        for key in self.metrics.keys() {
            if let Some((_, tags)) = TagSet::parse_series_key(key) {
                for (k, v) in tags {
                    if k == ENDPOINT_TAG {
                        out.insert(v.into_owned());
                    }
                }
            }
        }
        out.into_iter().collect()
    }

    /// `None` when the required `metrics` object is missing.
    pub(crate) fn decode(root: &Value) -> Option<(Self, Vec<Diagnostic>)> {
        let root = root.as_object()?;
        let metrics_obj = root.get("metrics")?.as_object()?;

        let mut d = Decoder::default();

        let run_obj = d.object(root.get("run"), "run");
        let run = RunDoc {
            name: d.string(run_obj, "name", "run"),
            target_rate: d.number(run_obj, "targetRate", "run"),
            duration_ms: d.number(run_obj, "durationMs", "run"),
            pre_allocated_workers: d.number(run_obj, "preAllocatedWorkers", "run"),
            max_workers: d.number(run_obj, "maxWorkers", "run"),
            max_queue_depth: d.number(run_obj, "maxQueueDepth", "run"),
        };

        let state_obj = d.object(root.get("state"), "state");
        let test_run_duration_ms = d.number(state_obj, "testRunDurationMs", "state");

        let mut metrics = BTreeMap::new();
        for (key, raw) in metrics_obj {
            let path = format!("metrics.{key}");
            let Some(obj) = d.object(Some(raw), &path) else {
                continue;
            };
            let kind = d.string(Some(obj), "type", &path);
            let mut values = BTreeMap::new();
            for field in obj.keys() {
                // `thresholds` carries pass/fail verdicts, not aggregates.
                if field == "type" || field == "thresholds" {
                    continue;
                }
                values.insert(field.clone(), d.number(Some(obj), field, &path));
            }
            metrics.insert(key.clone(), MetricDoc { kind, values });
        }

        let checks = d.checks(root);

        Some((
            Self {
                run,
                test_run_duration_ms,
                metrics,
                checks,
            },
            d.diagnostics,
        ))
    }
}

#[derive(Debug, Default)]
struct Decoder {
    diagnostics: Vec<Diagnostic>,
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Decoder {
    fn malformed<T>(&mut self, path: String, problem: String) -> Field<T> {
        self.diagnostics.push(Diagnostic {
            path: path.clone(),
            problem,
        });
        Field::Malformed(path)
    }

    fn object<'a>(&mut self, v: Option<&'a Value>, path: &str) -> Option<&'a Map<String, Value>> {
        match v {
            None | Some(Value::Null) => None,
            Some(Value::Object(obj)) => Some(obj),
            Some(other) => {
                self.diagnostics.push(Diagnostic {
                    path: path.to_string(),
                    problem: format!("expected an object, found {}", json_type(other)),
                });
                None
            }
        }
    }

    fn number(&mut self, obj: Option<&Map<String, Value>>, key: &str, parent: &str) -> Field<f64> {
        match obj.and_then(|o| o.get(key)) {
            None | Some(Value::Null) => Field::Absent,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => Field::Present(v),
                _ => self.malformed(
                    format!("{parent}.{key}"),
                    "number out of range".to_string(),
                ),
            },
            Some(other) => self.malformed(
                format!("{parent}.{key}"),
                format!("expected a number, found {}", json_type(other)),
            ),
        }
    }

    fn string(
        &mut self,
        obj: Option<&Map<String, Value>>,
        key: &str,
        parent: &str,
    ) -> Field<String> {
        match obj.and_then(|o| o.get(key)) {
            None | Some(Value::Null) => Field::Absent,
            Some(Value::String(s)) => Field::Present(s.clone()),
            Some(other) => self.malformed(
                format!("{parent}.{key}"),
                format!("expected a string, found {}", json_type(other)),
            ),
        }
    }

    /// `root_group.checks` as a name-keyed object, or as an array of `{name, passes, fails}`.
    fn checks(&mut self, root: &Map<String, Value>) -> BTreeMap<String, CheckDoc> {
        let mut out = BTreeMap::new();
        let Some(group) = self.object(root.get("root_group"), "root_group") else {
            return out;
        };

        match group.get("checks") {
            None | Some(Value::Null) => {}
            Some(Value::Object(by_name)) => {
                for (name, raw) in by_name {
                    let path = format!("root_group.checks.{name}");
                    if let Some(obj) = self.object(Some(raw), &path) {
                        out.insert(name.clone(), self.check(obj, &path));
                    }
                }
            }
            Some(Value::Array(items)) => {
                for (i, raw) in items.iter().enumerate() {
                    let path = format!("root_group.checks.{i}");
                    let Some(obj) = self.object(Some(raw), &path) else {
                        continue;
                    };
                    match self.string(Some(obj), "name", &path) {
                        Field::Present(name) => {
                            out.insert(name, self.check(obj, &path));
                        }
                        Field::Absent => {
                            self.diagnostics.push(Diagnostic {
                                path: format!("{path}.name"),
                                problem: "check without a name".to_string(),
                            });
                        }
                        Field::Malformed(_) => {}
                    }
                }
            }
            Some(other) => {
                self.diagnostics.push(Diagnostic {
                    path: "root_group.checks".to_string(),
                    problem: format!("expected an object or array, found {}", json_type(other)),
                });
            }
        }
        out
    }

    fn check(&mut self, obj: &Map<String, Value>, path: &str) -> CheckDoc {
        CheckDoc {
            passes: self.number(Some(obj), "passes", path),
            fails: self.number(Some(obj), "fails", path),
        }
    }
}

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr as _;
use std::time::Duration;

use anyhow::Context as _;
use qload_core::{Plan, PlanStep, RetryPolicy, SuccessCriteria, ThresholdSet};
use serde::Deserialize;

/// Plan file layout:
///
/// ```yaml
/// name: guest-chat
/// schedule: { rate: 30, duration: 5m, preAllocatedWorkers: 120, maxWorkers: 150 }
/// retry: { maxRetries: 2, backoff: 1s }
/// thresholds:
///   http_req_failed: rate<0.01
/// steps:
///   - name: create-session
///     method: POST
///     url: ${BASE_URL}/api/session
///     expect: { status: 200, json: { pointer: /code, equals: "20000" } }
///     sleepAfter: 2s
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlanDocYaml {
    name: Option<String>,

    #[serde(default)]
    schedule: ScheduleYaml,

    #[serde(default)]
    retry: Option<RetryYaml>,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdExprYaml>,

    steps: Vec<StepYaml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScheduleYaml {
    pub rate: Option<f64>,
    pub duration: Option<YamlDuration>,
    pub pre_allocated_workers: Option<u64>,
    pub max_workers: Option<u64>,
    pub max_queue_depth: Option<u64>,
    pub grace_period: Option<YamlDuration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct RetryYaml {
    #[serde(default)]
    pub max_retries: u32,
    pub backoff: Option<YamlDuration>,
    pub jitter: Option<YamlDuration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StepYaml {
    name: String,

    #[serde(default)]
    method: Option<String>,

    url: String,

    #[serde(default)]
    headers: BTreeMap<String, String>,

    /// Raw body.
    #[serde(default)]
    body: Option<String>,

    /// JSON body; sets `content-type: application/json` unless a header overrides it.
    #[serde(default)]
    json: Option<serde_json::Value>,

    #[serde(default)]
    timeout: Option<YamlDuration>,

    #[serde(default)]
    expect: Option<ExpectYaml>,

    #[serde(default)]
    sleep_after: Option<YamlDuration>,

    #[serde(default)]
    check: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ExpectYaml {
    #[serde(default = "default_status")]
    status: u16,

    #[serde(default)]
    json: Option<JsonExpectYaml>,
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct JsonExpectYaml {
    pointer: String,
    equals: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let secs = u64::try_from(v).map_err(|_| E::custom("duration must be positive"))?;
                Ok(YamlDuration(Duration::from_secs(secs)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a positive, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// A parsed plan file with `${ENV}` references resolved.
#[derive(Debug, Clone)]
pub(crate) struct PlanFile {
    pub plan: Plan,
    pub schedule: ScheduleYaml,
    pub retry: Option<RetryYaml>,
    pub thresholds: Vec<ThresholdSet>,
}

impl PlanFile {
    pub(crate) fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry.as_ref().map(|r| {
            RetryPolicy::fixed(
                r.max_retries,
                r.backoff.map_or(DEFAULT_RETRY_BACKOFF, YamlDuration::into_inner),
            )
            .with_jitter(r.jitter.map(YamlDuration::into_inner).unwrap_or_default())
        })
    }
}

pub(crate) const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

pub(crate) fn looks_like_yaml_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()).map(|s| s.to_ascii_lowercase()),
        Some(ext) if ext == "yml" || ext == "yaml"
    )
}

pub(crate) async fn load_plan_yaml(path: &Path) -> anyhow::Result<PlanFile> {
    if !looks_like_yaml_path(path) {
        anyhow::bail!(
            "unsupported plan file `{}` (expected .yaml or .yml)",
            path.display()
        );
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read plan: {}", path.display()))?;

    let default_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string);

    parse_plan_yaml(&bytes, default_name, &|name| std::env::var(name).ok())
        .with_context(|| format!("invalid plan: {}", path.display()))
}

pub(crate) fn parse_plan_yaml(
    bytes: &[u8],
    default_name: Option<String>,
    env: &dyn Fn(&str) -> Option<String>,
) -> anyhow::Result<PlanFile> {
    let doc: PlanDocYaml = serde_yaml::from_slice(bytes).context("failed to parse YAML")?;

    let steps = doc
        .steps
        .into_iter()
        .map(|s| {
            let name = s.name.clone();
            step_from_yaml(s, env).with_context(|| format!("step `{name}`"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let plan = Plan::new(doc.name.or(default_name), steps)?;

    let mut thresholds = Vec::with_capacity(doc.thresholds.len());
    for (metric, exprs) in doc.thresholds {
        let expressions = match exprs {
            ThresholdExprYaml::One(e) => vec![e],
            ThresholdExprYaml::Many(v) => v,
        };
        for e in &expressions {
            qload_core::parse_threshold_expr(e)
                .map_err(|err| anyhow::anyhow!("threshold for `{metric}`: {err}"))?;
        }
        thresholds.push(ThresholdSet {
            metric,
            expressions,
        });
    }

    Ok(PlanFile {
        plan,
        schedule: doc.schedule,
        retry: doc.retry,
        thresholds,
    })
}

fn step_from_yaml(s: StepYaml, env: &dyn Fn(&str) -> Option<String>) -> anyhow::Result<PlanStep> {
    let method = match s.method.as_deref() {
        None => http::Method::GET,
        Some(m) => http::Method::from_str(&m.to_ascii_uppercase())
            .with_context(|| format!("invalid method `{m}`"))?,
    };

    let url = expand_env(&s.url, env)?;
    let mut step = PlanStep::new(s.name, method, url);

    let has_content_type = s
        .headers
        .keys()
        .any(|k| k.eq_ignore_ascii_case("content-type"));
    for (k, v) in &s.headers {
        step = step.with_header(k.clone(), expand_env(v, env)?);
    }

    match (s.body, s.json) {
        (Some(_), Some(_)) => anyhow::bail!("`body` and `json` are mutually exclusive"),
        (Some(body), None) => step = step.with_body(expand_env(&body, env)?),
        (None, Some(mut json)) => {
            expand_json_strings(&mut json, env)?;
            let text = serde_json::to_string(&json).context("encode json body")?;
            step = step.with_body(text);
            if !has_content_type {
                step = step.with_header("content-type", "application/json");
            }
        }
        (None, None) => {}
    }

    if let Some(t) = s.timeout {
        step = step.with_timeout(t.into_inner());
    }
    if let Some(expect) = s.expect {
        step = step.with_criteria(match expect.json {
            None => SuccessCriteria::Status(expect.status),
            Some(j) => SuccessCriteria::JsonField {
                status: expect.status,
                pointer: j.pointer,
                expected: j.equals,
            },
        });
    }
    if let Some(d) = s.sleep_after {
        step = step.with_sleep_after(d.into_inner());
    }
    if let Some(check) = s.check {
        step = step.with_check(check);
    }
    Ok(step)
}

/// Replaces `${NAME}` and `${NAME:-default}`. A `$` not followed by `{` is kept as is.
pub(crate) fn expand_env(
    input: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .with_context(|| format!("unterminated `${{` in `{input}`"))?;
        let expr = &after[..end];

        let (name, default) = match expr.split_once(":-") {
            Some((n, d)) => (n, Some(d)),
            None => (expr, None),
        };
        if name.is_empty() {
            anyhow::bail!("empty variable name in `{input}`");
        }

        match (env(name), default) {
            (Some(v), _) => out.push_str(&v),
            (None, Some(d)) => out.push_str(d),
            (None, None) => anyhow::bail!("environment variable `{name}` is not set"),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Expands string leaves in place, so substituted values are JSON-escaped on encode.
fn expand_json_strings(
    value: &mut serde_json::Value,
    env: &dyn Fn(&str) -> Option<String>,
) -> anyhow::Result<()> {
    match value {
        serde_json::Value::String(s) => *s = expand_env(s, env)?,
        serde_json::Value::Array(items) => {
            for item in items {
                expand_json_strings(item, env)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                expand_json_strings(item, env)?;
            }
        }
        _ => {}
    }
    Ok(())
}

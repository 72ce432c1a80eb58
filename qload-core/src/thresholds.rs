use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    /// Metric key, optionally with tags: `http_req_duration{endpoint:chat}`.
    pub metric: String,
    pub expressions: Vec<String>,
}

impl ThresholdSet {
    /// Percentiles referenced by any expression, so the summary can export them.
    pub fn required_percentiles(sets: &[ThresholdSet]) -> Vec<f64> {
        sets.iter()
            .flat_map(|s| s.expressions.iter())
            .filter_map(|e| match parse_threshold_expr(e) {
                Ok(ThresholdExpr {
                    agg: ThresholdAgg::P(p),
                    ..
                }) => Some(p),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl ThresholdOp {
    /// Two-character operators first so `<=` is not read as `<`.
    const TOKENS: [(&'static str, ThresholdOp); 5] = [
        ("<=", Self::Lte),
        (">=", Self::Gte),
        ("==", Self::Eq),
        ("<", Self::Lt),
        (">", Self::Gt),
    ];

    pub fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Self::Lt => observed < bound,
            Self::Lte => observed <= bound,
            Self::Gt => observed > bound,
            Self::Gte => observed >= bound,
            Self::Eq => observed == bound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Med,
    Count,
    Rate,
    Value,
    /// Percentile in `(0, 100]`.
    P(f64),
}

impl FromStr for ThresholdAgg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Ok(match lower.as_str() {
            "avg" => Self::Avg,
            "min" => Self::Min,
            "max" => Self::Max,
            "med" => Self::Med,
            "count" => Self::Count,
            "rate" => Self::Rate,
            "value" => Self::Value,
            other => {
                let inner = other
                    .strip_prefix("p(")
                    .and_then(|v| v.strip_suffix(')'))
                    .ok_or_else(|| format!("unknown aggregation `{s}`"))?;
                let p: f64 = inner
                    .parse()
                    .map_err(|_| format!("invalid percentile `{inner}`"))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(format!("percentile {p} out of range (0, 100]"));
                }
                Self::P(p)
            }
        })
    }
}

/// `<agg> <op> <number>`, e.g. `p(95) < 2000`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

impl ThresholdExpr {
    pub fn holds(&self, observed: f64) -> bool {
        self.op.holds(observed, self.value)
    }
}

impl FromStr for ThresholdExpr {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        if s.is_empty() {
            return Err("empty threshold".to_string());
        }

        let (pos, token, op) = ThresholdOp::TOKENS
            .iter()
            .find_map(|(token, op)| s.find(token).map(|pos| (pos, *token, *op)))
            .ok_or_else(|| format!("missing operator in threshold `{raw}`"))?;

        let (left, right) = (&s[..pos], &s[pos + token.len()..]);
        if left.is_empty() || right.is_empty() {
            return Err(format!("invalid threshold `{raw}`"));
        }

        let agg = left
            .parse::<ThresholdAgg>()
            .map_err(|e| format!("{e} in threshold `{raw}`"))?;
        let value: f64 = right
            .parse()
            .map_err(|_| format!("invalid numeric value in threshold `{raw}`"))?;

        Ok(Self { agg, op, value })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdViolation {
    pub metric: String,
    pub expression: String,
    /// `None` when the metric or aggregation is missing from the summary.
    pub observed: Option<f64>,
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    raw.parse()
}

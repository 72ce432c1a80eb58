use std::fmt;
use std::sync::Arc;

use qload_http::HttpCallResult;

/// Why a step of an iteration failed. Returned with `?` to skip the remaining steps.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("{endpoint}: transport failure ({kind})")]
    Transport { endpoint: String, kind: String },

    #[error("{endpoint}: expected status {expected}, got {actual}")]
    Status {
        endpoint: String,
        expected: u16,
        actual: u16,
    },

    #[error("{endpoint}: {reason}")]
    Predicate { endpoint: String, reason: String },

    #[error("{0}")]
    Other(String),
}

pub type StepResult<T> = std::result::Result<T, StepError>;

impl From<qload_metrics::Error> for StepError {
    fn from(err: qload_metrics::Error) -> Self {
        StepError::Other(err.to_string())
    }
}

type CustomPredicate = dyn Fn(&HttpCallResult) -> Result<(), String> + Send + Sync;

/// Per-endpoint definition of a successful call.
#[derive(Clone)]
pub enum SuccessCriteria {
    /// Exact HTTP status.
    Status(u16),
    /// HTTP status plus a field of the JSON body, addressed by JSON pointer
    /// (e.g. `/code` equal to `"20000"`).
    JsonField {
        status: u16,
        pointer: String,
        expected: serde_json::Value,
    },
    Custom(Arc<CustomPredicate>),
}

impl fmt::Debug for SuccessCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(s) => f.debug_tuple("Status").field(s).finish(),
            Self::JsonField {
                status,
                pointer,
                expected,
            } => f
                .debug_struct("JsonField")
                .field("status", status)
                .field("pointer", pointer)
                .field("expected", expected)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self::Status(200)
    }
}

impl SuccessCriteria {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&HttpCallResult) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn evaluate(&self, res: &HttpCallResult, endpoint: &str) -> StepResult<()> {
        if res.is_transport_failure() {
            return Err(StepError::Transport {
                endpoint: endpoint.to_string(),
                kind: res
                    .error
                    .map_or_else(|| "unknown".to_string(), |k| k.to_string()),
            });
        }

        match self {
            Self::Status(expected) => check_status(res, *expected, endpoint),
            Self::JsonField {
                status,
                pointer,
                expected,
            } => {
                check_status(res, *status, endpoint)?;
                let predicate = |reason: String| StepError::Predicate {
                    endpoint: endpoint.to_string(),
                    reason,
                };
                let body: serde_json::Value = serde_json::from_slice(&res.body)
                    .map_err(|e| predicate(format!("response body is not JSON: {e}")))?;
                match body.pointer(pointer) {
                    Some(actual) if actual == expected => Ok(()),
                    Some(actual) => Err(predicate(format!(
                        "`{pointer}` is {actual}, expected {expected}"
                    ))),
                    None => Err(predicate(format!("`{pointer}` missing from response body"))),
                }
            }
            Self::Custom(f) => f(res).map_err(|reason| StepError::Predicate {
                endpoint: endpoint.to_string(),
                reason,
            }),
        }
    }
}

fn check_status(res: &HttpCallResult, expected: u16, endpoint: &str) -> StepResult<()> {
    if res.status == expected {
        return Ok(());
    }
    Err(StepError::Status {
        endpoint: endpoint.to_string(),
        expected,
        actual: res.status,
    })
}

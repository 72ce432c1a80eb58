use std::time::Duration;

use bytes::Bytes;

use crate::HttpTransportErrorKind;

/// Applied when a request is built without an explicit timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpTimings {
    /// Time spent before the request could be issued; the whole elapsed time for calls
    /// that failed at the transport level.
    pub blocked: Duration,
    /// From sending the request until the response head arrived, including connection
    /// setup when no pooled connection was available.
    pub waiting: Duration,
    /// Reading the response body.
    pub receiving: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCallResult {
    /// HTTP status, or `0` when the transport never completed.
    pub status: u16,
    pub duration: Duration,
    pub body: Bytes,
    /// Response headers (lowercased header names). Multiple values are joined with ", ".
    pub headers: Vec<(String, String)>,
    pub timings: HttpTimings,
    pub error: Option<HttpTransportErrorKind>,
}

impl HttpCallResult {
    pub(crate) fn transport_failure(kind: HttpTransportErrorKind, elapsed: Duration) -> Self {
        Self {
            status: 0,
            duration: elapsed,
            body: Bytes::new(),
            headers: Vec::new(),
            timings: HttpTimings {
                blocked: elapsed,
                ..HttpTimings::default()
            },
            error: Some(kind),
        }
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    /// Transport failures and 4xx/5xx responses.
    pub fn is_failed(&self) -> bool {
        self.status == 0 || self.status >= 400
    }

    pub fn body_utf8(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub timeout: Duration,
    /// Endpoint label used for per-endpoint metrics.
    pub name: Option<String>,
}

impl HttpRequest {
    pub fn new(method: http::Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
            timeout: DEFAULT_TIMEOUT,
            name: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(http::Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(http::Method::POST, url).with_body(body)
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::{Duration, Instant};

use super::util::{has_header, host_header_value, merge_headers};
use super::{Error, HttpCallResult, HttpRequest, HttpTimings, Result};

/// The OS-level TCP connect timeout can be tens of seconds; unreachable targets should
/// surface as transport failures well before that.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Pooled HTTP/1.1 client. Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CONNECT_TIMEOUT))
    }
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    /// Issues one request. Transport failures (bad URL, connect error, timeout, broken
    /// body) come back as `status == 0` with an empty body; there is no retry here.
    pub async fn execute(&self, req: HttpRequest) -> HttpCallResult {
        let started = Instant::now();
        let timeout = req.timeout;

        let call = async {
            let req = build_request(req)?;
            self.send(req, started).await
        };

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(res)) => res,
            Ok(Err(err)) => HttpCallResult::transport_failure(err.kind(), started.elapsed()),
            Err(_) => HttpCallResult::transport_failure(
                Error::Timeout(timeout).kind(),
                started.elapsed(),
            ),
        }
    }

    async fn send(&self, req: Request<Full<Bytes>>, started: Instant) -> Result<HttpCallResult> {
        let blocked = started.elapsed();

        let res = self.inner.request(req).await?;
        let head_at = Instant::now();

        let (parts, body) = res.into_parts();
        let headers = merge_headers(&parts.headers);
        let body = body.collect().await?.to_bytes();

        let receiving = head_at.elapsed();
        let waiting = head_at.duration_since(started).saturating_sub(blocked);

        Ok(HttpCallResult {
            status: parts.status.as_u16(),
            duration: waiting + receiving,
            body,
            headers,
            timings: HttpTimings {
                blocked,
                waiting,
                receiving,
            },
            error: None,
        })
    }
}

fn build_request(req: HttpRequest) -> Result<Request<Full<Bytes>>> {
    let parsed = url::Url::parse(&req.url).map_err(|_| Error::InvalidUrl(req.url.clone()))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::UnsupportedScheme(req.url));
    }

    let uri: hyper::Uri = req
        .url
        .parse()
        .map_err(|_| Error::InvalidUrl(req.url.clone()))?;

    let mut builder = Request::builder().method(req.method).uri(uri);

    if !has_header(&req.headers, "host")
        && let Some(host) = host_header_value(&parsed)
    {
        builder = builder.header(http::header::HOST, host);
    }
    if !req.body.is_empty() && !has_header(&req.headers, "content-length") {
        builder = builder.header(http::header::CONTENT_LENGTH, req.body.len());
    }

    for (k, v) in req.headers {
        let name = http::header::HeaderName::from_bytes(k.as_bytes())?;
        let value = http::header::HeaderValue::from_str(&v)?;
        builder = builder.header(name, value);
    }

    Ok(builder.body(Full::new(req.body))?)
}

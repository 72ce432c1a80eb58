use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a call never produced a complete response.
///
/// Never returned by [`crate::HttpClient::execute`]; it is folded into the status-0
/// result and only its [`HttpTransportErrorKind`] survives.
#[derive(Debug, thiserror::Error, strum::EnumDiscriminants)]
#[strum_discriminants(name(HttpTransportErrorKind))]
#[strum_discriminants(derive(Hash, strum::Display, strum::EnumString))]
#[strum_discriminants(strum(serialize_all = "snake_case"))]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("only http:// and https:// URLs are supported: {0}")]
    UnsupportedScheme(String),

    #[error("invalid request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("invalid header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("invalid header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    /// DNS, TCP, TLS, or connect timeout.
    #[error("connect failed: {0}")]
    Connect(#[source] hyper_util::client::legacy::Error),

    #[error("request failed: {0}")]
    Request(#[source] hyper_util::client::legacy::Error),

    #[error("no complete response within {0:?}")]
    Timeout(Duration),

    #[error("response body read failed: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl From<hyper_util::client::legacy::Error> for Error {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        if err.is_connect() {
            Self::Connect(err)
        } else {
            Self::Request(err)
        }
    }
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> HttpTransportErrorKind {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr as _;

    #[test]
    fn kind_follows_variant() {
        let err = Error::Timeout(Duration::from_secs(1));
        assert_eq!(err.kind(), HttpTransportErrorKind::Timeout);
        assert_eq!(
            Error::UnsupportedScheme("ftp://x".to_string()).kind(),
            HttpTransportErrorKind::UnsupportedScheme
        );
    }

    #[test]
    fn kind_renders_snake_case() {
        assert_eq!(HttpTransportErrorKind::BodyRead.to_string(), "body_read");
        assert_eq!(
            HttpTransportErrorKind::from_str("invalid_url").ok(),
            Some(HttpTransportErrorKind::InvalidUrl)
        );
    }
}

//! Blocking HTTP exchanges on top of the async client.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};

use super::error::{QueryError, QueryErrorKind};

/// A response that arrived, successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpReply {
    /// Status code
    pub(crate) status: u16,
    /// Reason phrase belonging to the status code
    pub(crate) reason: String,
    /// Response body as text
    pub(crate) body: String,
}

impl HttpReply {
    pub(crate) fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Error describing a response with an unexpected status code.
    pub(crate) fn status_error(&self) -> QueryError {
        log::error!("HTTP response: {} {}", self.status, self.reason);
        QueryError::new(
            super::error::classify_status(self.status),
            self.reason.clone(),
        )
        .with_status(self.status)
        .with_excerpt(&self.body)
    }
}

/// A client together with the runtime that drives it.
///
/// Every call blocks the calling thread until the response body is read.
#[derive(Debug)]
pub(crate) struct HttpSession {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
}

impl HttpSession {
    /// Create a session whose requests fail after `timeout`.
    pub(crate) fn new(timeout: Duration) -> Result<Self, QueryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            format!(
                "{}/{}",
                option_env!("CARGO_PKG_NAME").unwrap_or("canopy"),
                option_env!("CARGO_PKG_VERSION").unwrap_or("unknown-version"),
            )
            .parse()
            .map_err(|err: InvalidHeaderValue| {
                QueryError::new(QueryErrorKind::FatalProtocol, err.to_string())
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| QueryError::new(QueryErrorKind::FatalProtocol, err.to_string()))?;

        Ok(Self { runtime, client })
    }

    /// Access to the client for building requests.
    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a request and wait for the full response.
    pub(crate) fn send(&self, request: reqwest::RequestBuilder) -> Result<HttpReply, QueryError> {
        self.runtime.block_on(async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;

            Ok::<_, QueryError>(HttpReply {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
                body,
            })
        })
    }
}

/// Header value for `Accept` and `Content-Type`.
pub(crate) fn header_value(value: &'static str) -> HeaderValue {
    HeaderValue::from_static(value)
}

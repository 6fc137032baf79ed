//! Classification of query failures.

use std::fmt;

use thiserror::Error;

/// Maximum number of characters of a response body kept in an error.
pub const EXCERPT_LIMIT: usize = 500;

/// Structured error codes by which a backend reports an execution timeout.
const TIMEOUT_CODES: &[&str] = &["TransactionTimedOut", "Transaction.Terminated"];

/// Phrases by which a backend reports an execution timeout in prose.
const TIMEOUT_PHRASES: &[&str] = &[
    "transaction has been terminated",
    "timed out",
    "timeout",
    "execution time limit",
    "took too long",
];

/// What went wrong with a query, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    /// Connection refused, reset, broken pipe, or a client-side timeout
    TransientNetwork,
    /// HTTP 408, 502, 503 or 504
    TransientServer,
    /// The backend aborted the query because it ran too long
    TransientBackendTimeout,
    /// Any other error reported by the backend (syntax, constraint, auth)
    FatalBackend,
    /// Empty or malformed response, or an unexpected HTTP status
    FatalProtocol,
}

impl QueryErrorKind {
    /// Whether a query that failed this way may be sent again.
    pub fn is_retryable(self) -> bool {
        match self {
            Self::TransientNetwork => true,
            Self::TransientServer => true,
            Self::TransientBackendTimeout => true,
            Self::FatalBackend => false,
            Self::FatalProtocol => false,
        }
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientNetwork => "transient network error",
            Self::TransientServer => "transient server error",
            Self::TransientBackendTimeout => "backend execution timeout",
            Self::FatalBackend => "backend error",
            Self::FatalProtocol => "protocol error",
        };
        f.write_str(name)
    }
}

/// A failed attempt to run a query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}{}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
pub struct QueryError {
    kind: QueryErrorKind,
    message: String,
    status: Option<u16>,
    excerpt: Option<String>,
}

impl QueryError {
    /// Create an error of the given kind.
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            excerpt: None,
        }
    }

    /// Attach the HTTP status code of the failed response.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a bounded excerpt of the response body.
    pub fn with_excerpt(mut self, body: &str) -> Self {
        self.excerpt = Some(excerpt(body));
        self
    }

    /// Classification of this error.
    pub fn kind(&self) -> QueryErrorKind {
        self.kind
    }

    /// Human readable description of the failure.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status code, if the failure came with a response.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Start of the response body, if any.
    pub fn body_excerpt(&self) -> Option<&str> {
        self.excerpt.as_deref()
    }

    /// Shorthand for `self.kind().is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// First [EXCERPT_LIMIT] characters of `body`.
pub fn excerpt(body: &str) -> String {
    match body.char_indices().nth(EXCERPT_LIMIT) {
        Some((index, _)) => format!("{}...", &body[..index]),
        None => body.to_string(),
    }
}

/// Classify an HTTP status code that is not a success.
pub fn classify_status(status: u16) -> QueryErrorKind {
    match status {
        408 | 502 | 503 | 504 => QueryErrorKind::TransientServer,
        _ => QueryErrorKind::FatalProtocol,
    }
}

/// Classify an error reported by the backend itself.
///
/// `code` is the structured error code if the backend supplies one.
pub fn classify_backend_error(code: Option<&str>, message: &str) -> QueryErrorKind {
    if let Some(code) = code {
        if TIMEOUT_CODES.iter().any(|known| code.contains(known)) {
            return QueryErrorKind::TransientBackendTimeout;
        }
    }

    let message = message.to_lowercase();
    if TIMEOUT_PHRASES.iter().any(|phrase| message.contains(phrase)) {
        QueryErrorKind::TransientBackendTimeout
    } else {
        QueryErrorKind::FatalBackend
    }
}

/// Classify a failure of the HTTP client library.
pub fn classify_transfer_error(error: &reqwest::Error) -> QueryErrorKind {
    if let Some(status) = error.status() {
        classify_status(status.as_u16())
    } else if error.is_connect() || error.is_timeout() || error.is_request() {
        QueryErrorKind::TransientNetwork
    } else if error.is_body() && io_source_is_transient(error) {
        QueryErrorKind::TransientNetwork
    } else {
        QueryErrorKind::FatalProtocol
    }
}

/// Whether the error chain contains a connection reset or broken pipe.
fn io_source_is_transient(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            );
        }
        source = err.source();
    }
    false
}

impl From<reqwest::Error> for QueryError {
    fn from(error: reqwest::Error) -> Self {
        let kind = classify_transfer_error(&error);
        let query_error = QueryError::new(kind, error.to_string());
        match error.status() {
            Some(status) => query_error.with_status(status.as_u16()),
            None => query_error,
        }
    }
}

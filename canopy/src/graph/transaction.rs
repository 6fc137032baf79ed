//! Transport for the transactional HTTP endpoint of the graph database.
//!
//! Request:
//! `{"statements":[{"statement":"MATCH (p:Page) RETURN p.page_id LIMIT 1"}]}`
//!
//! Response:
//! `{"results":[{"columns":["p.page_id"],"data":[{"row":[1],"meta":[null]}]}],"errors":[]}`

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    error::{classify_backend_error, QueryError, QueryErrorKind},
    http::{header_value, HttpReply, HttpSession},
    QueryTransport, ResultSet,
};

/// Database addressed when none is configured.
pub const DEFAULT_DATABASE: &str = "neo4j";

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<BackendError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    columns: Vec<String>,
    data: Option<Vec<DataRow>>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct BackendError {
    code: Option<String>,
    #[serde(default)]
    message: String,
}

/// Queries sent directly to the database's transaction API,
/// authenticated with HTTP basic authentication.
#[derive(Debug)]
pub struct TransactionEndpoint {
    commit_url: String,
    user: String,
    password: String,
    session: HttpSession,
}

impl TransactionEndpoint {
    /// Create a transport for the server at `server_url`.
    pub fn new(
        server_url: &str,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            commit_url: commit_url(server_url, DEFAULT_DATABASE),
            user: user.into(),
            password: password.into(),
            session: HttpSession::new(timeout)?,
        })
    }

    /// Address a database other than [DEFAULT_DATABASE].
    pub fn with_database(mut self, database: &str) -> Self {
        let server_url = self
            .commit_url
            .split("/db/")
            .next()
            .unwrap_or_default()
            .to_string();
        self.commit_url = commit_url(&server_url, database);
        self
    }

    /// URL the statements are posted to.
    pub fn url(&self) -> &str {
        &self.commit_url
    }
}

fn commit_url(server_url: &str, database: &str) -> String {
    format!("{}/db/{database}/tx/commit", server_url.trim_end_matches('/'))
}

impl QueryTransport for TransactionEndpoint {
    fn execute(&self, query: &str) -> Result<ResultSet, QueryError> {
        log::trace!("POST {}", self.commit_url);

        let request = self
            .session
            .client()
            .post(&self.commit_url)
            .basic_auth(&self.user, Some(&self.password))
            .header(
                reqwest::header::ACCEPT,
                header_value("application/json;charset=UTF-8"),
            )
            .header(
                reqwest::header::CONTENT_TYPE,
                header_value("application/json"),
            )
            .body(request_body(query));

        let reply = self.session.send(request)?;
        decode_reply(&reply)
    }
}

/// JSON body carrying a single statement.
pub fn request_body(query: &str) -> String {
    json!({"statements": [{"statement": query}]}).to_string()
}

/// Turn a response of the transaction API into a [ResultSet].
pub(crate) fn decode_reply(reply: &HttpReply) -> Result<ResultSet, QueryError> {
    if !reply.is_success() {
        return Err(reply.status_error());
    }
    decode_body(&reply.body).map_err(|err| err.with_status(reply.status))
}

/// Flatten the per-statement results of a successful response.
pub fn decode_body(body: &str) -> Result<ResultSet, QueryError> {
    if body.trim().is_empty() {
        return Err(QueryError::new(
            QueryErrorKind::FatalProtocol,
            "empty response body",
        ));
    }

    let response: TransactionResponse = serde_json::from_str(body).map_err(|err| {
        QueryError::new(
            QueryErrorKind::FatalProtocol,
            format!("malformed response: {err}"),
        )
        .with_excerpt(body)
    })?;

    if !response.errors.is_empty() {
        log::error!("Errors: {:?}", response.errors);
        return Err(backend_failure(&response.errors));
    }

    let Some(statement) = response.results.into_iter().next() else {
        return Err(QueryError::new(QueryErrorKind::FatalProtocol, "no results").with_excerpt(body));
    };
    let Some(data) = statement.data else {
        return Err(QueryError::new(QueryErrorKind::FatalProtocol, "no data").with_excerpt(body));
    };

    Ok(ResultSet::new(
        statement.columns,
        data.into_iter().map(|row| row.row).collect(),
    ))
}

/// A single error describing everything the backend complained about.
fn backend_failure(errors: &[BackendError]) -> QueryError {
    let kinds: Vec<QueryErrorKind> = errors
        .iter()
        .map(|err| classify_backend_error(err.code.as_deref(), &err.message))
        .collect();
    let kind = if kinds.contains(&QueryErrorKind::TransientBackendTimeout) {
        QueryErrorKind::TransientBackendTimeout
    } else {
        QueryErrorKind::FatalBackend
    };

    let message = errors
        .iter()
        .map(|err| match &err.code {
            Some(code) => format!("{code}: {}", err.message),
            None => err.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ");

    QueryError::new(kind, message)
}

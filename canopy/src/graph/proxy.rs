//! Transport for the cypher service of the publishing web application.
//!
//! The service answers in a form that is already close to a [ResultSet]:
//! `{"columns": ["columnname"], "data": [["value"]]}`.

use std::time::Duration;

use serde_json::Value;
use urlencoding::encode;

use super::{
    error::{classify_backend_error, QueryError, QueryErrorKind},
    http::{header_value, HttpReply, HttpSession},
    QueryTransport, ResultSet,
};

/// A char limit to decide if the query travels in the URL or in the body
const URL_CHAR_LIMIT: usize = 2000;

/// Path of the cypher service relative to the application's base URL.
const SERVICE_PATH: &str = "service/cypher";

/// Queries sent through the publishing application, authenticated with an API token.
#[derive(Debug)]
pub struct ProxyEndpoint {
    service_url: String,
    token: String,
    session: HttpSession,
}

impl ProxyEndpoint {
    /// Create a transport for the application at `base_url`.
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self, QueryError> {
        let mut service_url = base_url.to_string();
        if !service_url.ends_with('/') {
            service_url.push('/');
        }
        service_url.push_str(SERVICE_PATH);

        Ok(Self {
            service_url,
            token: token.into(),
            session: HttpSession::new(timeout)?,
        })
    }

    /// URL of the cypher service.
    pub fn url(&self) -> &str {
        &self.service_url
    }
}

impl QueryTransport for ProxyEndpoint {
    fn execute(&self, query: &str) -> Result<ResultSet, QueryError> {
        let (url, body) = request_target(&self.service_url, query);

        let request = match body {
            Some(body) => {
                log::trace!("POST {url} with query in body");
                self.session
                    .client()
                    .post(url)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        header_value("application/x-www-form-urlencoded"),
                    )
                    .body(body)
            }
            None => {
                log::trace!("POST {url}");
                self.session.client().post(url)
            }
        };

        let request = request
            .header(reqwest::header::AUTHORIZATION, authorization(&self.token))
            .header(reqwest::header::ACCEPT, header_value("application/json"));

        let reply = self.session.send(request)?;
        decode_reply(&reply)
    }
}

/// URL to post to, and the form body if the query is too long for the URL.
pub fn request_target(service_url: &str, query: &str) -> (String, Option<String>) {
    let encoded = encode(query);
    if service_url.len() + encoded.len() > URL_CHAR_LIMIT {
        (service_url.to_string(), Some(format!("query={encoded}")))
    } else {
        (format!("{service_url}?query={encoded}"), None)
    }
}

/// Value of the `Authorization` header for an API token.
pub fn authorization(token: &str) -> String {
    format!("JWT {token}")
}

pub(crate) fn decode_reply(reply: &HttpReply) -> Result<ResultSet, QueryError> {
    if !reply.is_success() {
        return Err(reply.status_error());
    }
    decode_body(&reply.body).map_err(|err| err.with_status(reply.status))
}

/// Interpret the body of a successful response.
pub fn decode_body(body: &str) -> Result<ResultSet, QueryError> {
    let value: Value = serde_json::from_str(body).map_err(|err| {
        QueryError::new(
            QueryErrorKind::FatalProtocol,
            format!("malformed response: {err}"),
        )
        .with_excerpt(body)
    })?;

    let Value::Object(object) = value else {
        return Err(
            QueryError::new(QueryErrorKind::FatalProtocol, "no result in response")
                .with_excerpt(body),
        );
    };

    if let Some(message) = reported_error(&object) {
        log::error!("Error reported by cypher service: {message}");
        let kind = classify_backend_error(None, &message);
        return Err(QueryError::new(kind, message));
    }

    if !(object.contains_key("columns") && object.contains_key("data")) {
        return Err(
            QueryError::new(QueryErrorKind::FatalProtocol, "no columns or data in response")
                .with_excerpt(body),
        );
    }

    serde_json::from_value(Value::Object(object)).map_err(|err| {
        QueryError::new(
            QueryErrorKind::FatalProtocol,
            format!("unexpected result shape: {err}"),
        )
        .with_excerpt(body)
    })
}

/// Error message if the service reported one in an otherwise successful response.
fn reported_error(object: &serde_json::Map<String, Value>) -> Option<String> {
    match object.get("errors").or_else(|| object.get("error"))? {
        Value::Null => None,
        Value::Array(errors) if errors.is_empty() => None,
        Value::String(message) => Some(message.clone()),
        Value::Array(errors) => Some(
            errors
                .iter()
                .map(|err| match err {
                    Value::String(message) => message.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use test_log::test;

    use super::*;

    #[test]
    fn near_canonical_body() {
        let result = decode_body(r#"{"columns":["r.resource_id"],"data":[[640],[641]]}"#).unwrap();
        assert_eq!(result.columns, vec!["r.resource_id"]);
        assert_eq!(result.rows, vec![vec![json!(640)], vec![json!(641)]]);
    }

    #[test]
    fn empty_and_null_bodies_are_fatal() {
        for body in ["", "null", "[]", r#"{"columns":["x"]}"#] {
            assert_eq!(
                decode_body(body).unwrap_err().kind(),
                QueryErrorKind::FatalProtocol,
                "{body}"
            );
        }
    }

    #[test]
    fn reported_errors() {
        let err = decode_body(r#"{"error":"Neo4j query timed out after 60s"}"#).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::TransientBackendTimeout);

        let err = decode_body(r#"{"errors":["Unknown function 'toInt'"]}"#).unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::FatalBackend);
    }

    #[test]
    fn gateway_timeout() {
        let reply = HttpReply {
            status: 504,
            reason: "Gateway Timeout".into(),
            body: "<html>gateway</html>".into(),
        };
        assert_eq!(
            decode_reply(&reply).unwrap_err().kind(),
            QueryErrorKind::TransientServer
        );
    }

    #[test]
    fn short_queries_travel_in_the_url() {
        let (url, body) = request_target(
            "https://eol.example.org/service/cypher",
            "MATCH (p:Page) RETURN p LIMIT 1",
        );
        assert_eq!(
            url,
            "https://eol.example.org/service/cypher?query=MATCH%20%28p%3APage%29%20RETURN%20p%20LIMIT%201"
        );
        assert_eq!(body, None);
    }

    #[test]
    fn long_queries_travel_in_the_body() {
        let service_url = "https://eol.example.org/service/cypher";
        let query = format!("RETURN '{}'", "x".repeat(URL_CHAR_LIMIT));
        let (url, body) = request_target(service_url, &query);
        assert_eq!(url, service_url);
        assert_eq!(body, Some(format!("query={}", encode(&query))));

        // Right at the limit the URL is still used
        let fits = "y".repeat(URL_CHAR_LIMIT - service_url.len());
        assert_eq!(request_target(service_url, &fits).1, None);
        let too_long = "y".repeat(URL_CHAR_LIMIT - service_url.len() + 1);
        assert!(request_target(service_url, &too_long).1.is_some());
    }

    #[test]
    fn token_header() {
        assert_eq!(authorization("abc123"), "JWT abc123");
    }

    #[test]
    fn service_url() {
        let endpoint =
            ProxyEndpoint::new("https://eol.example.org", "token", Duration::from_secs(1)).unwrap();
        assert_eq!(endpoint.url(), "https://eol.example.org/service/cypher");
    }
}

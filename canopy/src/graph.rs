//! Access to the remote graph database.
//!
//! A [QueryTransport] sends one query to one kind of endpoint and turns the
//! answer into a [ResultSet]. The [QueryClient] adds the retry policy on top.

pub mod client;
pub mod error;
pub(crate) mod http;
pub mod proxy;
pub mod transaction;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use client::{QueryClient, QueryPolicy};
pub use error::{QueryError, QueryErrorKind};
pub use proxy::ProxyEndpoint;
pub use transaction::TransactionEndpoint;

/// Canonical answer to a query: named columns and rows of values.
///
/// Values are JSON scalars, or maps for graph entities
/// (node properties together with the internal id).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Column names in the order of the `RETURN` clause
    pub columns: Vec<String>,
    /// One entry per result row
    #[serde(rename = "data")]
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Create a result set from columns and rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value in the first column of the first row, if any.
    pub fn first_value(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// First value interpreted as a count; used for `RETURN COUNT(..)` queries.
    pub fn first_count(&self) -> Option<u64> {
        match self.first_value()? {
            Value::Number(number) => number.as_u64(),
            Value::String(string) => string.parse().ok(),
            _ => None,
        }
    }
}

/// Render a single value as a CSV field.
///
/// Strings are written without quotes, `null` as an empty field,
/// and nested structures as compact JSON.
pub fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(string) => string.clone(),
        Value::Bool(boolean) => boolean.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Something that can execute a query once.
///
/// Implementations talk to one particular kind of endpoint and are
/// responsible for normalizing its answers into a [ResultSet].
/// They do not retry.
pub trait QueryTransport: std::fmt::Debug {
    /// Execute `query` and return its results.
    fn execute(&self, query: &str) -> Result<ResultSet, QueryError>;
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use test_log::test;

    use super::*;

    #[test]
    fn field_rendering() {
        assert_eq!(field_text(&json!(null)), "");
        assert_eq!(field_text(&json!("Panthera leo")), "Panthera leo");
        assert_eq!(field_text(&json!(46559197)), "46559197");
        assert_eq!(field_text(&json!(true)), "true");
        assert_eq!(
            field_text(&json!({"data": {"page_id": 1}, "metadata": {"id": 7}})),
            r#"{"data":{"page_id":1},"metadata":{"id":7}}"#
        );
    }

    #[test]
    fn counts() {
        let result = ResultSet::new(vec!["COUNT(*)".into()], vec![vec![json!(42)]]);
        assert_eq!(result.first_count(), Some(42));
        assert_eq!(ResultSet::default().first_count(), None);
    }
}

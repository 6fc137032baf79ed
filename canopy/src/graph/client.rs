//! The retrying query client.

use std::{fmt, time::Duration};

use serde::Deserialize;

use super::{error::QueryError, QueryTransport, ResultSet};

/// How hard to try, and how gently to treat the shared server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueryPolicy {
    /// Number of attempts before giving up
    pub max_tries: u32,
    /// Pause between two attempts
    #[serde(with = "seconds")]
    pub retry_interval: Duration,
    /// Result sets with more rows than this are followed by [QueryPolicy::cooldown]
    pub cooldown_threshold: usize,
    /// Pause after a large result set
    #[serde(with = "seconds")]
    pub cooldown: Duration,
    /// Limit for connecting to and reading from the server
    #[serde(with = "seconds")]
    pub timeout: Duration,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            retry_interval: Duration::from_secs(15),
            cooldown_threshold: 100,
            cooldown: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Durations in configuration files are given in (fractional) seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

/// Runs queries through a [QueryTransport], retrying transient failures.
pub struct QueryClient {
    transport: Box<dyn QueryTransport>,
    policy: QueryPolicy,
    pause: Box<dyn Fn(Duration)>,
}

impl QueryClient {
    /// Create a client with the given policy.
    pub fn new(transport: Box<dyn QueryTransport>, policy: QueryPolicy) -> Self {
        Self {
            transport,
            policy,
            pause: Box::new(std::thread::sleep),
        }
    }

    /// Replace the function used for sleeping between attempts and after large results.
    pub fn with_pause(mut self, pause: impl Fn(Duration) + 'static) -> Self {
        self.pause = Box::new(pause);
        self
    }

    /// The policy in effect.
    pub fn policy(&self) -> &QueryPolicy {
        &self.policy
    }

    /// Run `query` with the tries and interval of the client's policy.
    pub fn run_query(&self, query: &str) -> Result<ResultSet, QueryError> {
        self.run_query_with(query, self.policy.max_tries, self.policy.retry_interval)
    }

    /// Run `query`, making at most `max_tries` attempts that are
    /// `retry_interval` apart.
    ///
    /// Fatal errors are returned immediately. When all attempts fail
    /// transiently, the error of the last attempt is returned.
    pub fn run_query_with(
        &self,
        query: &str,
        max_tries: u32,
        retry_interval: Duration,
    ) -> Result<ResultSet, QueryError> {
        let mut remaining = max_tries.max(1);

        loop {
            log::trace!("Running query: {query}");
            match self.transport.execute(query) {
                Ok(result) => {
                    if result.len() > self.policy.cooldown_threshold {
                        // Throttle load on server
                        (self.pause)(self.policy.cooldown);
                    }
                    return Ok(result);
                }
                Err(err) if err.is_retryable() && remaining > 1 => {
                    remaining -= 1;
                    log::warn!(
                        "{err}; {remaining} tries left, retrying in {}s",
                        retry_interval.as_secs_f64()
                    );
                    (self.pause)(retry_interval);
                }
                Err(err) => {
                    log::error!("Query failed: {err}");
                    if let Some(body) = err.body_excerpt() {
                        log::error!("Response body: {body}");
                    }
                    log::error!("Query was: {query}");
                    return Err(err);
                }
            }
        }
    }
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("transport", &self.transport)
            .field("policy", &self.policy)
            .field("pause", &"<unspecified Fn(Duration)>")
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};

    use serde_json::json;
    use test_log::test;

    use super::*;
    use crate::graph::error::QueryErrorKind;

    #[derive(Debug, Default)]
    struct Replay {
        answers: RefCell<VecDeque<Result<ResultSet, QueryError>>>,
        calls: Rc<RefCell<usize>>,
    }

    impl QueryTransport for Replay {
        fn execute(&self, _query: &str) -> Result<ResultSet, QueryError> {
            *self.calls.borrow_mut() += 1;
            self.answers
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(QueryError::new(QueryErrorKind::TransientServer, "busy")))
        }
    }

    fn client(
        answers: Vec<Result<ResultSet, QueryError>>,
    ) -> (QueryClient, Rc<RefCell<usize>>, Rc<RefCell<Vec<Duration>>>) {
        let calls = Rc::new(RefCell::new(0));
        let pauses = Rc::new(RefCell::new(Vec::new()));
        let transport = Replay {
            answers: RefCell::new(answers.into()),
            calls: calls.clone(),
        };
        let recorded = pauses.clone();
        let client = QueryClient::new(Box::new(transport), QueryPolicy::default())
            .with_pause(move |duration| recorded.borrow_mut().push(duration));
        (client, calls, pauses)
    }

    fn rows(count: usize) -> ResultSet {
        ResultSet::new(vec!["n".into()], (0..count).map(|i| vec![json!(i)]).collect())
    }

    #[test]
    fn retry_budget_is_exhausted() {
        let (client, calls, pauses) = client(vec![]);
        let err = client
            .run_query_with("MATCH (n) RETURN n LIMIT 1", 3, Duration::from_secs(7))
            .unwrap_err();

        assert_eq!(*calls.borrow(), 3);
        assert_eq!(*pauses.borrow(), vec![Duration::from_secs(7); 2]);
        assert_eq!(err.kind(), QueryErrorKind::TransientServer);
    }

    #[test]
    fn recovers_after_transient_failure() {
        let (client, calls, _) = client(vec![
            Err(QueryError::new(QueryErrorKind::TransientNetwork, "connection reset")),
            Err(QueryError::new(QueryErrorKind::TransientBackendTimeout, "terminated")),
            Ok(rows(2)),
        ]);
        let result = client.run_query("MATCH (n) RETURN n LIMIT 2").unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(*calls.borrow(), 3);
    }

    #[test]
    fn fatal_errors_are_not_retried() {
        let (client, calls, pauses) = client(vec![Err(QueryError::new(
            QueryErrorKind::FatalBackend,
            "SyntaxError",
        ))]);
        let err = client.run_query("MATCH (n RETURN n").unwrap_err();
        assert_eq!(err.kind(), QueryErrorKind::FatalBackend);
        assert_eq!(*calls.borrow(), 1);
        assert!(pauses.borrow().is_empty());
    }

    #[test]
    fn cooldown_after_large_results() {
        let (client, _, pauses) = client(vec![Ok(rows(100)), Ok(rows(101))]);
        client.run_query("q").unwrap();
        assert!(pauses.borrow().is_empty());
        client.run_query("q").unwrap();
        assert_eq!(*pauses.borrow(), vec![Duration::from_secs(1)]);
    }

    #[test]
    fn policy_from_toml() {
        let policy: QueryPolicy = toml::from_str("max_tries = 5\nretry_interval = 2.5").unwrap();
        assert_eq!(policy.max_tries, 5);
        assert_eq!(policy.retry_interval, Duration::from_millis(2500));
        assert_eq!(policy.cooldown_threshold, 100);
    }
}

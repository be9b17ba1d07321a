use std::sync::Arc;

/// Categorization of a [`QueryError`], per the spec's error taxonomy.
/// `Timeout` and `NetworkError` statuses are specializations UI code may
/// treat as a plain `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Network,
    Timeout,
    Parsing,
    Server,
    Configuration,
    Unknown,
}

/// The error surfaced through a [`Query`](crate::Query)'s `error` signal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct QueryError {
    pub message: String,
    pub kind: QueryErrorKind,
    #[source]
    pub cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        QueryError {
            message: message.into(),
            kind,
            cause: None,
        }
    }

    pub fn with_cause(
        kind: QueryErrorKind,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        QueryError {
            message: message.into(),
            kind,
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn timeout() -> Self {
        QueryError::new(QueryErrorKind::Timeout, "request timed out")
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        QueryError::new(QueryErrorKind::Configuration, message)
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        QueryError::new(QueryErrorKind::Parsing, message)
    }

    /// Classification heuristic for errors that did not originate as a
    /// [`QueryError`] already: substrings of the raw error text decide
    /// between `network`/`timeout`/`unknown`.
    pub fn classify(raw: &str) -> QueryErrorKind {
        let lower = raw.to_lowercase();
        if lower.contains("timeout") || lower.contains("timeoutexception") {
            QueryErrorKind::Timeout
        } else if lower.contains("network") || lower.contains("socket") || lower.contains("connection") {
            QueryErrorKind::Network
        } else {
            QueryErrorKind::Unknown
        }
    }

    pub fn from_display(raw: impl std::fmt::Display) -> Self {
        let message = raw.to_string();
        let kind = QueryError::classify(&message);
        QueryError::new(kind, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_timeout_text() {
        assert_eq!(QueryError::classify("Request TimeoutException"), QueryErrorKind::Timeout);
    }

    #[test]
    fn classifies_network_text() {
        assert_eq!(QueryError::classify("socket hang up"), QueryErrorKind::Network);
    }

    #[test]
    fn unrecognized_text_is_unknown() {
        assert_eq!(QueryError::classify("division by zero"), QueryErrorKind::Unknown);
    }
}

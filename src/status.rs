/// Coarse lifecycle status of a [`Query`](crate::Query) or
/// [`InfiniteQuery`](crate::InfiniteQuery). `Timeout` and `NetworkError` are
/// specializations of `Error` for categorization; UI code is free to treat
/// either as plain `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
    Timeout,
    NetworkError,
}

impl QueryStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryStatus::Loading)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, QueryStatus::Success)
    }

    /// True for `Error`, and its `Timeout`/`NetworkError` specializations.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            QueryStatus::Error | QueryStatus::Timeout | QueryStatus::NetworkError
        )
    }

    pub(crate) fn from_error_kind(kind: crate::error::QueryErrorKind) -> Self {
        use crate::error::QueryErrorKind::*;
        match kind {
            Timeout => QueryStatus::Timeout,
            Network => QueryStatus::NetworkError,
            Parsing | Server | Configuration | Unknown => QueryStatus::Error,
        }
    }
}

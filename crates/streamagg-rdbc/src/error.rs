//! Reference store errors
//!
//! A lookup can fail before the row arrives (the store was unreachable, the
//! statement was rejected, a deadline passed) or after it (a column did not
//! hold what the reader expected). [`ErrorCategory::is_transport`] separates
//! the two.

use std::fmt;
use thiserror::Error;

type BoxedCause = Box<dyn std::error::Error + Send + Sync>;

/// Result alias used throughout this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Store unreachable or session dropped
    Connection,
    /// Statement rejected or failed on the server
    Query,
    /// Column value of an unexpected type
    TypeConversion,
    /// Deadline passed
    Timeout,
    /// Bad URL or pool settings
    Configuration,
    /// No pooled session available
    PoolExhausted,
}

impl ErrorCategory {
    /// Trying again later may succeed.
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout | Self::PoolExhausted)
    }

    /// The failure happened on the way to or from the store.
    #[inline]
    pub const fn is_transport(self) -> bool {
        match self {
            Self::Connection | Self::Query | Self::Timeout | Self::PoolExhausted => true,
            Self::TypeConversion | Self::Configuration => false,
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::TypeConversion => "type_conversion",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::PoolExhausted => "pool_exhausted",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure talking to, or reading from, a reference store
#[derive(Error, Debug)]
pub enum Error {
    /// Could not open or keep a session
    #[error("connection error: {detail}")]
    Connection {
        /// What went wrong
        detail: String,
        /// Driver error, when there is one
        #[source]
        cause: Option<BoxedCause>,
    },

    /// The server did not run the statement
    #[error("query error: {detail}")]
    Query {
        /// What went wrong
        detail: String,
        /// Statement text, when known
        sql: Option<String>,
        /// Driver error, when there is one
        #[source]
        cause: Option<BoxedCause>,
    },

    /// A column could not be read as the requested type
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// A deadline passed
    #[error("timeout: {0}")]
    Timeout(String),

    /// Settings rejected before any I/O
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The pool had nothing to lend
    #[error("pool exhausted: {0}")]
    PoolExhausted(String),
}

impl Error {
    /// Classification used for retry and transport checks
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::TypeConversion(_) => ErrorCategory::TypeConversion,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::PoolExhausted(_) => ErrorCategory::PoolExhausted,
        }
    }

    /// See [`ErrorCategory::is_retriable`]
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Session failure without a driver cause
    pub fn connection(detail: impl Into<String>) -> Self {
        Self::Connection {
            detail: detail.into(),
            cause: None,
        }
    }

    /// Session failure wrapping the driver error
    pub fn connection_with_source(
        detail: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            detail: detail.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Statement failure without a driver cause
    pub fn query(detail: impl Into<String>) -> Self {
        Self::Query {
            detail: detail.into(),
            sql: None,
            cause: None,
        }
    }

    /// Statement failure; the detail is taken from `cause`.
    pub fn query_with_source(
        sql: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            detail: cause.to_string(),
            sql: Some(sql.into()),
            cause: Some(Box::new(cause)),
        }
    }

    #[allow(missing_docs)]
    pub fn timeout(detail: impl Into<String>) -> Self {
        Self::Timeout(detail.into())
    }

    #[allow(missing_docs)]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }

    #[allow(missing_docs)]
    pub fn type_conversion(detail: impl Into<String>) -> Self {
        Self::TypeConversion(detail.into())
    }

    #[allow(missing_docs)]
    pub fn pool_exhausted(detail: impl Into<String>) -> Self {
        Self::PoolExhausted(detail.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_categories() {
        let retriable = [
            ErrorCategory::Connection,
            ErrorCategory::Timeout,
            ErrorCategory::PoolExhausted,
        ];
        for category in retriable {
            assert!(category.is_retriable(), "{category}");
        }
        for category in [
            ErrorCategory::Query,
            ErrorCategory::TypeConversion,
            ErrorCategory::Configuration,
        ] {
            assert!(!category.is_retriable(), "{category}");
        }
    }

    #[test]
    fn test_rejected_query_is_transport_but_bad_column_is_not() {
        assert!(Error::query("syntax").category().is_transport());
        assert!(Error::timeout("5s").category().is_transport());
        assert!(!Error::type_conversion("weight").category().is_transport());
        assert!(!Error::config("url").category().is_transport());
    }

    #[test]
    fn test_messages_carry_detail() {
        let err = Error::connection("refused by 10.0.0.7:3306");
        assert_eq!(err.to_string(), "connection error: refused by 10.0.0.7:3306");

        let err = Error::type_conversion("column id is not an integer");
        assert_eq!(err.category(), ErrorCategory::TypeConversion);
        assert!(err.to_string().starts_with("type conversion error"));
    }

    #[test]
    fn test_query_with_source_keeps_statement_and_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        match Error::query_with_source("SELECT name FROM products WHERE id = ?", io) {
            Error::Query { detail, sql, cause } => {
                assert_eq!(detail, "pipe closed");
                assert!(sql.unwrap().starts_with("SELECT name"));
                assert!(cause.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

//! Error types for hydra

use thiserror::Error;

/// Result type alias for hydra operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Unified error type for all hydra operations
#[derive(Error, Debug, Clone)]
pub enum BrokerError {
    /// Missing or contradictory configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// Admission rejection from the query validator; no database round-trip
    /// has happened when this is returned
    #[error("{0}")]
    Validation(String),

    /// Driver-reported execution failure, original message preserved
    #[error("{0}")]
    Query(String),

    /// The executor's timer won the race against the statement
    #[error("Query timeout after {0}ms")]
    Timeout(u64),

    /// Call arrived after `disconnect` started
    #[error("adapter is shutting down")]
    Shutdown,

    /// Unknown pool name, resource URI, or tool name
    #[error("{0}")]
    NotFound(String),

    /// Database type the factory does not know how to build
    #[error("Unsupported database type: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Transient driver error that may succeed on retry
    #[error("Transient error: {0}")]
    Transient(String),
}

impl BrokerError {
    /// Returns true if this error is potentially retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Timeout(_) | BrokerError::Transient(_)
        )
    }

    /// Returns true if the error originated before any database round-trip
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            BrokerError::Validation(_) | BrokerError::NotFound(_) | BrokerError::Unsupported(_)
        )
    }

    /// Error text patterns that suggest a probing or malformed query.
    ///
    /// Used by the executor's security telemetry to flag failed statements
    /// whose error shape matches common enumeration attempts.
    pub fn looks_suspicious(message: &str) -> bool {
        let lower = message.to_lowercase();
        lower.contains("access denied")
            || lower.contains("permission denied")
            || lower.contains("doesn't exist")
            || lower.contains("does not exist")
            || lower.contains("syntax error")
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

// SQLSTATE-based classification (when the sqlx-errors feature is enabled)
#[cfg(feature = "sqlx-errors")]
impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error;
        match &err {
            Error::Configuration(_) => BrokerError::Connection(err.to_string()),
            Error::PoolTimedOut => BrokerError::Connection(err.to_string()),
            Error::PoolClosed => BrokerError::Shutdown,
            Error::Io(_) => BrokerError::Connection(err.to_string()),
            Error::Tls(_) => BrokerError::Connection(err.to_string()),
            Error::Database(db_err) => {
                // See: https://www.postgresql.org/docs/current/errcodes-appendix.html
                // MySQL surfaces ANSI SQLSTATE codes through the same accessor.
                if let Some(code) = db_err.code() {
                    let code_str: &str = &code;
                    match code_str {
                        // Serialization failure / deadlock, may succeed on retry
                        code if code.starts_with("40") => {
                            return BrokerError::Transient(err.to_string())
                        }
                        // Connection exceptions (class 08)
                        code if code.starts_with("08") => {
                            return BrokerError::Connection(err.to_string())
                        }
                        // Operator intervention / admin shutdown (class 57)
                        code if code.starts_with("57") => {
                            return BrokerError::Connection(err.to_string())
                        }
                        _ => {}
                    }
                }
                BrokerError::Query(err.to_string())
            }
            _ => BrokerError::Query(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_format() {
        let err = BrokerError::Timeout(100);
        assert_eq!(err.to_string(), "Query timeout after 100ms");
    }

    #[test]
    fn test_shutdown_message() {
        assert_eq!(BrokerError::Shutdown.to_string(), "adapter is shutting down");
    }

    #[test]
    fn test_unsupported_message() {
        let err = BrokerError::Unsupported("oracle".to_string());
        assert_eq!(err.to_string(), "Unsupported database type: oracle");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(BrokerError::Timeout(50).is_retryable());
        assert!(BrokerError::Transient("deadlock".into()).is_retryable());
        assert!(!BrokerError::Validation("bad".into()).is_retryable());
        assert!(!BrokerError::Shutdown.is_retryable());
    }

    #[test]
    fn test_admission_classification() {
        assert!(BrokerError::Validation("rejected".into()).is_admission_error());
        assert!(BrokerError::NotFound("pool".into()).is_admission_error());
        assert!(!BrokerError::Query("boom".into()).is_admission_error());
    }

    #[test]
    fn test_suspicious_error_text() {
        assert!(BrokerError::looks_suspicious("Access denied for user 'x'"));
        assert!(BrokerError::looks_suspicious("table 'db.users' doesn't exist"));
        assert!(BrokerError::looks_suspicious("syntax error at or near SELECT"));
        assert!(BrokerError::looks_suspicious("relation \"users\" does not exist"));
        assert!(!BrokerError::looks_suspicious("duplicate key value"));
    }
}

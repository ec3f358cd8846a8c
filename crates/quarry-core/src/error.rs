use thiserror::Error;

/// Errors produced by database adapters and surfaced through the dispatcher.
///
/// Display strings carry the full user-facing message; adapters build them at
/// the failure site with an engine-specific prefix where the engine matters
/// (for example "PostgreSQL query error: ..."). The variant carries the retry
/// classification: only `Transient` is eligible for retry, and only under the
/// conditions of the pooled backend's retry wrapper.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Connection establishment failed (network, auth, DNS). Raised during
    /// acquisition, never retried.
    #[error("{0}")]
    Connection(String),

    /// A connection-class fault observed after a connection had been acquired
    /// for the attempt.
    #[error("{0}")]
    Transient(String),

    /// Waiting for another caller's in-flight connection attempt exceeded the
    /// ceiling.
    #[error("Timeout waiting for database connection")]
    ConnectTimeout,

    /// The backend rejected the statement.
    #[error("{0}")]
    Query(String),

    /// Wrong statement class, missing argument, or a malformed value.
    #[error("{0}")]
    Validation(String),

    /// The named table is not present in the schema.
    #[error("Table '{0}' does not exist")]
    TableNotFound(String),

    /// The factory was asked for a backend tag it does not know.
    #[error("Unsupported database type: {0}")]
    UnsupportedBackend(String),
}

impl AdapterError {
    /// True for faults that the pooled backend's retry wrapper may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_the_user_facing_message() {
        let e = AdapterError::Query("SQL Server query error: deadlock".into());
        assert_eq!(e.to_string(), "SQL Server query error: deadlock");

        let e = AdapterError::TableNotFound("users".into());
        assert_eq!(e.to_string(), "Table 'users' does not exist");

        let e = AdapterError::UnsupportedBackend("oracle".into());
        assert_eq!(e.to_string(), "Unsupported database type: oracle");
    }

    #[test]
    fn only_transient_is_retriable() {
        assert!(AdapterError::Transient("connection reset".into()).is_transient());
        assert!(!AdapterError::Connection("refused".into()).is_transient());
        assert!(!AdapterError::Query("syntax error".into()).is_transient());
        assert!(!AdapterError::ConnectTimeout.is_transient());
    }
}

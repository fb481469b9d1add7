use thiserror::Error;

/// Main error type for kycgraph
#[derive(Error, Debug)]
pub enum KycError {
    /// The requested LEI is absent from the graph
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Ownership threshold outside 0..=100 (or NaN)
    #[error("Invalid ownership threshold: {0} (expected a percentage between 0 and 100)")]
    InvalidThreshold(f64),

    /// Transient connectivity or timeout failure in the graph store
    #[error("Graph store unavailable: {0}")]
    GraphUnavailable(String),

    /// Structural anomaly in stored data (duplicate active edge, malformed value)
    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// JSON encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// MCP protocol errors
    #[error("MCP protocol error: {0}")]
    McpProtocol(String),
}

impl KycError {
    /// Whether retrying the failed query may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            KycError::GraphUnavailable(_) => true,
            KycError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Errors caused by the caller's request rather than the engine or the store.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            KycError::EntityNotFound(_) | KycError::InvalidThreshold(_) | KycError::InvalidInput(_)
        )
    }
}

/// Convenient Result type using KycError
pub type Result<T> = std::result::Result<T, KycError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KycError::Config("Test error".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("Test error"));

        let err = KycError::InvalidThreshold(-5.0);
        assert!(err.to_string().contains("-5"));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let kyc_err: KycError = rusqlite_err.into();
        assert!(matches!(kyc_err, KycError::Database(_)));
        assert!(!kyc_err.is_transient());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let kyc_err: KycError = io_err.into();
        assert!(matches!(kyc_err, KycError::Io(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(KycError::GraphUnavailable("timeout".into()).is_transient());
        assert!(!KycError::EntityNotFound("X".into()).is_transient());
        assert!(!KycError::InvalidThreshold(120.0).is_transient());

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(KycError::Database(busy).is_transient());
    }

    #[test]
    fn test_caller_errors() {
        assert!(KycError::EntityNotFound("X".into()).is_caller_error());
        assert!(KycError::InvalidInput("empty".into()).is_caller_error());
        assert!(!KycError::GraphUnavailable("down".into()).is_caller_error());
    }
}

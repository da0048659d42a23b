//! Error types for the diff library.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 2;
/// Exit code for connection and pool errors.
pub const EXIT_CONNECTION_ERROR: u8 = 3;
/// Exit code for database errors raised during setup.
pub const EXIT_DATABASE_ERROR: u8 = 4;
/// Exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for an interrupted run.
pub const EXIT_CANCELLED: u8 = 130;

/// Kind of catalog object a [`DiffError::Missing`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Schema,
    Table,
    Sequence,
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectKind::Schema => write!(f, "schema"),
            ObjectKind::Table => write!(f, "table"),
            ObjectKind::Sequence => write!(f, "sequence"),
        }
    }
}

/// Main error type for diff operations.
///
/// Comparators never return these to the session: every failure while
/// evaluating a table or sequence is folded into a verdict. Errors only escape
/// from the setup phase (configuration, connecting, catalog snapshot).
#[derive(Error, Debug)]
pub enum DiffError {
    /// Configuration error (invalid YAML, bad URL, conflicting modes, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A schema, table or sequence does not exist on one source
    #[error("{kind} {name} does not exist")]
    Missing { kind: ObjectKind, name: String },

    /// Query failed for a reason other than a missing relation
    #[error("Query failed: {0}")]
    Query(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, timeout, etc.)
    #[error("Diff cancelled")]
    Cancelled,
}

impl DiffError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        DiffError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Missing error
    pub fn missing(kind: ObjectKind, name: impl Into<String>) -> Self {
        DiffError::Missing {
            kind,
            name: name.into(),
        }
    }

    /// True when the error reports a relation absent on the queried source.
    pub fn is_missing(&self) -> bool {
        matches!(self, DiffError::Missing { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            DiffError::Config(_) | DiffError::Yaml(_) | DiffError::Missing { .. } => {
                EXIT_CONFIG_ERROR
            }
            DiffError::Pool { .. } => EXIT_CONNECTION_ERROR,
            DiffError::Database(_) | DiffError::Query(_) => EXIT_DATABASE_ERROR,
            DiffError::Io(_) | DiffError::Json(_) => EXIT_IO_ERROR,
            DiffError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for diff operations.
pub type Result<T> = std::result::Result<T, DiffError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_display() {
        let err = DiffError::missing(ObjectKind::Table, "public.users");
        assert!(err.is_missing());
        assert_eq!(err.to_string(), "table public.users does not exist");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(DiffError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            DiffError::pool("refused", "connecting").exit_code(),
            EXIT_CONNECTION_ERROR
        );
        assert_eq!(DiffError::Query("x".into()).exit_code(), EXIT_DATABASE_ERROR);
        assert_eq!(DiffError::Cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "config.yaml");
        let err = DiffError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error"));
        assert!(detailed.contains("config.yaml"));
    }
}

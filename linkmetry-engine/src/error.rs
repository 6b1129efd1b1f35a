//! Error types for linkmetry-engine

use thiserror::Error;

use crate::experiment::ExperimentStatus;

/// Error type for analytics engine operations
#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// Configuration rejected at creation time (bad traffic split, missing control, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Statistical parameter outside its domain
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Experiment does not accept traffic in its current state
    #[error("Experiment {experiment_id} is not running (status: {status})")]
    NotRunning {
        experiment_id: uuid::Uuid,
        status: ExperimentStatus,
    },

    /// Unknown identifier
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Attribution model name outside the supported set
    #[error("Unknown attribution model: {0}")]
    UnknownModel(String),

    /// Conversion recorded for a session that was never bucketed
    #[error("Session {session_id} has no assignment in experiment {experiment_id}")]
    MissingAssignment {
        experiment_id: uuid::Uuid,
        session_id: String,
    },

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration file could not be read or written
    #[error("Config error: {0}")]
    Config(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalyticsError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Result type alias for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnalyticsError::Database("connection failed".into());
        assert!(err.to_string().contains("connection failed"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AnalyticsError = io_err.into();
        assert!(matches!(err, AnalyticsError::Io(_)));
    }

    #[test]
    fn test_not_found_names_kind_and_id() {
        let err = AnalyticsError::not_found("Conversion", "conv-42");
        assert_eq!(err.to_string(), "Conversion not found: conv-42");
    }

    #[test]
    fn test_not_running_includes_status() {
        let err = AnalyticsError::NotRunning {
            experiment_id: uuid::Uuid::nil(),
            status: ExperimentStatus::Completed,
        };
        assert!(err.to_string().contains("completed"));
    }
}

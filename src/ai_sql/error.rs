//! Error types for the question pipeline

use crate::database::DataSourceError;
use serde::Serialize;
use thiserror::Error;

/// Result type for pipeline operations
pub type AiResult<T> = Result<T, AiError>;

/// Category reported to callers for a failed turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuestion,
    GenerationError,
    NoSelectFound,
    EmptyQuery,
    RejectedStatement,
    UnknownRelation,
    UnknownColumn,
    SyntaxError,
    PermissionDenied,
    ReadOnlyViolation,
    Timeout,
    ExecutionError,
    Cancelled,
}

/// Failures of the completion call
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error: {status_code} - {message}")]
    Api { status_code: u16, message: String },

    #[error("Failed to parse provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider returned no text")]
    EmptyResponse,

    #[error("Timeout error: completion took longer than {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Raw model text that cannot be reduced to a SELECT statement
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("No SELECT statement found in the generated text")]
    NoSelectFound,

    #[error("The generated text contains no query")]
    EmptyQuery,
}

impl SanitizeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SanitizeError::NoSelectFound => ErrorKind::NoSelectFound,
            SanitizeError::EmptyQuery => ErrorKind::EmptyQuery,
        }
    }
}

/// Failures of statement execution
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("Statement rejected: {reason}")]
    Rejected { reason: String },

    /// The database's own error, message unchanged
    #[error(transparent)]
    Execution(#[from] DataSourceError),

    #[error("Query timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

/// Chart construction failures. Logged and absorbed by the presenter.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("Row {row} has a value that cannot be charted")]
    NonFiniteValue { row: usize },

    #[error("Chart serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors that can end a turn
#[derive(Error, Debug)]
pub enum AiError {
    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Sanitize(#[from] SanitizeError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AiError::InvalidQuestion(_) => ErrorKind::InvalidQuestion,
            AiError::Generation(_) => ErrorKind::GenerationError,
            AiError::Sanitize(e) => e.kind(),
            AiError::Execute(ExecuteError::Rejected { .. }) => ErrorKind::RejectedStatement,
            AiError::Execute(ExecuteError::Timeout { .. }) => ErrorKind::Timeout,
            AiError::Execute(ExecuteError::Execution(_)) => ErrorKind::ExecutionError,
            AiError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            AiError::Generation(GenerationError::Configuration(msg)) => {
                format!(
                    "Configuration issue: {}. Check your config file or environment variables.",
                    msg
                )
            }
            AiError::Generation(GenerationError::Network(msg)) => {
                format!("Network error: {}. Check your internet connection.", msg)
            }
            AiError::Generation(GenerationError::Timeout { timeout_secs }) => {
                format!(
                    "Request timed out after {} seconds. Try again or increase [completion].timeout_seconds.",
                    timeout_secs
                )
            }
            AiError::Cancelled => "Operation cancelled by user".to_string(),
            _ => self.to_string(),
        }
    }
}

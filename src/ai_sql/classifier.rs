//! Classification of execution failures into actionable messages

use crate::ai_sql::error::{ErrorKind, ExecuteError};
use crate::database::{DataSource, DataSourceError};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

static MISSING_RELATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"relation "([^"]+)" does not exist"#).expect("valid relation pattern")
});

/// Structured, user-facing description of a failed execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    /// Candidate table names, when the failure was an unknown relation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<Vec<String>>,
}

/// Kind of a database error. The SQLSTATE code decides when the driver supplied one;
/// codeless text falls back to message patterns.
pub fn classify_database_error(error: &DataSourceError) -> ErrorKind {
    if let Some(code) = error.code() {
        return match code {
            "42P01" => ErrorKind::UnknownRelation,
            "42703" => ErrorKind::UnknownColumn,
            "42601" => ErrorKind::SyntaxError,
            "42501" => ErrorKind::PermissionDenied,
            "25006" => ErrorKind::ReadOnlyViolation,
            "57014" => ErrorKind::Timeout,
            _ => ErrorKind::ExecutionError,
        };
    }

    let message = error.raw_message().to_lowercase();
    if message.contains("relation") && message.contains("does not exist") {
        ErrorKind::UnknownRelation
    } else if message.contains("column") && message.contains("does not exist") {
        ErrorKind::UnknownColumn
    } else if message.contains("syntax error") {
        ErrorKind::SyntaxError
    } else if message.contains("permission denied") {
        ErrorKind::PermissionDenied
    } else if message.contains("read-only transaction") {
        ErrorKind::ReadOnlyViolation
    } else if message.contains("canceling statement due to statement timeout") {
        ErrorKind::Timeout
    } else {
        ErrorKind::ExecutionError
    }
}

/// Identifier named in `relation "<name>" does not exist`
pub fn missing_relation(message: &str) -> Option<&str> {
    MISSING_RELATION
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Message for an unknown relation, listing the tables that do exist
pub fn unknown_relation_message(name: &str, available: &[String]) -> String {
    if available.is_empty() {
        format!("Table '{name}' does not exist.")
    } else {
        format!(
            "Table '{name}' does not exist. Available tables: {}",
            available.join(", ")
        )
    }
}

/// Turns execution errors into [`ClassifiedError`]s
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    listing_timeout: Duration,
}

impl ErrorClassifier {
    pub fn new(listing_timeout: Duration) -> Self {
        Self { listing_timeout }
    }

    async fn live_tables(&self, source: &dyn DataSource) -> Vec<String> {
        match tokio::time::timeout(self.listing_timeout, source.table_names()).await {
            Ok(Ok(tables)) => tables,
            Ok(Err(e)) => {
                warn!("Could not list tables for error hint: {}", e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Listing tables for error hint timed out after {}s",
                    self.listing_timeout.as_secs()
                );
                Vec::new()
            }
        }
    }

    /// Classify `error`. Only unknown relations are enriched; every other kind keeps
    /// the original message.
    pub async fn classify(&self, error: &ExecuteError, source: &dyn DataSource) -> ClassifiedError {
        let database_error = match error {
            ExecuteError::Rejected { .. } => {
                return ClassifiedError {
                    kind: ErrorKind::RejectedStatement,
                    message: error.to_string(),
                    hint: None,
                };
            }
            ExecuteError::Timeout { .. } => {
                return ClassifiedError {
                    kind: ErrorKind::Timeout,
                    message: error.to_string(),
                    hint: None,
                };
            }
            ExecuteError::Execution(e) => e,
        };

        let kind = classify_database_error(database_error);
        let original = database_error.raw_message();
        debug!("Classified execution error as {}", kind);

        if kind == ErrorKind::UnknownRelation {
            if let Some(name) = missing_relation(&original) {
                let tables = self.live_tables(source).await;
                let message = unknown_relation_message(name, &tables);
                return ClassifiedError {
                    kind,
                    message,
                    hint: (!tables.is_empty()).then_some(tables),
                };
            }
        }

        ClassifiedError {
            kind,
            message: original,
            hint: None,
        }
    }
}

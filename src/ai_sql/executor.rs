//! Execution of sanitized statements

use crate::ai_sql::error::ExecuteError;
use crate::ai_sql::sanitizer::starts_with_select;
use crate::database::{DataSource, ResultSet};
use std::time::Duration;
use tracing::{debug, info};

/// Runs one SELECT statement with a bounded wait and an optional row cap
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    timeout: Duration,
    max_rows: Option<usize>,
}

impl QueryExecutor {
    pub fn new(timeout: Duration, max_rows: Option<usize>) -> Self {
        Self { timeout, max_rows }
    }

    /// Check the statement independently of the sanitizer: it must begin with the SELECT
    /// keyword and hold no statement separator.
    pub fn check_statement(sql: &str) -> Result<&str, ExecuteError> {
        let trimmed = sql.trim();
        if !starts_with_select(trimmed) {
            return Err(ExecuteError::Rejected {
                reason: "only SELECT statements may be executed".to_string(),
            });
        }
        if trimmed.contains(';') {
            return Err(ExecuteError::Rejected {
                reason: "multiple statements are not allowed".to_string(),
            });
        }
        Ok(trimmed)
    }

    /// Execute `sql` against `source`. Rejected statements never reach the database.
    pub async fn execute(
        &self,
        source: &dyn DataSource,
        sql: &str,
    ) -> Result<ResultSet, ExecuteError> {
        let statement = Self::check_statement(sql)?;
        info!("Executing SQL query: {}", statement);

        let result = tokio::time::timeout(self.timeout, source.fetch(statement, self.max_rows))
            .await
            .map_err(|_| ExecuteError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            })??;

        debug!(
            "Query returned {} rows and {} columns",
            result.row_count,
            result.columns.len()
        );
        Ok(result)
    }
}

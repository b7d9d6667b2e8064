//! Data source abstraction for the question pipeline
//!
//! The pipeline only talks to a database through [`DataSource`], so the catalog reads,
//! the table listing and query execution can be swapped for an in-memory implementation
//! in tests.
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// A single decoded cell
pub type Cell = Value;

/// One result row keyed by column name
pub type Row = Map<String, Cell>;

/// URL schemes accepted for the PostgreSQL data source
pub const POSTGRES_SCHEMES: &[&str] = &["postgres", "postgresql"];

/// Schema whose tables are named without a qualifier
pub const DEFAULT_SCHEMA: &str = "public";

/// `table` for the default schema, `schema.table` otherwise
pub fn qualified_table_name(schema: &str, table: &str) -> String {
    if schema.is_empty() || schema == DEFAULT_SCHEMA {
        table.to_string()
    } else {
        format!("{schema}.{table}")
    }
}

/// One column of a user table as read from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogColumn {
    pub schema: String,
    pub table: String,
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
}

impl CatalogColumn {
    pub fn qualified_table(&self) -> String {
        qualified_table_name(&self.schema, &self.table)
    }
}

/// A foreign-key edge `from_table.from_column -> to_table.to_column`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyEdge {
    pub from_schema: String,
    pub from_table: String,
    pub from_column: String,
    pub to_schema: String,
    pub to_table: String,
    pub to_column: String,
}

impl ForeignKeyEdge {
    pub fn from_qualified(&self) -> String {
        qualified_table_name(&self.from_schema, &self.from_table)
    }

    pub fn to_qualified(&self) -> String {
        qualified_table_name(&self.to_schema, &self.to_table)
    }
}

/// Rows returned by a query, with ordered, unique column names
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub truncated: bool,
}

impl ResultSet {
    /// Build a result set from positional rows.
    ///
    /// Duplicate column names are suffixed `_2`, `_3`, ... so every row can be keyed by
    /// name without losing values.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>, truncated: bool) -> Self {
        let columns = unique_column_names(columns);
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|cells| columns.iter().cloned().zip(cells).collect())
            .collect();

        Self {
            row_count: rows.len(),
            columns,
            rows,
            truncated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `row`, `None` when either is absent
    pub fn value(&self, row: usize, column: &str) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// All values of the column at `index`, in row order
    pub fn column_values(&self, index: usize) -> Vec<&Cell> {
        match self.columns.get(index) {
            Some(name) => self
                .rows
                .iter()
                .map(|row| row.get(name).unwrap_or(&Value::Null))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Make column names unique in order of appearance
pub fn unique_column_names(names: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let mut candidate = name.clone();
        let mut suffix = 2;
        while seen.contains(&candidate) {
            candidate = format!("{name}_{suffix}");
            suffix += 1;
        }
        seen.push(candidate);
    }
    seen
}

/// Errors that can occur during data source operations
#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The database rejected a statement. The message is the server's text, untouched.
    #[error("{message}")]
    QueryError {
        message: String,
        code: Option<String>,
    },

    #[error("Metadata error: {0}")]
    MetadataError(String),
}

impl DataSourceError {
    /// SQLSTATE code reported by the server, when there is one
    pub fn code(&self) -> Option<&str> {
        match self {
            DataSourceError::QueryError { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Server error text without any prefix added by this crate
    pub fn raw_message(&self) -> String {
        match self {
            DataSourceError::QueryError { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for DataSourceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DataSourceError::QueryError {
                message: db_err.message().to_string(),
                code: db_err.code().map(|c| c.into_owned()),
            },
            sqlx::Error::PoolTimedOut => {
                DataSourceError::ConnectionError("timed out acquiring a connection".to_string())
            }
            sqlx::Error::Io(e) => DataSourceError::ConnectionError(e.to_string()),
            sqlx::Error::Tls(e) => DataSourceError::ConnectionError(e.to_string()),
            sqlx::Error::Configuration(e) => DataSourceError::InvalidUrl(e.to_string()),
            other => DataSourceError::QueryError {
                message: other.to_string(),
                code: None,
            },
        }
    }
}

/// Check that `url` parses and names a PostgreSQL server
pub fn validate_database_url(url: &str) -> Result<(), DataSourceError> {
    debug!(
        "[validate_database_url] Checking URL: {}",
        crate::password_sanitizer::sanitize_connection_url(url)
    );

    let parsed = Url::parse(url)
        .map_err(|e| DataSourceError::InvalidUrl(format!("Failed to parse URL: {e}")))?;

    if !POSTGRES_SCHEMES.contains(&parsed.scheme()) {
        return Err(DataSourceError::InvalidUrl(format!(
            "unsupported scheme '{}', expected one of: {}",
            parsed.scheme(),
            POSTGRES_SCHEMES.join(", ")
        )));
    }
    Ok(())
}

/// Read access to a relational database
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Every column of every user table, ordered by table name then ordinal position
    async fn catalog_columns(&self) -> Result<Vec<CatalogColumn>, DataSourceError>;

    /// All foreign-key edges between user tables
    async fn foreign_keys(&self) -> Result<Vec<ForeignKeyEdge>, DataSourceError>;

    /// Names of all user tables, schema-qualified outside `public`, sorted
    async fn table_names(&self) -> Result<Vec<String>, DataSourceError>;

    /// Run one read-only statement. When `max_rows` is set, rows past the cap are not
    /// read and the result is marked truncated.
    async fn fetch(&self, sql: &str, max_rows: Option<usize>)
    -> Result<ResultSet, DataSourceError>;

    /// Display name of the backend
    fn name(&self) -> &str;
}

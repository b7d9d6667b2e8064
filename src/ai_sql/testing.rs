//! In-memory data source and completion provider used by the unit tests

use crate::ai_sql::client::{CompletionProvider, CompletionRequest};
use crate::ai_sql::error::GenerationError;
use crate::database::{
    CatalogColumn, DEFAULT_SCHEMA, DataSource, DataSourceError, ForeignKeyEdge, ResultSet,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Column of a table in the `public` schema
pub fn catalog_column(
    table: &str,
    name: &str,
    data_type: &str,
    nullable: bool,
    default_value: Option<&str>,
) -> CatalogColumn {
    schema_column(DEFAULT_SCHEMA, table, name, data_type, nullable, default_value)
}

pub fn schema_column(
    schema: &str,
    table: &str,
    name: &str,
    data_type: &str,
    nullable: bool,
    default_value: Option<&str>,
) -> CatalogColumn {
    CatalogColumn {
        schema: schema.to_string(),
        table: table.to_string(),
        name: name.to_string(),
        data_type: data_type.to_string(),
        nullable,
        default_value: default_value.map(String::from),
    }
}

/// Catalog of a small project portfolio: projects, technologies and users
pub fn portfolio_source() -> MockDataSource {
    MockDataSource::with_columns(vec![
        catalog_column("projects", "id", "integer", false, None),
        catalog_column("projects", "name", "text", false, None),
        catalog_column("projects", "status", "text", true, None),
        catalog_column("technologies", "id", "integer", false, None),
        catalog_column("technologies", "name", "text", false, None),
        catalog_column("technologies", "project_id", "integer", true, None),
        catalog_column("users", "id", "integer", false, None),
        catalog_column("users", "email", "text", false, None),
    ])
    .with_foreign_keys(vec![foreign_key("technologies.project_id", "projects.id")])
}

/// Edge between two `public` tables, each end written `table.column`
pub fn foreign_key(from: &str, to: &str) -> ForeignKeyEdge {
    let (from_table, from_column) = from.split_once('.').expect("table.column");
    let (to_table, to_column) = to.split_once('.').expect("table.column");
    ForeignKeyEdge {
        from_schema: DEFAULT_SCHEMA.to_string(),
        from_table: from_table.to_string(),
        from_column: from_column.to_string(),
        to_schema: DEFAULT_SCHEMA.to_string(),
        to_table: to_table.to_string(),
        to_column: to_column.to_string(),
    }
}

/// Project counts per status
pub fn status_counts() -> ResultSet {
    ResultSet::from_rows(
        vec!["status".to_string(), "project_count".to_string()],
        vec![
            vec![json!("development"), json!(7)],
            vec![json!("production"), json!(4)],
            vec![json!("archived"), json!(2)],
        ],
        false,
    )
}

#[derive(Default)]
pub struct MockDataSource {
    columns: Vec<CatalogColumn>,
    foreign_keys: Vec<ForeignKeyEdge>,
    catalog_error: Option<String>,
    listing_error: Option<String>,
    catalog_delay: Option<Duration>,
    result: ResultSet,
    fetch_error: Option<(String, Option<String>)>,
    fetch_delay: Option<Duration>,
    catalog_calls: AtomicUsize,
    listing_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl MockDataSource {
    pub fn with_columns(columns: Vec<CatalogColumn>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// Every catalog read and the table listing fail with `message`
    pub fn failing_catalog(message: &str) -> Self {
        Self {
            catalog_error: Some(message.to_string()),
            listing_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn failing_listing(mut self) -> Self {
        self.listing_error = Some("permission denied for schema pg_catalog".to_string());
        self
    }

    pub fn with_foreign_keys(mut self, foreign_keys: Vec<ForeignKeyEdge>) -> Self {
        self.foreign_keys = foreign_keys;
        self
    }

    /// Delays catalog reads and the table listing
    pub fn with_catalog_delay(mut self, delay: Duration) -> Self {
        self.catalog_delay = Some(delay);
        self
    }

    pub fn with_result(mut self, result: ResultSet) -> Self {
        self.result = result;
        self
    }

    pub fn with_fetch_error(mut self, message: &str, code: Option<&str>) -> Self {
        self.fetch_error = Some((message.to_string(), code.map(String::from)));
        self
    }

    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn catalog_calls(&self) -> usize {
        self.catalog_calls.load(Ordering::SeqCst)
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    async fn catalog_wait(&self) {
        if let Some(delay) = self.catalog_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn catalog_columns(&self) -> Result<Vec<CatalogColumn>, DataSourceError> {
        self.catalog_calls.fetch_add(1, Ordering::SeqCst);
        self.catalog_wait().await;
        match &self.catalog_error {
            Some(message) => Err(DataSourceError::ConnectionError(message.clone())),
            None => Ok(self.columns.clone()),
        }
    }

    async fn foreign_keys(&self) -> Result<Vec<ForeignKeyEdge>, DataSourceError> {
        match &self.catalog_error {
            Some(message) => Err(DataSourceError::ConnectionError(message.clone())),
            None => Ok(self.foreign_keys.clone()),
        }
    }

    async fn table_names(&self) -> Result<Vec<String>, DataSourceError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        self.catalog_wait().await;
        if let Some(message) = &self.listing_error {
            return Err(DataSourceError::MetadataError(message.clone()));
        }
        let mut names: Vec<String> = self
            .columns
            .iter()
            .map(CatalogColumn::qualified_table)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn fetch(
        &self,
        sql: &str,
        max_rows: Option<usize>,
    ) -> Result<ResultSet, DataSourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.executed.lock().unwrap().push(sql.to_string());
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((message, code)) = &self.fetch_error {
            return Err(DataSourceError::QueryError {
                message: message.clone(),
                code: code.clone(),
            });
        }

        let mut result = self.result.clone();
        if let Some(cap) = max_rows {
            if result.rows.len() > cap {
                result.rows.truncate(cap);
                result.row_count = cap;
                result.truncated = true;
            }
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "Mock"
    }
}

/// Shared view of the calls a [`ScriptedProvider`] received
#[derive(Clone, Default)]
pub struct ProviderProbe {
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ProviderProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Completion provider with a fixed reply or failure
pub struct ScriptedProvider {
    reply: Result<String, (u16, String)>,
    delay: Option<Duration>,
    probe: ProviderProbe,
}

impl ScriptedProvider {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            delay: None,
            probe: ProviderProbe::default(),
        }
    }

    pub fn failing(status_code: u16, message: &str) -> Self {
        Self {
            reply: Err((status_code, message.to_string())),
            delay: None,
            probe: ProviderProbe::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn probe(&self) -> ProviderProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GenerationError> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        self.probe.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err((status_code, message)) => Err(GenerationError::Api {
                status_code: *status_code,
                message: message.clone(),
            }),
        }
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}

//! Schema extraction for SQL generation
//!
//! Reads catalog metadata through a [`DataSource`] and renders it as the
//! `CREATE TABLE` text the model sees. Introspection never fails the turn: a catalog
//! error becomes a degraded snapshot whose text carries the reason.

use crate::database::{
    CatalogColumn, DataSource, DataSourceError, ForeignKeyEdge, qualified_table_name,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Schema text when the database has no user tables
pub const NO_TABLES_TEXT: &str = "No tables found in the database.";

/// First line of the foreign-key block
pub const FOREIGN_KEY_HEADER: &str = "-- Foreign Key Relationships:";

/// Column metadata for the model's context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
}

impl ColumnMetadata {
    fn render(&self) -> String {
        let mut line = format!(
            "{} {} {}",
            self.name,
            self.data_type,
            if self.nullable { "NULL" } else { "NOT NULL" }
        );
        if let Some(default) = &self.default_value {
            line.push_str(" DEFAULT ");
            line.push_str(default);
        }
        line
    }
}

/// A table and its columns in ordinal order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    /// Name as the model should write it: bare in `public`, `schema.table` elsewhere
    pub fn qualified_name(&self) -> String {
        qualified_table_name(&self.schema, &self.name)
    }

    /// Render as a `CREATE TABLE` block
    pub fn render(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("  {}", c.render()))
            .collect();
        format!(
            "CREATE TABLE {} (\n{}\n);",
            self.qualified_name(),
            columns.join(",\n")
        )
    }
}

/// Tables, columns and foreign keys of a database at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaDescriptor {
    tables: Vec<TableMetadata>,
    relationships: Vec<ForeignKeyEdge>,
}

impl SchemaDescriptor {
    /// Group catalog rows by (schema, table), keeping the catalog's table and column
    /// order
    pub fn from_catalog(columns: Vec<CatalogColumn>, relationships: Vec<ForeignKeyEdge>) -> Self {
        let mut tables: Vec<TableMetadata> = Vec::new();
        for column in columns {
            let metadata = ColumnMetadata {
                name: column.name,
                data_type: column.data_type,
                nullable: column.nullable,
                default_value: column.default_value,
            };
            match tables
                .iter_mut()
                .find(|t| t.schema == column.schema && t.name == column.table)
            {
                Some(table) => table.columns.push(metadata),
                None => tables.push(TableMetadata {
                    schema: column.schema,
                    name: column.table,
                    columns: vec![metadata],
                }),
            }
        }

        Self {
            tables,
            relationships,
        }
    }

    pub fn tables(&self) -> &[TableMetadata] {
        &self.tables
    }

    pub fn relationships(&self) -> &[ForeignKeyEdge] {
        &self.relationships
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(TableMetadata::qualified_name).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Canonical schema text: one block per table, then the foreign-key block
    pub fn render(&self) -> String {
        if self.tables.is_empty() {
            return NO_TABLES_TEXT.to_string();
        }

        let mut blocks: Vec<String> = self.tables.iter().map(TableMetadata::render).collect();

        if !self.relationships.is_empty() {
            let mut lines = vec![FOREIGN_KEY_HEADER.to_string()];
            lines.extend(self.relationships.iter().map(|r| {
                format!(
                    "-- {}.{} -> {}.{}",
                    r.from_qualified(),
                    r.from_column,
                    r.to_qualified(),
                    r.to_column
                )
            }));
            blocks.push(lines.join("\n"));
        }

        blocks.join("\n\n")
    }
}

/// How complete a snapshot is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
    Complete,
    Empty,
    Degraded,
}

/// Introspection result: the descriptor when it could be read, and the text sent to the
/// model either way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSnapshot {
    descriptor: Option<SchemaDescriptor>,
    text: String,
    status: SchemaStatus,
}

impl SchemaSnapshot {
    pub fn from_descriptor(descriptor: SchemaDescriptor) -> Self {
        let status = if descriptor.is_empty() {
            SchemaStatus::Empty
        } else {
            SchemaStatus::Complete
        };
        Self {
            text: descriptor.render(),
            descriptor: Some(descriptor),
            status,
        }
    }

    pub fn degraded(reason: impl std::fmt::Display) -> Self {
        Self {
            descriptor: None,
            text: format!("Error getting table information: {reason}"),
            status: SchemaStatus::Degraded,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> SchemaStatus {
        self.status
    }

    pub fn descriptor(&self) -> Option<&SchemaDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn is_degraded(&self) -> bool {
        self.status == SchemaStatus::Degraded
    }

    /// Table names for display. Falls back to `fallback` unless the snapshot is
    /// complete. Never used to constrain generation.
    pub fn display_tables(&self, fallback: &[String]) -> Vec<String> {
        match (&self.descriptor, self.status) {
            (Some(descriptor), SchemaStatus::Complete) => descriptor.table_names(),
            _ => fallback.to_vec(),
        }
    }
}

/// A table and its column names, for UI listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableListing {
    pub name: String,
    pub columns: Vec<String>,
}

/// Reads schema metadata with a bounded wait
#[derive(Debug, Clone)]
pub struct SchemaExtractor {
    timeout: Duration,
}

impl SchemaExtractor {
    /// Create a new schema extractor
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn read_catalog(
        &self,
        source: &dyn DataSource,
    ) -> Result<SchemaDescriptor, DataSourceError> {
        let read = async {
            let columns = source.catalog_columns().await?;
            let relationships = source.foreign_keys().await?;
            Ok::<_, DataSourceError>(SchemaDescriptor::from_catalog(columns, relationships))
        };

        tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| {
                DataSourceError::MetadataError(format!(
                    "catalog query timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
    }

    /// Introspect the database. Failures are logged and yield a degraded snapshot.
    pub async fn introspect(&self, source: &dyn DataSource) -> SchemaSnapshot {
        info!("Extracting schema from {}", source.name());

        match self.read_catalog(source).await {
            Ok(descriptor) => {
                debug!(
                    "Found {} tables and {} foreign keys",
                    descriptor.tables().len(),
                    descriptor.relationships().len()
                );
                SchemaSnapshot::from_descriptor(descriptor)
            }
            Err(e) => {
                warn!("Failed to get schema information: {}", e);
                SchemaSnapshot::degraded(e)
            }
        }
    }

    /// Tables and their column names, omitting `hidden` tables
    pub async fn list_tables(
        &self,
        source: &dyn DataSource,
        hidden: &[String],
    ) -> Result<Vec<TableListing>, DataSourceError> {
        let columns = tokio::time::timeout(self.timeout, source.catalog_columns())
            .await
            .map_err(|_| {
                DataSourceError::MetadataError(format!(
                    "table listing timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        let descriptor = SchemaDescriptor::from_catalog(columns, Vec::new());
        let listing: Vec<TableListing> = descriptor
            .tables()
            .iter()
            .map(|t| (t.qualified_name(), t))
            .filter(|(name, _)| !hidden.contains(name))
            .map(|(name, t)| TableListing {
                name,
                columns: t.columns.iter().map(|c| c.name.clone()).collect(),
            })
            .collect();

        debug!(
            "Listing {} tables ({} hidden)",
            listing.len(),
            descriptor.tables().len() - listing.len()
        );
        Ok(listing)
    }
}

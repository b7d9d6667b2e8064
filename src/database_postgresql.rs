//! PostgreSQL implementation of the data source
use crate::config::DatabaseConfig;
use crate::database::{
    CatalogColumn, Cell, DataSource, DataSourceError, ForeignKeyEdge, ResultSet,
    qualified_table_name, validate_database_url,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde_json::{Number, Value};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgTypeKind};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

const USER_SCHEMA_FILTER: &str = "n.nspname NOT IN ('pg_catalog', 'information_schema') \
     AND n.nspname NOT LIKE 'pg_toast%' \
     AND n.nspname NOT LIKE 'pg_temp%'";

/// Opens the transaction every fetch runs in. Holds even if a statement changed the
/// session's `default_transaction_read_only`.
const READ_ONLY_TRANSACTION: &str = "SET TRANSACTION READ ONLY";

/// Run when a connection returns to the pool. Restores every session setting to the
/// connection's startup values, including the read-only default.
const SESSION_RESET: &str = "RESET ALL";

/// Session parameters applied to every pooled connection: read-only transactions and a
/// server-side statement timeout in milliseconds.
pub fn read_only_session_options(query_timeout_secs: u64) -> Vec<(&'static str, String)> {
    vec![
        ("default_transaction_read_only", "on".to_string()),
        (
            "statement_timeout",
            query_timeout_secs.saturating_mul(1000).to_string(),
        ),
    ]
}

/// PostgreSQL data source backed by a lazily connecting pool
pub struct PostgreSQLDataSource {
    pool: PgPool,
    database: String,
}

impl PostgreSQLDataSource {
    /// Build the pool without opening a connection. Connection failures surface on the
    /// first catalog read or query.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self, DataSourceError> {
        let url = config.url.as_deref().ok_or_else(|| {
            DataSourceError::InvalidUrl(
                "no database URL configured (set DATABASE_URL or [database].url)".to_string(),
            )
        })?;
        validate_database_url(url)?;

        let connect_options = PgConnectOptions::from_str(url)
            .map_err(|e| DataSourceError::InvalidUrl(e.to_string()))?
            .application_name("askdb")
            .options(read_only_session_options(config.query_timeout_seconds));

        let database = connect_options
            .get_database()
            .unwrap_or("postgres")
            .to_string();

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(0)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .idle_timeout(Duration::from_secs(300))
            .test_before_acquire(false)
            .after_release(|conn, _meta| {
                Box::pin(async move {
                    conn.execute(SESSION_RESET).await?;
                    Ok(true)
                })
            })
            .connect_lazy_with(connect_options);

        debug!(
            "[PostgreSQLDataSource::connect_lazy] Pool ready for database '{}' (max {} connections)",
            database, config.max_connections
        );

        Ok(Self { pool, database })
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

#[async_trait]
impl DataSource for PostgreSQLDataSource {
    async fn catalog_columns(&self) -> Result<Vec<CatalogColumn>, DataSourceError> {
        let sql = format!(
            r#"
            SELECT
                n.nspname AS schema_name,
                t.relname AS table_name,
                a.attname AS column_name,
                format_type(a.atttypid, a.atttypmod) AS data_type,
                NOT a.attnotnull AS nullable,
                pg_get_expr(d.adbin, d.adrelid) AS default_value
            FROM pg_attribute a
            INNER JOIN pg_class t ON a.attrelid = t.oid
            INNER JOIN pg_namespace n ON t.relnamespace = n.oid
            LEFT JOIN pg_attrdef d ON a.attrelid = d.adrelid AND a.attnum = d.adnum
            WHERE t.relkind IN ('r', 'p')
              AND NOT t.relispartition
              AND a.attnum > 0
              AND NOT a.attisdropped
              AND {USER_SCHEMA_FILTER}
            ORDER BY n.nspname <> 'public', n.nspname, t.relname, a.attnum
            "#
        );

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DataSourceError::MetadataError(e.to_string()))?;

        let columns = rows
            .iter()
            .map(|row| {
                Ok(CatalogColumn {
                    schema: row.try_get::<String, _>("schema_name")?,
                    table: row.try_get::<String, _>("table_name")?,
                    name: row.try_get::<String, _>("column_name")?,
                    data_type: row.try_get::<String, _>("data_type")?,
                    nullable: row.try_get::<bool, _>("nullable")?,
                    default_value: row.try_get::<Option<String>, _>("default_value")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| DataSourceError::MetadataError(e.to_string()))?;

        debug!(
            "[PostgreSQLDataSource::catalog_columns] Read {} columns",
            columns.len()
        );
        Ok(columns)
    }

    async fn foreign_keys(&self) -> Result<Vec<ForeignKeyEdge>, DataSourceError> {
        let sql = format!(
            r#"
            SELECT
                n.nspname AS from_schema,
                src.relname AS from_table,
                sa.attname AS from_column,
                dn.nspname AS to_schema,
                dst.relname AS to_table,
                da.attname AS to_column
            FROM pg_constraint c
            INNER JOIN pg_class src ON src.oid = c.conrelid
            INNER JOIN pg_namespace n ON n.oid = src.relnamespace
            INNER JOIN pg_class dst ON dst.oid = c.confrelid
            INNER JOIN pg_namespace dn ON dn.oid = dst.relnamespace
            CROSS JOIN LATERAL unnest(c.conkey, c.confkey) AS k(src_attnum, dst_attnum)
            INNER JOIN pg_attribute sa ON sa.attrelid = c.conrelid AND sa.attnum = k.src_attnum
            INNER JOIN pg_attribute da ON da.attrelid = c.confrelid AND da.attnum = k.dst_attnum
            WHERE c.contype = 'f'
              AND {USER_SCHEMA_FILTER}
            ORDER BY n.nspname <> 'public', n.nspname, src.relname, c.conname, k.src_attnum
            "#
        );

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DataSourceError::MetadataError(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(ForeignKeyEdge {
                    from_schema: row.try_get::<String, _>("from_schema")?,
                    from_table: row.try_get::<String, _>("from_table")?,
                    from_column: row.try_get::<String, _>("from_column")?,
                    to_schema: row.try_get::<String, _>("to_schema")?,
                    to_table: row.try_get::<String, _>("to_table")?,
                    to_column: row.try_get::<String, _>("to_column")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| DataSourceError::MetadataError(e.to_string()))
    }

    async fn table_names(&self) -> Result<Vec<String>, DataSourceError> {
        let rows = sqlx::query(
            r#"
            SELECT schemaname, tablename
            FROM pg_catalog.pg_tables
            WHERE schemaname NOT IN ('pg_catalog', 'information_schema')
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DataSourceError::MetadataError(e.to_string()))?;

        let mut names = rows
            .iter()
            .map(|row| {
                let schema = row.try_get::<String, _>("schemaname")?;
                let table = row.try_get::<String, _>("tablename")?;
                Ok(qualified_table_name(&schema, &table))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| DataSourceError::MetadataError(e.to_string()))?;
        names.sort();
        Ok(names)
    }

    async fn fetch(
        &self,
        sql: &str,
        max_rows: Option<usize>,
    ) -> Result<ResultSet, DataSourceError> {
        debug!("[PostgreSQLDataSource::fetch] Executing query");

        // Rolled back and released to the pool when dropped, on every exit path
        let mut tx = self.pool.begin().await?;
        sqlx::query(READ_ONLY_TRANSACTION).execute(&mut *tx).await?;

        let mut column_names: Option<Vec<String>> = None;
        let mut rows: Vec<Vec<Cell>> = Vec::new();
        let mut truncated = false;

        {
            let mut stream = sqlx::query(sql).fetch(&mut *tx);
            while let Some(row) = stream.try_next().await? {
                if max_rows.is_some_and(|cap| rows.len() >= cap) {
                    truncated = true;
                    break;
                }
                if column_names.is_none() {
                    column_names = Some(
                        row.columns()
                            .iter()
                            .map(|c| c.name().to_string())
                            .collect(),
                    );
                }
                rows.push(decode_row(&row)?);
            }
        }

        let column_names = match column_names {
            Some(names) => names,
            // No rows: describe the statement to still report its columns
            None => {
                let statement = (&mut *tx).prepare(sql).await?;
                statement
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            }
        };
        // Also reverts any session setting the statement changed with set_config
        tx.rollback().await?;

        debug!(
            "[PostgreSQLDataSource::fetch] Query completed with {} rows (truncated: {})",
            rows.len(),
            truncated
        );
        Ok(ResultSet::from_rows(column_names, rows, truncated))
    }

    fn name(&self) -> &str {
        "PostgreSQL"
    }
}

fn decode_row(row: &PgRow) -> Result<Vec<Cell>, DataSourceError> {
    (0..row.len()).map(|i| decode_cell(row, i)).collect()
}

fn float_cell(value: f64) -> Cell {
    match Number::from_f64(value) {
        Some(n) => Value::Number(n),
        // NaN and infinities have no JSON number form
        None => Value::String(value.to_string()),
    }
}

/// NUMERIC text as a JSON number with its digits kept exactly (`12.50` stays `12.50`)
fn numeric_cell(text: &str) -> Cell {
    match Number::from_str(text) {
        Ok(n) => Value::Number(n),
        Err(_) => Value::String(text.to_string()),
    }
}

/// Decode one PostgreSQL value into a JSON cell
fn decode_cell(row: &PgRow, column_index: usize) -> Result<Cell, DataSourceError> {
    let raw = row.try_get_raw(column_index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.column(column_index).type_info().name();

    let cell = match type_name {
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            Value::String(row.try_get::<String, _>(column_index)?)
        }

        "INT2" => Value::from(row.try_get::<i16, _>(column_index)?),
        "INT4" => Value::from(row.try_get::<i32, _>(column_index)?),
        "INT8" => Value::from(row.try_get::<i64, _>(column_index)?),
        "OID" => Value::from(row.try_get::<sqlx::postgres::types::Oid, _>(column_index)?.0),

        "FLOAT4" => float_cell(f64::from(row.try_get::<f32, _>(column_index)?)),
        "FLOAT8" => float_cell(row.try_get::<f64, _>(column_index)?),
        "NUMERIC" => match row.try_get::<sqlx::types::Decimal, _>(column_index) {
            Ok(decimal) => numeric_cell(&decimal.to_string()),
            // NUMERIC 'NaN' is not representable as a Decimal
            Err(_) => Value::String("NaN".to_string()),
        },

        "BOOL" => Value::Bool(row.try_get::<bool, _>(column_index)?),

        "TIMESTAMPTZ" => Value::String(
            row.try_get::<chrono::DateTime<chrono::Utc>, _>(column_index)?
                .to_rfc3339(),
        ),
        "TIMESTAMP" => Value::String(
            row.try_get::<chrono::NaiveDateTime, _>(column_index)?
                .to_string(),
        ),
        "DATE" => Value::String(row.try_get::<chrono::NaiveDate, _>(column_index)?.to_string()),
        "TIME" => Value::String(row.try_get::<chrono::NaiveTime, _>(column_index)?.to_string()),

        "JSON" | "JSONB" => row.try_get::<Value, _>(column_index)?,

        "UUID" => Value::String(row.try_get::<sqlx::types::Uuid, _>(column_index)?.to_string()),

        "BYTEA" => Value::String(format!(
            "\\x{}",
            hex::encode(row.try_get::<Vec<u8>, _>(column_index)?)
        )),

        "TEXT[]" | "VARCHAR[]" => Value::from(row.try_get::<Vec<String>, _>(column_index)?),
        "INT4[]" => Value::from(row.try_get::<Vec<i32>, _>(column_index)?),
        "INT8[]" => Value::from(row.try_get::<Vec<i64>, _>(column_index)?),

        other => match row.column(column_index).type_info().kind() {
            // Enum labels are sent as plain text
            PgTypeKind::Enum(_) => Value::String(row.try_get_unchecked::<String, _>(column_index)?),
            _ => row
                .try_get::<String, _>(column_index)
                .map(Value::String)
                .unwrap_or_else(|_| Value::String(format!("<{}>", other.to_lowercase()))),
        },
    };

    Ok(cell)
}

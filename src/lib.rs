pub mod ai_sql;
pub mod cli;
pub mod config;
pub mod database; // Data source abstraction
pub mod database_postgresql; // PostgreSQL implementation
pub mod format;
pub mod logging;
pub mod password_sanitizer;

pub use config::Config;
pub use database::{DataSource, DataSourceError, ResultSet};
pub use database_postgresql::PostgreSQLDataSource;

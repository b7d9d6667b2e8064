//! Natural-language questions answered with read-only SQL
//!
//! One turn runs the question through a fixed pipeline:
//!
//! 1. the session's cached schema snapshot (introspected on first use),
//! 2. a prompt embedding the schema text and the question,
//! 3. one completion call that returns candidate SQL,
//! 4. sanitization down to a single SELECT statement,
//! 5. execution on a read-only connection,
//! 6. classification of execution errors, or presentation of the rows.
//!
//! # Usage
//!
//! ```rust,ignore
//! use askdb::ai_sql::{AskEngine, Question, Session, cancel::CancelToken};
//!
//! let engine = AskEngine::from_config(&config, source)?;
//! let session = Session::from_config(&config.schema);
//! let question = Question::new("How many projects are in development?")?;
//! let turn = engine.ask(&session, &question, &CancelToken::never()).await;
//! ```

pub mod cache;
pub mod cancel;
pub mod classifier;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod presenter;
pub mod prompt;
pub mod sanitizer;
pub mod schema;
#[cfg(test)]
pub(crate) mod testing;

pub use cache::SchemaCache;
pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use classifier::{ClassifiedError, ErrorClassifier};
pub use client::{CompletionProvider, QueryGenerator};
pub use config::{AiProviderType, CompletionConfig, SchemaConfig};
pub use error::{AiError, AiResult, ErrorKind};
pub use executor::QueryExecutor;
pub use presenter::{ChartSpec, Presentation, VisualizationDecision};
pub use prompt::PromptGenerator;
pub use sanitizer::{GeneratedQuery, ValidationStatus};
pub use schema::{SchemaExtractor, SchemaSnapshot, TableListing};

use crate::config::Config;
use crate::database::{DataSource, DataSourceError, ResultSet, Row};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A non-blank user question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question(String);

impl Question {
    pub fn new(text: impl Into<String>) -> AiResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AiError::InvalidQuestion(
                "the question is empty".to_string(),
            ));
        }
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// State shared by the turns of one conversation
#[derive(Debug, Default)]
pub struct Session {
    schema: SchemaCache,
}

impl Session {
    pub fn new(cache_ttl: Option<Duration>) -> Self {
        Self {
            schema: SchemaCache::with_ttl(cache_ttl),
        }
    }

    pub fn from_config(config: &SchemaConfig) -> Self {
        Self::new(config.cache_ttl_seconds.map(Duration::from_secs))
    }

    /// Forget the schema snapshot so the next turn introspects again
    pub async fn evict_schema(&self) {
        self.schema.evict().await;
    }
}

/// A turn that produced rows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnSuccess {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub truncated: bool,
    pub presentation: Presentation,
}

impl TurnSuccess {
    fn new(sql: String, result: ResultSet) -> Self {
        let presentation = presenter::present(&result);
        Self {
            sql,
            columns: result.columns,
            rows: result.rows,
            row_count: result.row_count,
            truncated: result.truncated,
            presentation,
        }
    }
}

/// A turn that ended with an error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<Vec<String>>,
    /// The statement that was executed, when generation got that far
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Model text that could not be sanitized
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_candidate: Option<String>,
}

impl TurnFailure {
    fn from_error(error: &AiError) -> Self {
        Self {
            kind: error.kind(),
            message: error.user_message(),
            hint: None,
            sql: None,
            raw_candidate: None,
        }
    }

    fn with_sql(mut self, sql: &str) -> Self {
        self.sql = Some(sql.to_string());
        self
    }

    fn with_raw_candidate(mut self, raw: &str) -> Self {
        self.raw_candidate = Some(raw.to_string());
        self
    }
}

impl From<ClassifiedError> for TurnFailure {
    fn from(classified: ClassifiedError) -> Self {
        Self {
            kind: classified.kind,
            message: classified.message,
            hint: classified.hint,
            sql: None,
            raw_candidate: None,
        }
    }
}

pub type TurnResult = Result<TurnSuccess, TurnFailure>;

/// Request half of the question contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

/// Response half of the question contract
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AskResponse {
    Success {
        sql: String,
        columns: Vec<String>,
        rows: Vec<Row>,
        row_count: usize,
        truncated: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        chart: Option<ChartSpec>,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        hint: Option<Vec<String>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sql: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        raw_candidate: Option<String>,
    },
}

impl From<TurnResult> for AskResponse {
    fn from(turn: TurnResult) -> Self {
        match turn {
            Ok(success) => AskResponse::Success {
                sql: success.sql,
                columns: success.columns,
                rows: success.rows,
                row_count: success.row_count,
                truncated: success.truncated,
                chart: success.presentation.visualization.chart,
            },
            Err(failure) => AskResponse::Failure {
                kind: failure.kind,
                message: failure.message,
                hint: failure.hint,
                sql: failure.sql,
                raw_candidate: failure.raw_candidate,
            },
        }
    }
}

/// Table listing contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TablesResponse {
    pub tables: Vec<TableListing>,
}

/// Main engine that runs question turns
pub struct AskEngine {
    source: Arc<dyn DataSource>,
    extractor: SchemaExtractor,
    generator: QueryGenerator,
    executor: QueryExecutor,
    classifier: ErrorClassifier,
    default_limit: u32,
    hidden_tables: Vec<String>,
    fallback_tables: Vec<String>,
}

impl AskEngine {
    pub fn new(
        source: Arc<dyn DataSource>,
        provider: Box<dyn CompletionProvider>,
        config: &Config,
    ) -> Self {
        let metadata_timeout = Duration::from_secs(config.schema.metadata_timeout_seconds);
        Self {
            source,
            extractor: SchemaExtractor::new(metadata_timeout),
            generator: QueryGenerator::new(provider, &config.completion),
            executor: QueryExecutor::new(
                Duration::from_secs(config.database.query_timeout_seconds),
                config.database.max_rows,
            ),
            classifier: ErrorClassifier::new(metadata_timeout),
            default_limit: config.completion.default_limit,
            hidden_tables: config.schema.hidden_tables.clone(),
            fallback_tables: config.schema.fallback_tables.clone(),
        }
    }

    /// Create the engine with the provider named in `[completion]`
    pub fn from_config(config: &Config, source: Arc<dyn DataSource>) -> AiResult<Self> {
        let provider = client::create_provider(&config.completion)?;
        info!(
            "Using {} with model {}",
            provider.name(),
            config.completion.model()
        );
        Ok(Self::new(source, provider, config))
    }

    /// Snapshot for `session`, introspecting on first use
    pub async fn schema_snapshot(&self, session: &Session) -> Arc<SchemaSnapshot> {
        session
            .schema
            .get_or_refresh(&self.extractor, self.source.as_ref())
            .await
    }

    /// Table names to show the user, falling back to the configured list
    pub async fn display_tables(&self, session: &Session) -> Vec<String> {
        self.schema_snapshot(session)
            .await
            .display_tables(&self.fallback_tables)
    }

    /// Tables and columns for listings, hidden tables omitted
    pub async fn list_tables(&self) -> Result<TablesResponse, DataSourceError> {
        let tables = self
            .extractor
            .list_tables(self.source.as_ref(), &self.hidden_tables)
            .await?;
        Ok(TablesResponse { tables })
    }

    /// Answer one request
    pub async fn handle(
        &self,
        session: &Session,
        request: &AskRequest,
        cancel: &CancelToken,
    ) -> AskResponse {
        let turn = match Question::new(request.question.as_str()) {
            Ok(question) => self.ask(session, &question, cancel).await,
            Err(e) => Err(TurnFailure::from_error(&e)),
        };
        AskResponse::from(turn)
    }

    /// Run one turn. Every awaited stage races against `cancel`.
    pub async fn ask(
        &self,
        session: &Session,
        question: &Question,
        cancel: &CancelToken,
    ) -> TurnResult {
        info!("Answering question: {}", question.as_str());
        let cancelled = || TurnFailure::from_error(&AiError::Cancelled);

        let snapshot = cancel
            .run(self.schema_snapshot(session))
            .await
            .map_err(|_| cancelled())?;
        if snapshot.is_degraded() {
            warn!("Generating SQL without schema information; the query may reference unknown tables");
        }

        let payload =
            PromptGenerator::build(snapshot.text(), question.as_str(), self.default_limit);
        let raw = cancel
            .run(self.generator.generate(&payload))
            .await
            .map_err(|_| cancelled())?
            .map_err(|e| TurnFailure::from_error(&AiError::from(e)))?;
        debug!("Raw candidate: {}", raw);

        let generated = GeneratedQuery::new(raw);
        let sql = match generated.status() {
            ValidationStatus::Valid => generated.sql().unwrap_or_default().to_string(),
            ValidationStatus::Invalid(e) => {
                warn!("Generated text is not a usable query: {}", e);
                return Err(
                    TurnFailure::from_error(&AiError::from(e)).with_raw_candidate(generated.raw())
                );
            }
        };
        info!("Generated SQL: {}", sql);

        let executed = cancel
            .run(self.executor.execute(self.source.as_ref(), &sql))
            .await
            .map_err(|_| cancelled().with_sql(&sql))?;

        match executed {
            Ok(result) => Ok(TurnSuccess::new(sql, result)),
            Err(e) => {
                warn!("Query execution failed: {}", e);
                let classified = cancel
                    .run(self.classifier.classify(&e, self.source.as_ref()))
                    .await
                    .map_err(|_| cancelled().with_sql(&sql))?;
                Err(TurnFailure::from(classified).with_sql(&sql))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_sql::testing::{MockDataSource, ScriptedProvider, portfolio_source, status_counts};
    use serde_json::json;

    fn create_test_config() -> Config {
        let mut config = Config::default();
        config.completion.api_key = Some("test-key".to_string());
        config
    }

    fn project_count() -> ResultSet {
        ResultSet::from_rows(vec!["project_count".to_string()], vec![vec![json!(7)]], false)
    }

    fn create_test_engine(source: Arc<MockDataSource>, provider: ScriptedProvider) -> AskEngine {
        AskEngine::new(source, Box::new(provider), &create_test_config())
    }

    fn question(text: &str) -> Question {
        Question::new(text).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let source = Arc::new(portfolio_source().with_result(project_count()));
        let provider = ScriptedProvider::replying(
            "```sql\nSELECT COUNT(*) AS project_count FROM projects WHERE status = 'development'; -- count\n```",
        );
        let probe = provider.probe();
        let engine = create_test_engine(Arc::clone(&source), provider);

        let success = engine
            .ask(
                &Session::default(),
                &question("How many projects are in development?"),
                &CancelToken::never(),
            )
            .await
            .unwrap();

        assert_eq!(
            success.sql,
            "SELECT COUNT(*) AS project_count FROM projects WHERE status = 'development'"
        );
        for marker in [";", "--", "/*", "`"] {
            assert!(!success.sql.contains(marker));
        }
        assert_eq!(success.rows.len(), 1);
        assert_eq!(success.rows[0]["project_count"], json!(7));
        assert_eq!(success.columns, vec!["project_count"]);
        assert!(!success.presentation.visualization.eligible);
        assert!(success.presentation.visualization.chart.is_none());

        let requests = probe.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].user.contains("CREATE TABLE projects ("));
        assert!(requests[0].user.contains("How many projects are in development?"));
        assert_eq!(source.executed(), vec![success.sql.clone()]);
    }

    #[tokio::test]
    async fn test_drop_table_never_reaches_database() {
        let source = Arc::new(portfolio_source());
        let engine = create_test_engine(
            Arc::clone(&source),
            ScriptedProvider::replying("DROP TABLE projects;"),
        );

        let failure = engine
            .ask(&Session::default(), &question("Delete everything"), &CancelToken::never())
            .await
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::NoSelectFound);
        assert_eq!(failure.raw_candidate.as_deref(), Some("DROP TABLE projects;"));
        assert_eq!(failure.sql, None);
        assert_eq!(source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_question_makes_no_calls() {
        let source = Arc::new(portfolio_source());
        let provider = ScriptedProvider::replying("SELECT 1");
        let probe = provider.probe();
        let engine = create_test_engine(Arc::clone(&source), provider);

        let response = engine
            .handle(
                &Session::default(),
                &AskRequest {
                    question: "   ".to_string(),
                },
                &CancelToken::never(),
            )
            .await;

        match response {
            AskResponse::Failure { kind, .. } => assert_eq!(kind, ErrorKind::InvalidQuestion),
            other => panic!("unexpected response: {other:?}"),
        }
        assert_eq!(probe.calls(), 0);
        assert_eq!(source.catalog_calls(), 0);
        assert_eq!(source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_degraded_schema_still_generates() {
        let source = Arc::new(MockDataSource::failing_catalog("connection refused").with_result(project_count()));
        let provider = ScriptedProvider::replying("SELECT COUNT(*) AS project_count FROM projects");
        let probe = provider.probe();
        let engine = create_test_engine(Arc::clone(&source), provider);
        let session = Session::default();

        let success = engine
            .ask(&session, &question("How many projects?"), &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(success.row_count, 1);
        assert!(probe.requests()[0]
            .user
            .contains("Error getting table information: "));
        assert_eq!(
            engine.display_tables(&session).await,
            vec!["technologies", "projects"]
        );
    }

    #[tokio::test]
    async fn test_unknown_relation_is_classified() {
        let source = Arc::new(
            portfolio_source().with_fetch_error("relation \"foo\" does not exist", Some("42P01")),
        );
        let engine = create_test_engine(
            Arc::clone(&source),
            ScriptedProvider::replying("SELECT * FROM foo"),
        );

        let failure = engine
            .ask(&Session::default(), &question("Show foo"), &CancelToken::never())
            .await
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::UnknownRelation);
        assert_eq!(
            failure.message,
            "Table 'foo' does not exist. Available tables: projects, technologies, users"
        );
        assert_eq!(failure.sql.as_deref(), Some("SELECT * FROM foo"));
        assert_eq!(failure.hint.map(|h| h.len()), Some(3));
    }

    #[tokio::test]
    async fn test_generation_failure() {
        let source = Arc::new(portfolio_source());
        let engine = create_test_engine(
            Arc::clone(&source),
            ScriptedProvider::failing(500, "internal error"),
        );

        let failure = engine
            .ask(&Session::default(), &question("How many projects?"), &CancelToken::never())
            .await
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::GenerationError);
        assert_eq!(source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_schema_cached_across_turns() {
        let source = Arc::new(portfolio_source().with_result(status_counts()));
        let engine = create_test_engine(
            Arc::clone(&source),
            ScriptedProvider::replying(
                "SELECT status, COUNT(*) AS project_count FROM projects GROUP BY status",
            ),
        );
        let session = Session::default();

        for _ in 0..3 {
            let success = engine
                .ask(&session, &question("Projects per status"), &CancelToken::never())
                .await
                .unwrap();
            assert!(success.presentation.visualization.eligible);
        }
        assert_eq!(source.catalog_calls(), 1);
        assert_eq!(source.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_cancel_during_generation() {
        let source = Arc::new(portfolio_source());
        let provider = ScriptedProvider::replying("SELECT 1").with_delay(Duration::from_secs(30));
        let engine = create_test_engine(Arc::clone(&source), provider);
        let (handle, token) = cancel_pair();
        let session = Session::default();
        let question = question("How many projects?");

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        };
        let (turn, _) = tokio::join!(engine.ask(&session, &question, &token), canceller);

        let failure = turn.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Cancelled);
        assert_eq!(source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_execution() {
        let source = Arc::new(portfolio_source().with_fetch_delay(Duration::from_secs(30)));
        let engine = create_test_engine(Arc::clone(&source), ScriptedProvider::replying("SELECT 1"));
        let (handle, token) = cancel_pair();
        let session = Session::default();
        let question = question("One");

        let canceller = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        };
        let (turn, _) = tokio::join!(engine.ask(&session, &question, &token), canceller);

        let failure = turn.unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Cancelled);
        assert_eq!(failure.sql.as_deref(), Some("SELECT 1"));
    }

    #[tokio::test]
    async fn test_ask_response_serialization() {
        let source = Arc::new(portfolio_source().with_result(project_count()));
        let engine = create_test_engine(
            Arc::clone(&source),
            ScriptedProvider::replying("SELECT COUNT(*) AS project_count FROM projects"),
        );

        let response = engine
            .handle(
                &Session::default(),
                &AskRequest {
                    question: "How many projects?".to_string(),
                },
                &CancelToken::never(),
            )
            .await;
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["rows"], json!([{"project_count": 7}]));
        assert_eq!(json["row_count"], 1);
        assert!(json.get("chart").is_none());
    }

    #[tokio::test]
    async fn test_failure_response_carries_raw_candidate() {
        let source = Arc::new(portfolio_source());
        let engine = create_test_engine(
            Arc::clone(&source),
            ScriptedProvider::replying("DROP TABLE projects;"),
        );

        let response = engine
            .handle(
                &Session::default(),
                &AskRequest {
                    question: "Delete everything".to_string(),
                },
                &CancelToken::never(),
            )
            .await;
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "no_select_found");
        assert_eq!(json["raw_candidate"], "DROP TABLE projects;");
        assert!(json.get("sql").is_none());
        assert_eq!(source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_list_tables_omits_hidden() {
        let engine = create_test_engine(
            Arc::new(portfolio_source()),
            ScriptedProvider::replying("SELECT 1"),
        );
        let response = engine.list_tables().await.unwrap();
        let names: Vec<&str> = response.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["projects", "technologies"]);
    }

    #[test]
    fn test_question_rejects_blank() {
        assert!(matches!(
            Question::new(" \n\t"),
            Err(AiError::InvalidQuestion(_))
        ));
        assert_eq!(question("hi").as_str(), "hi");
    }
}

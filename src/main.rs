use askdb::ai_sql::schema::SchemaExtractor;
use askdb::ai_sql::{
    AskEngine, AskResponse, Question, Session, TablesResponse, TurnFailure, TurnSuccess,
    cancel_pair,
};
use askdb::cli::{Args, Command};
use askdb::config::Config;
use askdb::database_postgresql::PostgreSQLDataSource;
use askdb::format::format_table_listing;
use askdb::logging;
use askdb::password_sanitizer::{sanitize_connection_url, sanitize_text_for_logging};
use clap::Parser;
use nu_ansi_term::{Color, Style};
use std::error::Error as StdError;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type CliResult<T> = Result<T, Box<dyn StdError>>;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!(
                "{} {}",
                Color::Red.bold().paint("Error:"),
                sanitize_text_for_logging(&e.to_string())
            );
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> CliResult<ExitCode> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(url) = &args.database_url {
        config.database.url = Some(url.clone());
    }

    // Held until exit so buffered file output is flushed
    let _log_guard = logging::init(&config.logging, args.log_level)?;
    debug!("Parsed arguments: {:?}", args);

    match &args.command {
        Command::Schema => print_schema(&config).await,
        Command::Tables { json } => print_tables(&config, *json).await,
        Command::Ask {
            question,
            json,
            show_sql,
        } => ask(&config, question, *json, *show_sql).await,
    }
}

fn connect(config: &Config) -> CliResult<PostgreSQLDataSource> {
    let source = PostgreSQLDataSource::connect_lazy(&config.database)?;
    if let Some(url) = &config.database.url {
        info!("Using database {}", sanitize_connection_url(url));
    }
    Ok(source)
}

fn metadata_timeout(config: &Config) -> Duration {
    Duration::from_secs(config.schema.metadata_timeout_seconds)
}

async fn print_schema(config: &Config) -> CliResult<ExitCode> {
    config.validate_database()?;
    let source = connect(config)?;

    let snapshot = SchemaExtractor::new(metadata_timeout(config))
        .introspect(&source)
        .await;
    if snapshot.is_degraded() {
        eprintln!("{}", Color::Yellow.paint(snapshot.text()));
        return Ok(ExitCode::FAILURE);
    }
    println!("{}", snapshot.text());
    Ok(ExitCode::SUCCESS)
}

async fn print_tables(config: &Config, json: bool) -> CliResult<ExitCode> {
    config.validate_database()?;
    let source = connect(config)?;

    let tables = SchemaExtractor::new(metadata_timeout(config))
        .list_tables(&source, &config.schema.hidden_tables)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&TablesResponse { tables })?);
    } else if tables.is_empty() {
        println!("No tables found.");
    } else {
        format_table_listing(&tables).printstd();
    }
    Ok(ExitCode::SUCCESS)
}

async fn ask(config: &Config, question: &str, json: bool, show_sql: bool) -> CliResult<ExitCode> {
    config.validate()?;
    let question = Question::new(question)?;
    let source = Arc::new(connect(config)?);
    let engine = AskEngine::from_config(config, source)?;
    let session = Session::from_config(&config.schema);

    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });

    let turn = engine.ask(&session, &question, &token).await;
    let code = if turn.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&AskResponse::from(turn))?);
        return Ok(code);
    }

    match turn {
        Ok(success) => print_success(&success, show_sql)?,
        Err(failure) => print_failure(&failure),
    }
    Ok(code)
}

fn print_success(success: &TurnSuccess, show_sql: bool) -> CliResult<()> {
    if show_sql {
        println!("{}", Style::new().dimmed().paint(&success.sql));
        println!();
    }

    let presentation = &success.presentation;
    print!("{}", presentation.table);
    println!();
    println!("{}", Color::Green.paint(&presentation.summary));
    if success.truncated {
        println!(
            "{}",
            Color::Yellow.paint("Row limit reached; remaining rows were not read.")
        );
    }

    if let Some(chart) = &presentation.visualization.chart {
        println!();
        println!("{}", Color::Cyan.bold().paint("Chart:"));
        println!("{}", serde_json::to_string_pretty(chart)?);
    }
    Ok(())
}

fn print_failure(failure: &TurnFailure) {
    eprintln!(
        "{} {}",
        Color::Red.bold().paint(format!("[{}]", failure.kind)),
        failure.message
    );
    if let Some(sql) = &failure.sql {
        eprintln!("{} {}", Style::new().dimmed().paint("SQL:"), sql);
    }
    if let Some(raw) = &failure.raw_candidate {
        eprintln!("{}", Style::new().dimmed().paint("Model output:"));
        eprintln!("{raw}");
    }
}

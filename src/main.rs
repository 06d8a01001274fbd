use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

use sqlpilot::agent::{AgentLoop, CancelFlag};
use sqlpilot::datasource::{DataSource, SqliteDataSource, TableSchema, render_schema};
use sqlpilot::domain::{Exchange, ExchangeOutcome, LoopResult, QueryRows, TurnOutcome};
use sqlpilot::generator::LlmStatementGenerator;
use sqlpilot::guard::ExecutionGuard;
use sqlpilot::llm::{LlmClient, OpenRouterClient};
use sqlpilot::session::SessionManager;
use sqlpilot::storage::{HistoryStore, JsonlHistoryStore};
use sqlpilot::validation::{SchemaAllowlist, StatementValidator};

type Manager = SessionManager<LlmStatementGenerator<OpenRouterClient>, SqliteDataSource>;

/// Cells wider than this are cut in table output.
const MAX_CELL_WIDTH: usize = 40;

fn setup_logging(config: &Config) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sqlpilot")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("sqlpilot.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG wins over the configured level
    let level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<i32> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }
    if let Some(session) = cli.command.session() {
        info!("Using session: {}", session);
    }

    match &cli.command {
        Commands::Ask { question, session } => handle_ask_command(question, session, cli.is_verbose(), config).await,
        Commands::Chat { session } => handle_chat_command(session, cli.is_verbose(), config).await,
        Commands::History { session, export } => handle_history_command(session, export.as_ref(), config),
        Commands::Clear { session } => handle_clear_command(session, config),
        Commands::Schema => handle_schema_command(config).await,
    }
}

fn open_store(config: &Config) -> Result<JsonlHistoryStore> {
    JsonlHistoryStore::new(&config.storage.history_dir).context(format!(
        "Failed to open history directory {}",
        config.storage.history_dir.display()
    ))
}

fn open_database(config: &Config) -> Arc<SqliteDataSource> {
    Arc::new(SqliteDataSource::new(&config.database.path).with_tables(config.database.tables.clone()))
}

async fn describe(source: &SqliteDataSource, config: &Config) -> Result<Vec<TableSchema>> {
    source
        .describe_schema()
        .await
        .context(format!("Failed to read schema from {}", config.database.path.display()))
}

/// Wire the database, model, validator and store into a session manager.
///
/// The client is returned alongside so callers can report token usage.
async fn build_manager(config: &Config) -> Result<(Manager, Arc<OpenRouterClient>)> {
    let source = open_database(config);
    let tables = describe(&source, config).await?;
    info!("Described {} tables from {}", tables.len(), config.database.path.display());

    let introspected = config.validation.introspect_schema.then(|| SchemaAllowlist::from_tables(&tables));
    let validator = StatementValidator::new(config.validator_config(introspected));

    let client = OpenRouterClient::new(config.openrouter_config(), &config.llm.api_key_env)
        .context("Failed to create language model client")?;
    if !client.is_ready() {
        eyre::bail!("API key in {} is empty", config.llm.api_key_env);
    }
    info!("Using model {}", client.model());
    let client = Arc::new(client);
    let generator = LlmStatementGenerator::new(Arc::clone(&client), &render_schema(&tables), config.generator_config());

    let agent = AgentLoop::new(
        Arc::new(generator),
        validator,
        ExecutionGuard::new(source, config.guard_config()),
        config.agent_config(),
    );

    let store: Arc<dyn HistoryStore> = Arc::new(open_store(config)?);
    let manager = SessionManager::new(agent, config.agent.history_window).with_store(store);
    Ok((manager, client))
}

fn log_usage(client: &OpenRouterClient) {
    let usage = client.total_usage();
    info!(
        "Token usage: {} input, {} output, {} total",
        usage.input_tokens,
        usage.output_tokens,
        usage.total()
    );
}

async fn handle_ask_command(question: &str, session: &str, verbose: bool, config: &Config) -> Result<i32> {
    info!("Asking in session {}: {}", session, question);
    let (manager, client) = build_manager(config).await?;

    let flag = CancelFlag::new();
    let result = run_turn(&manager, session, question, &flag).await?;
    print_result(&result, verbose);
    log_usage(&client);
    Ok(result.outcome.exit_code())
}

async fn handle_chat_command(session: &str, verbose: bool, config: &Config) -> Result<i32> {
    info!("Starting chat in session {}", session);
    let (manager, client) = build_manager(config).await?;

    println!("{} {}", "Session:".green(), session);
    println!("{}", "Ask a question, or /history, /clear, /exit. Ctrl-C cancels a running question.".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let flag = CancelFlag::new();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let input = line.trim();
        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/history" => print_history(&manager.transcript(session)?),
            "/clear" => {
                manager.reset(session)?;
                println!("{}", "History cleared".yellow());
            }
            _ => match run_turn(&manager, session, input, &flag).await {
                Ok(result) => print_result(&result, verbose),
                Err(e) => {
                    log::warn!("Turn failed in session {}: {:#}", session, e);
                    println!("{} {:#}", "Error:".red().bold(), e);
                }
            },
        }
    }

    log_usage(&client);
    info!("Chat in session {} ended", session);
    Ok(0)
}

/// Run one turn; Ctrl-C raises the cancel flag and the loop stops at its next checkpoint.
async fn run_turn(manager: &Manager, session: &str, utterance: &str, flag: &CancelFlag) -> Result<LoopResult> {
    flag.reset();
    let turn = manager.submit_turn_with(session, utterance, flag);
    tokio::pin!(turn);

    let result = tokio::select! {
        result = &mut turn => result,
        _ = tokio::signal::ctrl_c() => {
            println!("{}", "Cancelling...".yellow());
            flag.cancel();
            turn.await
        }
    };
    result.context("Turn failed")
}

fn handle_history_command(session: &str, export: Option<&PathBuf>, config: &Config) -> Result<i32> {
    let store = open_store(config)?;
    let exchanges = store.load(session).context(format!("Failed to load history for session {}", session))?;

    match export {
        Some(path) => {
            let document = json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "conversation_count": exchanges.len(),
                "history": exchanges,
            });
            fs::write(path, serde_json::to_string_pretty(&document)?)
                .context(format!("Failed to write {}", path.display()))?;
            info!("Exported {} exchanges to {}", exchanges.len(), path.display());
            println!("{} {} exchanges to {}", "Exported".green(), exchanges.len(), path.display());
        }
        None => print_history(&exchanges),
    }
    Ok(0)
}

fn handle_clear_command(session: &str, config: &Config) -> Result<i32> {
    let store = open_store(config)?;
    store.remove(session).context(format!("Failed to clear session {}", session))?;
    info!("Cleared session {}", session);
    println!("{} {}", "Cleared session:".yellow(), session);
    Ok(0)
}

async fn handle_schema_command(config: &Config) -> Result<i32> {
    let source = open_database(config);
    let tables = describe(&source, config).await?;
    if tables.is_empty() {
        println!("{}", "No tables found".yellow());
    } else {
        println!("{}", render_schema(&tables));
    }
    Ok(0)
}

fn print_result(result: &LoopResult, verbose: bool) {
    if let Some(statement) = &result.final_statement {
        println!("{}\n{}\n", "SQL:".cyan().bold(), statement);
    }

    match &result.outcome {
        TurnOutcome::Success(success) => {
            print_table(&success.rows);
            println!("\n{}", success.summary().green());
        }
        TurnOutcome::Failure { kind, message } => {
            println!("{} {}", format!("{}:", kind).red().bold(), message);
        }
    }

    if verbose {
        let plural = if result.attempts_used == 1 { "" } else { "s" };
        println!("{}", format!("({} attempt{})", result.attempts_used, plural).dimmed());
    }
}

fn print_history(exchanges: &[Exchange]) {
    if exchanges.is_empty() {
        println!("{}", "No history".dimmed());
        return;
    }
    for (i, exchange) in exchanges.iter().enumerate() {
        println!(
            "{} {} {}",
            format!("{}.", i + 1).bold(),
            exchange.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            exchange.utterance
        );
        if let Some(statement) = &exchange.generated_statement {
            println!("   {}", statement.cyan());
        }
        match &exchange.outcome {
            ExchangeOutcome::Success(summary) => println!("   {}", summary.green()),
            ExchangeOutcome::Failure { kind, message } => println!("   {} {}", format!("{}:", kind).red(), message),
        }
    }
}

fn cell_text(value: &Value) -> String {
    let text = match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() > MAX_CELL_WIDTH {
        let cut: String = text.chars().take(MAX_CELL_WIDTH - 3).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

fn print_table(rows: &QueryRows) {
    if rows.columns.is_empty() {
        return;
    }

    let cells: Vec<Vec<String>> = rows.rows.iter().map(|row| row.iter().map(cell_text).collect()).collect();
    let mut widths: Vec<usize> = rows.columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header: Vec<String> = rows
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect();
    println!("{}", header.join(" | ").bold());
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", rule.join("-+-"));

    for row in &cells {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect();
        println!("{}", line.join(" | "));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    let code = run_application(&cli, &config).await.context("Application failed")?;
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

//! Command handlers for CLI operations
//!
//! [`Engine::open`] is the composition root: it opens the database, builds
//! the classifier factory and wires the assistant. Each handler opens an
//! engine, runs one command and shuts the engine down again.

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::capability::ClientFactory;
use crate::conductor::{Assistant, Capabilities, CancellationToken};
use crate::config::Config;
use crate::db::{CatalogSeed, Database};
use sdk::errors::{EngineError, EngineErrorExt, EntityKind};
use sdk::response::Response;
use sdk::session::{context_from_json, ContextMap};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Everything a command needs, built once per process
pub struct Engine {
    pub db: Database,
    pub factory: ClientFactory,
    pub assistant: Assistant,
}

impl Engine {
    pub async fn open(config: &Config) -> Result<Self> {
        let db_path = config.database_path();
        let db = Database::new(&db_path)
            .await
            .context("Failed to open database")?;

        let factory = ClientFactory::new();
        let capabilities = Capabilities::from_config(&db, config, &factory)?;
        let assistant = Assistant::new(&db, config, capabilities);

        Ok(Self {
            db,
            factory,
            assistant,
        })
    }

    /// Release cached clients and flush the database
    pub async fn shutdown(self) -> Result<()> {
        self.factory.shutdown();
        drop(self.assistant);
        self.db.close().await.context("Failed to close database")?;
        Ok(())
    }
}

/// Attach the user-facing hint to an engine error
fn report(error: EngineError) -> anyhow::Error {
    let hint = error.user_hint().to_string();
    anyhow::Error::new(error).context(hint)
}

/// Parse a `--context` argument into a context map
pub fn parse_context(raw: Option<&str>) -> Result<Option<ContextMap>> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let value: serde_json::Value =
        serde_json::from_str(raw).context("--context must be valid JSON")?;
    if !value.is_object() {
        bail!("--context must be a JSON object");
    }
    Ok(Some(context_from_json(value)))
}

fn print_response(response: &Response, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("{}", response.text);
            println!(
                "  session {} | intention {} ({}) | plans {} | context v{}",
                response.metadata.session_id,
                response.metadata.intention_id,
                response.data.intention.primary.primary_intent,
                response.metadata.plan_ids.len(),
                response.metadata.context_version
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?);
        }
    }
    Ok(())
}

/// Answer one completion request
pub async fn handle_complete(
    query: String,
    session: Option<String>,
    context: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let context = parse_context(context.as_deref())?;
    let engine = Engine::open(config).await?;

    let outcome = engine
        .assistant
        .complete(&query, context, session.as_deref())
        .await;
    engine.shutdown().await?;

    print_response(&outcome.map_err(report)?, format)
}

/// Line-oriented chat bound to one session
///
/// Ctrl-C cancels the turn in flight; the running stage still completes.
pub async fn handle_chat(
    session: Option<String>,
    context: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let mut pending_context = parse_context(context.as_deref())?;
    let engine = Engine::open(config).await?;
    let mut session_id = session;

    if matches!(format, OutputFormat::Text) {
        println!("Type a message, or 'exit' to quit.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message, "exit" | "quit") {
            break;
        }

        let cancel = CancellationToken::new();
        let outcome = {
            let turn = engine.assistant.chat_cancellable(
                message,
                session_id.as_deref(),
                pending_context.take(),
                &cancel,
            );
            tokio::pin!(turn);

            tokio::select! {
                outcome = &mut turn => outcome,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    turn.await
                }
            }
        };

        match outcome {
            Ok(response) => {
                session_id = Some(response.metadata.session_id.clone());
                print_response(&response, format)?;
            }
            Err(e) if e.is_not_found(EntityKind::Session) => {
                engine.shutdown().await?;
                return Err(report(e));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Chat turn failed");
                eprintln!("{}", e.user_hint());
            }
        }
    }

    engine.shutdown().await
}

/// Show the chat history of a session
pub async fn handle_history(session_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::open(config).await?;
    let outcome = engine.assistant.get_history(&session_id).await;
    engine.shutdown().await?;
    let turns = outcome.map_err(report)?;

    match format {
        OutputFormat::Text => {
            if turns.is_empty() {
                println!("No turns in session {}", session_id);
                return Ok(());
            }

            println!("Session {} ({} turns):", session_id, turns.len());
            println!();

            for turn in &turns {
                let at = chrono::DateTime::from_timestamp_millis(turn.user_at)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Unknown".to_string());

                println!("#{} [{}] context v{}", turn.sequence, at, turn.context_version);
                println!("  You: {}", turn.user_input);
                println!("  Assistant: {}", turn.assistant_output);
                if !turn.plan_ids.is_empty() {
                    println!("  Plans: {}", turn.plan_ids.join(", "));
                }
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "session_id": session_id,
                "turns": turns,
                "count": turns.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

pub async fn handle_end(session_id: String, config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::open(config).await?;
    let outcome = engine.assistant.end_session(&session_id).await;
    engine.shutdown().await?;
    let ended = outcome.map_err(report)?;

    match format {
        OutputFormat::Text if ended => println!("Session {} ended", session_id),
        OutputFormat::Text => println!("Session {} was not active", session_id),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "session_id": session_id, "ended": ended }))?
        ),
    }
    Ok(())
}

pub async fn handle_sweep(config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::open(config).await?;
    let outcome = engine.assistant.sweep_expired().await;
    engine.shutdown().await?;
    let count = outcome.map_err(report)?;

    match format {
        OutputFormat::Text => println!(
            "Ended {} idle session{} (timeout {} minutes)",
            count,
            if count == 1 { "" } else { "s" },
            config.session.timeout_minutes
        ),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "expired": count }))?
        ),
    }
    Ok(())
}

pub async fn handle_sessions(config: &Config, format: OutputFormat) -> Result<()> {
    let engine = Engine::open(config).await?;
    let outcome = engine.assistant.active_sessions().await;
    engine.shutdown().await?;
    let sessions = outcome.map_err(report)?;

    match format {
        OutputFormat::Text => {
            if sessions.is_empty() {
                println!("No active sessions");
            }
            for id in &sessions {
                println!("{}", id);
            }
        }
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "sessions": sessions, "count": sessions.len() }))?
        ),
    }
    Ok(())
}

/// Load a catalog seed file into the semantic layer
pub async fn handle_catalog_load(file: &Path, config: &Config, format: OutputFormat) -> Result<()> {
    let seed = CatalogSeed::from_path(file)
        .map_err(report)
        .with_context(|| format!("Failed to read catalog file {}", file.display()))?;

    let engine = Engine::open(config).await?;
    let outcome = engine.db.catalog().load_seed(&seed).await;
    engine.shutdown().await?;
    let summary = outcome.map_err(report)?;

    match format {
        OutputFormat::Text => println!(
            "Loaded {} databases, {} tables, {} columns, {} examples",
            summary.databases, summary.tables, summary.columns, summary.examples
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    Ok(())
}

/// List catalog databases, or the tables of one database
pub async fn handle_catalog_list(
    database: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let engine = Engine::open(config).await?;
    let catalog = engine.db.catalog();

    let output = match &database {
        None => {
            let databases = catalog.list_databases().await.map_err(report)?;
            match format {
                OutputFormat::Text => {
                    if databases.is_empty() {
                        println!("Catalog is empty. Load one with `nlsql catalog load <file>`");
                    }
                    for db in &databases {
                        println!("{}  {}", db.database_name, db.description);
                    }
                    None
                }
                OutputFormat::Json => Some(json!({ "databases": databases })),
            }
        }
        Some(name) => {
            if catalog.get_database(name).await.map_err(report)?.is_none() {
                engine.shutdown().await?;
                bail!("Database '{}' is not in the catalog", name);
            }
            let tables = catalog.list_tables(name).await.map_err(report)?;
            match format {
                OutputFormat::Text => {
                    for table in &tables {
                        println!("{}.{}  {}", name, table.table_name, table.description);
                    }
                    None
                }
                OutputFormat::Json => Some(json!({ "database": name, "tables": tables })),
            }
        }
    };

    engine.shutdown().await?;
    if let Some(output) = output {
        println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Ok(())
}

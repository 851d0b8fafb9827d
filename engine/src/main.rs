// nlsql natural-language-to-SQL assistant
// Main entry point for the nlsql binary

use clap::Parser;
use nlsql_engine::cli::{CatalogAction, Cli, Command};
use nlsql_engine::config::Config;
use nlsql_engine::handlers::{
    handle_catalog_list, handle_catalog_load, handle_chat, handle_complete, handle_end,
    handle_history, handle_sessions, handle_sweep, OutputFormat,
};
use nlsql_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let loaded = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path),
        None => Config::load_or_create(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            tracing::error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    // --log wins over the config file; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("nlsql v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Complete {
            query,
            session,
            context,
        } => handle_complete(query, session, context, &config, format).await,

        Command::Chat { session, context } => handle_chat(session, context, &config, format).await,

        Command::History { session_id } => handle_history(session_id, &config, format).await,

        Command::End { session_id } => handle_end(session_id, &config, format).await,

        Command::Sweep => handle_sweep(&config, format).await,

        Command::Sessions => handle_sessions(&config, format).await,

        Command::Catalog { action } => match action {
            CatalogAction::Load { file } => handle_catalog_load(&file, &config, format).await,
            CatalogAction::List { database } => {
                handle_catalog_list(database, &config, format).await
            }
        },
    }
}

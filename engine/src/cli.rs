//! CLI interface for nlsql
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for driving the assistant.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// nlsql natural-language-to-SQL assistant
///
/// Analyses requests, enriches them with catalog metadata and plans the
/// work needed to answer them, keeping conversation state in local sessions.
#[derive(Parser, Debug)]
#[command(name = "nlsql")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a single completion request
    Complete {
        /// The request text
        query: String,

        /// Continue an existing session
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Context as a JSON object, e.g. '{"database_name":"sales"}'
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },

    /// Start an interactive chat bound to one session
    Chat {
        /// Resume an existing session
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Context as a JSON object, applied before the first message
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },

    /// Show the chat history of a session
    History {
        /// Session ID
        session_id: String,
    },

    /// End a session
    End {
        /// Session ID
        session_id: String,
    },

    /// End every session idle past the configured timeout
    Sweep,

    /// List active sessions
    Sessions,

    /// Manage the semantic-layer catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
}

/// Catalog management actions
#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// Load databases, tables, columns and examples from a JSON file
    Load {
        /// Path to the catalog JSON file
        file: PathBuf,
    },

    /// List databases, or the tables of one database
    List {
        /// Database name
        database: Option<String>,
    },
}

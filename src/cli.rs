//! Command-line interface definition for ChatRelay
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run the relay and to inspect the message log.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ChatRelay - real-time relay between chat clients and an agent service
#[derive(Parser, Debug, Clone)]
#[command(name = "chatrelay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the message log database path
    #[arg(long, env = "CHATRELAY_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for ChatRelay
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the relay server (WebSocket gateway and HTTP routes)
    Serve {
        /// Interface to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show persisted messages for a user
    History {
        /// User identifier
        #[arg(short, long)]
        user: String,

        /// Maximum number of records to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Print records as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            db_path: None,
            command: Commands::Serve {
                host: None,
                port: None,
            },
        }
    }
}

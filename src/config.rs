//! Configuration management for ChatRelay
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::cli::{Cli, Commands};
use crate::error::{Result, RelayError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for ChatRelay
///
/// Every section has serde defaults, so an empty YAML document is a valid
/// configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener and HTTP surface settings
    #[serde(default)]
    pub server: ServerConfig,
    /// External agent service settings
    #[serde(default)]
    pub agent: AgentConfig,
    /// Session and context lifetime settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Message log settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Reply persistence limits
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Suggested intents served by `GET /intents`
    #[serde(default = "default_intents")]
    pub intents: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_intents() -> Vec<String> {
    vec![
        "Search for a Property".to_string(),
        "Show RE developers".to_string(),
        "Show home Service".to_string(),
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            intents: default_intents(),
        }
    }
}

/// External agent service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Webhook URL of the agent service
    #[serde(default = "default_agent_url")]
    pub url: String,

    /// Bounded wait for a single agent call (seconds)
    #[serde(default = "default_agent_timeout")]
    pub timeout_seconds: u64,
}

fn default_agent_url() -> String {
    "http://localhost:5678/webhook/chatbotllm".to_string()
}

fn default_agent_timeout() -> u64 {
    60
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: default_agent_url(),
            timeout_seconds: default_agent_timeout(),
        }
    }
}

impl AgentConfig {
    /// Agent call timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Session and context store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lifetime of a session record after its last refresh (seconds)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    /// Lifetime of a context log after its last append (seconds)
    #[serde(default = "default_context_ttl")]
    pub context_ttl_seconds: u64,

    /// Optional cap on context entries; oldest entries are dropped first
    #[serde(default)]
    pub max_context_entries: Option<usize>,

    /// Interval between sweeps of expired keys (seconds)
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
}

fn default_session_ttl() -> u64 {
    600
}

fn default_context_ttl() -> u64 {
    3600
}

fn default_purge_interval() -> u64 {
    60
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: default_session_ttl(),
            context_ttl_seconds: default_context_ttl(),
            max_context_entries: None,
            purge_interval_seconds: default_purge_interval(),
        }
    }
}

impl SessionConfig {
    /// Session TTL as a `Duration`
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    /// Context TTL as a `Duration`
    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_seconds)
    }
}

/// Message log configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database path; the platform data directory is used when unset
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

/// Reply persistence limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum serialized response length stored in the message log (characters)
    #[serde(default = "default_max_response_chars")]
    pub max_response_chars: usize,

    /// Length of the prefix kept inside a truncation wrapper (characters)
    #[serde(default = "default_truncated_prefix_chars")]
    pub truncated_prefix_chars: usize,
}

fn default_max_response_chars() -> usize {
    65_000
}

fn default_truncated_prefix_chars() -> usize {
    64_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_response_chars: default_max_response_chars(),
            truncated_prefix_chars: default_truncated_prefix_chars(),
        }
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("CHATRELAY_AGENT_URL") {
            self.agent.url = url;
        }

        if let Ok(timeout) = std::env::var("CHATRELAY_AGENT_TIMEOUT_SECONDS") {
            match timeout.parse() {
                Ok(v) => self.agent.timeout_seconds = v,
                Err(_) => tracing::warn!("Invalid CHATRELAY_AGENT_TIMEOUT_SECONDS: {}", timeout),
            }
        }

        if let Ok(host) = std::env::var("CHATRELAY_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("CHATRELAY_PORT") {
            match port.parse() {
                Ok(v) => self.server.port = v,
                Err(_) => tracing::warn!("Invalid CHATRELAY_PORT: {}", port),
            }
        }

        if let Ok(ttl) = std::env::var("CHATRELAY_SESSION_TTL_SECONDS") {
            match ttl.parse() {
                Ok(v) => self.session.session_ttl_seconds = v,
                Err(_) => tracing::warn!("Invalid CHATRELAY_SESSION_TTL_SECONDS: {}", ttl),
            }
        }

        if let Ok(ttl) = std::env::var("CHATRELAY_CONTEXT_TTL_SECONDS") {
            match ttl.parse() {
                Ok(v) => self.session.context_ttl_seconds = v,
                Err(_) => tracing::warn!("Invalid CHATRELAY_CONTEXT_TTL_SECONDS: {}", ttl),
            }
        }

        if let Ok(db_path) = std::env::var("CHATRELAY_DB_PATH") {
            tracing::debug!(db_path = %db_path, "Env override: CHATRELAY_DB_PATH");
            self.storage.db_path = Some(PathBuf::from(db_path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(db_path) = &cli.db_path {
            self.storage.db_path = Some(db_path.clone());
        }

        if let Commands::Serve { host, port } = &cli.command {
            if let Some(host) = host {
                self.server.host = host.clone();
            }
            if let Some(port) = port {
                self.server.port = *port;
            }
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.agent.url.trim().is_empty() {
            return Err(RelayError::Config("agent.url cannot be empty".to_string()).into());
        }

        let parsed = url::Url::parse(&self.agent.url)
            .map_err(|e| RelayError::Config(format!("agent.url is not a valid URL: {}", e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(RelayError::Config(format!(
                "agent.url must use http or https, got {}",
                parsed.scheme()
            ))
            .into());
        }

        if self.agent.timeout_seconds == 0 {
            return Err(
                RelayError::Config("agent.timeout_seconds must be greater than 0".to_string())
                    .into(),
            );
        }

        if self.session.session_ttl_seconds == 0 || self.session.context_ttl_seconds == 0 {
            return Err(RelayError::Config(
                "session and context TTLs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.session.max_context_entries == Some(0) {
            return Err(RelayError::Config(
                "session.max_context_entries must be greater than 0 when set".to_string(),
            )
            .into());
        }

        if self.session.purge_interval_seconds == 0 {
            return Err(RelayError::Config(
                "session.purge_interval_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.dispatcher.truncated_prefix_chars >= self.dispatcher.max_response_chars {
            return Err(RelayError::Config(
                "dispatcher.truncated_prefix_chars must be smaller than max_response_chars"
                    .to_string(),
            )
            .into());
        }

        Ok(())
    }
}

//! Command handlers for ChatRelay
//!
//! This module contains the handlers behind each CLI subcommand.

pub mod history;

/// Relay server command
pub mod serve {
    use crate::config::Config;
    use crate::error::Result;
    use crate::gateway;

    /// Start the relay with the resolved configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any component fails to start or the server
    /// stops abnormally.
    pub async fn run_serve(config: Config) -> Result<()> {
        tracing::info!(
            host = %config.server.host,
            port = config.server.port,
            session_ttl_secs = config.session.session_ttl_seconds,
            context_ttl_secs = config.session.context_ttl_seconds,
            max_context_entries = ?config.session.max_context_entries,
            "Starting relay"
        );
        gateway::serve(config).await
    }
}

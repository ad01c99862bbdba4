//! ChatRelay - real-time relay between chat clients and an agent service
//!
//! Clients send messages over a WebSocket (or `POST /chat`); each message
//! is persisted, forwarded with the user's recent context to an external
//! agent over HTTP, and the agent's answer is persisted and delivered back
//! to every connection subscribed to that user.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `store`: Expiring key/value store, session store, and context store
//! - `agent`: HTTP bridge to the external agent service
//! - `storage`: SQLite message log
//! - `dispatcher`: Per-message pipeline tying the above together
//! - `gateway`: WebSocket connections, channels, and HTTP routes
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use chatrelay::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/config.yaml", &Default::default())?;
//!     config.validate()?;
//!     chatrelay::gateway::serve(config).await
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use agent::{AgentClient, AgentResult, HttpAgentClient};
pub use config::Config;
pub use dispatcher::{DispatchOutcome, InboundMessage, MessageDispatcher, Origin};
pub use error::{RelayError, Result};
pub use gateway::{AppState, Broadcaster, ChannelRegistry};
pub use storage::{MessageLog, MessageRecord, SqliteMessageLog};
pub use store::{ContextStore, KeyValueStore, MemoryStore, SessionStore};

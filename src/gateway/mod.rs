//! Real-time gateway for ChatRelay
//!
//! Clients hold a WebSocket to `/ws` and exchange JSON frames of the form
//! `{"event": "...", "data": ...}`. Each user id names a broadcast channel;
//! connections join the channel of the user they speak for and every reply
//! for that user is emitted to the channel.
//!
//! The dispatcher only sees the `Broadcaster` trait, so it can be driven
//! without a live socket.

pub mod channels;
pub mod server;
pub mod ws;

pub use channels::ChannelRegistry;
pub use server::{router, serve, AppState};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event frame on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name
    pub event: String,
    /// Event payload
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Build a frame
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Channel membership and event emission
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Add connection `connection_id` to `channel`; joining twice is a no-op
    async fn join(&self, connection_id: &str, channel: &str) -> Result<()>;

    /// Emit `event` to every connection in `channel`
    ///
    /// A channel with no listeners is not an error: the event is dropped.
    async fn emit(&self, channel: &str, event: &str, payload: Value) -> Result<()>;

    /// Emit `event` to a single connection
    async fn emit_to_connection(&self, connection_id: &str, event: &str, payload: Value)
        -> Result<()>;
}

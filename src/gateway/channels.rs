//! Connection and channel registry
//!
//! Each live connection owns an unbounded sender feeding its socket write
//! loop. Channels are sets of connection ids keyed by user id. A closed
//! sender is skipped on emit; the connection's own read loop unregisters it.

use super::{Broadcaster, Frame};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::RwLock;
use tracing::{debug, warn};

struct ConnectedClient {
    sender: UnboundedSender<String>,
    channels: HashSet<String>,
}

impl ConnectedClient {
    /// Queue a serialized frame; false if the write loop has gone away
    fn send(&self, text: &str) -> bool {
        self.sender.send(text.to_string()).is_ok()
    }
}

#[derive(Default)]
struct RegistryInner {
    clients: HashMap<String, ConnectedClient>,
    channels: HashMap<String, HashSet<String>>,
}

/// In-process broadcaster over live WebSocket connections
#[derive(Default)]
pub struct ChannelRegistry {
    inner: RwLock<RegistryInner>,
}

impl ChannelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and the sender feeding its socket
    pub async fn register(&self, connection_id: &str, sender: UnboundedSender<String>) {
        let mut inner = self.inner.write().await;
        inner.clients.insert(
            connection_id.to_string(),
            ConnectedClient {
                sender,
                channels: HashSet::new(),
            },
        );
        debug!(connection_id, clients = inner.clients.len(), "Connection registered");
    }

    /// Drop a connection and all of its channel memberships
    ///
    /// Returns the channels the connection had joined.
    pub async fn unregister(&self, connection_id: &str) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let Some(client) = inner.clients.remove(connection_id) else {
            return Vec::new();
        };
        for channel in &client.channels {
            remove_member(&mut inner.channels, channel, connection_id);
        }
        debug!(connection_id, clients = inner.clients.len(), "Connection unregistered");
        client.channels.into_iter().collect()
    }

    /// Remove a connection from one channel; leaving a channel it never joined is a no-op
    pub async fn leave(&self, connection_id: &str, channel: &str) {
        let mut inner = self.inner.write().await;
        if let Some(client) = inner.clients.get_mut(connection_id) {
            client.channels.remove(channel);
        }
        remove_member(&mut inner.channels, channel, connection_id);
    }

    /// Number of connections currently in `channel`
    pub async fn channel_size(&self, channel: &str) -> usize {
        self.inner
            .read()
            .await
            .channels
            .get(channel)
            .map_or(0, HashSet::len)
    }

    /// Number of registered connections
    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }
}

fn remove_member(channels: &mut HashMap<String, HashSet<String>>, channel: &str, connection_id: &str) {
    if let Some(members) = channels.get_mut(channel) {
        members.remove(connection_id);
        if members.is_empty() {
            channels.remove(channel);
        }
    }
}

fn encode(event: &str, payload: Value) -> Result<String> {
    Ok(serde_json::to_string(&Frame::new(event, payload))?)
}

#[async_trait]
impl Broadcaster for ChannelRegistry {
    async fn join(&self, connection_id: &str, channel: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        let client = inner.clients.get_mut(connection_id).ok_or_else(|| {
            RelayError::Delivery(format!("Unknown connection: {}", connection_id))
        })?;
        if client.channels.insert(channel.to_string()) {
            inner
                .channels
                .entry(channel.to_string())
                .or_default()
                .insert(connection_id.to_string());
            debug!(connection_id, channel, "Joined channel");
        }
        Ok(())
    }

    async fn emit(&self, channel: &str, event: &str, payload: Value) -> Result<()> {
        let text = encode(event, payload)?;
        let inner = self.inner.read().await;
        let Some(members) = inner.channels.get(channel) else {
            debug!(channel, event, "No listeners, dropping event");
            return Ok(());
        };

        let mut delivered = 0usize;
        for connection_id in members {
            match inner.clients.get(connection_id) {
                Some(client) if client.send(&text) => delivered += 1,
                _ => debug!(channel, connection_id = %connection_id, "Skipping closed connection"),
            }
        }
        debug!(channel, event, listeners = members.len(), delivered, "Event emitted");
        Ok(())
    }

    async fn emit_to_connection(&self, connection_id: &str, event: &str, payload: Value) -> Result<()> {
        let text = encode(event, payload)?;
        let inner = self.inner.read().await;
        let client = inner.clients.get(connection_id).ok_or_else(|| {
            RelayError::Delivery(format!("Unknown connection: {}", connection_id))
        })?;
        if !client.send(&text) {
            warn!(connection_id, event, "Connection closed before event could be sent");
            return Err(RelayError::Delivery(format!("Connection closed: {}", connection_id)).into());
        }
        Ok(())
    }
}

//! Agent module for ChatRelay
//!
//! The bridge to the external reasoning service. The service is an opaque
//! request/response endpoint; this module only shapes the request and turns
//! whatever comes back (or fails to) into a document.

pub mod http;
pub mod types;

pub use http::HttpAgentClient;
pub use types::{AgentRequest, AgentResult};

use async_trait::async_trait;

/// Request/response bridge to the agent service
///
/// Implementations must never fail: every error is reported as an
/// `AgentResult::Failure` document so the caller can persist and deliver it.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Send one query with its context and wait for the agent's answer
    ///
    /// # Arguments
    ///
    /// * `user_id` - Requesting user
    /// * `query` - Inbound message text
    /// * `context` - Prior conversation turns, oldest first
    /// * `session_id` - Optional conversation correlation token
    async fn invoke(
        &self,
        user_id: &str,
        query: &str,
        context: &[String],
        session_id: Option<&str>,
    ) -> AgentResult;
}

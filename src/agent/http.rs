//! HTTP bridge to the agent service
//!
//! Posts one JSON request per inbound message and converts every failure
//! mode (transport, timeout, non-2xx status, empty body, malformed body)
//! into an `AgentResult::Failure` document. Nothing is retried.

use super::{AgentClient, AgentRequest, AgentResult};
use crate::error::{Result, RelayError};
use crate::metrics::AgentCallMetrics;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Agent client over HTTP
///
/// Holds one long-lived `reqwest::Client`; construct once at startup and
/// share it across all pipelines.
///
/// # Examples
///
/// ```
/// use chatrelay::agent::HttpAgentClient;
/// use std::time::Duration;
///
/// let client = HttpAgentClient::new("http://localhost:5678/webhook/chat", Duration::from_secs(60));
/// assert!(client.is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpAgentClient {
    /// Create a client for the agent at `url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be initialized
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chatrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RelayError::Agent(format!("Failed to create HTTP client: {}", e)))?;

        tracing::info!(url = %url, timeout_secs = timeout.as_secs(), "Initialized agent client");

        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    /// Configured agent URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Configured call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(&self, request: &AgentRequest) -> (AgentResult, Option<&'static str>) {
        let response = match self.client.post(&self.url).json(request).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return (
                    AgentResult::failure(
                        "Request timed out",
                        Some(format!("no response within {}s: {}", self.timeout.as_secs(), e)),
                        None,
                        Some(request),
                    ),
                    Some("timeout"),
                );
            }
            Err(e) => {
                return (
                    AgentResult::failure("Request error", Some(e.to_string()), None, Some(request)),
                    Some("transport"),
                );
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "transport" };
                return (
                    AgentResult::failure(
                        "Failed to read agent response",
                        Some(e.to_string()),
                        None,
                        Some(request),
                    ),
                    Some(kind),
                );
            }
        };

        if !status.is_success() {
            return (
                AgentResult::failure(
                    format!("Agent returned HTTP {}", status.as_u16()),
                    status.canonical_reason().map(str::to_string),
                    Some(&body),
                    Some(request),
                ),
                Some("status"),
            );
        }

        if body.trim().is_empty() {
            return (
                AgentResult::failure("Empty response from agent", None, None, Some(request)),
                Some("empty"),
            );
        }

        match serde_json::from_str(&body) {
            Ok(doc) => (AgentResult::Reply(doc), None),
            Err(e) => (
                AgentResult::failure(
                    "Invalid JSON response from agent",
                    Some(e.to_string()),
                    Some(&body),
                    Some(request),
                ),
                Some("malformed"),
            ),
        }
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn invoke(
        &self,
        user_id: &str,
        query: &str,
        context: &[String],
        session_id: Option<&str>,
    ) -> AgentResult {
        let request = AgentRequest::new(user_id, query, context, session_id);
        let metrics = AgentCallMetrics::start();

        tracing::debug!(
            user_id,
            context_len = context.len(),
            "Sending query to agent"
        );

        let (result, error_kind) = self.call(&request).await;
        metrics.finish(error_kind);

        if let Some(kind) = error_kind {
            tracing::warn!(user_id, kind, "Agent call failed");
        }
        result
    }
}

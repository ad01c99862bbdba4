//! Wire types for the external agent service

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Longest raw response body echoed back inside an error document
const MAX_RAW_RESPONSE_CHARS: usize = 4096;

/// Request body posted to the agent service
///
/// Field names are a wire contract with an independently deployed service
/// and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Requesting user, always sent as a string
    pub user_id: String,
    /// Raw query text
    pub user_query: String,
    /// Prior conversation turns, oldest first
    pub context: Vec<String>,
    /// Conversation correlation token
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentRequest {
    /// Build a request for one inbound message
    pub fn new(
        user_id: impl ToString,
        query: &str,
        context: &[String],
        session_id: Option<&str>,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            user_query: query.to_string(),
            context: context.to_vec(),
            session_id: session_id.map(str::to_string),
        }
    }
}

/// Outcome of one agent call
///
/// Both variants carry a JSON document. Failures are data, never errors:
/// a `Failure` document always has an `"error"` key plus whichever of
/// `details`, `raw_response`, and `payload_sent` apply.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentResult {
    /// Document returned by the agent
    Reply(Value),
    /// Structured description of a failed call
    Failure(Value),
}

impl AgentResult {
    /// Build a failure document
    ///
    /// # Arguments
    ///
    /// * `error` - Short failure discriminator
    /// * `details` - Diagnostic detail, usually the underlying error text
    /// * `raw_response` - Response body as received, when there was one
    /// * `payload_sent` - The request that was attempted
    pub fn failure(
        error: impl Into<String>,
        details: Option<String>,
        raw_response: Option<&str>,
        payload_sent: Option<&AgentRequest>,
    ) -> Self {
        let mut doc = Map::new();
        doc.insert("error".to_string(), Value::String(error.into()));
        if let Some(details) = details {
            doc.insert("details".to_string(), Value::String(details));
        }
        if let Some(raw) = raw_response {
            let raw: String = raw.chars().take(MAX_RAW_RESPONSE_CHARS).collect();
            doc.insert("raw_response".to_string(), Value::String(raw));
        }
        if let Some(payload) = payload_sent {
            doc.insert(
                "payload_sent".to_string(),
                serde_json::to_value(payload).unwrap_or_else(|_| json!(null)),
            );
        }
        Self::Failure(Value::Object(doc))
    }

    /// Whether the call failed
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Borrow the carried document
    pub fn document(&self) -> &Value {
        match self {
            Self::Reply(doc) | Self::Failure(doc) => doc,
        }
    }

    /// Take the carried document
    pub fn into_document(self) -> Value {
        match self {
            Self::Reply(doc) | Self::Failure(doc) => doc,
        }
    }

    /// Follow-up query suggested by the agent, if any
    ///
    /// Only a successful object reply with a string `query` field counts.
    pub fn follow_up_query(&self) -> Option<&str> {
        match self {
            Self::Reply(Value::Object(map)) => map.get("query").and_then(Value::as_str),
            _ => None,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One inbound message and the agent response it produced
///
/// A record with `ai_response == None` is valid: it was persisted before the
/// agent call and the process stopped before the response was recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Store-assigned identifier, also the `q_id` echoed to the client
    pub id: i64,
    /// Sending user
    pub user_id: String,
    /// Inbound text
    pub message: String,
    /// Serialized response document, once recorded
    pub ai_response: Option<String>,
    /// When the inbound message was persisted
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Whether the response phase has completed
    pub fn is_answered(&self) -> bool {
        self.ai_response.is_some()
    }
}

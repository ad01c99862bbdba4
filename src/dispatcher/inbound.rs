//! Inbound message parsing and validation

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Why an inbound payload was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No usable `user_id`
    #[error("Missing user_id or message")]
    MissingUserId,

    /// No usable message text
    #[error("Missing user_id or message")]
    MissingMessage,

    /// Payload is neither an object nor a string
    #[error("Malformed payload: expected an object or a string, got {0}")]
    Malformed(&'static str),
}

/// Kind of question a message answers or opens
///
/// The set is open: unrecognized values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionType {
    /// Starts a new question
    New,
    /// Cross-reference to another question
    Cross,
    /// Emoji reaction
    Emoji,
    /// User is leaving the conversation
    Quit,
    /// Reply to a prior question
    Reply,
    /// Any other client-defined type
    Other(String),
}

impl QuestionType {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "new" => Self::New,
            "cross" => Self::Cross,
            "emoji" => Self::Emoji,
            "quit" => Self::Quit,
            "reply" => Self::Reply,
            _ => Self::Other(raw.to_string()),
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Cross => write!(f, "cross"),
            Self::Emoji => write!(f, "emoji"),
            Self::Quit => write!(f, "quit"),
            Self::Reply => write!(f, "reply"),
            Self::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// A validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Sending user, string-coerced
    pub user_id: String,
    /// Query text
    pub message: String,
    /// Passthrough emoji metadata
    pub emoji_type: Option<String>,
    /// Prior-question correlation, string or number
    pub q_id: Option<Value>,
    /// Question type
    pub q_type: Option<QuestionType>,
    /// Conversation correlation token forwarded to the agent
    pub session_id: Option<String>,
}

impl InboundMessage {
    /// Parse and validate a raw inbound payload
    ///
    /// Accepts an object carrying `user_id` and `message` (`query` is read
    /// when `message` is absent), or a bare string, which is taken as the
    /// message text and is therefore always missing its user id.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` when the user id or message text is
    /// missing or empty, or the payload has the wrong shape.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatrelay::dispatcher::InboundMessage;
    /// use serde_json::json;
    ///
    /// let msg = InboundMessage::parse(&json!({"user_id": 42, "message": "hello"})).unwrap();
    /// assert_eq!(msg.user_id, "42");
    ///
    /// assert!(InboundMessage::parse(&json!("hello")).is_err());
    /// ```
    pub fn parse(raw: &Value) -> Result<Self, ValidationError> {
        let obj = match raw {
            Value::Object(obj) => obj,
            Value::String(_) => return Err(ValidationError::MissingUserId),
            Value::Null => return Err(ValidationError::Malformed("null")),
            Value::Bool(_) => return Err(ValidationError::Malformed("a boolean")),
            Value::Number(_) => return Err(ValidationError::Malformed("a number")),
            Value::Array(_) => return Err(ValidationError::Malformed("an array")),
        };

        let user_id = obj
            .get("user_id")
            .and_then(scalar_to_string)
            .filter(|id| !id.is_empty())
            .ok_or(ValidationError::MissingUserId)?;

        let message = obj
            .get("message")
            .or_else(|| obj.get("query"))
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
            .ok_or(ValidationError::MissingMessage)?
            .to_string();

        let q_id = obj
            .get("q_id")
            .filter(|v| v.is_string() || v.is_number())
            .cloned();

        Ok(Self {
            user_id,
            message,
            emoji_type: optional_str(obj.get("emoji_type")),
            q_id,
            q_type: optional_str(obj.get("q_type")).map(|t| QuestionType::parse(&t)),
            session_id: optional_str(obj.get("sessionId")),
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn optional_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

//! Response shaping: size-bounded persistence and reply correlation

use serde_json::{json, Value};

/// Size limits applied to a response before it is persisted and delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseLimits {
    /// Largest serialized response kept as-is (characters)
    pub max_chars: usize,
    /// Longest prefix kept inside a truncation wrapper (characters)
    pub prefix_chars: usize,
}

impl Default for ResponseLimits {
    fn default() -> Self {
        Self {
            max_chars: 65_000,
            prefix_chars: 64_000,
        }
    }
}

/// A response ready to persist, with the document to deliver alongside it
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedResponse {
    /// Document delivered to the client (the truncation wrapper if truncated)
    pub document: Value,
    /// Text stored in the message log
    pub serialized: String,
}

/// Serialize `document` for the message log, enforcing `limits`
///
/// A document that cannot be serialized is replaced by a fallback document
/// keeping its raw text. One whose serialized form is longer than
/// `limits.max_chars` is replaced by a wrapper
/// `{"truncated": true, "original_length": n, "content_prefix": "..."}`.
/// The prefix is shortened further if escaping would push the wrapper itself
/// past the cap.
pub fn bound_response(document: Value, limits: &ResponseLimits) -> BoundedResponse {
    let serialized = match serde_json::to_string(&document) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "Response serialization failed, storing fallback");
            let fallback = json!({
                "error": "unable to serialize response",
                "raw": format!("{:?}", document),
            });
            let text = fallback.to_string();
            return BoundedResponse {
                document: fallback,
                serialized: text,
            };
        }
    };

    let original_length = serialized.chars().count();
    if original_length <= limits.max_chars {
        return BoundedResponse {
            document,
            serialized,
        };
    }

    tracing::warn!(
        original_length,
        max = limits.max_chars,
        "Response exceeds size cap, storing truncation wrapper"
    );

    let mut prefix_len = limits.prefix_chars;
    loop {
        let prefix: String = serialized.chars().take(prefix_len).collect();
        let wrapper = json!({
            "truncated": true,
            "original_length": original_length,
            "content_prefix": prefix,
        });
        let text = wrapper.to_string();
        let wrapper_len = text.chars().count();
        if wrapper_len <= limits.max_chars || prefix_len == 0 {
            return BoundedResponse {
                document: wrapper,
                serialized: text,
            };
        }
        prefix_len = prefix_len.saturating_sub(wrapper_len - limits.max_chars);
    }
}

/// Attach the persisted message identifier to an outbound document
///
/// Objects get a `q_id` field; arrays get one on every object element. Any
/// other document is wrapped as `{"result": doc, "q_id": id}`.
pub fn correlate(document: Value, message_id: i64) -> Value {
    match document {
        Value::Object(mut map) => {
            map.insert("q_id".to_string(), json!(message_id));
            Value::Object(map)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Object(mut map) => {
                        map.insert("q_id".to_string(), json!(message_id));
                        Value::Object(map)
                    }
                    other => other,
                })
                .collect(),
        ),
        other => json!({ "result": other, "q_id": message_id }),
    }
}

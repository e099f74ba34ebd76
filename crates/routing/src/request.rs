//! Model-completion request accepted by the routing engine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::pricing::{self, DEFAULT_OUTPUT_TOKENS};

/// A single chat message. `content` is either a string or an array of
/// typed parts (`{"type":"text","text":...}`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Value,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Value::String(text.into()),
        }
    }

    /// Plain text of the message; array parts contribute their `text` fields
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            Value::Array(parts) => parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .concat(),
            _ => String::new(),
        }
    }
}

/// Model-completion request. Unknown fields are kept but do not take part in
/// routing or caching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields that identify a request for caching, in a fixed order
#[derive(Serialize)]
struct CacheKeyFields<'a> {
    model: Option<&'a str>,
    messages: &'a [ChatMessage],
    tools: &'a [Value],
    max_tokens: Option<u32>,
    stream: bool,
    temperature: f64,
}

impl ModelRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: Some(model.into()),
            messages: Some(messages),
            ..Default::default()
        }
    }

    /// All message texts joined by a single space
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .flatten()
            .map(ChatMessage::text)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn estimated_input_tokens(&self) -> u64 {
        pricing::estimate_tokens(&self.prompt_text())
    }

    pub fn estimated_output_tokens(&self) -> u64 {
        self.max_tokens
            .map(u64::from)
            .unwrap_or(DEFAULT_OUTPUT_TOKENS)
    }

    /// SHA-256 hex of the normalized request.
    ///
    /// The model is taken as requested (before any downgrade), a missing
    /// `stream` counts as `false` and a missing `temperature` as `0`.
    pub fn cache_key(&self) -> String {
        let fields = CacheKeyFields {
            model: self.model.as_deref(),
            messages: self.messages.as_deref().unwrap_or_default(),
            tools: self.tools.as_deref().unwrap_or_default(),
            max_tokens: self.max_tokens,
            stream: self.stream.unwrap_or(false),
            temperature: self.temperature.unwrap_or(0.0),
        };
        // Serializing plain structs, strings and JSON values cannot fail
        let canonical = serde_json::to_vec(&fields).unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_content_concatenates_text_parts() {
        let message: ChatMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "hello "},
                {"type": "image", "url": "https://example.com/a.png"},
                {"type": "text", "text": "world"}
            ]
        }))
        .unwrap();
        assert_eq!(message.text(), "hello world");
    }

    #[test]
    fn test_input_tokens_over_joined_messages() {
        let request = ModelRequest::new(
            "gpt-4o",
            vec![ChatMessage::user("abc"), ChatMessage::user("defg")],
        );
        // "abc defg" is 8 chars
        assert_eq!(request.prompt_text(), "abc defg");
        assert_eq!(request.estimated_input_tokens(), 2);
        assert_eq!(request.estimated_output_tokens(), 1000);
    }

    #[test]
    fn test_missing_messages_estimate_zero() {
        let request = ModelRequest::default();
        assert_eq!(request.estimated_input_tokens(), 0);
    }

    #[test]
    fn test_cache_key_applies_defaults() {
        let base = ModelRequest::new("gpt-4o", vec![ChatMessage::user("hi")]);
        let explicit = ModelRequest {
            stream: Some(false),
            temperature: Some(0.0),
            ..base.clone()
        };
        assert_eq!(base.cache_key(), explicit.cache_key());
        assert_eq!(base.cache_key().len(), 64);
    }

    #[test]
    fn test_cache_key_ignores_extra_fields() {
        let a: ModelRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "user": "alice"
        }))
        .unwrap();
        let b: ModelRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert_eq!(a.extra.get("user"), Some(&json!("alice")));
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_cache_key_distinguishes_model_and_messages() {
        let a = ModelRequest::new("gpt-4o", vec![ChatMessage::user("hi")]);
        let b = ModelRequest::new("gpt-4", vec![ChatMessage::user("hi")]);
        let c = ModelRequest::new("gpt-4o", vec![ChatMessage::user("hello")]);
        assert_ne!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
    }
}

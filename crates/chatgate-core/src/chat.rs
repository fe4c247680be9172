//! §3 Data Model: the OpenAI-shaped wire types and their internal
//! projections.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// The caller-facing request. Field names match the OpenAI wire format
/// (§6.2) via serde rename where they diverge from Rust naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,

    #[serde(default)]
    pub temperature: Option<f64>,

    #[serde(default, rename = "max_tokens")]
    pub max_tokens: Option<u32>,

    #[serde(default, rename = "top_p")]
    pub top_p: Option<f64>,

    #[serde(default, rename = "system_prompt")]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub stream: bool,

    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatRequest {
    pub const DEFAULT_TEMPERATURE: f64 = 0.7;
    pub const DEFAULT_MAX_TOKENS: u32 = 4096;

    /// §4.2 validation: clamps, not rejects, for temperature/top_p/max_tokens
    /// once the hard boundary checks (§8) have already passed.
    pub fn resolved_temperature(&self) -> f64 {
        self.temperature
            .unwrap_or(Self::DEFAULT_TEMPERATURE)
            .clamp(0.0, 2.0)
    }

    pub fn resolved_top_p(&self) -> Option<f64> {
        self.top_p.map(|p| p.clamp(0.0, 1.0))
    }

    pub fn resolved_max_tokens(&self, cap: u32) -> u32 {
        self.max_tokens
            .unwrap_or(Self::DEFAULT_MAX_TOKENS)
            .clamp(1, cap)
    }
}

/// The normalized projection passed to a driver (§3: AgentRequest).
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: Option<f64>,
    pub system_prompt: Option<String>,
    pub stream: bool,
    pub metadata: HashMap<String, serde_json::Value>,
    pub user_id: String,
    pub org_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

/// Only produced by the non-streaming path.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: FinishReason,
}

/// One unit of a streamed response. At most one terminal element per
/// stream (§3): either `error` is set, or `finish_reason` is set, never
/// neither and never both more than once.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: String,
    pub error: Option<String>,
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            error: None,
            finish_reason: None,
        }
    }

    pub fn stop() -> Self {
        Self {
            content: String::new(),
            error: None,
            finish_reason: Some(FinishReason::Stop),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: String::new(),
            error: Some(message.into()),
            finish_reason: Some(FinishReason::Error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.error.is_some() || self.finish_reason.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageOut {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessageOut,
    pub finish_reason: &'static str,
}

/// §6.2 non-streaming response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatResponse {
    pub fn new(id: String, created: i64, model: String, content: String, usage: Usage) -> Self {
        Self {
            id,
            object: "chat.completion",
            created,
            model,
            choices: vec![Choice {
                index: 0,
                message: ChatMessageOut {
                    role: "assistant",
                    content,
                },
                finish_reason: "stop",
            }],
            usage,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub context_window: u32,
    pub capabilities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_arithmetic() {
        let u = Usage::new(10, 5);
        assert_eq!(u.total_tokens, 15);
    }

    #[test]
    fn resolved_fields_clamp() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![],
            temperature: Some(5.0),
            max_tokens: Some(0),
            top_p: Some(-1.0),
            system_prompt: None,
            stream: false,
            metadata: HashMap::new(),
        };
        assert_eq!(req.resolved_temperature(), 2.0);
        assert_eq!(req.resolved_max_tokens(4096), 1);
        assert_eq!(req.resolved_top_p(), Some(0.0));
    }

    #[test]
    fn stream_chunk_terminal() {
        assert!(StreamChunk::stop().is_terminal());
        assert!(StreamChunk::error("x").is_terminal());
        assert!(!StreamChunk::content("hi").is_terminal());
    }
}

//! Chat types shared by the agent loop and providers
//!
//! A conversation is a list of [`Turn`]s, each made of [`Part`]s. Parts
//! serialize in the Messages API block format.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: String },
}

/// One side of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(rename = "content")]
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::Text { text: text.into() }],
        }
    }

    pub fn assistant(parts: Vec<Part>) -> Self {
        Self {
            role: Role::Assistant,
            parts,
        }
    }

    /// Results for the tool calls of the preceding assistant turn
    pub fn tool_results(results: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts: results,
        }
    }

    /// A user turn the human typed, as opposed to one carrying tool results
    pub fn is_user_prompt(&self) -> bool {
        self.role == Role::User && !self.parts.iter().any(|p| matches!(p, Part::ToolResult { .. }))
    }
}

/// Everything a provider needs for one model round trip
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub turns: &'a [Turn],
    pub tools: &'a [ToolDefinition],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

/// Token usage from a single API call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ChatUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub parts: Vec<Part>,
    pub stop_reason: StopReason,
    pub usage: ChatUsage,
}

impl ChatResponse {
    /// Text parts joined by newlines
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool calls to run before the model can continue. Empty unless the
    /// model stopped to use tools.
    pub fn tool_uses(&self) -> Vec<ToolUse> {
        if self.stop_reason != StopReason::ToolUse {
            return Vec::new();
        }
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::ToolUse { id, name, input } => Some(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Trait that all LLM providers implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs, e.g. `anthropic`
    fn name(&self) -> &str;

    /// Model used when an agent does not name one
    fn default_model(&self) -> &str;

    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(stop_reason: StopReason) -> ChatResponse {
        ChatResponse {
            parts: vec![
                Part::Text { text: "one".to_string() },
                Part::ToolUse {
                    id: "t".to_string(),
                    name: "x".to_string(),
                    input: Value::Null,
                },
                Part::Text { text: "two".to_string() },
            ],
            stop_reason,
            usage: ChatUsage::default(),
        }
    }

    #[test]
    fn test_text_skips_tool_calls() {
        assert_eq!(response(StopReason::EndTurn).text(), "one\ntwo");
    }

    #[test]
    fn test_tool_uses_only_when_stopped_for_tools() {
        assert!(response(StopReason::EndTurn).tool_uses().is_empty());
        let uses = response(StopReason::ToolUse).tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].name, "x");
    }

    #[test]
    fn test_turn_wire_format() {
        let turn = Turn::tool_results(vec![Part::ToolResult {
            tool_use_id: "tu_1".to_string(),
            content: "ok".to_string(),
        }]);
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert_eq!(json["content"][0]["tool_use_id"], "tu_1");
        assert!(!turn.is_user_prompt());
        assert!(Turn::user("hi").is_user_prompt());
    }

    #[test]
    fn test_unknown_stop_reason() {
        let reason: StopReason = serde_json::from_str("\"pause_turn\"").unwrap();
        assert_eq!(reason, StopReason::Other);
    }
}

//! LLM provider abstraction
//!
//! Agents talk to models through the [`LlmProvider`] trait. The Anthropic
//! Messages API is the bundled implementation.

pub mod anthropic;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use types::{ChatRequest, ChatResponse, LlmProvider, Part, ToolDefinition, Turn};

//! Shared message types for huddle-core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel tag used for messages created by the pipeline engine
pub const PIPELINE_CHANNEL: &str = "pipeline";

/// Channel tag used for messages the system generates on its own
pub const SYSTEM_CHANNEL: &str = "system";

/// What kind of message this is
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Normal conversation
    #[default]
    Chat,
    /// `@here` request asking every active agent for a status update
    StandupRequest,
    /// Aggregated standup report
    StandupResponse,
    /// Slash command addressed to the system rather than an agent
    Command,
    /// Notice generated by the orchestrator itself
    System,
    /// Visible failure attributed to one agent
    Error,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Chat => write!(f, "chat"),
            Self::StandupRequest => write!(f, "standup_request"),
            Self::StandupResponse => write!(f, "standup_response"),
            Self::Command => write!(f, "command"),
            Self::System => write!(f, "system"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Message received from a channel (web UI, CLI, pipeline, or system)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Origin tag, e.g. `web`, `cli`, `pipeline`
    pub channel: String,
    pub sender_id: String,
    /// Conversation scope the message belongs to
    pub chat_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub media: Vec<String>,
    #[serde(default)]
    pub message_type: MessageType,
    /// Agent names mentioned with `@`, when the sender resolved them up front
    #[serde(default)]
    pub mentions: Vec<String>,
    /// Agent id that must handle the message, bypassing routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_agent_id: Option<String>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            message_type: MessageType::Chat,
            mentions: Vec::new(),
            owner_agent_id: None,
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_mentions(mut self, mentions: Vec<String>) -> Self {
        self.mentions = mentions;
        self
    }

    pub fn with_owner(mut self, agent_id: impl Into<String>) -> Self {
        self.owner_agent_id = Some(agent_id.into());
        self
    }

    /// Key used to select conversational memory
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    pub fn is_standup_request(&self) -> bool {
        self.message_type == MessageType::StandupRequest
    }

    pub fn is_command(&self) -> bool {
        self.message_type == MessageType::Command
    }
}

/// Identity of the agent that produced an outbound message
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SenderAgent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Message to be delivered to a channel
///
/// Fields are private so a message cannot change after it is built; `chat_id`
/// is always copied from the inbound message that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    channel: String,
    chat_id: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(default)]
    media: Vec<String>,
    #[serde(default)]
    sender: SenderAgent,
    #[serde(default)]
    message_type: MessageType,
}

impl OutboundMessage {
    /// Reply from an agent to the given inbound message
    pub fn reply(inbound: &InboundMessage, content: impl Into<String>, sender: SenderAgent) -> Self {
        Self {
            channel: inbound.channel.clone(),
            chat_id: inbound.chat_id.clone(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            sender,
            message_type: MessageType::Chat,
        }
    }

    /// Message an agent posts on its own into a conversation it is part of
    pub fn post(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
        sender: SenderAgent,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            sender,
            message_type: MessageType::Chat,
        }
    }

    /// Notice generated by the orchestrator (no sender identity)
    pub fn system(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        Self {
            channel: inbound.channel.clone(),
            chat_id: inbound.chat_id.clone(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            sender: SenderAgent::default(),
            message_type: MessageType::System,
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn media(&self) -> &[String] {
        &self.media
    }

    pub fn sender(&self) -> &SenderAgent {
        &self.sender
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.sender.name.as_deref()
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Whether this message reports a failure instead of real agent output
    pub fn is_error(&self) -> bool {
        self.message_type == MessageType::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key() {
        let msg = InboundMessage::new("web", "alice", "chan-1", "hi");
        assert_eq!(msg.session_key(), "web:chan-1");
    }

    #[test]
    fn test_predicates() {
        let msg = InboundMessage::new("web", "alice", "c", "@here").with_type(MessageType::StandupRequest);
        assert!(msg.is_standup_request());
        assert!(!msg.is_command());

        let cmd = InboundMessage::new("cli", "alice", "c", "/unpause-all").with_type(MessageType::Command);
        assert!(cmd.is_command());
    }

    #[test]
    fn test_outbound_keeps_chat_id() {
        let inbound = InboundMessage::new("web", "alice", "chan-9", "hello");
        let sender = SenderAgent {
            id: Some("a1".to_string()),
            name: Some("Ada".to_string()),
            role: Some("developer".to_string()),
        };
        let out = OutboundMessage::reply(&inbound, "hi there", sender);
        assert_eq!(out.chat_id(), "chan-9");
        assert_eq!(out.channel(), "web");
        assert_eq!(out.sender_name(), Some("Ada"));
        assert_eq!(out.message_type(), MessageType::Chat);

        let notice = OutboundMessage::system(&inbound, "nobody home");
        assert_eq!(notice.chat_id(), "chan-9");
        assert!(notice.sender_name().is_none());
        assert_eq!(notice.message_type(), MessageType::System);
    }

    #[test]
    fn test_message_type_serde() {
        let json = serde_json::to_string(&MessageType::StandupRequest).unwrap();
        assert_eq!(json, "\"standup_request\"");
        let parsed: MessageType = serde_json::from_str("\"command\"").unwrap();
        assert_eq!(parsed, MessageType::Command);
        assert_eq!(MessageType::Error.to_string(), "error");
    }
}

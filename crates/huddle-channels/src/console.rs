//! Console transport: stdin lines in, stdout lines out

use anyhow::Result;
use async_trait::async_trait;
use huddle_core::types::{InboundMessage, MessageType, OutboundMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::channel::{InboundSink, MessageChannel};

pub const CLI_CHANNEL: &str = "cli";

/// Console channel adapter
pub struct ConsoleChannel {
    chat_id: String,
    sender_id: String,
    cancel: CancellationToken,
}

impl ConsoleChannel {
    /// `chat_id` is the conversation every typed line is posted into
    pub fn new(chat_id: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Turn one typed line into an inbound message.
///
/// `/standup [topic]` becomes an `@here` standup request, other `/` lines are
/// commands. Blank lines are ignored.
pub fn parse_line(line: &str, chat_id: &str, sender_id: &str) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix("/standup")
        && (rest.is_empty() || rest.starts_with(char::is_whitespace))
    {
        let topic = rest.trim();
        let content = if topic.is_empty() {
            "@here standup".to_string()
        } else {
            format!("@here {}", topic)
        };
        return Some(
            InboundMessage::new(CLI_CHANNEL, sender_id, chat_id, content).with_type(MessageType::StandupRequest),
        );
    }

    let msg = InboundMessage::new(CLI_CHANNEL, sender_id, chat_id, line);
    if line.starts_with('/') {
        Some(msg.with_type(MessageType::Command))
    } else {
        Some(msg)
    }
}

/// Render an outbound message for the terminal
pub fn format_outbound(msg: &OutboundMessage) -> String {
    match msg.sender_name() {
        Some(name) if !msg.is_error() => format!("[{}] {}", name, msg.content()),
        _ => msg.content().to_string(),
    }
}

#[async_trait]
impl MessageChannel for ConsoleChannel {
    async fn start(&self, inbound: InboundSink) -> Result<()> {
        let cancel = self.cancel.clone();
        let chat_id = self.chat_id.clone();
        let sender_id = self.sender_id.clone();
        info!("Console channel reading stdin into {}", chat_id);

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        let Some(msg) = parse_line(&line, &chat_id, &sender_id) else {
                            continue;
                        };
                        if let Err(e) = inbound.publish(msg).await {
                            error!("Failed to publish console input: {}", e);
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read console input: {}", e);
                        break;
                    }
                }
            }
            debug!("Console reader stopped");
        });
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<()> {
        println!("{}\n", format_outbound(&msg));
        Ok(())
    }

    fn channel_tag(&self) -> &str {
        CLI_CHANNEL
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::types::SenderAgent;

    #[test]
    fn test_parse_plain_and_blank() {
        assert!(parse_line("   ", "general", "you").is_none());

        let msg = parse_line("  @Ada fix it ", "general", "you").unwrap();
        assert_eq!(msg.channel, CLI_CHANNEL);
        assert_eq!(msg.chat_id, "general");
        assert_eq!(msg.content, "@Ada fix it");
        assert_eq!(msg.message_type, MessageType::Chat);
    }

    #[test]
    fn test_parse_standup() {
        let msg = parse_line("/standup", "general", "you").unwrap();
        assert!(msg.is_standup_request());
        assert_eq!(msg.content, "@here standup");

        let msg = parse_line("/standup sprint review", "general", "you").unwrap();
        assert_eq!(msg.content, "@here sprint review");

        let msg = parse_line("/standups", "general", "you").unwrap();
        assert!(msg.is_command());
    }

    #[test]
    fn test_parse_command() {
        let msg = parse_line("/pause Ada", "general", "you").unwrap();
        assert!(msg.is_command());
        assert_eq!(msg.content, "/pause Ada");
    }

    #[test]
    fn test_format_outbound() {
        let inbound = InboundMessage::new(CLI_CHANNEL, "you", "general", "hi");
        let sender = SenderAgent {
            id: Some("1".to_string()),
            name: Some("Ada".to_string()),
            role: Some("developer".to_string()),
        };

        let reply = OutboundMessage::reply(&inbound, "done", sender.clone());
        assert_eq!(format_outbound(&reply), "[Ada] done");

        let failed = OutboundMessage::reply(&inbound, "[Ada] Error: boom", sender).with_type(MessageType::Error);
        assert_eq!(format_outbound(&failed), "[Ada] Error: boom");

        let notice = OutboundMessage::system(&inbound, "No agents available to handle this message.");
        assert_eq!(format_outbound(&notice), "No agents available to handle this message.");
    }
}

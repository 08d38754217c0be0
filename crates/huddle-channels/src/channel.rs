//! Channel adapter trait and the inbound side of the bus

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use huddle_core::bus::{MessageBus, OutboundSubscriber};
use huddle_core::types::{InboundMessage, OutboundMessage};
use tracing::debug;

use crate::manager::CommandHandler;

/// Trait that all channel adapters implement
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Start listening, handing every received message to `inbound`.
    ///
    /// Implementations that read continuously spawn their own task.
    async fn start(&self, inbound: InboundSink) -> Result<()>;

    /// Deliver an outbound message through this channel
    async fn send(&self, msg: OutboundMessage) -> Result<()>;

    /// Bus tag this adapter publishes and subscribes under, e.g. `cli`
    fn channel_tag(&self) -> &str;

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// Where channel adapters put received messages.
///
/// Slash commands the [`CommandHandler`] understands are answered directly on
/// the outbound queue; everything else goes to the orchestrator.
#[derive(Clone)]
pub struct InboundSink {
    bus: Arc<MessageBus>,
    commands: CommandHandler,
}

impl InboundSink {
    pub fn new(bus: Arc<MessageBus>, commands: CommandHandler) -> Self {
        Self { bus, commands }
    }

    pub async fn publish(&self, msg: InboundMessage) -> Result<()> {
        if msg.is_command()
            && let Some(reply) = self.commands.handle(&msg).await
        {
            debug!("Answered command '{}' on {}", msg.content, msg.chat_id);
            return self.bus.publish_outbound(reply).await;
        }
        self.bus.publish_inbound(msg).await
    }
}

/// Bus subscriber that forwards to a channel adapter
pub(crate) struct ChannelSubscriber(pub(crate) Arc<dyn MessageChannel>);

#[async_trait]
impl OutboundSubscriber for ChannelSubscriber {
    async fn deliver(&self, msg: OutboundMessage) -> Result<()> {
        self.0.send(msg).await
    }
}

//! Transport that keeps every outbound message in memory

use anyhow::Result;
use async_trait::async_trait;
use huddle_core::types::OutboundMessage;
use tokio::sync::Mutex;

use crate::channel::{InboundSink, MessageChannel};

/// Collects delivered messages for later inspection
pub struct CollectingSink {
    tag: String,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl CollectingSink {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub async fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.sent.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageChannel for CollectingSink {
    async fn start(&self, _inbound: InboundSink) -> Result<()> {
        Ok(())
    }

    async fn send(&self, msg: OutboundMessage) -> Result<()> {
        self.sent.lock().await.push(msg);
        Ok(())
    }

    fn channel_tag(&self) -> &str {
        &self.tag
    }
}

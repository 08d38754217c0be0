//! In-process message bus between transports and the orchestrator
//!
//! Inbound messages flow through one FIFO queue to the orchestrator. Outbound
//! messages flow through a second queue and are fanned out to every subscriber
//! registered for the message's channel tag.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::types::{InboundMessage, OutboundMessage};

/// Transport-side consumer of outbound messages
#[async_trait]
pub trait OutboundSubscriber: Send + Sync {
    /// Deliver one message to the transport
    async fn deliver(&self, msg: OutboundMessage) -> Result<()>;
}

/// Central message bus
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
    subscribers: RwLock<HashMap<String, Vec<Arc<dyn OutboundSubscriber>>>>,
    capacity: usize,
    cancel: CancellationToken,
}

impl MessageBus {
    /// Create a bus whose queues each hold `capacity` messages
    pub fn new(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        info!("Created message bus with buffer size {}", capacity);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
            subscribers: RwLock::new(HashMap::new()),
            capacity,
            cancel: CancellationToken::new(),
        }
    }

    /// Queue a message for the orchestrator
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        debug!("Inbound message from {} on {}", msg.sender_id, msg.channel);
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("Inbound queue is closed"))
    }

    /// Queue a message without waiting. Fails when the queue is full, so code
    /// running inside the inbound consumer cannot block on its own queue.
    pub fn try_publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        debug!("Inbound message from {} on {}", msg.sender_id, msg.channel);
        self.inbound_tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => anyhow!("Inbound queue is full"),
            mpsc::error::TrySendError::Closed(_) => anyhow!("Inbound queue is closed"),
        })
    }

    /// Wait for the next inbound message.
    ///
    /// Returns `None` once the bus has been stopped.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            msg = rx.recv() => msg,
        }
    }

    /// Register a subscriber for outbound messages tagged `channel`
    pub async fn subscribe_outbound(&self, channel: impl Into<String>, subscriber: Arc<dyn OutboundSubscriber>) {
        let channel = channel.into();
        info!("Subscribing outbound handler for channel: {}", channel);
        self.subscribers
            .write()
            .await
            .entry(channel)
            .or_default()
            .push(subscriber);
    }

    /// Queue a message for fan-out by [`dispatch_outbound`](Self::dispatch_outbound)
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("Outbound queue is closed"))
    }

    /// Hand a message to every subscriber of its channel.
    ///
    /// Returns how many subscribers accepted it. Failures are logged.
    pub async fn deliver_outbound(&self, msg: &OutboundMessage) -> usize {
        let subscribers = {
            let map = self.subscribers.read().await;
            map.get(msg.channel()).cloned().unwrap_or_default()
        };
        if subscribers.is_empty() {
            debug!("No subscribers for channel {}, dropping message", msg.channel());
            return 0;
        }

        let mut delivered = 0;
        for subscriber in subscribers {
            match subscriber.deliver(msg.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => error!("Outbound subscriber for {} failed: {}", msg.channel(), e),
            }
        }
        delivered
    }

    /// Drain the outbound queue until the bus is stopped
    pub async fn dispatch_outbound(&self) {
        info!("Outbound dispatcher started");
        let mut rx = self.outbound_rx.lock().await;
        loop {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.deliver_outbound(&msg).await;
        }
        info!("Outbound dispatcher stopped");
    }

    /// Signal every consumer loop to exit
    pub fn stop(&self) {
        info!("Stopping message bus");
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Messages waiting for the orchestrator
    pub fn inbound_len(&self) -> usize {
        self.capacity - self.inbound_tx.capacity()
    }

    /// Messages waiting for fan-out
    pub fn outbound_len(&self) -> usize {
        self.capacity - self.outbound_tx.capacity()
    }
}

//! Channel manager: adapter lifecycle, 1:1 mode and slash commands

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use huddle_core::bus::MessageBus;
use huddle_core::store::Store;
use huddle_core::types::{InboundMessage, OutboundMessage};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::channel::{ChannelSubscriber, InboundSink, MessageChannel};

/// Updates listed per agent by `/reports`
const REPORT_UPDATE_LIMIT: usize = 5;

/// Window `/reports` looks back over
const REPORT_WINDOW_HOURS: i64 = 24 * 7;

/// Recent activity of one active channel member
#[derive(Debug, Clone, PartialEq)]
pub struct StandupReport {
    pub agent_name: String,
    pub agent_role: String,
    pub updates: Vec<String>,
}

/// Answers the slash commands that change channel state.
///
/// `/pause <agent>` pauses every other member (1:1 mode), `/unpause-all`
/// restores them and `/reports` lists recent logged updates. Unknown commands
/// are left for the orchestrator.
#[derive(Clone)]
pub struct CommandHandler {
    store: Arc<dyn Store>,
}

impl CommandHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn handle(&self, msg: &InboundMessage) -> Option<OutboundMessage> {
        let mut parts = msg.content.trim().splitn(2, char::is_whitespace);
        let command = parts.next()?.trim_start_matches('/');
        let arg = parts.next().map(str::trim).unwrap_or_default();

        let result = match command {
            "pause" if arg.is_empty() => Ok("Usage: /pause <agent>".to_string()),
            "pause" => self.pause_all_except(&msg.chat_id, arg).await,
            "unpause-all" => self.unpause_all(&msg.chat_id).await,
            "reports" => self
                .get_standup_reports(&msg.chat_id, REPORT_WINDOW_HOURS)
                .await
                .map(|reports| format_reports(&reports)),
            _ => return None,
        };

        let text = result.unwrap_or_else(|e| {
            error!("Command '{}' failed: {}", command, e);
            format!("Error: {}", e)
        });
        Some(OutboundMessage::system(msg, text))
    }

    /// Pause every member of `channel_id` except `agent_name`
    pub async fn pause_all_except(&self, channel_id: &str, agent_name: &str) -> Result<String> {
        let Some(agent) = self.store.get_agent_by_name(agent_name).await? else {
            return Ok(format!("Agent '{}' not found", agent_name));
        };

        let members = self
            .store
            .get_channel_members(channel_id, true)
            .await
            .context("Failed to load channel members")?;
        if !members.iter().any(|m| m.agent_id == agent.id) {
            return Err(anyhow!("{} is not a member of this channel", agent.name));
        }

        for member in &members {
            let paused = member.agent_id != agent.id;
            if member.is_paused != paused {
                self.store.set_member_paused(channel_id, &member.agent_id, paused).await?;
            }
        }
        info!("Channel {} in 1:1 mode with {}", channel_id, agent.name);
        Ok(format!(
            "All agents paused except {}. Use /unpause-all to restore.",
            agent.name
        ))
    }

    pub async fn unpause_all(&self, channel_id: &str) -> Result<String> {
        let members = self
            .store
            .get_channel_members(channel_id, true)
            .await
            .context("Failed to load channel members")?;
        for member in members.iter().filter(|m| m.is_paused) {
            self.store.set_member_paused(channel_id, &member.agent_id, false).await?;
        }
        info!("Channel {} unpaused", channel_id);
        Ok("All agents unpaused.".to_string())
    }

    /// Recent updates of every unpaused member, in membership order
    pub async fn get_standup_reports(&self, channel_id: &str, hours: i64) -> Result<Vec<StandupReport>> {
        let members = self.store.get_channel_members(channel_id, false).await?;
        let updates = self.store.get_recent_agent_updates(channel_id, hours).await?;

        let mut reports = Vec::with_capacity(members.len());
        for member in members {
            let Some(agent) = self.store.get_agent(&member.agent_id).await? else {
                warn!("Channel {} lists unknown agent {}", channel_id, member.agent_id);
                continue;
            };
            reports.push(StandupReport {
                updates: updates
                    .iter()
                    .filter(|u| u.agent_id == agent.id)
                    .take(REPORT_UPDATE_LIMIT)
                    .map(|u| u.summary.clone())
                    .collect(),
                agent_name: agent.name,
                agent_role: agent.role,
            });
        }
        Ok(reports)
    }
}

fn format_reports(reports: &[StandupReport]) -> String {
    if reports.is_empty() {
        return "No active agents in this channel.".to_string();
    }
    let mut out = String::new();
    for report in reports {
        out.push_str(&format!("{} ({})\n", report.agent_name, report.agent_role));
        if report.updates.is_empty() {
            out.push_str("  (no recent updates)\n");
        }
        for update in &report.updates {
            out.push_str(&format!("  - {}\n", update));
        }
    }
    out.trim_end().to_string()
}

/// Owns the channel adapters and the outbound dispatch task
pub struct ChannelManager {
    bus: Arc<MessageBus>,
    commands: CommandHandler,
    channels: Vec<Arc<dyn MessageChannel>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>, store: Arc<dyn Store>) -> Self {
        Self {
            bus,
            commands: CommandHandler::new(store),
            channels: Vec::new(),
            dispatch: Mutex::new(None),
        }
    }

    pub fn register(&mut self, channel: Arc<dyn MessageChannel>) {
        info!("Registering channel: {}", channel.channel_tag());
        self.channels.push(channel);
    }

    /// Subscribe every adapter to its tag, start outbound dispatch, then start
    /// the adapters
    pub async fn start_all(&self) -> Result<()> {
        for channel in &self.channels {
            self.bus
                .subscribe_outbound(channel.channel_tag(), Arc::new(ChannelSubscriber(channel.clone())))
                .await;
        }

        let bus = self.bus.clone();
        *self.dispatch.lock().await = Some(tokio::spawn(async move { bus.dispatch_outbound().await }));

        let sink = InboundSink::new(self.bus.clone(), self.commands.clone());
        for channel in &self.channels {
            channel
                .start(sink.clone())
                .await
                .with_context(|| format!("Failed to start channel {}", channel.channel_tag()))?;
            info!("Started channel: {}", channel.channel_tag());
        }
        Ok(())
    }

    /// Stop the adapters and the bus, then wait for dispatch to drain out
    pub async fn stop_all(&self) {
        for channel in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!("Failed to stop channel {}: {}", channel.channel_tag(), e);
            }
        }
        self.bus.stop();
        if let Some(handle) = self.dispatch.lock().await.take()
            && let Err(e) = handle.await
        {
            error!("Outbound dispatcher ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collecting::CollectingSink;
    use huddle_core::store::{AgentRecord, AgentUpdate, Channel, ChannelMember, MemoryStore};
    use huddle_core::types::MessageType;
    use std::time::Duration;

    async fn seeded() -> (Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let channel = store.create_channel(Channel::new("general")).await.unwrap();
        for (name, role) in [("Max", "planner"), ("Ada", "developer"), ("Bob", "qa")] {
            let agent = store.create_agent(AgentRecord::new(name, role)).await.unwrap();
            store.add_member(ChannelMember::new(&channel.id, &agent.id)).await.unwrap();
        }
        (store, channel.id)
    }

    async fn active_names(store: &MemoryStore, channel_id: &str) -> Vec<String> {
        let mut names = Vec::new();
        for member in store.get_channel_members(channel_id, false).await.unwrap() {
            names.push(store.get_agent(&member.agent_id).await.unwrap().unwrap().name);
        }
        names
    }

    #[tokio::test]
    async fn test_pause_and_unpause() {
        let (store, channel_id) = seeded().await;
        let commands = CommandHandler::new(store.clone());

        let reply = commands.pause_all_except(&channel_id, "Ada").await.unwrap();
        assert_eq!(reply, "All agents paused except Ada. Use /unpause-all to restore.");
        assert_eq!(active_names(&store, &channel_id).await, vec!["Ada"]);

        commands.unpause_all(&channel_id).await.unwrap();
        assert_eq!(active_names(&store, &channel_id).await, vec!["Max", "Ada", "Bob"]);
    }

    #[tokio::test]
    async fn test_pause_unknown_agent() {
        let (store, channel_id) = seeded().await;
        let reply = CommandHandler::new(store.clone())
            .pause_all_except(&channel_id, "Ghost")
            .await
            .unwrap();
        assert_eq!(reply, "Agent 'Ghost' not found");
        assert_eq!(active_names(&store, &channel_id).await.len(), 3);
    }

    #[tokio::test]
    async fn test_reports_list_recent_updates() {
        let (store, channel_id) = seeded().await;
        let ada = store.get_agent_by_name("Ada").await.unwrap().unwrap();
        store
            .create_update(AgentUpdate::new(&ada.id, &channel_id, "Shipped search"))
            .await
            .unwrap();

        let reports = CommandHandler::new(store)
            .get_standup_reports(&channel_id, 48)
            .await
            .unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[1].agent_name, "Ada");
        assert_eq!(reports[1].updates, vec!["Shipped search"]);
        assert!(reports[0].updates.is_empty());
    }

    #[tokio::test]
    async fn test_sink_answers_known_commands() {
        let (store, channel_id) = seeded().await;
        let bus = Arc::new(MessageBus::new(8));
        let sink = InboundSink::new(bus.clone(), CommandHandler::new(store));

        let pause = InboundMessage::new("cli", "you", &channel_id, "/pause Bob").with_type(MessageType::Command);
        sink.publish(pause).await.unwrap();
        assert_eq!(bus.inbound_len(), 0);
        assert_eq!(bus.outbound_len(), 1);

        let unknown = InboundMessage::new("cli", "you", &channel_id, "/dance").with_type(MessageType::Command);
        sink.publish(unknown).await.unwrap();
        sink.publish(InboundMessage::new("cli", "you", &channel_id, "hello")).await.unwrap();
        assert_eq!(bus.inbound_len(), 2);
    }

    #[tokio::test]
    async fn test_manager_delivers_to_channels() {
        let (store, _) = seeded().await;
        let bus = Arc::new(MessageBus::new(8));
        let sink = Arc::new(CollectingSink::new("cli"));
        let mut manager = ChannelManager::new(bus.clone(), store);
        manager.register(sink.clone());
        manager.start_all().await.unwrap();

        let inbound = InboundMessage::new("cli", "you", "general", "hi");
        bus.publish_outbound(OutboundMessage::system(&inbound, "hello back")).await.unwrap();
        let mut waited = 0;
        while sink.is_empty().await && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }

        manager.stop_all().await;
        assert!(bus.is_stopped());
        let delivered = sink.messages().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].content(), "hello back");
    }
}

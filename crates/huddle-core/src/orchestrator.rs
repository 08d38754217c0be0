//! Team orchestration
//!
//! Owns the agent registrations, routes each inbound message to its owner(s)
//! and turns their replies into outbound messages. Broadcasts run every target
//! concurrently; standup broadcasts are folded into a single report.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::{AgentFactory, AgentRequest, AgentRunner};
use crate::bus::MessageBus;
use crate::context::{AgentIdentity, EconomyStatus, RosterEntry, load_role_prompt};
use crate::incentives::{BudgetManager, PerformanceTracker};
use crate::router::{DEFAULT_COORDINATOR, MessageRouter, RouteDecision, RoutingMode};
use crate::store::{AgentRecord, MessageRecord, SenderType, Store};
use crate::tools::{ToolContext, allowed_tools};
use crate::tools::team::team_tools;
use crate::types::{InboundMessage, MessageType, OutboundMessage, SenderAgent};

pub const NO_AGENTS_MESSAGE: &str = "No agents available to handle this message.";

const STANDUP_PROMPT: &str = "This is a standup request. Reply with a short status update: \
what you worked on recently, what you are doing next, and any blockers. \
Use your recent updates as a reference.";

/// Configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub coordinator_name: String,
    /// How long `run` waits on the bus before re-checking for shutdown
    pub poll_interval: Duration,
    pub standup_window_hours: i64,
    /// Recent updates listed per agent in a standup report
    pub standup_update_limit: usize,
    /// Directory of `<role>.md` prompt files
    pub roles_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            coordinator_name: DEFAULT_COORDINATOR.to_string(),
            poll_interval: Duration::from_secs(1),
            standup_window_hours: 48,
            standup_update_limit: 3,
            roles_dir: None,
        }
    }
}

/// A live agent: its persisted record and the runner that answers for it
pub struct AgentRegistration {
    pub name: String,
    pub record: AgentRecord,
    pub runner: Arc<dyn AgentRunner>,
}

impl AgentRegistration {
    pub fn sender(&self) -> SenderAgent {
        SenderAgent {
            id: Some(self.record.id.clone()),
            name: Some(self.name.clone()),
            role: Some(self.record.role.clone()),
        }
    }
}

#[derive(Default)]
struct AgentTable {
    /// Registration order
    order: Vec<String>,
    entries: HashMap<String, Arc<AgentRegistration>>,
}

impl AgentTable {
    fn ordered(&self) -> impl Iterator<Item = &Arc<AgentRegistration>> {
        self.order.iter().filter_map(|name| self.entries.get(name))
    }
}

/// Runs one agent on one message and settles its token bill
#[derive(Clone)]
struct Dispatcher {
    store: Arc<dyn Store>,
    budget: BudgetManager,
    tracker: PerformanceTracker,
}

impl Dispatcher {
    async fn invoke(&self, reg: &AgentRegistration, msg: &InboundMessage) -> Result<OutboundMessage> {
        match self.store.get_agent(&reg.record.id).await {
            Ok(Some(agent)) if agent.token_budget <= 0 => {
                bail!("token budget exhausted");
            }
            Ok(_) => {}
            Err(e) => warn!("Budget check failed for {}: {}", reg.name, e),
        }

        let request = AgentRequest {
            content: msg.content.clone(),
            session_key: format!("{}:{}", msg.chat_id, reg.name),
            context: ToolContext {
                origin: msg.channel.clone(),
                channel_id: msg.chat_id.clone(),
                agent_id: reg.record.id.clone(),
                agent_name: reg.name.clone(),
            },
        };
        let reply = reg.runner.process(request).await?;

        let tokens = reply.usage.total();
        if tokens > 0 {
            if let Err(e) = self.budget.deduct_tokens(&reg.record.id, tokens).await {
                warn!("Failed to deduct tokens for {}: {}", reg.name, e);
            }
            if let Err(e) = self.tracker.log_token_usage(&reg.record.id, tokens, &reply.model).await {
                warn!("Failed to log token usage for {}: {}", reg.name, e);
            }
        }

        Ok(OutboundMessage::reply(msg, reply.content, reg.sender()))
    }
}

pub struct Orchestrator {
    store: Arc<dyn Store>,
    factory: Arc<dyn AgentFactory>,
    config: OrchestratorConfig,
    router: MessageRouter,
    agents: RwLock<AgentTable>,
    bus: Option<Arc<MessageBus>>,
    dispatcher: Dispatcher,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, factory: Arc<dyn AgentFactory>, config: OrchestratorConfig) -> Self {
        let router = MessageRouter::new(config.coordinator_name.clone());
        let dispatcher = Dispatcher {
            store: store.clone(),
            budget: BudgetManager::new(store.clone()),
            tracker: PerformanceTracker::new(store.clone()),
        };
        Self {
            store,
            factory,
            config,
            router,
            agents: RwLock::new(AgentTable::default()),
            bus: None,
            dispatcher,
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Bus handed to the team tools that post or delegate messages
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Build a runner for `record` and make it routable under its name.
    ///
    /// Registering an existing name replaces the previous runner.
    pub async fn register_agent(&self, record: AgentRecord) -> Result<Arc<AgentRegistration>> {
        let mut identity = AgentIdentity::new(&record.name, &record.role);
        if let Some(dir) = &self.config.roles_dir {
            identity.role_prompt = load_role_prompt(dir, &record.role).await;
        }
        identity.team_roster = self.roster_with(&record).await;
        identity.economy = Some(EconomyStatus::from(&record));

        let mut tools = self.factory.default_tools();
        tools.merge(team_tools(self.store.clone(), self.bus.clone()));
        tools.retain(allowed_tools(&record.role));

        let runner = self.factory.create(&record, identity, tools)?;
        let registration = Arc::new(AgentRegistration {
            name: record.name.clone(),
            record,
            runner,
        });

        let mut table = self.agents.write().await;
        if let Some(previous) = table.entries.insert(registration.name.clone(), registration.clone()) {
            previous.runner.stop();
            debug!("Replaced registration for {}", registration.name);
        } else {
            table.order.push(registration.name.clone());
        }
        info!(
            "Registered agent {} ({}) with tools: {}",
            registration.name,
            registration.record.role,
            registration.runner.tool_names().join(", ")
        );
        Ok(registration)
    }

    async fn roster_with(&self, record: &AgentRecord) -> Vec<RosterEntry> {
        let table = self.agents.read().await;
        let mut roster: Vec<RosterEntry> = table
            .ordered()
            .filter(|reg| reg.name != record.name)
            .map(|reg| RosterEntry {
                name: reg.name.clone(),
                role: reg.record.role.clone(),
                status: reg.record.status.to_string(),
            })
            .collect();
        roster.push(RosterEntry {
            name: record.name.clone(),
            role: record.role.clone(),
            status: record.status.to_string(),
        });
        roster
    }

    pub async fn get_agent(&self, name: &str) -> Option<Arc<AgentRegistration>> {
        self.agents.read().await.entries.get(name).cloned()
    }

    /// Registered agent names in registration order
    pub async fn registered_names(&self) -> Vec<String> {
        self.agents.read().await.order.clone()
    }

    /// First registered agent holding `role`
    pub async fn find_agent_by_role(&self, role: &str) -> Option<Arc<AgentRegistration>> {
        self.agents
            .read()
            .await
            .ordered()
            .find(|reg| reg.record.role == role)
            .cloned()
    }

    /// Names of registered agents that are unpaused members of `channel_id`,
    /// in membership order
    pub async fn get_active_agents(&self, channel_id: &str) -> Result<Vec<String>> {
        let members = self.store.get_channel_members(channel_id, false).await?;
        let table = self.agents.read().await;
        Ok(members
            .iter()
            .filter_map(|member| {
                table
                    .ordered()
                    .find(|reg| reg.record.id == member.agent_id)
                    .map(|reg| reg.name.clone())
            })
            .collect())
    }

    /// Route a message and collect the outbound messages it produces.
    ///
    /// Never fails: agent errors become error messages (single owner) or are
    /// dropped from the result (broadcast).
    pub async fn process_message(&self, msg: InboundMessage) -> Vec<OutboundMessage> {
        let registered = self.registered_names().await;
        let active = match self.get_active_agents(&msg.chat_id).await {
            Ok(active) if !active.is_empty() => active,
            Ok(_) => registered.clone(),
            Err(e) => {
                warn!("Failed to load channel members for {}: {}", msg.chat_id, e);
                registered.clone()
            }
        };

        let decision = match self.pre_resolved_owner(&msg).await {
            Some(name) => RouteDecision {
                mode: RoutingMode::Single,
                targets: vec![name],
                fallback: false,
            },
            None => self.router.resolve_owner(&msg, &registered, &active),
        };
        let mut targets: Vec<String> = Vec::with_capacity(decision.targets.len());
        for target in decision.targets {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        if targets.is_empty() {
            warn!("No agents available for message on {}", msg.session_key());
            return vec![OutboundMessage::system(&msg, NO_AGENTS_MESSAGE)];
        }

        self.persist_inbound(&msg, &registered).await;

        let outbound = match decision.mode {
            RoutingMode::Broadcast if msg.is_standup_request() => self.run_standup(&msg, &targets).await,
            RoutingMode::Broadcast => self.broadcast(&msg, &targets).await,
            RoutingMode::Single | RoutingMode::Coordinator => {
                if targets.len() > 1 {
                    debug!("Multiple owners {:?}, dispatching to {}", targets, targets[0]);
                }
                vec![self.dispatch_single(&msg, &targets[0]).await]
            }
        };

        for out in &outbound {
            self.persist_outbound(out).await;
        }
        outbound
    }

    async fn pre_resolved_owner(&self, msg: &InboundMessage) -> Option<String> {
        let owner = msg.owner_agent_id.as_deref()?;
        let name = self
            .agents
            .read()
            .await
            .ordered()
            .find(|reg| reg.record.id == owner)
            .map(|reg| reg.name.clone());
        if name.is_none() {
            warn!("Pre-resolved owner {} is not registered, routing normally", owner);
        }
        name
    }

    async fn dispatch_single(&self, msg: &InboundMessage, name: &str) -> OutboundMessage {
        let Some(reg) = self.get_agent(name).await else {
            return OutboundMessage::system(msg, format!("[{}] Error: agent is not registered", name))
                .with_type(MessageType::Error);
        };
        match self.dispatcher.invoke(&reg, msg).await {
            Ok(out) => out,
            Err(e) => {
                error!("Agent {} failed: {}", name, e);
                OutboundMessage::reply(msg, format!("[{}] Error: {}", name, e), reg.sender())
                    .with_type(MessageType::Error)
            }
        }
    }

    /// Run every target concurrently; successful replies come back in target order
    async fn broadcast(&self, msg: &InboundMessage, targets: &[String]) -> Vec<OutboundMessage> {
        let mut handles = Vec::with_capacity(targets.len());
        for name in targets {
            let Some(reg) = self.get_agent(name).await else {
                warn!("Broadcast target {} is not registered", name);
                continue;
            };
            let dispatcher = self.dispatcher.clone();
            let msg = msg.clone();
            let handle = tokio::spawn(async move { dispatcher.invoke(&reg, &msg).await });
            handles.push((name.clone(), handle));
        }

        let mut replies = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(out)) => replies.push(out),
                Ok(Err(e)) => error!("Agent {} failed during broadcast: {}", name, e),
                Err(e) => error!("Agent {} task aborted: {}", name, e),
            }
        }
        replies
    }

    async fn run_standup(&self, msg: &InboundMessage, targets: &[String]) -> Vec<OutboundMessage> {
        let mut prompt = msg.clone();
        prompt.content = format!("{}\n\nOriginal request: {}", STANDUP_PROMPT, msg.content);
        let replies = self.broadcast(&prompt, targets).await;
        for reply in &replies {
            self.persist_outbound(reply).await;
        }

        let report = self.format_standup_report(&msg.chat_id, &replies).await;
        vec![OutboundMessage::system(msg, report).with_type(MessageType::StandupResponse)]
    }

    async fn format_standup_report(&self, channel_id: &str, replies: &[OutboundMessage]) -> String {
        let updates = match self
            .store
            .get_recent_agent_updates(channel_id, self.config.standup_window_hours)
            .await
        {
            Ok(updates) => updates,
            Err(e) => {
                warn!("Failed to load recent updates for standup: {}", e);
                Vec::new()
            }
        };

        let mut report = format!(
            "## Team Standup Report\n\n*Generated at {}*\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        );
        for reply in replies {
            let sender = reply.sender();
            let name = sender.name.as_deref().unwrap_or("unknown");
            let role = sender.role.as_deref().unwrap_or("agent");
            report.push_str(&format!("\n### {} ({})\n", name, role));

            let recent: Vec<&str> = updates
                .iter()
                .filter(|u| sender.id.as_deref() == Some(u.agent_id.as_str()))
                .take(self.config.standup_update_limit)
                .map(|u| u.summary.as_str())
                .collect();
            if !recent.is_empty() {
                report.push_str("\n**Recent Updates:**\n");
                for summary in recent {
                    report.push_str(&format!("- {}\n", summary));
                }
            }
            report.push_str(&format!("\n{}\n", reply.content()));
        }
        report.push_str("\n---\n*Use `log_update` tool to record your progress*");
        report
    }

    async fn persist_inbound(&self, msg: &InboundMessage, registered: &[String]) {
        let sender_type = if registered.contains(&msg.sender_id) {
            SenderType::Agent
        } else {
            SenderType::Human
        };
        let mut record = MessageRecord::new(&msg.chat_id, sender_type, &msg.content, msg.message_type);
        record.sender_id = Some(msg.sender_id.clone());
        record.sender_name = Some(msg.sender_id.clone());
        record.mentions = msg.mentions.clone();
        if let Err(e) = self.store.create_message(record).await {
            warn!("Failed to persist inbound message: {}", e);
        }
    }

    async fn persist_outbound(&self, out: &OutboundMessage) {
        let sender_type = if out.sender().id.is_some() {
            SenderType::Agent
        } else {
            SenderType::System
        };
        let mut record = MessageRecord::new(out.chat_id(), sender_type, out.content(), out.message_type());
        record.sender_id = out.sender().id.clone();
        record.sender_name = out.sender().name.clone();
        if let Err(e) = self.store.create_message(record).await {
            warn!("Failed to persist outbound message: {}", e);
        }
    }

    /// Consume the bus until stopped, publishing every reply.
    ///
    /// A failure while processing one message is logged and the loop moves on.
    pub async fn run(self: Arc<Self>, bus: Arc<MessageBus>) {
        self.running.store(true, Ordering::SeqCst);
        info!("Orchestrator started with {} agents", self.registered_names().await.len());

        while self.running.load(Ordering::SeqCst) {
            let msg = tokio::select! {
                _ = self.cancel.cancelled() => break,
                polled = tokio::time::timeout(self.config.poll_interval, bus.consume_inbound()) => {
                    match polled {
                        Err(_) => continue,
                        Ok(None) => break,
                        Ok(Some(msg)) => msg,
                    }
                }
            };

            debug!("Processing message from {} on {}", msg.sender_id, msg.session_key());
            let this = self.clone();
            match tokio::spawn(async move { this.process_message(msg).await }).await {
                Ok(outbound) => {
                    for out in outbound {
                        if let Err(e) = bus.publish_outbound(out).await {
                            error!("Failed to publish reply: {}", e);
                        }
                    }
                }
                Err(e) => error!("Message processing failed: {}", e),
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        for reg in self.agents.read().await.entries.values() {
            reg.runner.stop();
        }
    }
}

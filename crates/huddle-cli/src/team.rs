//! Builds a running team from config: store, bus, orchestrator and seeded channels

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use huddle_core::agent::AgentFactory;
use huddle_core::bus::MessageBus;
use huddle_core::orchestrator::Orchestrator;
use huddle_core::store::{AgentRecord, Channel, ChannelMember, MemoryStore, Store};
use tracing::{info, warn};

use crate::config::{ChannelSeed, HuddleConfig};

pub struct Team {
    pub store: Arc<dyn Store>,
    pub bus: Arc<MessageBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub default_channel_id: String,
}

impl Team {
    /// Create every configured agent and channel, then register the agents.
    ///
    /// The default channel is created with the whole team as members unless a
    /// seed already defines it.
    pub async fn build(cfg: &HuddleConfig, factory: Arc<dyn AgentFactory>) -> Result<Self> {
        if cfg.agents.team.is_empty() {
            return Err(anyhow!("No agents configured. Add [[agents.team]] entries to the config."));
        }

        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bus = Arc::new(MessageBus::new(cfg.orchestrator.bus_capacity));
        let orchestrator = Orchestrator::new(store.clone(), factory, cfg.orchestrator_config()).with_bus(bus.clone());

        let mut records = Vec::with_capacity(cfg.agents.team.len());
        for seed in &cfg.agents.team {
            if store.get_agent_by_name(&seed.name).await?.is_some() {
                warn!("Duplicate agent '{}' in config, keeping the first", seed.name);
                continue;
            }
            let mut record = AgentRecord::new(&seed.name, &seed.role);
            record.model = seed.model.clone();
            if let Some(budget) = seed.token_budget {
                record.token_budget = budget;
            }
            records.push(store.create_agent(record).await?);
        }

        let mut seeds = cfg.channels.seed.clone();
        if !seeds.iter().any(|s| s.name == cfg.channels.default) {
            seeds.insert(
                0,
                ChannelSeed {
                    name: cfg.channels.default.clone(),
                    description: None,
                    members: records.iter().map(|r| r.name.clone()).collect(),
                },
            );
        }

        let mut default_channel_id = None;
        for seed in &seeds {
            let channel_id = create_channel(store.as_ref(), seed).await?;
            if seed.name == cfg.channels.default {
                default_channel_id = Some(channel_id);
            }
        }

        for record in records {
            orchestrator
                .register_agent(record)
                .await
                .context("Failed to register agent")?;
        }

        let default_channel_id = default_channel_id.ok_or_else(|| anyhow!("Default channel was not created"))?;
        info!(
            "Team ready: {} agents, {} channels",
            orchestrator.registered_names().await.len(),
            seeds.len()
        );
        Ok(Self {
            store,
            bus,
            orchestrator: Arc::new(orchestrator),
            default_channel_id,
        })
    }

    /// Resolve a channel name to its id. Unknown names are returned unchanged
    /// so ad-hoc conversations still work.
    pub async fn channel_id(&self, name: Option<&str>) -> Result<String> {
        let Some(name) = name else {
            return Ok(self.default_channel_id.clone());
        };
        Ok(match self.store.get_channel_by_name(name).await? {
            Some(channel) => channel.id,
            None => name.to_string(),
        })
    }
}

async fn create_channel(store: &dyn Store, seed: &ChannelSeed) -> Result<String> {
    let mut channel = Channel::new(&seed.name);
    channel.description = seed.description.clone();
    let channel = store.create_channel(channel).await?;

    for name in &seed.members {
        match store.get_agent_by_name(name).await? {
            Some(agent) => {
                store.add_member(ChannelMember::new(&channel.id, &agent.id)).await?;
            }
            None => warn!("Channel '{}' lists unknown agent '{}'", seed.name, name),
        }
    }
    Ok(channel.id)
}

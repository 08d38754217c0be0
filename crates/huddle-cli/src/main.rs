use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use huddle_channels::{ChannelManager, ConsoleChannel};
use huddle_core::agent::{AgentFactory, LlmAgentFactory};
use huddle_core::incentives::PerformanceEvaluator;
use huddle_core::pipeline::{PipelineDefinition, PipelineEngine, PipelineRun, RunStatus, load_pipeline_dir};
use huddle_core::providers::AnthropicProvider;
use huddle_core::store::{PerformanceEvent, PerformanceLog};
use huddle_core::types::InboundMessage;

mod config;
mod team;

use config::HuddleConfig;
use team::Team;

#[derive(Parser)]
#[command(name = "huddle")]
#[command(version)]
#[command(about = "Huddle: a team of AI agents that share channels, standups and pipelines")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the team, reading messages from the terminal until Ctrl+C
    Start {
        /// Channel name to chat in (defaults to [channels].default)
        #[arg(long)]
        channel: Option<String>,
    },

    /// Send one message to the team and print the replies
    Ask {
        /// The message to send, e.g. "@Ada fix the login bug"
        message: String,

        #[arg(long)]
        channel: Option<String>,
    },

    /// Run a pipeline from a YAML file or by name from [pipelines].dir
    Pipeline {
        /// Path to a YAML definition, or a pipeline name
        pipeline: String,

        #[arg(long)]
        channel: Option<String>,

        /// Approve every gated step without asking
        #[arg(long)]
        approve: bool,

        /// Extra context values, `key=value` (values are parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },

    /// Score agents from their performance history
    Evaluate {
        /// Agent to evaluate; every agent when omitted (pays a salary cycle)
        agent: Option<String>,

        /// JSON lines of performance events to replay first,
        /// e.g. {"agent":"Ada","event_type":"review_score","task_id":"t1","score":0.9}
        #[arg(long)]
        events: Option<PathBuf>,

        /// Also pay one salary cycle to the evaluated agent
        #[arg(long)]
        pay: bool,
    },

    /// Initialize config directory, default config, role prompts and pipelines
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Start { channel } => cmd_start(&cli.config, channel.as_deref()).await,
        Commands::Ask { message, channel } => cmd_ask(&cli.config, &message, channel.as_deref()).await,
        Commands::Pipeline {
            pipeline,
            channel,
            approve,
            set,
        } => cmd_pipeline(&cli.config, &pipeline, channel.as_deref(), approve, &set).await,
        Commands::Evaluate { agent, events, pay } => {
            cmd_evaluate(&cli.config, agent.as_deref(), events.as_deref(), pay).await
        }
    }
}

const ROLE_PROMPTS: &[(&str, &str)] = &[
    ("coordinator", include_str!("../../../config/roles/coordinator.md")),
    ("developer", include_str!("../../../config/roles/developer.md")),
    ("reviewer", include_str!("../../../config/roles/reviewer.md")),
    ("planner", include_str!("../../../config/roles/planner.md")),
];

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        info!("Created default config at {}", config_path.display());
    }

    tokio::fs::create_dir_all(config_dir.join("workspace")).await?;

    let roles_dir = config_dir.join("roles");
    tokio::fs::create_dir_all(&roles_dir).await?;
    for (role, prompt) in ROLE_PROMPTS {
        let path = roles_dir.join(format!("{}.md", role));
        if !path.exists() {
            tokio::fs::write(&path, prompt).await?;
            info!("Created role prompt {}", path.display());
        }
    }

    let pipelines_dir = config_dir.join("pipelines");
    tokio::fs::create_dir_all(&pipelines_dir).await?;
    let feature_path = pipelines_dir.join("feature.yaml");
    if !feature_path.exists() {
        tokio::fs::write(&feature_path, include_str!("../../../config/pipelines/feature.yaml")).await?;
        info!("Created example pipeline {}", feature_path.display());
    }

    println!("Huddle initialized at {}", config_dir.display());
    println!("Edit {} to configure your API key and team.", config_path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = HuddleConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

async fn build_team(cfg: &HuddleConfig) -> Result<Team> {
    let provider = AnthropicProvider::new(
        cfg.provider.api_key.clone(),
        cfg.provider.model.clone(),
        cfg.provider.base_url.clone(),
        cfg.provider.max_tokens,
    )?
    .with_retries(cfg.provider.max_retries, Duration::from_millis(500));
    let workspace = cfg.workspace();
    tokio::fs::create_dir_all(&workspace)
        .await
        .with_context(|| format!("Failed to create workspace: {}", workspace.display()))?;
    let factory: Arc<dyn AgentFactory> = Arc::new(LlmAgentFactory::new(Arc::new(provider), workspace));
    Team::build(cfg, factory).await
}

async fn cmd_start(config_path: &Option<PathBuf>, channel: Option<&str>) -> Result<()> {
    let cfg = HuddleConfig::load(config_path)?;
    info!("Starting Huddle...");

    let team = build_team(&cfg).await?;
    let channel_id = team.channel_id(channel).await?;

    let mut manager = ChannelManager::new(team.bus.clone(), team.store.clone());
    manager.register(Arc::new(ConsoleChannel::new(&channel_id, "human")));
    manager.start_all().await?;

    let orchestrator_task = tokio::spawn(team.orchestrator.clone().run(team.bus.clone()));

    let cancel = CancellationToken::new();
    let economy_task = (cfg.orchestrator.evaluation_interval_secs > 0).then(|| {
        let evaluator = PerformanceEvaluator::new(team.store.clone());
        let period = Duration::from_secs(cfg.orchestrator.evaluation_interval_secs);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = evaluator.run_cycle().await {
                            error!("Economy cycle failed: {}", e);
                        }
                    }
                }
            }
        })
    });

    let names = team.orchestrator.registered_names().await;
    println!("Huddle is running with {}. Type a message, @Name to address someone,", names.join(", "));
    println!("/standup for a team report, /pause <agent>, /unpause-all, /reports. Ctrl+C to quit.\n");

    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    cancel.cancel();
    team.orchestrator.stop().await;
    manager.stop_all().await;

    if let Err(e) = orchestrator_task.await {
        error!("Orchestrator task ended abnormally: {}", e);
    }
    if let Some(task) = economy_task
        && let Err(e) = task.await
    {
        error!("Economy task ended abnormally: {}", e);
    }

    println!("Huddle stopped.");
    Ok(())
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: &str, channel: Option<&str>) -> Result<()> {
    let cfg = HuddleConfig::load(config_path)?;
    let team = build_team(&cfg).await?;
    let channel_id = team.channel_id(channel).await?;

    let inbound = InboundMessage::new(huddle_channels::console::CLI_CHANNEL, "human", &channel_id, message);
    for reply in team.orchestrator.process_message(inbound).await {
        println!("{}\n", huddle_channels::console::format_outbound(&reply));
    }
    Ok(())
}

async fn cmd_pipeline(
    config_path: &Option<PathBuf>,
    pipeline: &str,
    channel: Option<&str>,
    auto_approve: bool,
    set: &[String],
) -> Result<()> {
    let cfg = HuddleConfig::load(config_path)?;
    let definition = resolve_pipeline(&cfg, pipeline)?;
    let context = parse_context(set)?;

    let team = build_team(&cfg).await?;
    let channel_id = team.channel_id(channel).await?;
    let engine = PipelineEngine::new(team.orchestrator.clone());

    let mut run = engine.start_pipeline(definition.clone(), &channel_id, Some(context)).await?;
    while run.status == RunStatus::Paused {
        let step = definition
            .steps
            .get(run.current_step)
            .map(|s| s.name.as_str())
            .unwrap_or("?");
        run = if auto_approve || confirm(&format!("Approve step '{}'?", step)).await? {
            engine.approve(&run.id).await?
        } else {
            engine.reject(&run.id, "Rejected at the console").await?
        };
    }

    print_run_summary(&run);
    println!("{}", serde_json::to_string_pretty(&run)?);
    if run.status == RunStatus::Failed {
        bail!("Pipeline '{}' failed at step {}", run.pipeline_name, run.current_step);
    }
    Ok(())
}

/// A path to a YAML file, or the name of a definition in the pipelines dir
fn resolve_pipeline(cfg: &HuddleConfig, pipeline: &str) -> Result<PipelineDefinition> {
    let path = Path::new(pipeline);
    if path.is_file() {
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline {}", path.display()))?;
        return Ok(PipelineDefinition::from_yaml(&yaml)?);
    }

    let dir = cfg
        .pipelines_dir()
        .ok_or_else(|| anyhow!("'{}' is not a file and no [pipelines].dir is configured", pipeline))?;
    load_pipeline_dir(&dir)?
        .into_iter()
        .find(|def| def.name == pipeline)
        .ok_or_else(|| anyhow!("No pipeline named '{}' in {}", pipeline, dir.display()))
}

fn parse_context(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut context = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        context.insert(key.trim().to_string(), value);
    }
    Ok(context)
}

async fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_run_summary(run: &PipelineRun) {
    eprintln!("Pipeline '{}' {}", run.pipeline_name, run.status);
    for result in &run.step_results {
        eprintln!(
            "  {} [{}] {} attempt(s){}",
            result.step,
            result.agent.as_deref().unwrap_or("-"),
            result.attempts,
            result.error.as_deref().map(|e| format!(": {}", e)).unwrap_or_default()
        );
    }
}

/// One replayed performance event
#[derive(Debug, Deserialize)]
struct EventLine {
    agent: String,
    #[serde(flatten)]
    event: PerformanceEvent,
}

fn parse_event_lines(text: &str) -> Result<Vec<EventLine>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid event on line {}", i + 1))
        })
        .collect()
}

async fn cmd_evaluate(
    config_path: &Option<PathBuf>,
    agent: Option<&str>,
    events: Option<&Path>,
    pay: bool,
) -> Result<()> {
    let cfg = HuddleConfig::load(config_path)?;
    let team = build_team(&cfg).await?;
    let store = team.store.clone();

    if let Some(path) = events {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read events from {}", path.display()))?;
        let lines = parse_event_lines(&text)?;
        let count = lines.len();
        for line in lines {
            let record = store
                .get_agent_by_name(&line.agent)
                .await?
                .ok_or_else(|| anyhow!("Unknown agent '{}' in events", line.agent))?;
            store.log_performance(PerformanceLog::new(&record.id, line.event)).await?;
        }
        info!("Replayed {} performance events", count);
    }

    let evaluator = PerformanceEvaluator::new(store.clone());
    let evaluations = match agent {
        Some(name) => {
            let record = store
                .get_agent_by_name(name)
                .await?
                .ok_or_else(|| anyhow!("Agent '{}' not found", name))?;
            let evaluation = evaluator.evaluate_agent(&record.id).await?;
            if pay {
                let balance = evaluator.pay_salary(&record.id).await?;
                println!("{} salary balance: {}", name, balance);
            }
            vec![evaluation]
        }
        None => evaluator.run_cycle().await?,
    };

    for eval in &evaluations {
        println!(
            "{:<12} score {:.2}  status {:<8} action {}",
            eval.agent_name,
            eval.score,
            eval.status.to_string(),
            eval.action
        );
    }
    Ok(())
}

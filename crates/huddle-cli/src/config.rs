use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use huddle_core::orchestrator::OrchestratorConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HuddleConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSection,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub pipelines: PipelinesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_coordinator_name")]
    pub coordinator_name: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_standup_window_hours")]
    pub standup_window_hours: i64,
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Seconds between economy cycles in `huddle start`; 0 disables them
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
}

fn default_coordinator_name() -> String {
    huddle_core::router::DEFAULT_COORDINATOR.to_string()
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_standup_window_hours() -> i64 {
    48
}
fn default_bus_capacity() -> usize {
    100
}
fn default_evaluation_interval_secs() -> u64 {
    3600
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            coordinator_name: default_coordinator_name(),
            poll_interval_ms: default_poll_interval_ms(),
            standup_window_hours: default_standup_window_hours(),
            bus_capacity: default_bus_capacity(),
            evaluation_interval_secs: default_evaluation_interval_secs(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Retries for rate-limited or failed API calls
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

fn default_base_url() -> String {
    huddle_core::providers::anthropic::DEFAULT_BASE_URL.to_string()
}
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Directory of `<role>.md` prompt files
    #[serde(default)]
    pub roles_dir: Option<String>,
    /// Root that workspace tools are confined to
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default)]
    pub team: Vec<AgentSeed>,
}

fn default_workspace() -> String {
    "~/.huddle/workspace".to_string()
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            roles_dir: None,
            workspace: default_workspace(),
            team: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSeed {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub token_budget: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Channel the console posts into
    #[serde(default = "default_channel")]
    pub default: String,
    /// Channels to create at startup. The default channel is created with
    /// every agent as a member if it is not listed here.
    #[serde(default)]
    pub seed: Vec<ChannelSeed>,
}

fn default_channel() -> String {
    "general".to_string()
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            default: default_channel(),
            seed: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelSeed {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Agent names
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelinesConfig {
    /// Directory of YAML pipeline definitions
    #[serde(default)]
    pub dir: Option<String>,
}

fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".huddle")
}

/// Expand a leading `~/` to the home directory
pub fn shellexpand(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

impl HuddleConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    warn!(
                        "Config file {} is readable by other users ({:o}). It may contain secrets; run chmod 600",
                        path.display(),
                        mode & 0o777
                    );
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `huddle init` first.",
                path.display()
            )
        })?;
        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Parse TOML after expanding allowlisted `${VAR}` references
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;
        config.validate()?;

        if config.provider.api_key.starts_with("sk-ant-") {
            warn!(
                "API key is hardcoded in config file. For security, use environment variables: api_key = \"${{ANTHROPIC_API_KEY}}\""
            );
        }
        Ok(config)
    }

    /// Reject values the runtime cannot start with
    fn validate(&self) -> Result<()> {
        if self.orchestrator.bus_capacity == 0 {
            bail!("[orchestrator] bus_capacity must be at least 1");
        }
        if self.orchestrator.poll_interval_ms == 0 {
            bail!("[orchestrator] poll_interval_ms must be at least 1");
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            coordinator_name: self.orchestrator.coordinator_name.clone(),
            poll_interval: Duration::from_millis(self.orchestrator.poll_interval_ms),
            standup_window_hours: self.orchestrator.standup_window_hours,
            roles_dir: self.agents.roles_dir.as_deref().map(shellexpand),
            ..OrchestratorConfig::default()
        }
    }

    pub fn workspace(&self) -> PathBuf {
        shellexpand(&self.agents.workspace)
    }

    pub fn pipelines_dir(&self) -> Option<PathBuf> {
        self.pipelines.dir.as_deref().map(shellexpand)
    }

    /// Copy safe to print: secrets masked
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        cfg.provider.api_key = mask_secret(&cfg.provider.api_key);
        cfg
    }
}

/// Allowlist of environment variable names that may be expanded in config files
const ALLOWED_ENV_VARS: &[&str] = &["ANTHROPIC_API_KEY", "HUDDLE_API_KEY", "HOME", "USER"];

fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let var_name = &rest[start + 2..start + len];
        result.push_str(&rest[..start]);
        if ALLOWED_ENV_VARS.contains(&var_name) {
            result.push_str(&std::env::var(var_name).unwrap_or_default());
        } else {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            result.push_str(&rest[start..start + len + 1]);
        }
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}

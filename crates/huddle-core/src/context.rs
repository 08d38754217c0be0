//! Agent identity and system prompt building

use std::path::Path;

use tracing::{debug, warn};

use crate::store::{AgentRecord, AgentStatus};

/// One teammate as shown in an agent's prompt
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub name: String,
    pub role: String,
    /// `active`, `warning`, `fired` or `paused`
    pub status: String,
}

/// Economy figures injected into the prompt
#[derive(Debug, Clone, PartialEq)]
pub struct EconomyStatus {
    pub salary_balance: i64,
    pub performance_score: f64,
    pub token_budget: i64,
    pub status: AgentStatus,
}

impl From<&AgentRecord> for EconomyStatus {
    fn from(agent: &AgentRecord) -> Self {
        Self {
            salary_balance: agent.salary_balance,
            performance_score: agent.performance_score,
            token_budget: agent.token_budget,
            status: agent.status,
        }
    }
}

/// Everything an agent knows about itself
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub name: String,
    pub role: String,
    pub role_prompt: Option<String>,
    pub team_roster: Vec<RosterEntry>,
    pub economy: Option<EconomyStatus>,
}

impl AgentIdentity {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            role_prompt: None,
            team_roster: Vec::new(),
            economy: None,
        }
    }

    fn roster_text(&self) -> String {
        self.team_roster
            .iter()
            .map(|m| {
                let marker = if m.name == self.name { " (you)" } else { "" };
                format!("- **{}** ({}, {}){}", m.name, m.role, m.status, marker)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Read `<roles_dir>/<role>.md`; missing or unreadable files yield `None`
pub async fn load_role_prompt(roles_dir: &Path, role: &str) -> Option<String> {
    let path = roles_dir.join(format!("{}.md", role));
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Role prompt {} not loaded: {}", path.display(), e);
            None
        }
    }
}

/// Build complete system prompt for an agent in a conversation
pub fn build_system_prompt(identity: &AgentIdentity, session_key: Option<&str>) -> String {
    let roster = identity.roster_text();
    let mut prompt = String::new();

    prompt.push_str("# IDENTITY\n\n");
    match &identity.role_prompt {
        Some(role_prompt) => {
            let text = role_prompt
                .replace("{agent_name}", &identity.name)
                .replace("{team_roster}", &roster);
            prompt.push_str(text.trim_end());
        }
        None => {
            prompt.push_str(&format!(
                "You are {}, the team's {}.",
                identity.name, identity.role
            ));
        }
    }
    prompt.push_str("\n\n");

    if !roster.is_empty() {
        prompt.push_str("# TEAM\n\n");
        prompt.push_str(&roster);
        prompt.push_str("\n\n");
    }

    if let Some(economy) = &identity.economy {
        prompt.push_str("# YOUR STATUS\n\n");
        prompt.push_str(&format!("- Salary: {} credits\n", economy.salary_balance));
        prompt.push_str(&format!("- Performance: {:.2}/1.0\n", economy.performance_score));
        prompt.push_str(&format!("- Token budget remaining: {}\n", economy.token_budget));
        prompt.push_str(&format!("- Status: {}\n\n", economy.status));
        prompt.push_str("High performers get bonuses. Score below 0.3 triggers a warning. ");
        prompt.push_str("Score below 0.15 means termination.\n\n");
    }

    if let Some(session) = session_key {
        prompt.push_str("# CURRENT SESSION\n\n");
        prompt.push_str(session);
        prompt.push_str("\n\n");
    }

    prompt.push_str("# CURRENT TIME\n\n");
    prompt.push_str(&chrono::Utc::now().to_rfc3339());
    prompt.push_str("\n\n");

    prompt.push_str("# INSTRUCTIONS\n\n");
    prompt.push_str("You are one member of a team working in shared channels. ");
    prompt.push_str("Answer what was asked of you and stay within your role. ");
    prompt.push_str("Use log_update to record meaningful progress for standups.\n");

    debug!("Built system prompt for {} ({} chars)", identity.name, prompt.len());

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> AgentIdentity {
        let mut id = AgentIdentity::new("Ada", "developer");
        id.team_roster = vec![
            RosterEntry {
                name: "Max".to_string(),
                role: "coordinator".to_string(),
                status: "active".to_string(),
            },
            RosterEntry {
                name: "Ada".to_string(),
                role: "developer".to_string(),
                status: "active".to_string(),
            },
        ];
        id
    }

    #[test]
    fn test_default_identity_without_role_prompt() {
        let prompt = build_system_prompt(&AgentIdentity::new("Ada", "developer"), None);
        assert!(prompt.contains("You are Ada, the team's developer."));
        assert!(!prompt.contains("# TEAM"));
        assert!(!prompt.contains("# YOUR STATUS"));
        assert!(prompt.contains("# INSTRUCTIONS"));
    }

    #[test]
    fn test_role_prompt_placeholders() {
        let mut id = identity();
        id.role_prompt = Some("I am {agent_name}.\nTeam:\n{team_roster}\n".to_string());
        let prompt = build_system_prompt(&id, Some("web:chan-1"));
        assert!(prompt.contains("I am Ada."));
        assert!(prompt.contains("- **Ada** (developer, active) (you)"));
        assert!(prompt.contains("web:chan-1"));
    }

    #[test]
    fn test_economy_section() {
        let mut id = identity();
        id.economy = Some(EconomyStatus::from(&AgentRecord::new("Ada", "developer")));
        let prompt = build_system_prompt(&id, None);
        assert!(prompt.contains("- Performance: 0.50/1.0"));
        assert!(prompt.contains("- Token budget remaining: 100000"));
        assert!(prompt.contains("- Status: active"));
    }

    #[test]
    fn test_section_order() {
        let mut id = identity();
        id.economy = Some(EconomyStatus::from(&AgentRecord::new("Ada", "developer")));
        let prompt = build_system_prompt(&id, Some("s"));
        let order = ["# IDENTITY", "# TEAM", "# YOUR STATUS", "# CURRENT SESSION", "# CURRENT TIME", "# INSTRUCTIONS"];
        let positions: Vec<usize> = order.iter().map(|s| prompt.find(s).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_load_role_prompt() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("reviewer.md"), "You review code.").unwrap();
        assert_eq!(
            load_role_prompt(temp.path(), "reviewer").await.as_deref(),
            Some("You review code.")
        );
        assert!(load_role_prompt(temp.path(), "planner").await.is_none());
    }
}

//! Message router: decides which agent(s) own an inbound message

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::InboundMessage;

/// Default name of the agent that receives unaddressed messages
pub const DEFAULT_COORDINATOR: &str = "Max";

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("mention pattern is valid"));

/// Agent names compare without regard to case, in any script
pub fn same_agent_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// How a message is dispatched
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Every target runs concurrently
    Broadcast,
    /// One target, or the explicitly mentioned ones in order
    Single,
    /// Unaddressed message handed to the coordinator
    Coordinator,
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Broadcast => write!(f, "broadcast"),
            Self::Single => write!(f, "single"),
            Self::Coordinator => write!(f, "coordinator"),
        }
    }
}

/// Result of routing one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub mode: RoutingMode,
    /// Canonical agent names; always drawn from the active roster
    pub targets: Vec<String>,
    /// Set when nobody was addressed and no coordinator was available
    pub fallback: bool,
}

impl RouteDecision {
    fn new(mode: RoutingMode, targets: Vec<String>) -> Self {
        Self {
            mode,
            targets,
            fallback: false,
        }
    }
}

/// Stateless routing policy
#[derive(Debug, Clone)]
pub struct MessageRouter {
    coordinator_name: String,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(DEFAULT_COORDINATOR)
    }
}

impl MessageRouter {
    pub fn new(coordinator_name: impl Into<String>) -> Self {
        Self {
            coordinator_name: coordinator_name.into(),
        }
    }

    pub fn coordinator_name(&self) -> &str {
        &self.coordinator_name
    }

    /// Resolve the owner(s) of a message.
    ///
    /// `registered` is every agent with a live registration, `active` the
    /// non-paused members of the message's channel. Targets never leave
    /// `active`.
    pub fn resolve_owner(
        &self,
        msg: &InboundMessage,
        registered: &[String],
        active: &[String],
    ) -> RouteDecision {
        let mentions = if msg.mentions.is_empty() {
            extract_mentions(&msg.content)
        } else {
            msg.mentions.clone()
        };

        if msg.content.contains("@here") {
            debug!("Routing '@here' to {} active agents", active.len());
            return RouteDecision::new(RoutingMode::Broadcast, active.to_vec());
        }

        if !mentions.is_empty() {
            let matched: Vec<String> = mentions
                .iter()
                .filter_map(|mention| {
                    registered
                        .iter()
                        .filter(|name| active.contains(name))
                        .find(|name| same_agent_name(name, mention))
                        .cloned()
                })
                .collect();
            if !matched.is_empty() {
                debug!("Routing mention(s) to {:?}", matched);
                return RouteDecision::new(RoutingMode::Single, matched);
            }
        }

        let coordinator = &self.coordinator_name;
        if registered.contains(coordinator) && active.contains(coordinator) {
            return RouteDecision::new(RoutingMode::Coordinator, vec![coordinator.clone()]);
        }

        if let Some(first) = active.first() {
            warn!(
                "No mention or coordinator available, falling back to first active agent '{}'",
                first
            );
            return RouteDecision {
                mode: RoutingMode::Single,
                targets: vec![first.clone()],
                fallback: true,
            };
        }

        RouteDecision::new(RoutingMode::Single, Vec::new())
    }
}

/// `@name` tokens in order of appearance
pub fn extract_mentions(content: &str) -> Vec<String> {
    MENTION_RE
        .captures_iter(content)
        .map(|cap| cap[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn msg(content: &str) -> InboundMessage {
        InboundMessage::new("web", "human", "chan-1", content)
    }

    #[test]
    fn test_here_broadcasts_to_active_in_order() {
        let router = MessageRouter::default();
        let registered = names(&["Max", "Ada", "Bob"]);
        let active = names(&["Bob", "Ada"]);
        let decision = router.resolve_owner(&msg("@here standup please"), &registered, &active);
        assert_eq!(decision.mode, RoutingMode::Broadcast);
        assert_eq!(decision.targets, names(&["Bob", "Ada"]));
        assert!(!decision.fallback);
    }

    #[test]
    fn test_mention_is_case_insensitive_and_canonical() {
        let router = MessageRouter::default();
        let registered = names(&["Max", "Ada"]);
        let active = names(&["Max", "Ada"]);
        let decision = router.resolve_owner(&msg("hey @ada can you look"), &registered, &active);
        assert_eq!(decision.mode, RoutingMode::Single);
        assert_eq!(decision.targets, names(&["Ada"]));
    }

    #[test]
    fn test_mention_matches_non_ascii_names_in_any_case() {
        let router = MessageRouter::default();
        let registered = names(&["Ada", "Élodie"]);
        let active = names(&["Ada", "Élodie"]);
        let decision = router.resolve_owner(&msg("@élodie please review"), &registered, &active);
        assert_eq!(decision.mode, RoutingMode::Single);
        assert_eq!(decision.targets, names(&["Élodie"]));
        assert!(!decision.fallback);
    }

    #[test]
    fn test_explicit_mentions_take_precedence_over_content() {
        let router = MessageRouter::default();
        let registered = names(&["Ada", "Bob"]);
        let active = names(&["Ada", "Bob"]);
        let message = msg("@Ada please").with_mentions(names(&["bob"]));
        let decision = router.resolve_owner(&message, &registered, &active);
        assert_eq!(decision.targets, names(&["Bob"]));
    }

    #[test]
    fn test_paused_mention_goes_to_coordinator() {
        let router = MessageRouter::default();
        let registered = names(&["Max", "Ada"]);
        let active = names(&["Max"]);
        let decision = router.resolve_owner(&msg("@Ada hi"), &registered, &active);
        assert_eq!(decision.mode, RoutingMode::Coordinator);
        assert_eq!(decision.targets, names(&["Max"]));
    }

    #[test]
    fn test_repeated_mentions_keep_duplicates() {
        let router = MessageRouter::default();
        let registered = names(&["Ada"]);
        let active = names(&["Ada"]);
        let decision = router.resolve_owner(&msg("@Ada and again @ADA"), &registered, &active);
        assert_eq!(decision.targets, names(&["Ada", "Ada"]));
    }

    #[test]
    fn test_fallback_to_first_active() {
        let router = MessageRouter::default();
        let registered = names(&["Ada", "Bob"]);
        let active = names(&["Bob", "Ada"]);
        let decision = router.resolve_owner(&msg("anyone?"), &registered, &active);
        assert_eq!(decision.mode, RoutingMode::Single);
        assert_eq!(decision.targets, names(&["Bob"]));
        assert!(decision.fallback);
    }

    #[test]
    fn test_empty_active_roster() {
        let router = MessageRouter::default();
        let registered = names(&["Max"]);
        let decision = router.resolve_owner(&msg("hello"), &registered, &[]);
        assert_eq!(decision.mode, RoutingMode::Single);
        assert!(decision.targets.is_empty());

        let decision = router.resolve_owner(&msg("@here"), &registered, &[]);
        assert_eq!(decision.mode, RoutingMode::Broadcast);
        assert!(decision.targets.is_empty());
    }

    #[test]
    fn test_custom_coordinator() {
        let router = MessageRouter::new("Lead");
        let registered = names(&["Lead", "Ada"]);
        let active = names(&["Ada", "Lead"]);
        let decision = router.resolve_owner(&msg("status?"), &registered, &active);
        assert_eq!(decision.mode, RoutingMode::Coordinator);
        assert_eq!(decision.targets, names(&["Lead"]));
    }

    #[test]
    fn test_extract_mentions() {
        assert_eq!(extract_mentions("@a, @b_2 and email@x"), names(&["a", "b_2", "x"]));
        assert!(extract_mentions("no mentions").is_empty());
    }
}

//! Keyword classifier for execution path and connector selection
//!
//! Both decisions are ordered rule lists matched case-insensitively against
//! the prompt. The first rule containing a matching keyword wins. These are
//! coarse heuristics: a missed keyword keeps a job offline.

use serde::{Deserialize, Serialize};

/// Prompt terms that make an online-permitted job run online
pub const ONLINE_KEYWORDS: &[&str] = &["search", "web", "api", "download", "upload", "email", "slack"];

/// Online connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connector {
    WebSearch,
    Email,
    Slack,
    /// Default text/analysis connector
    Text,
}

impl Connector {
    pub fn all() -> &'static [Connector] {
        &[Self::WebSearch, Self::Email, Self::Slack, Self::Text]
    }

    /// Executor and connector name
    pub fn name(&self) -> &'static str {
        match self {
            Self::WebSearch => "web_search",
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Text => "text",
        }
    }

    /// Relative cost of a call through this connector
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Self::WebSearch => 0.5,
            Self::Email | Self::Slack => 0.1,
            Self::Text => 1.0,
        }
    }
}

impl std::fmt::Display for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Connector rules in priority order
const CONNECTOR_RULES: &[(&[&str], Connector)] = &[
    (&["search", "web", "google"], Connector::WebSearch),
    (&["email", "send mail"], Connector::Email),
    (&["slack", "message", "notify"], Connector::Slack),
    (&["analyze", "summarize", "explain"], Connector::Text),
];

/// Whether a prompt asks for network-backed work
pub fn requires_online(prompt: &str) -> bool {
    let prompt = prompt.to_lowercase();
    ONLINE_KEYWORDS.iter().any(|k| prompt.contains(k))
}

/// Pick the online connector for a prompt
pub fn select_connector(prompt: &str) -> Connector {
    let prompt = prompt.to_lowercase();
    CONNECTOR_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| prompt.contains(k)))
        .map(|(_, connector)| *connector)
        .unwrap_or(Connector::Text)
}

/// Estimated cost in USD of running a prompt through a connector
pub fn estimate_cost(prompt: &str, connector: Connector) -> f64 {
    let tokens = prompt.split_whitespace().count() as f64 * 1.3;
    (0.01 + tokens * 0.0001) * connector.cost_multiplier()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_keywords() {
        assert!(requires_online("Search the web for X"));
        assert!(requires_online("call the API"));
        assert!(!requires_online("clean temporary files"));
        // substring match: "downloads" contains "download"
        assert!(requires_online("organize downloads"));
    }

    #[test]
    fn test_connector_priority() {
        assert_eq!(select_connector("search the web for X"), Connector::WebSearch);
        // search outranks messaging
        assert_eq!(select_connector("search slack history"), Connector::WebSearch);
        assert_eq!(select_connector("Email the team"), Connector::Email);
        assert_eq!(select_connector("notify ops"), Connector::Slack);
        assert_eq!(select_connector("summarize this"), Connector::Text);
        assert_eq!(select_connector("upload it"), Connector::Text);
    }

    #[test]
    fn test_cost_estimate() {
        let cost = estimate_cost("one two three four five six seven eight nine ten", Connector::Text);
        assert!((cost - 0.0113).abs() < 1e-9);

        let cost = estimate_cost("", Connector::WebSearch);
        assert!((cost - 0.005).abs() < 1e-9);
    }
}

//! Robots.txt parser
//!
//! Groups `Allow`/`Disallow` prefixes by user agent. Matching is deliberately
//! simple: the first non-empty `Disallow` prefix that matches the path denies.

use std::collections::HashMap;

/// Rules for a single user agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRules {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
}

/// Parsed robots.txt, keyed by lowercase user agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    agents: HashMap<String, AgentRules>,
}

impl RobotsRules {
    /// An empty ruleset that allows everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses robots.txt content
    ///
    /// Comments (`#` to end of line) are stripped and directive names are
    /// case-insensitive. Consecutive `User-agent` lines share one group;
    /// unknown directives are ignored.
    ///
    /// # Arguments
    ///
    /// * `content` - The raw robots.txt body
    ///
    /// # Returns
    ///
    /// The parsed ruleset (empty if nothing applicable was found)
    pub fn parse(content: &str) -> Self {
        let mut agents: HashMap<String, AgentRules> = HashMap::new();
        let mut current: Vec<String> = Vec::new();
        let mut in_rules = false;

        for line in content.lines() {
            let line = match line.split_once('#') {
                Some((before, _)) => before,
                None => line,
            }
            .trim();

            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if in_rules {
                        current.clear();
                        in_rules = false;
                    }
                    let agent = value.to_lowercase();
                    agents.entry(agent.clone()).or_default();
                    current.push(agent);
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    for agent in &current {
                        let rules = agents.entry(agent.clone()).or_default();
                        if key == "allow" {
                            rules.allow.push(value.to_string());
                        } else {
                            rules.disallow.push(value.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        Self { agents }
    }

    /// Rules for `user_agent`, falling back to `*`
    pub fn rules_for(&self, user_agent: &str) -> Option<&AgentRules> {
        self.agents
            .get(&user_agent.to_lowercase())
            .or_else(|| self.agents.get("*"))
    }

    /// Checks if a path is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `path` - The URL path to check (e.g., "/page.html")
    /// * `user_agent` - The user agent string
    ///
    /// # Returns
    ///
    /// * `true` - If no matching `Disallow` prefix exists
    /// * `false` - If the path starts with a non-empty `Disallow` prefix
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        let Some(rules) = self.rules_for(user_agent) else {
            return true;
        };

        !rules
            .disallow
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

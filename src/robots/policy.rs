//! Robots.txt fetching and caching

use crate::crawler::SsrfGuard;
use crate::robots::RobotsRules;
use crate::state::Coordination;
use crate::url::robots_location;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Bytes of robots.txt read before the rest is ignored
const MAX_ROBOTS_BYTES: usize = 512 * 1024;

/// Answers robots.txt allow/deny questions with a shared cache
///
/// Rulesets are cached per `scheme://host[:port]` in [`Coordination::robots`].
/// Any fetch problem (SSRF rejection, timeout, non-2xx, redirect) yields an
/// empty ruleset, which allows everything.
pub struct RobotsPolicy {
    client: Client,
    guard: Arc<SsrfGuard>,
    coordination: Arc<Coordination>,
    timeout: Duration,
}

impl RobotsPolicy {
    pub fn new(
        client: Client,
        guard: Arc<SsrfGuard>,
        coordination: Arc<Coordination>,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            guard,
            coordination,
            timeout,
        }
    }

    /// Checks `url` against the wildcard (`*`) rules
    pub async fn is_allowed(&self, url: &str) -> bool {
        self.is_allowed_for(url, "*").await
    }

    /// Checks if a URL is allowed for `user_agent`
    ///
    /// # Returns
    ///
    /// * `true` - If allowed (including when robots.txt is unavailable)
    /// * `false` - If disallowed, or if the URL cannot be parsed
    pub async fn is_allowed_for(&self, url: &str, user_agent: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some((location, authority)) = robots_location(&parsed) else {
            return false;
        };

        let rules = match self.coordination.robots.get(&authority) {
            Some(rules) => rules,
            None => {
                let rules = Arc::new(self.fetch_rules(&location).await);
                self.coordination
                    .robots
                    .get_or_insert(authority, Arc::clone(&rules))
            }
        };

        rules.is_allowed(parsed.path(), user_agent)
    }

    async fn fetch_rules(&self, location: &str) -> RobotsRules {
        if let Err(e) = self.guard.validate(location).await {
            tracing::debug!("Skipping robots.txt at {}: {}", location, e);
            return RobotsRules::allow_all();
        }

        let response = match self
            .client
            .get(location)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Failed to fetch {}: {}", location, e);
                return RobotsRules::allow_all();
            }
        };

        if !response.status().is_success() {
            tracing::debug!("{} returned {}", location, response.status());
            return RobotsRules::allow_all();
        }

        match read_capped(response, MAX_ROBOTS_BYTES).await {
            Ok(body) => RobotsRules::parse(&String::from_utf8_lossy(&body)),
            Err(e) => {
                tracing::debug!("Failed to read {}: {}", location, e);
                RobotsRules::allow_all()
            }
        }
    }
}

/// Reads at most `cap` bytes of the body, dropping the connection past it
async fn read_capped(mut response: reqwest::Response, cap: usize) -> reqwest::Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = cap - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            tracing::debug!("robots.txt truncated at {} bytes", cap);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

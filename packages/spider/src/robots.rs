//! robots.txt parsing and the per-origin gate.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use searchlight_core::error::{CrawlError, CrawlResult};

/// Parsed robots.txt rules, grouped by user-agent (lowercase).
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    groups: HashMap<String, AgentGroup>,
    sitemaps: Vec<String>,
}

#[derive(Debug, Clone, Default)]
struct AgentGroup {
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay: Option<f64>,
}

impl RobotsRules {
    /// A rule set that allows everything (no robots.txt, or a 404).
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Parse robots.txt content. Unknown directives are ignored.
    pub fn parse(content: &str) -> Self {
        let mut rules = Self::default();
        let mut current_agents: Vec<String> = Vec::new();
        let mut current = AgentGroup::default();
        let mut in_group_body = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    if in_group_body {
                        rules.flush_group(&current_agents, current);
                        current = AgentGroup::default();
                        current_agents.clear();
                        in_group_body = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "disallow" => {
                    in_group_body = true;
                    if !value.is_empty() {
                        current.disallow.push(value.to_string());
                    }
                }
                "allow" => {
                    in_group_body = true;
                    if !value.is_empty() {
                        current.allow.push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    in_group_body = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        current.crawl_delay = Some(delay);
                    }
                }
                "sitemap" => {
                    rules.sitemaps.push(value.to_string());
                }
                _ => {}
            }
        }

        rules.flush_group(&current_agents, current);
        rules
    }

    fn flush_group(&mut self, agents: &[String], group: AgentGroup) {
        for agent in agents {
            self.groups.insert(agent.clone(), group.clone());
        }
    }

    /// Decide whether the wildcard group permits a path.
    ///
    /// Longest matching rule wins; on a tie, allow wins.
    pub fn is_allowed(&self, path: &str) -> bool {
        let Some(group) = self.groups.get("*") else {
            return true;
        };

        let allow_len = group
            .allow
            .iter()
            .filter(|rule| path.starts_with(rule.as_str()))
            .map(|rule| rule.len())
            .max();
        let disallow_len = group
            .disallow
            .iter()
            .filter(|rule| path.starts_with(rule.as_str()))
            .map(|rule| rule.len())
            .max();

        match (allow_len, disallow_len) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }

    /// Crawl-delay of the wildcard group. Parsed but not honoured; pacing
    /// between requests is global.
    pub fn crawl_delay(&self) -> Option<Duration> {
        self.groups
            .get("*")
            .and_then(|g| g.crawl_delay)
            .map(Duration::from_secs_f64)
    }

    pub fn sitemaps(&self) -> &[String] {
        &self.sitemaps
    }
}

/// Per-origin robots.txt cache with allow/deny decisions.
///
/// A 404 caches a permissive rule. Any other failure to obtain robots.txt
/// fails closed: the caller skips the URL.
pub struct RobotsGate {
    client: reqwest::Client,
    cache: RwLock<HashMap<String, RobotsRules>>,
}

impl RobotsGate {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether `path` on `origin` (scheme://host) may be fetched.
    pub async fn check(&self, origin: &str, path: &str) -> CrawlResult<()> {
        if let Some(rules) = self.cache.read().await.get(origin) {
            return Self::decide(rules, origin, path);
        }

        let rules = self.fetch_rules(origin).await?;
        let decision = Self::decide(&rules, origin, path);
        self.cache.write().await.insert(origin.to_string(), rules);
        decision
    }

    fn decide(rules: &RobotsRules, origin: &str, path: &str) -> CrawlResult<()> {
        if rules.is_allowed(path) {
            Ok(())
        } else {
            Err(CrawlError::RobotsDenied {
                url: format!("{origin}{path}"),
            })
        }
    }

    async fn fetch_rules(&self, origin: &str) -> CrawlResult<RobotsRules> {
        let robots_url = format!("{}/robots.txt", origin.trim_end_matches('/'));
        let response = self
            .client
            .get(&robots_url)
            .send()
            .await
            .map_err(|e| CrawlError::RobotsUnavailable {
                origin: origin.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(RobotsRules::permissive());
        }
        if !status.is_success() {
            return Err(CrawlError::RobotsUnavailable {
                origin: origin.to_string(),
                reason: format!("status {status}"),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CrawlError::RobotsUnavailable {
                origin: origin.to_string(),
                reason: e.to_string(),
            })?;

        Ok(RobotsRules::parse(&body))
    }
}

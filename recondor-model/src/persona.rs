use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::{KeywordSetId, PersonaId, ProxyId};

/// Which validation stage a persona configures.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaKind {
    Dns,
    Http,
}

impl PersonaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonaKind::Dns => "dns",
            PersonaKind::Http => "http",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "dns" => Ok(PersonaKind::Dns),
            "http" => Ok(PersonaKind::Http),
            other => Err(ModelError::UnknownValue(format!("persona kind {other}"))),
        }
    }
}

impl fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolver settings carried by a DNS persona.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsPersonaConfig {
    /// Resolver addresses in `ip:port` form; empty means system defaults.
    #[serde(default)]
    pub resolvers: Vec<String>,
    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: u32,
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: u32,
    #[serde(default)]
    pub use_system_resolvers: bool,
}

fn default_query_timeout_seconds() -> u32 {
    5
}

fn default_max_concurrent_queries() -> u32 {
    10
}

impl Default for DnsPersonaConfig {
    fn default() -> Self {
        Self {
            resolvers: Vec::new(),
            query_timeout_seconds: default_query_timeout_seconds(),
            max_concurrent_queries: default_max_concurrent_queries(),
            use_system_resolvers: true,
        }
    }
}

/// Request-shaping settings carried by an HTTP persona.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpPersonaConfig {
    pub user_agent: String,
    /// Extra headers applied to every probe, in order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u32,
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: bool,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default)]
    pub allow_insecure_tls: bool,
}

fn default_request_timeout_seconds() -> u32 {
    15
}

fn default_follow_redirects() -> bool {
    true
}

fn default_max_redirects() -> u32 {
    5
}

impl Default for HttpPersonaConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36".into(),
            headers: Vec::new(),
            request_timeout_seconds: default_request_timeout_seconds(),
            follow_redirects: default_follow_redirects(),
            max_redirects: default_max_redirects(),
            allow_insecure_tls: false,
        }
    }
}

/// Stage-specific persona configuration. The tag matches [`PersonaKind`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum PersonaConfig {
    Dns(DnsPersonaConfig),
    Http(HttpPersonaConfig),
}

impl PersonaConfig {
    pub fn kind(&self) -> PersonaKind {
        match self {
            PersonaConfig::Dns(_) => PersonaKind::Dns,
            PersonaConfig::Http(_) => PersonaKind::Http,
        }
    }
}

/// Named validation identity rotated through by the stage runners.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Persona {
    pub id: PersonaId,
    pub name: String,
    #[serde(flatten)]
    pub config: PersonaConfig,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Persona {
    pub fn kind(&self) -> PersonaKind {
        self.config.kind()
    }
}

/// How a proxy is picked from a campaign's proxy pool.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxySelectionStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

impl ProxySelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxySelectionStrategy::RoundRobin => "round_robin",
            ProxySelectionStrategy::Random => "random",
            ProxySelectionStrategy::Weighted => "weighted",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "round_robin" => Ok(ProxySelectionStrategy::RoundRobin),
            "random" => Ok(ProxySelectionStrategy::Random),
            "weighted" => Ok(ProxySelectionStrategy::Weighted),
            other => Err(ModelError::UnknownValue(format!("proxy strategy {other}"))),
        }
    }
}

/// Outbound proxy usable by HTTP probes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proxy {
    pub id: ProxyId,
    pub name: String,
    /// Full proxy URL including scheme, e.g. `socks5://host:1080`.
    pub url: String,
    /// Relative share under the weighted selection strategy.
    pub weight: u32,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// How a keyword rule matches response bodies.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordRuleType {
    String,
    Regex,
}

impl KeywordRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordRuleType::String => "string",
            KeywordRuleType::Regex => "regex",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "string" => Ok(KeywordRuleType::String),
            "regex" => Ok(KeywordRuleType::Regex),
            other => Err(ModelError::UnknownValue(format!("keyword rule type {other}"))),
        }
    }
}

/// Single matching rule inside a keyword set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeywordRule {
    pub rule_type: KeywordRuleType,
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
    /// Optional category label echoed into match records.
    #[serde(default)]
    pub category: Option<String>,
}

/// Reusable named collection of keyword rules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeywordSet {
    pub id: KeywordSetId,
    pub name: String,
    pub rules: Vec<KeywordRule>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

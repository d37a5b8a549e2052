// # Dynamic Routing Model
//
// Weighted, health-aware pools and the geo/subnet/ASN rules that pick
// between them. The compiler turns these into the provider's filter chain;
// the parser turns the provider's objects back into these.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use super::RecordType;

/// The dynamic half of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicRecord {
    /// A, AAAA or CNAME
    pub record_type: RecordType,

    /// Pools, rules and catch-all values
    pub spec: DynamicSpec,

    /// Health-check settings for `obey` values
    #[serde(default)]
    pub healthcheck: Healthcheck,
}

impl DynamicRecord {
    /// Create a dynamic record part with default health-checking
    pub fn new(record_type: RecordType, spec: DynamicSpec) -> Self {
        Self {
            record_type,
            spec,
            healthcheck: Healthcheck::default(),
        }
    }

    /// Replace the health-check settings
    pub fn with_healthcheck(mut self, healthcheck: Healthcheck) -> Self {
        self.healthcheck = healthcheck;
        self
    }
}

/// Pools + ordered rules + record-level default answers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicSpec {
    /// Pools by id
    pub pools: BTreeMap<String, Pool>,

    /// Rules in priority order
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Values served once every pool in a chain is exhausted
    #[serde(default)]
    pub default_values: Vec<String>,
}

impl DynamicSpec {
    /// Add a pool
    pub fn with_pool(mut self, id: impl Into<String>, pool: Pool) -> Self {
        self.pools.insert(id.into(), pool);
        self
    }

    /// Append a rule
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Set the catch-all values
    pub fn with_default_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_values = values.into_iter().map(Into::into).collect();
        self
    }
}

/// A weighted set of candidate values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    /// Candidate values, in declaration order
    pub values: Vec<PoolValue>,

    /// Pool consulted when every value here is down
    #[serde(default)]
    pub fallback: Option<String>,
}

impl Pool {
    /// Create a pool from values
    pub fn new(values: Vec<PoolValue>) -> Self {
        Self {
            values,
            fallback: None,
        }
    }

    /// Set the fallback pool
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }
}

/// One candidate value in a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolValue {
    /// Address or hostname
    pub value: String,

    /// Relative weight for the weighted shuffle
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// Forced or health-checked status
    #[serde(default)]
    pub status: ValueStatus,
}

impl PoolValue {
    /// A health-checked value with weight 1
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            weight: default_weight(),
            status: ValueStatus::Obey,
        }
    }

    /// Set the weight
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Force a status
    pub fn with_status(mut self, status: ValueStatus) -> Self {
        self.status = status;
        self
    }
}

fn default_weight() -> u32 {
    1
}

/// Whether a value's health is forced or monitored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueStatus {
    /// Always served
    Up,
    /// Never served
    Down,
    /// Served while its monitor reports up
    #[default]
    Obey,
}

/// Targeting criteria mapping requesters to a pool
///
/// A rule with no criteria is a catch-all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Target pool id
    pub pool: String,

    /// Continent (`EU`), country (`EU-FR`) or subdivision (`NA-US-CA`) codes
    #[serde(default)]
    pub geos: BTreeSet<String>,

    /// Client subnet prefixes
    #[serde(default)]
    pub subnets: BTreeSet<String>,

    /// Client autonomous system numbers
    #[serde(default)]
    pub asns: BTreeSet<u32>,
}

impl Rule {
    /// A catch-all rule for a pool
    pub fn new(pool: impl Into<String>) -> Self {
        Self {
            pool: pool.into(),
            ..Default::default()
        }
    }

    /// Add geo codes
    pub fn with_geos<I, S>(mut self, geos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.geos.extend(geos.into_iter().map(Into::into));
        self
    }

    /// Add subnet prefixes
    pub fn with_subnets<I, S>(mut self, subnets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subnets.extend(subnets.into_iter().map(Into::into));
        self
    }

    /// Add AS numbers
    pub fn with_asns(mut self, asns: impl IntoIterator<Item = u32>) -> Self {
        self.asns.extend(asns);
        self
    }

    /// Whether the rule matches every requester
    pub fn is_catchall(&self) -> bool {
        self.geos.is_empty() && self.subnets.is_empty() && self.asns.is_empty()
    }
}

/// How a pool value is checked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Healthcheck {
    /// Probe protocol
    #[serde(default)]
    pub protocol: HealthcheckProtocol,

    /// Probe port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request path for HTTP(S) health checks
    #[serde(default = "default_path")]
    pub path: String,

    /// Host header; the record's name when unset
    #[serde(default)]
    pub host: Option<String>,

    /// Per-record overrides of the provider's job defaults
    #[serde(default)]
    pub tuning: HealthcheckTuning,
}

impl Healthcheck {
    /// Host header to send for a record
    pub fn host_for(&self, record_fqdn: &str) -> String {
        self.host
            .clone()
            .unwrap_or_else(|| record_fqdn.trim_end_matches('.').to_string())
    }
}

impl Default for Healthcheck {
    fn default() -> Self {
        Self {
            protocol: HealthcheckProtocol::default(),
            port: default_port(),
            path: default_path(),
            host: None,
            tuning: HealthcheckTuning::default(),
        }
    }
}

fn default_port() -> u16 {
    443
}

fn default_path() -> String {
    "/_dns".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthcheckProtocol {
    Http,
    #[default]
    Https,
    Tcp,
    Icmp,
}

/// Per-record job overrides; `None` falls back to provider defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckTuning {
    #[serde(default)]
    pub policy: Option<HealthcheckPolicy>,
    #[serde(default)]
    pub frequency: Option<u32>,
    #[serde(default)]
    pub connect_timeout: Option<u32>,
    #[serde(default)]
    pub response_timeout: Option<u32>,
    #[serde(default)]
    pub rapid_recheck: Option<bool>,
    #[serde(default)]
    pub http_version: Option<HttpVersion>,
}

/// Regional agreement required to mark a value down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthcheckPolicy {
    All,
    #[default]
    Quorum,
    One,
}

impl HealthcheckPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthcheckPolicy::All => "all",
            HealthcheckPolicy::Quorum => "quorum",
            HealthcheckPolicy::One => "one",
        }
    }
}

/// HTTP version written into emulated HTTP checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpVersion {
    #[default]
    #[serde(rename = "HTTP/1.0")]
    Http10,
    #[serde(rename = "HTTP/1.1")]
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/1.0" => Ok(HttpVersion::Http10),
            "HTTP/1.1" => Ok(HttpVersion::Http11),
            other => Err(crate::Error::config(format!(
                "unsupported http version {:?}, expected HTTP/1.0 or HTTP/1.1",
                other
            ))),
        }
    }
}

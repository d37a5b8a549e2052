//! Declarative, provider-agnostic zone model
//!
//! Everything here is built fresh from desired configuration on each run, or
//! parsed from live state by the [`translator`](crate::translator). Nothing is
//! persisted locally.

pub mod dynamic;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

pub use dynamic::{
    DynamicRecord, DynamicSpec, Healthcheck, HealthcheckPolicy, HealthcheckProtocol,
    HealthcheckTuning, HttpVersion, Pool, PoolValue, Rule, ValueStatus,
};

/// How the apex NS record is managed for a zone
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootNsPolicy {
    /// Desired nameservers are added to the ones the provider assigned
    #[default]
    Merge,
    /// Desired nameservers replace the ones the provider assigned
    Replace,
}

/// A DNS zone and its records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone name, absolute (`example.com.`)
    pub name: String,

    /// Records, in declaration order
    #[serde(default)]
    pub records: Vec<Record>,

    /// Root NS management policy
    #[serde(default)]
    pub root_ns_policy: RootNsPolicy,
}

impl Zone {
    /// Create an empty zone; a trailing dot is added when missing
    pub fn new(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('.') {
            name.push('.');
        }
        Self {
            name,
            records: Vec::new(),
            root_ns_policy: RootNsPolicy::default(),
        }
    }

    /// Add a record
    pub fn with_record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    /// Set the root NS policy
    pub fn with_root_ns_policy(mut self, policy: RootNsPolicy) -> Self {
        self.root_ns_policy = policy;
        self
    }

    /// Zone name as the remote API spells it (no trailing dot)
    pub fn api_name(&self) -> &str {
        self.name.trim_end_matches('.')
    }

    /// Fully qualified name of a record in this zone
    pub fn fqdn(&self, record_name: &str) -> String {
        if record_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", record_name, self.name)
        }
    }

    /// Relative record name for a domain returned by the remote
    pub fn hostname_from_fqdn(&self, domain: &str) -> String {
        let domain = domain.trim_end_matches('.');
        let zone = self.api_name();
        if domain == zone {
            String::new()
        } else {
            domain
                .strip_suffix(zone)
                .map(|s| s.trim_end_matches('.').to_string())
                .unwrap_or_else(|| domain.to_string())
        }
    }

    /// Look up a record by name and type
    pub fn record(&self, name: &str, record_type: RecordType) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| r.name == name && r.record_type() == record_type)
    }
}

/// Record types this system knows how to manage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Alias,
    Caa,
    Cname,
    Dname,
    Ds,
    Mx,
    Naptr,
    Ns,
    Ptr,
    Spf,
    Srv,
    Tlsa,
    Txt,
    Urlfwd,
}

impl RecordType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Alias => "ALIAS",
            RecordType::Caa => "CAA",
            RecordType::Cname => "CNAME",
            RecordType::Dname => "DNAME",
            RecordType::Ds => "DS",
            RecordType::Mx => "MX",
            RecordType::Naptr => "NAPTR",
            RecordType::Ns => "NS",
            RecordType::Ptr => "PTR",
            RecordType::Spf => "SPF",
            RecordType::Srv => "SRV",
            RecordType::Tlsa => "TLSA",
            RecordType::Txt => "TXT",
            RecordType::Urlfwd => "URLFWD",
        }
    }

    /// Whether answers hold hostnames that must be absolute
    pub fn has_hostname_values(&self) -> bool {
        matches!(
            self,
            RecordType::Alias
                | RecordType::Cname
                | RecordType::Dname
                | RecordType::Mx
                | RecordType::Ns
                | RecordType::Ptr
                | RecordType::Srv
        )
    }

    /// Whether the type can carry dynamic routing
    pub fn supports_dynamic(&self) -> bool {
        matches!(self, RecordType::A | RecordType::Aaaa | RecordType::Cname)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "A" => RecordType::A,
            "AAAA" => RecordType::Aaaa,
            "ALIAS" => RecordType::Alias,
            "CAA" => RecordType::Caa,
            "CNAME" => RecordType::Cname,
            "DNAME" => RecordType::Dname,
            "DS" => RecordType::Ds,
            "MX" => RecordType::Mx,
            "NAPTR" => RecordType::Naptr,
            "NS" => RecordType::Ns,
            "PTR" => RecordType::Ptr,
            "SPF" => RecordType::Spf,
            "SRV" => RecordType::Srv,
            "TLSA" => RecordType::Tlsa,
            "TXT" => RecordType::Txt,
            "URLFWD" => RecordType::Urlfwd,
            other => {
                return Err(crate::Error::validation(
                    other,
                    "record type",
                ));
            }
        })
    }
}

/// A single managed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Name relative to the zone (`""` for the apex)
    pub name: String,

    /// Time-to-live in seconds
    pub ttl: u32,

    /// Either a plain value set or a dynamic routing spec, never both
    pub content: RecordContent,
}

impl Record {
    /// Create a simple record
    pub fn simple(name: impl Into<String>, ttl: u32, data: RecordData) -> Self {
        Self {
            name: name.into(),
            ttl,
            content: RecordContent::Simple(data),
        }
    }

    /// Create a dynamic record
    pub fn dynamic(name: impl Into<String>, ttl: u32, dynamic: DynamicRecord) -> Self {
        Self {
            name: name.into(),
            ttl,
            content: RecordContent::Dynamic(dynamic),
        }
    }

    /// The record's type
    pub fn record_type(&self) -> RecordType {
        match &self.content {
            RecordContent::Simple(data) => data.record_type(),
            RecordContent::Dynamic(dynamic) => dynamic.record_type,
        }
    }

    /// Whether the record carries dynamic routing
    pub fn is_dynamic(&self) -> bool {
        matches!(self.content, RecordContent::Dynamic(_))
    }

    /// The dynamic part, if any
    pub fn as_dynamic(&self) -> Option<&DynamicRecord> {
        match &self.content {
            RecordContent::Dynamic(dynamic) => Some(dynamic),
            RecordContent::Simple(_) => None,
        }
    }

    /// Whether this is the zone apex NS record
    pub fn is_root_ns(&self) -> bool {
        self.name.is_empty() && self.record_type() == RecordType::Ns
    }

    /// Identity within a zone
    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.name.clone(), self.record_type())
    }
}

/// (name, type) identity of a record inside a zone
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Relative name
    pub name: String,
    /// Record type
    pub record_type: RecordType,
}

impl RecordKey {
    /// Create a key
    pub fn new(name: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            name: name.into(),
            record_type,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "@ {}", self.record_type)
        } else {
            write!(f, "{} {}", self.name, self.record_type)
        }
    }
}

/// Simple or dynamic content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordContent {
    /// A plain value set
    Simple(RecordData),
    /// Health/geo-aware routing
    Dynamic(DynamicRecord),
}

/// Typed value set, one variant per supported record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "UPPERCASE")]
pub enum RecordData {
    A(Vec<Ipv4Addr>),
    Aaaa(Vec<Ipv6Addr>),
    Alias(String),
    Caa(Vec<CaaValue>),
    Cname(String),
    Dname(String),
    Ds(Vec<DsValue>),
    Mx(Vec<MxValue>),
    Naptr(Vec<NaptrValue>),
    Ns(Vec<String>),
    Ptr(Vec<String>),
    Spf(Vec<String>),
    Srv(Vec<SrvValue>),
    Tlsa(Vec<TlsaValue>),
    Txt(Vec<String>),
    Urlfwd(Vec<UrlfwdValue>),
}

impl RecordData {
    /// The record type of this value set
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordData::A(_) => RecordType::A,
            RecordData::Aaaa(_) => RecordType::Aaaa,
            RecordData::Alias(_) => RecordType::Alias,
            RecordData::Caa(_) => RecordType::Caa,
            RecordData::Cname(_) => RecordType::Cname,
            RecordData::Dname(_) => RecordType::Dname,
            RecordData::Ds(_) => RecordType::Ds,
            RecordData::Mx(_) => RecordType::Mx,
            RecordData::Naptr(_) => RecordType::Naptr,
            RecordData::Ns(_) => RecordType::Ns,
            RecordData::Ptr(_) => RecordType::Ptr,
            RecordData::Spf(_) => RecordType::Spf,
            RecordData::Srv(_) => RecordType::Srv,
            RecordData::Tlsa(_) => RecordType::Tlsa,
            RecordData::Txt(_) => RecordType::Txt,
            RecordData::Urlfwd(_) => RecordType::Urlfwd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxValue {
    pub preference: u16,
    pub exchange: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvValue {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaaValue {
    pub flags: u8,
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaptrValue {
    pub order: u16,
    pub preference: u16,
    pub flags: String,
    pub service: String,
    pub regexp: String,
    pub replacement: String,
}

/// Delegation signer, passed through as its four wire fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DsValue {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: String,
}

/// DANE association, passed through as its four wire fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsaValue {
    pub certificate_usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub certificate_association_data: String,
}

/// Provider-side URL forwarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlfwdValue {
    pub path: String,
    pub target: String,
    pub code: u16,
    pub masking: u8,
    pub query: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_name_normalized() {
        let zone = Zone::new("example.com");
        assert_eq!(zone.name, "example.com.");
        assert_eq!(zone.api_name(), "example.com");
        assert_eq!(zone.fqdn("www"), "www.example.com.");
        assert_eq!(zone.fqdn(""), "example.com.");
    }

    #[test]
    fn test_hostname_from_fqdn() {
        let zone = Zone::new("example.com.");
        assert_eq!(zone.hostname_from_fqdn("example.com"), "");
        assert_eq!(zone.hostname_from_fqdn("www.example.com"), "www");
        assert_eq!(zone.hostname_from_fqdn("a.b.example.com."), "a.b");
    }

    #[test]
    fn test_record_type_parse_rejects_unknown() {
        assert_eq!("aaaa".parse::<RecordType>().unwrap(), RecordType::Aaaa);
        assert!("SOA".parse::<RecordType>().is_err());
    }

    #[test]
    fn test_root_ns_detection() {
        let ns = Record::simple("", 3600, RecordData::Ns(vec!["ns1.example.net.".into()]));
        assert!(ns.is_root_ns());
        let sub = Record::simple("sub", 3600, RecordData::Ns(vec!["ns1.example.net.".into()]));
        assert!(!sub.is_root_ns());
    }
}

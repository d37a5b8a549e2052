//! Native (wire) objects of the managed-DNS API
//!
//! These mirror the JSON the service sends and accepts. Fields the service
//! may add over time are tolerated on read; only the fields listed here are
//! ever written.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// A zone as returned by `GET /zones/{zone}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeZone {
    /// Zone name without the trailing dot
    pub zone: String,

    /// Nameservers the service assigned to the zone
    #[serde(default)]
    pub dns_servers: Vec<String>,

    /// Record summaries (`short_answers` only for tier 1 records)
    #[serde(default)]
    pub records: Vec<NativeRecord>,
}

/// A record, either the summary from a zone listing or the full object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeRecord {
    /// Zone the record lives in
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,

    /// Fully qualified name without the trailing dot
    pub domain: String,

    /// Record type (`A`, `MX`, ...)
    #[serde(rename = "type")]
    pub record_type: String,

    #[serde(default)]
    pub ttl: u32,

    /// Rendered answers, present on zone listings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_answers: Vec<String>,

    /// 1 for plain records, higher once answers carry metadata or filters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<u32>,

    #[serde(default)]
    pub answers: Vec<Answer>,

    #[serde(default)]
    pub filters: Vec<Filter>,

    #[serde(default)]
    pub regions: BTreeMap<String, Region>,
}

impl NativeRecord {
    /// Whether the full object must be fetched to see the record's meta
    pub fn is_advanced(&self) -> bool {
        self.tier.unwrap_or(1) > 1
    }

    /// Note of the first answer, if any
    pub fn first_answer_note(&self) -> Option<&str> {
        self.answers
            .first()
            .and_then(|answer| answer.meta.note.as_deref())
    }

    /// Rendered answer strings
    ///
    /// Uses `short_answers` when the listing provided them and renders the
    /// full answers otherwise.
    pub fn rendered_answers(&self) -> Vec<String> {
        if !self.short_answers.is_empty() {
            return self.short_answers.clone();
        }
        self.answers.iter().map(Answer::rendered).collect()
    }
}

/// One answer with its selection metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Answer fields (`["10", "mx.example.com."]` for MX)
    pub answer: Vec<Value>,

    #[serde(default)]
    pub meta: AnswerMeta,

    /// Region label this answer serves
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Answer {
    /// A plain answer without metadata
    pub fn plain(fields: Vec<Value>) -> Self {
        Self {
            answer: fields,
            ..Default::default()
        }
    }

    /// Answer fields as strings; numbers are rendered without quotes
    pub fn fields(&self) -> Vec<String> {
        self.answer.iter().map(value_to_string).collect()
    }

    /// Answer fields joined by spaces, the `short_answers` form
    pub fn rendered(&self) -> String {
        self.fields().join(" ")
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Answer metadata read by the filter chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up: Option<UpMeta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

/// Health gate of an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpMeta {
    /// Forced up or down
    Forced(bool),
    /// Follows a data feed, which in turn follows a monitoring job
    Feed { feed: String },
}

impl UpMeta {
    /// Data feed id, when the answer follows one
    pub fn feed_id(&self) -> Option<&str> {
        match self {
            UpMeta::Feed { feed } => Some(feed),
            UpMeta::Forced(_) => None,
        }
    }
}

/// A region of a record: a labelled set of targeting criteria
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(default)]
    pub meta: RegionMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub country: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub us_state: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ca_province: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub georegion: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_prefixes: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asn: Vec<u32>,
}

/// One stage of a record's filter chain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub filter: String,

    #[serde(default)]
    pub config: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

impl Filter {
    /// An enabled stage
    pub fn new(filter: &str, config: Map<String, Value>) -> Self {
        Self {
            filter: filter.to_string(),
            config,
            disabled: None,
        }
    }

    /// The stage with an explicit `disabled: false` dropped
    pub fn sanitized(&self) -> Self {
        let mut filter = self.clone();
        if filter.disabled == Some(false) {
            filter.disabled = None;
        }
        filter
    }
}

/// A monitoring job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorJob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    pub job_type: String,

    #[serde(default)]
    pub config: Map<String, Value>,

    #[serde(default)]
    pub regions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rapid_recheck: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_list: Option<String>,

    #[serde(default)]
    pub rules: Vec<MonitorRule>,
}

/// Output check of a monitoring job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRule {
    pub comparison: String,
    pub key: String,
    pub value: Value,
}

/// A notify list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub notify_list: Vec<Value>,
}

impl NotifyList {
    /// A list whose only recipient is the data source `source_id`
    ///
    /// Monitor state reaches the answers' data feeds through this target.
    pub fn for_data_source(name: impl Into<String>, source_id: &str) -> Self {
        Self {
            id: None,
            name: name.into(),
            notify_list: vec![json!({
                "type": "datafeed",
                "config": {"sourceid": source_id},
            })],
        }
    }
}

/// A data source; monitoring jobs publish their state into one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    pub sourcetype: String,
}

impl DataSource {
    /// Source type fed by NS1 monitoring jobs
    pub const MONITORING: &'static str = "nsone_monitoring";

    /// A monitoring data source named `name`
    pub fn monitoring(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            sourcetype: Self::MONITORING.into(),
        }
    }
}

/// A data feed of a data source, carrying one monitoring job's state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFeed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    #[serde(default)]
    pub config: Map<String, Value>,
}

impl DataFeed {
    /// A feed of the job `job_id`
    pub fn for_job(name: impl Into<String>, job_id: &str) -> Self {
        let mut config = Map::new();
        config.insert("jobid".into(), Value::String(job_id.into()));
        Self {
            id: None,
            name: name.into(),
            config,
        }
    }

    /// The monitoring job this feed carries
    pub fn job_id(&self) -> Option<&str> {
        self.config.get("jobid").and_then(Value::as_str)
    }
}

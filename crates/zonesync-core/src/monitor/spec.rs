// # Monitor Job Generation
//
// One health-check job per `obey` pool value. The job's semantic settings
// are hashed into its fingerprint; name, `active` and the notify-list link
// are config fields that may be corrected in place.

use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

use super::fingerprint::Fingerprint;
use crate::config::MonitorConfig;
use crate::model::{Healthcheck, HealthcheckProtocol, RecordType};
use crate::native::{MonitorJob, MonitorRule};

/// The desired monitoring job for one pool value
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSpec {
    /// Content identity of the job
    pub fingerprint: Fingerprint,

    /// Pool value the job checks, as it appears in answers
    pub value: String,

    /// Job body to create or update (no id, no notify list)
    pub job: MonitorJob,
}

impl MonitorSpec {
    /// Generate the job checking `value` of a dynamic record
    pub fn generate(
        record_fqdn: &str,
        record_type: RecordType,
        value: &str,
        healthcheck: &Healthcheck,
        config: &MonitorConfig,
    ) -> Self {
        let defaults = &config.healthcheck;
        let tuning = &healthcheck.tuning;
        let policy = tuning.policy.unwrap_or(defaults.policy);
        let frequency = tuning.frequency.unwrap_or(defaults.frequency);
        let rapid_recheck = tuning.rapid_recheck.unwrap_or(defaults.rapid_recheck);
        let connect_timeout = tuning.connect_timeout.unwrap_or(defaults.connect_timeout);
        let response_timeout = tuning.response_timeout.unwrap_or(defaults.response_timeout);
        let http_version = tuning.http_version.unwrap_or(config.default_http_version);

        // Jobs reject a target with a trailing dot
        let target = if record_type == RecordType::Cname {
            value.trim_end_matches('.')
        } else {
            value
        };
        let host_header = healthcheck.host_for(record_fqdn);

        let mut rules = Vec::new();
        let (job_type, mut job_config) = match healthcheck.protocol {
            HealthcheckProtocol::Icmp => (
                "ping",
                object(json!({
                    "count": 4,
                    "host": target,
                    "interval": response_timeout * 250,
                    "ipv6": record_type == RecordType::Aaaa,
                    "timeout": response_timeout * 1000,
                })),
            ),
            protocol if protocol == HealthcheckProtocol::Tcp || !config.use_http_monitors => {
                let mut job_config = object(json!({
                    "host": target,
                    "port": healthcheck.port,
                    "connect_timeout": connect_timeout * 1000,
                    "response_timeout": response_timeout * 1000,
                    "ssl": protocol == HealthcheckProtocol::Https,
                }));
                if protocol != HealthcheckProtocol::Tcp {
                    let request = format!(
                        r"GET {} {}\r\nHost: {}\r\nUser-agent: NS1\r\n\r\n",
                        healthcheck.path, http_version, host_header
                    );
                    job_config.insert("send".into(), Value::String(request));
                    rules.push(MonitorRule {
                        comparison: "contains".into(),
                        key: "output".into(),
                        value: json!("200 OK"),
                    });
                }
                ("tcp", job_config)
            }
            protocol => {
                let scheme = if protocol == HealthcheckProtocol::Https {
                    "https"
                } else {
                    "http"
                };
                let authority = if record_type == RecordType::Aaaa {
                    format!("[{}]", target)
                } else {
                    target.to_string()
                };
                rules.push(MonitorRule {
                    comparison: "==".into(),
                    key: "status_code".into(),
                    value: json!("200"),
                });
                (
                    "http",
                    object(json!({
                        "url": format!("{}://{}:{}{}", scheme, authority, healthcheck.port, healthcheck.path),
                        "virtual_host": host_header,
                        "user_agent": "NS1",
                        "tls_add_verify": false,
                        "follow_redirect": false,
                        "connect_timeout": connect_timeout,
                        "idle_timeout": response_timeout,
                    })),
                )
            }
        };
        if record_type == RecordType::Aaaa {
            job_config.insert("ipv6".into(), Value::Bool(true));
        }

        let regions: BTreeSet<&str> = config.regions.iter().map(String::as_str).collect();
        let fingerprint = Fingerprint::compute(&json!({
            "job_type": job_type,
            "config": job_config,
            "regions": regions,
            "region_scope": "fixed",
            "policy": policy.as_str(),
            "frequency": frequency,
            "rapid_recheck": rapid_recheck,
            "rules": rules,
        }));

        let job = MonitorJob {
            id: None,
            name: format!("{} - {} - {}", target, job_type, fingerprint.short()),
            job_type: job_type.to_string(),
            config: job_config,
            regions: config.regions.clone(),
            region_scope: Some("fixed".into()),
            policy: Some(policy.as_str().to_string()),
            frequency: Some(frequency),
            rapid_recheck: Some(rapid_recheck),
            active: Some(true),
            notes: Some(fingerprint.to_notes()),
            notify_list: None,
            rules,
        };

        Self {
            fingerprint,
            value: value.to_string(),
            job,
        }
    }

    /// Whether a live job carries every field this spec sets
    ///
    /// Only fields written by this system are compared: `regions` as a set,
    /// `config` key by key. Anything else the service reports is ignored.
    pub fn is_match(&self, have: &MonitorJob) -> bool {
        let expected = &self.job;
        let checks = [
            ("name", expected.name == have.name),
            ("job_type", expected.job_type == have.job_type),
            ("region_scope", expected.region_scope == have.region_scope),
            ("policy", expected.policy == have.policy),
            ("frequency", expected.frequency == have.frequency),
            ("rapid_recheck", expected.rapid_recheck == have.rapid_recheck),
            ("active", expected.active == have.active),
            ("notes", expected.notes == have.notes),
            ("rules", expected.rules == have.rules),
            (
                "regions",
                expected.regions.iter().collect::<BTreeSet<_>>()
                    == have.regions.iter().collect::<BTreeSet<_>>(),
            ),
            (
                "config",
                expected
                    .config
                    .iter()
                    .all(|(key, value)| have.config.get(key) == Some(value)),
            ),
        ];

        match checks.iter().find(|(_, matched)| !matched) {
            Some((field, _)) => {
                tracing::debug!(monitor = %have.name, field = *field, "Monitor mismatch");
                false
            }
            None => true,
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// # Record Translator
//
// Maps declarative records to native record objects and back. Simple types
// use the provider's answer-array convention, one arm per type; dynamic
// records are handed to the rule compiler.
//
// The canonical form is what the reconciler diffs: rendered rdata sets for
// simple records, and TTL + defaults + pools + ordered rules for dynamic
// ones. Health-check settings live on monitors and are not part of it.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use tracing::warn;

use crate::compiler::RuleCompiler;
use crate::error::{Error, Result};
use crate::model::{
    CaaValue, DsValue, DynamicRecord, Healthcheck, MxValue, NaptrValue, Record, RecordContent,
    RecordData, RecordType, Rule, SrvValue, TlsaValue, UrlfwdValue, ValueStatus, Zone,
};
use crate::monitor::Fingerprint;
use crate::native::{Answer, NativeRecord};

/// Comparable form of a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    Simple {
        ttl: u32,
        values: BTreeSet<String>,
    },
    Dynamic {
        ttl: u32,
        default_values: BTreeSet<String>,
        pools: BTreeMap<String, CanonicalPool>,
        rules: Vec<Rule>,
    },
}

/// A pool's values as a set, plus its fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPool {
    pub values: BTreeSet<(String, u32, ValueStatus)>,
    pub fallback: Option<String>,
}

/// Bidirectional record mapping
#[derive(Debug, Clone)]
pub struct Translator {
    compiler: RuleCompiler,
}

impl Translator {
    pub fn new(compiler: RuleCompiler) -> Self {
        Self { compiler }
    }

    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }

    /// Native object for a record
    ///
    /// Dynamic records need a monitor id bound for each `obey` value.
    pub fn to_native(
        &self,
        zone: &Zone,
        record: &Record,
        bindings: &HashMap<Fingerprint, String>,
    ) -> Result<NativeRecord> {
        let fqdn = zone.fqdn(&record.name);
        let mut native = NativeRecord {
            zone: zone.api_name().to_string(),
            domain: fqdn.trim_end_matches('.').to_string(),
            record_type: record.record_type().as_str().to_string(),
            ttl: record.ttl,
            ..Default::default()
        };

        match &record.content {
            RecordContent::Simple(data) => {
                native.answers = wire_rows(data).into_iter().map(Answer::plain).collect();
            }
            RecordContent::Dynamic(dynamic) => {
                let compiled = self.compiler.compile(&fqdn, dynamic, bindings)?;
                native.answers = compiled.answers;
                native.filters = compiled.filters;
                native.regions = compiled.regions;
            }
        }
        Ok(native)
    }

    /// Declarative record for a native object
    pub fn from_native(&self, zone: &Zone, native: &NativeRecord) -> Result<Record> {
        let record_type: RecordType = native.record_type.parse()?;
        let name = zone.hostname_from_fqdn(&native.domain);
        let id = format!("{} {}", zone.fqdn(&name), record_type);

        if record_type.supports_dynamic() && native.is_advanced() {
            if native
                .first_answer_note()
                .is_some_and(|note| note.contains("from:"))
            {
                let dynamic = DynamicRecord {
                    record_type,
                    spec: self.compiler.parse(native),
                    healthcheck: Healthcheck::default(),
                };
                return Ok(Record::dynamic(name, native.ttl, dynamic));
            }

            warn!(
                record = %id,
                "Cannot parse dynamic record without pool notes, treating it as empty"
            );
            return Ok(Record::simple(name, native.ttl, empty_data(record_type)));
        }

        let rows = answer_rows(native, arity(record_type));
        let data = parse_rows(record_type, &rows, &id)?;
        Ok(Record::simple(name, native.ttl, data))
    }

    /// Comparable form of a record
    pub fn canonical(&self, record: &Record) -> Canonical {
        match &record.content {
            RecordContent::Simple(data) => {
                let hostname_field = hostname_field(data.record_type());
                let values = wire_rows(data)
                    .into_iter()
                    .map(|row| {
                        row.iter()
                            .enumerate()
                            .map(|(i, field)| {
                                let field = render(field);
                                if Some(i) == hostname_field {
                                    absolute(&field)
                                } else {
                                    field
                                }
                            })
                            .collect::<Vec<_>>()
                            .join(" ")
                    })
                    .filter(|rendered| !rendered.is_empty())
                    .collect();
                Canonical::Simple {
                    ttl: record.ttl,
                    values,
                }
            }
            RecordContent::Dynamic(dynamic) => {
                let spec = &dynamic.spec;
                Canonical::Dynamic {
                    ttl: record.ttl,
                    default_values: spec.default_values.iter().cloned().collect(),
                    pools: spec
                        .pools
                        .iter()
                        .map(|(id, pool)| {
                            let values = pool
                                .values
                                .iter()
                                .map(|v| (v.value.clone(), v.weight, v.status))
                                .collect();
                            let canonical = CanonicalPool {
                                values,
                                fallback: pool.fallback.clone(),
                            };
                            (id.clone(), canonical)
                        })
                        .collect(),
                    rules: spec
                        .rules
                        .iter()
                        .map(|rule| Rule {
                            geos: self.compiler.covering_geos(&rule.geos),
                            ..rule.clone()
                        })
                        .collect(),
                }
            }
        }
    }
}

/// Answer arrays sent for a simple value set
fn wire_rows(data: &RecordData) -> Vec<Vec<Value>> {
    fn text(s: &str) -> Value {
        Value::String(s.to_string())
    }

    match data {
        RecordData::A(values) => values.iter().map(|v| vec![text(&v.to_string())]).collect(),
        RecordData::Aaaa(values) => values.iter().map(|v| vec![text(&v.to_string())]).collect(),
        RecordData::Alias(target) | RecordData::Cname(target) | RecordData::Dname(target) => {
            if target.is_empty() {
                Vec::new()
            } else {
                vec![vec![text(target)]]
            }
        }
        RecordData::Caa(values) => values
            .iter()
            .map(|v| vec![v.flags.into(), text(&v.tag), text(&v.value)])
            .collect(),
        RecordData::Ds(values) => values
            .iter()
            .map(|v| {
                vec![
                    v.key_tag.into(),
                    v.algorithm.into(),
                    v.digest_type.into(),
                    text(&v.digest),
                ]
            })
            .collect(),
        RecordData::Mx(values) => values
            .iter()
            .map(|v| vec![v.preference.into(), text(&v.exchange)])
            .collect(),
        RecordData::Naptr(values) => values
            .iter()
            .map(|v| {
                vec![
                    v.order.into(),
                    v.preference.into(),
                    text(&v.flags),
                    text(&v.service),
                    text(&v.regexp),
                    text(&v.replacement),
                ]
            })
            .collect(),
        RecordData::Ns(values) | RecordData::Ptr(values) => {
            values.iter().map(|v| vec![text(v)]).collect()
        }
        // The service wants TXT data unescaped
        RecordData::Spf(values) | RecordData::Txt(values) => values
            .iter()
            .map(|v| vec![text(&v.replace("\\;", ";"))])
            .collect(),
        RecordData::Srv(values) => values
            .iter()
            .map(|v| {
                vec![
                    v.priority.into(),
                    v.weight.into(),
                    v.port.into(),
                    text(&v.target),
                ]
            })
            .collect(),
        RecordData::Tlsa(values) => values
            .iter()
            .map(|v| {
                vec![
                    v.certificate_usage.into(),
                    v.selector.into(),
                    v.matching_type.into(),
                    text(&v.certificate_association_data),
                ]
            })
            .collect(),
        RecordData::Urlfwd(values) => values
            .iter()
            .map(|v| {
                vec![
                    text(&v.path),
                    text(&v.target),
                    v.code.into(),
                    v.masking.into(),
                    v.query.into(),
                ]
            })
            .collect(),
    }
}

/// Fields per answer for each type
fn arity(record_type: RecordType) -> usize {
    match record_type {
        RecordType::Mx => 2,
        RecordType::Caa => 3,
        RecordType::Ds | RecordType::Srv | RecordType::Tlsa => 4,
        RecordType::Urlfwd => 5,
        RecordType::Naptr => 6,
        _ => 1,
    }
}

/// Index of the answer field holding a hostname
fn hostname_field(record_type: RecordType) -> Option<usize> {
    match record_type {
        RecordType::Alias
        | RecordType::Cname
        | RecordType::Dname
        | RecordType::Ns
        | RecordType::Ptr => Some(0),
        RecordType::Mx => Some(1),
        RecordType::Srv => Some(3),
        _ => None,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn absolute(name: &str) -> String {
    if name.is_empty() || name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

/// Answer fields of a native record
///
/// Listing summaries carry `short_answers`, split on spaces into at most
/// `arity` fields; full objects carry answer arrays.
fn answer_rows(native: &NativeRecord, arity: usize) -> Vec<Vec<String>> {
    if !native.short_answers.is_empty() {
        return native
            .short_answers
            .iter()
            .map(|answer| answer.splitn(arity, ' ').map(String::from).collect())
            .collect();
    }
    native.answers.iter().map(Answer::fields).collect()
}

fn empty_data(record_type: RecordType) -> RecordData {
    match record_type {
        RecordType::Aaaa => RecordData::Aaaa(Vec::new()),
        RecordType::Cname => RecordData::Cname(String::new()),
        _ => RecordData::A(Vec::new()),
    }
}

fn field<T: FromStr>(row: &[String], index: usize, id: &str) -> Result<T> {
    row.get(index)
        .and_then(|raw| raw.parse().ok())
        .ok_or_else(|| {
            Error::validation(
                id,
                format!("answer {:?} (field {} malformed or missing)", row.join(" "), index),
            )
        })
}

fn text_field(row: &[String], index: usize, id: &str) -> Result<String> {
    field::<String>(row, index, id)
}

fn parse_each<T>(
    rows: &[Vec<String>],
    id: &str,
    parse: impl Fn(&[String], &str) -> Result<T>,
) -> Result<Vec<T>> {
    rows.iter().map(|row| parse(row.as_slice(), id)).collect()
}

fn parse_rows(record_type: RecordType, rows: &[Vec<String>], id: &str) -> Result<RecordData> {
    let first_target = || -> Result<String> {
        match rows.first() {
            Some(row) => Ok(absolute(&text_field(row, 0, id)?)),
            None => Ok(String::new()),
        }
    };

    Ok(match record_type {
        RecordType::A => RecordData::A(parse_each(rows, id, |row, id| field(row, 0, id))?),
        RecordType::Aaaa => RecordData::Aaaa(parse_each(rows, id, |row, id| field(row, 0, id))?),
        RecordType::Alias => RecordData::Alias(first_target()?),
        RecordType::Cname => RecordData::Cname(first_target()?),
        RecordType::Dname => RecordData::Dname(first_target()?),
        RecordType::Caa => RecordData::Caa(parse_each(rows, id, |row, id| {
            Ok(CaaValue {
                flags: field(row, 0, id)?,
                tag: text_field(row, 1, id)?,
                value: text_field(row, 2, id)?,
            })
        })?),
        RecordType::Ds => RecordData::Ds(parse_each(rows, id, |row, id| {
            Ok(DsValue {
                key_tag: field(row, 0, id)?,
                algorithm: field(row, 1, id)?,
                digest_type: field(row, 2, id)?,
                digest: text_field(row, 3, id)?,
            })
        })?),
        RecordType::Mx => RecordData::Mx(parse_each(rows, id, |row, id| {
            Ok(MxValue {
                preference: field(row, 0, id)?,
                exchange: absolute(&text_field(row, 1, id)?),
            })
        })?),
        RecordType::Naptr => RecordData::Naptr(parse_each(rows, id, |row, id| {
            Ok(NaptrValue {
                order: field(row, 0, id)?,
                preference: field(row, 1, id)?,
                flags: text_field(row, 2, id)?,
                service: text_field(row, 3, id)?,
                regexp: text_field(row, 4, id)?,
                replacement: text_field(row, 5, id)?,
            })
        })?),
        RecordType::Ns => RecordData::Ns(parse_each(rows, id, |row, id| {
            Ok(absolute(&text_field(row, 0, id)?))
        })?),
        RecordType::Ptr => RecordData::Ptr(parse_each(rows, id, |row, id| {
            Ok(absolute(&text_field(row, 0, id)?))
        })?),
        // Re-escaped on the way in
        RecordType::Spf => RecordData::Spf(parse_each(rows, id, |row, id| {
            Ok(text_field(row, 0, id)?.replace(';', "\\;"))
        })?),
        RecordType::Txt => RecordData::Txt(parse_each(rows, id, |row, id| {
            Ok(text_field(row, 0, id)?.replace(';', "\\;"))
        })?),
        RecordType::Srv => RecordData::Srv(parse_each(rows, id, |row, id| {
            Ok(SrvValue {
                priority: field(row, 0, id)?,
                weight: field(row, 1, id)?,
                port: field(row, 2, id)?,
                target: absolute(&text_field(row, 3, id)?),
            })
        })?),
        RecordType::Tlsa => RecordData::Tlsa(parse_each(rows, id, |row, id| {
            Ok(TlsaValue {
                certificate_usage: field(row, 0, id)?,
                selector: field(row, 1, id)?,
                matching_type: field(row, 2, id)?,
                certificate_association_data: text_field(row, 3, id)?,
            })
        })?),
        RecordType::Urlfwd => RecordData::Urlfwd(parse_each(rows, id, |row, id| {
            Ok(UrlfwdValue {
                path: text_field(row, 0, id)?,
                target: text_field(row, 1, id)?,
                code: field(row, 2, id)?,
                masking: field(row, 3, id)?,
                query: field(row, 4, id)?,
            })
        })?),
    })
}

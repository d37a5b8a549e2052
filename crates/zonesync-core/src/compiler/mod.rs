//! Dynamic rule compiler
//!
//! Compiles a record's pools, rules and health policy into the provider's
//! native shape and parses that shape back:
//!
//! ```text
//! DynamicSpec ──compile──► regions   (one or more per rule, labelled <pool>__<kind>)
//!                          answers   (per region: pool, fallback chain, defaults)
//!                          filters   (fixed stage order, optional stages as needed)
//!                          monitors  (one per distinct obey value)
//! ```
//!
//! Round-trip state lives in `k:v` notes on regions and answers:
//! `rule-order`, `fallback` and `continents` on regions; `from`, `pool` and
//! `fallback` on answers.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::geo::{GeoCode, GeoTable};
use crate::model::{DynamicRecord, DynamicSpec, Pool, PoolValue, Rule, ValueStatus};
use crate::monitor::{Fingerprint, MonitorSpec};
use crate::native::{Answer, AnswerMeta, Filter, NativeRecord, Region, RegionMeta, UpMeta};

/// `from` note of the record-level catch-all answers
pub const DEFAULT_ANSWER_LABEL: &str = "--default--";

const CATCHALL_PREFIX: &str = "catchall__";

/// Native form of a dynamic record
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledDynamic {
    pub filters: Vec<Filter>,
    pub regions: BTreeMap<String, Region>,
    pub answers: Vec<Answer>,
    /// Jobs the answers point at, deduplicated by fingerprint
    pub monitors: Vec<MonitorSpec>,
}

/// Optional filter stages a rule set needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stages {
    pub asn: bool,
    pub subnet: bool,
    pub country: bool,
    pub region: bool,
}

/// Compiles and parses dynamic routing against one geography table
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    geo: Arc<GeoTable>,
    monitors: MonitorConfig,
}

impl RuleCompiler {
    pub fn new(geo: Arc<GeoTable>, monitors: MonitorConfig) -> Self {
        Self { geo, monitors }
    }

    pub fn geo(&self) -> &GeoTable {
        &self.geo
    }

    pub fn monitor_config(&self) -> &MonitorConfig {
        &self.monitors
    }

    /// Refuse specs the provider cannot express
    pub fn validate(&self, fqdn: &str, dynamic: &DynamicRecord) -> Result<()> {
        let record = format!("{} {}", fqdn, dynamic.record_type);
        if !dynamic.record_type.supports_dynamic() {
            return Err(Error::validation(
                record,
                format!("dynamic routing on {} records", dynamic.record_type),
            ));
        }

        let spec = &dynamic.spec;
        if spec.rules.is_empty() {
            return Err(Error::validation(record, "dynamic routing without rules"));
        }

        let mut targeted = HashSet::new();
        for (i, rule) in spec.rules.iter().enumerate() {
            if !spec.pools.contains_key(&rule.pool) {
                return Err(Error::validation(
                    record,
                    format!("rule {} targeting undefined pool {}", i, rule.pool),
                ));
            }
            if !targeted.insert(rule.pool.as_str()) {
                return Err(Error::validation(
                    record,
                    format!("multiple rules targeting pool {}", rule.pool),
                ));
            }
            for geo in &rule.geos {
                self.check_geo(&record, geo)?;
            }
        }

        for (id, pool) in &spec.pools {
            if pool.values.is_empty() {
                return Err(Error::validation(record, format!("empty pool {}", id)));
            }
            if let Some(fallback) = &pool.fallback {
                if !spec.pools.contains_key(fallback) {
                    return Err(Error::validation(
                        record,
                        format!("pool {} falling back to undefined pool {}", id, fallback),
                    ));
                }
            }
        }

        // Answers are generated per rule, so a pool no rule reaches is lost
        let mut reachable = HashSet::new();
        for rule in &spec.rules {
            for pool in fallback_chain(&spec.pools, &rule.pool) {
                reachable.insert(pool);
            }
        }
        if let Some(unused) = spec.pools.keys().find(|id| !reachable.contains(id.as_str())) {
            return Err(Error::validation(record, format!("unused pool {}", unused)));
        }

        Ok(())
    }

    fn check_geo(&self, record: &str, geo: &str) -> Result<()> {
        match self.geo.parse(geo) {
            None => Err(Error::validation(record, format!("geo code {}", geo))),
            Some(GeoCode::Subdivision { country, .. }) if country != "US" && country != "CA" => {
                Err(Error::validation(
                    record,
                    format!("subdivision targeting outside US and CA ({})", geo),
                ))
            }
            Some(_) => Ok(()),
        }
    }

    /// A rule's geo codes without those a broader code in it already covers
    ///
    /// `["AS", "AS-JP"]` targets the same clients as `["AS"]`, which is also
    /// how the pair reads back once compiled.
    pub fn covering_geos(&self, geos: &BTreeSet<String>) -> BTreeSet<String> {
        geos.iter()
            .filter(|geo| match self.geo.parse(geo) {
                Some(GeoCode::Country { continent, .. }) => !geos.contains(&continent),
                Some(GeoCode::Subdivision {
                    continent, country, ..
                }) => {
                    !geos.contains(&continent)
                        && !geos.contains(&format!("{}-{}", continent, country))
                }
                _ => true,
            })
            .cloned()
            .collect()
    }

    /// Stages the rule set needs
    pub fn stages(&self, spec: &DynamicSpec) -> Stages {
        let mut stages = Stages::default();
        for rule in &spec.rules {
            stages.asn |= !rule.asns.is_empty();
            stages.subnet |= !rule.subnets.is_empty();
            for geo in &rule.geos {
                match self.geo.parse(geo) {
                    Some(GeoCode::Continent(continent)) if georegion_of(&continent).is_some() => {
                        stages.region = true
                    }
                    Some(_) => stages.country = true,
                    None => {}
                }
            }
        }
        stages
    }

    /// The filter chain a record with this spec must carry
    pub fn expected_filters(&self, spec: &DynamicSpec) -> Vec<Filter> {
        filter_chain(self.stages(spec))
    }

    /// Fingerprint of the job checking each `obey` value
    pub fn value_fingerprints(
        &self,
        fqdn: &str,
        dynamic: &DynamicRecord,
    ) -> BTreeMap<String, Fingerprint> {
        obey_values(&dynamic.spec)
            .map(|value| {
                let spec = MonitorSpec::generate(
                    fqdn,
                    dynamic.record_type,
                    value,
                    &dynamic.healthcheck,
                    &self.monitors,
                );
                (value.to_string(), spec.fingerprint)
            })
            .collect()
    }

    /// One job per distinct `obey` value, deduplicated by fingerprint
    pub fn required_monitors(&self, fqdn: &str, dynamic: &DynamicRecord) -> Vec<MonitorSpec> {
        let mut seen = HashSet::new();
        obey_values(&dynamic.spec)
            .map(|value| {
                MonitorSpec::generate(
                    fqdn,
                    dynamic.record_type,
                    value,
                    &dynamic.healthcheck,
                    &self.monitors,
                )
            })
            .filter(|spec| seen.insert(spec.fingerprint.clone()))
            .collect()
    }

    /// Compile a dynamic record
    ///
    /// `bindings` maps monitor fingerprints to the data feeds carrying their
    /// jobs' state; every `obey` value must have one.
    pub fn compile(
        &self,
        fqdn: &str,
        dynamic: &DynamicRecord,
        bindings: &HashMap<Fingerprint, String>,
    ) -> Result<CompiledDynamic> {
        self.validate(fqdn, dynamic)?;

        let spec = &dynamic.spec;
        let (stages, regions) = self.regions(spec);
        let fingerprints = self.value_fingerprints(fqdn, dynamic);

        let mut answers = Vec::new();
        for label in regions.keys() {
            self.answers_for_label(spec, label, &fingerprints, bindings, &mut answers)?;
        }

        debug!(
            record = fqdn,
            regions = regions.len(),
            answers = answers.len(),
            "Compiled dynamic record"
        );

        Ok(CompiledDynamic {
            filters: filter_chain(stages),
            regions,
            answers,
            monitors: self.required_monitors(fqdn, dynamic),
        })
    }

    fn regions(&self, spec: &DynamicSpec) -> (Stages, BTreeMap<String, Region>) {
        // Countries named by some rule are served by that rule, never by a
        // continent expansion elsewhere
        let mut explicit: HashMap<String, HashSet<String>> = HashMap::new();
        for rule in &spec.rules {
            for geo in &rule.geos {
                if let Some(GeoCode::Country { continent, country }) = self.geo.parse(geo) {
                    explicit.entry(continent).or_default().insert(country);
                }
            }
        }

        let mut stages = Stages::default();
        let mut regions = BTreeMap::new();
        for (i, rule) in spec.rules.iter().enumerate() {
            let mut notes = BTreeMap::new();
            notes.insert("rule-order", i.to_string());
            if let Some(fallback) = spec.pools.get(&rule.pool).and_then(|p| p.fallback.clone()) {
                notes.insert("fallback", fallback);
            }

            let mut country = BTreeSet::new();
            let mut georegion = BTreeSet::new();
            let mut us_state = BTreeSet::new();
            let mut ca_province = BTreeSet::new();
            let mut continents = BTreeSet::new();

            for geo in &rule.geos {
                match self.geo.parse(geo) {
                    Some(GeoCode::Subdivision {
                        country: parent,
                        subdivision,
                        ..
                    }) => {
                        if parent == "US" {
                            us_state.insert(subdivision);
                        } else {
                            ca_province.insert(subdivision);
                        }
                    }
                    Some(GeoCode::Country { country: code, .. }) => {
                        country.insert(code);
                    }
                    Some(GeoCode::Continent(continent)) => match georegion_of(&continent) {
                        Some(region) => {
                            georegion.insert(region.to_string());
                        }
                        None => {
                            debug!(geo = %continent, "Expanding continent to country list");
                            let excluded = explicit.get(&continent);
                            let members = self.geo.countries(&continent).into_iter().flatten();
                            country.extend(
                                members
                                    .filter(|c| excluded.is_none_or(|set| !set.contains(*c)))
                                    .cloned(),
                            );
                            continents.insert(continent);
                        }
                    },
                    None => {}
                }
            }
            if !continents.is_empty() {
                let joined: Vec<String> = continents.into_iter().collect();
                notes.insert("continents", joined.join(","));
            }

            let base = RegionMeta {
                note: Some(encode_notes(&notes)),
                ..Default::default()
            };
            let pool = &rule.pool;

            if !rule.asns.is_empty() {
                stages.asn = true;
                let meta = RegionMeta {
                    asn: rule.asns.iter().copied().collect(),
                    ..base.clone()
                };
                regions.insert(format!("{}__asn", pool), Region { meta });
            }
            if !rule.subnets.is_empty() {
                stages.subnet = true;
                let meta = RegionMeta {
                    ip_prefixes: rule.subnets.iter().cloned().collect(),
                    ..base.clone()
                };
                regions.insert(format!("{}__subnet", pool), Region { meta });
            }
            // Countries and subdivisions share the geofence_country stage
            if !(country.is_empty() && us_state.is_empty() && ca_province.is_empty()) {
                stages.country = true;
                let meta = RegionMeta {
                    country: country.into_iter().collect(),
                    us_state: us_state.into_iter().collect(),
                    ca_province: ca_province.into_iter().collect(),
                    ..base.clone()
                };
                regions.insert(format!("{}__country", pool), Region { meta });
            }
            if !georegion.is_empty() {
                stages.region = true;
                let meta = RegionMeta {
                    georegion: georegion.into_iter().collect(),
                    ..base.clone()
                };
                regions.insert(format!("{}__georegion", pool), Region { meta });
            }
            if rule.is_catchall() {
                regions.insert(format!("{}__catchall", pool), Region { meta: base });
            }
        }

        (stages, regions)
    }

    fn answers_for_label(
        &self,
        spec: &DynamicSpec,
        label: &str,
        fingerprints: &BTreeMap<String, Fingerprint>,
        bindings: &HashMap<Fingerprint, String>,
        answers: &mut Vec<Answer>,
    ) -> Result<()> {
        let mut priority = 1;
        for pool_id in fallback_chain(&spec.pools, pool_name_from_label(label)) {
            let Some(pool) = spec.pools.get(pool_id) else {
                break;
            };

            let mut notes = BTreeMap::new();
            notes.insert("from", label.to_string());
            notes.insert("pool", pool_id.to_string());
            notes.insert("fallback", pool.fallback.clone().unwrap_or_default());
            let note = encode_notes(&notes);

            for value in &pool.values {
                let up = match value.status {
                    ValueStatus::Up => UpMeta::Forced(true),
                    ValueStatus::Down => UpMeta::Forced(false),
                    ValueStatus::Obey => {
                        let feed = fingerprints
                            .get(&value.value)
                            .and_then(|fp| bindings.get(fp))
                            .ok_or_else(|| {
                                Error::Other(format!(
                                    "no data feed bound for {} in pool {}",
                                    value.value, pool_id
                                ))
                            })?;
                        UpMeta::Feed { feed: feed.clone() }
                    }
                };
                answers.push(Answer {
                    answer: vec![Value::String(value.value.clone())],
                    meta: AnswerMeta {
                        priority: Some(priority),
                        note: Some(note.clone()),
                        up: Some(up),
                        weight: Some(value.weight),
                    },
                    region: Some(label.to_string()),
                });
            }
            priority += 1;
        }

        let mut notes = BTreeMap::new();
        notes.insert("from", DEFAULT_ANSWER_LABEL.to_string());
        let note = encode_notes(&notes);
        for value in &spec.default_values {
            answers.push(Answer {
                answer: vec![Value::String(value.clone())],
                meta: AnswerMeta {
                    priority: Some(priority),
                    note: Some(note.clone()),
                    up: Some(UpMeta::Forced(true)),
                    weight: Some(1),
                },
                region: Some(label.to_string()),
            });
        }
        Ok(())
    }

    /// Parse a native dynamic record back into pools and rules
    pub fn parse(&self, native: &NativeRecord) -> DynamicSpec {
        let (default_values, mut pools) = parse_pools(native);
        let rules = self.parse_rules(native, &mut pools);
        DynamicSpec {
            pools,
            rules,
            default_values,
        }
    }

    fn parse_rules(&self, native: &NativeRecord, pools: &mut BTreeMap<String, Pool>) -> Vec<Rule> {
        // Keyed by numeric order; unordered regions sort last, by pool
        let mut rules: BTreeMap<(u64, String), Rule> = BTreeMap::new();

        for (label, region) in &native.regions {
            let pool_name = pool_name_from_label(label).to_string();
            let notes = parse_notes(region.meta.note.as_deref().unwrap_or_default());

            if let Some(fallback) = notes.get("fallback") {
                pools.entry(pool_name.clone()).or_default().fallback = Some(fallback.clone());
            }

            let key = match notes.get("rule-order").and_then(|o| o.parse::<u64>().ok()) {
                Some(order) => (order, String::new()),
                None => {
                    warn!(
                        record = %native.domain,
                        region = %label,
                        "Region without rule order, sorting last"
                    );
                    (u64::MAX, pool_name.clone())
                }
            };
            let rule = rules.entry(key).or_insert_with(|| Rule::new(pool_name));

            rule.geos.extend(self.parse_rule_geos(native, &region.meta, &notes));
            rule.subnets.extend(region.meta.ip_prefixes.iter().cloned());
            rule.asns.extend(region.meta.asn.iter().copied());
        }

        rules.into_values().collect()
    }

    fn parse_rule_geos(
        &self,
        native: &NativeRecord,
        meta: &RegionMeta,
        notes: &BTreeMap<String, String>,
    ) -> BTreeSet<String> {
        let mut geos = BTreeSet::new();

        for georegion in &meta.georegion {
            match continent_of_georegion(georegion) {
                Some(continent) => {
                    geos.insert(continent.to_string());
                }
                None => warn!(
                    record = %native.domain,
                    georegion = %georegion,
                    "Unknown georegion, ignoring"
                ),
            }
        }

        let noted: HashSet<&str> = notes
            .get("continents")
            .map(|list| list.split(',').collect())
            .unwrap_or_default();

        // Continents expanded to country lists collapse back when complete
        // or recorded in the notes
        let mut expanded: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for country in &meta.country {
            match self.geo.continent_of(country) {
                Some(continent) if georegion_of(continent).is_none() => {
                    expanded
                        .entry(continent.to_string())
                        .or_default()
                        .insert(country.clone());
                }
                Some(continent) => {
                    geos.insert(format!("{}-{}", continent, country));
                }
                None => warn!(
                    record = %native.domain,
                    country = %country,
                    "Unknown country, ignoring"
                ),
            }
        }
        for (continent, countries) in expanded {
            if self.geo.countries(&continent) == Some(&countries)
                || noted.contains(continent.as_str())
            {
                geos.insert(continent);
            } else {
                geos.extend(countries.iter().map(|c| format!("{}-{}", continent, c)));
            }
        }

        geos.extend(meta.us_state.iter().map(|s| format!("NA-US-{}", s)));
        geos.extend(meta.ca_province.iter().map(|p| format!("NA-CA-{}", p)));
        geos
    }
}

fn parse_pools(native: &NativeRecord) -> (Vec<String>, BTreeMap<String, Pool>) {
    let mut defaults = BTreeSet::new();
    let mut pools: BTreeMap<String, Pool> = BTreeMap::new();

    for answer in &native.answers {
        let notes = parse_notes(answer.meta.note.as_deref().unwrap_or_default());
        let Some(value) = answer.fields().into_iter().next() else {
            continue;
        };

        if notes.get("from").map(String::as_str) == Some(DEFAULT_ANSWER_LABEL) {
            defaults.insert(value);
            continue;
        }

        // Older writers only named the pool through the region label and
        // only the first priority level is meaningful there
        let pool_name = match notes.get("pool") {
            Some(pool) => pool.clone(),
            None => {
                if answer.meta.priority.unwrap_or(1) != 1 {
                    continue;
                }
                match &answer.region {
                    Some(label) => pool_name_from_label(label).to_string(),
                    None => continue,
                }
            }
        };

        let status = match &answer.meta.up {
            Some(UpMeta::Forced(true)) => ValueStatus::Up,
            Some(UpMeta::Forced(false)) => ValueStatus::Down,
            _ => ValueStatus::Obey,
        };
        let pool_value = PoolValue {
            value,
            weight: answer.meta.weight.unwrap_or(1),
            status,
        };

        let pool = pools.entry(pool_name).or_default();
        if !pool.values.contains(&pool_value) {
            pool.values.push(pool_value);
        }
        if let Some(fallback) = notes.get("fallback") {
            pool.fallback = Some(fallback.clone());
        }
    }

    (defaults.into_iter().collect(), pools)
}

/// Pools visited starting from `start`, stopping at the end of the chain or
/// the first loop
fn fallback_chain<'a>(pools: &'a BTreeMap<String, Pool>, start: &'a str) -> Vec<&'a str> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(start);
    while let Some(id) = current {
        if !seen.insert(id) {
            break;
        }
        chain.push(id);
        current = pools.get(id).and_then(|pool| pool.fallback.as_deref());
    }
    chain
}

fn obey_values(spec: &DynamicSpec) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    spec.pools
        .values()
        .flat_map(|pool| pool.values.iter())
        .filter(|value| value.status == ValueStatus::Obey)
        .map(|value| value.value.as_str())
        .filter(move |value| seen.insert(*value))
}

/// Pool id encoded in a region label
pub fn pool_name_from_label(label: &str) -> &str {
    if let Some(pool) = label.strip_prefix(CATCHALL_PREFIX) {
        return pool;
    }
    label
        .rsplit_once("__")
        .map(|(pool, _)| pool)
        .unwrap_or(label)
}

/// Encode notes as space separated `k:v` pairs, sorted by key
pub fn encode_notes<K: AsRef<str>>(notes: &BTreeMap<K, String>) -> String {
    notes
        .iter()
        .map(|(key, value)| format!("{}:{}", key.as_ref(), value))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse `k:v` notes; pairs with an empty value are left out
pub fn parse_notes(note: &str) -> BTreeMap<String, String> {
    note.split(' ')
        .filter_map(|piece| piece.split_once(':'))
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Native georegion serving a continent, when there is one
fn georegion_of(continent: &str) -> Option<&'static str> {
    match continent {
        "AF" => Some("AFRICA"),
        "EU" => Some("EUROPE"),
        "SA" => Some("SOUTH-AMERICA"),
        _ => None,
    }
}

/// Continent a native georegion stands for, including legacy regions
fn continent_of_georegion(georegion: &str) -> Option<&'static str> {
    match georegion {
        "AFRICA" => Some("AF"),
        "ASIAPAC" => Some("AS"),
        "EUROPE" => Some("EU"),
        "SOUTH-AMERICA" => Some("SA"),
        "US-CENTRAL" | "US-EAST" | "US-WEST" => Some("NA"),
        _ => None,
    }
}

fn filter_chain(stages: Stages) -> Vec<Filter> {
    let mut chain = vec![Filter::new("up", Map::new())];
    if stages.asn {
        chain.push(filter("netfence_asn", json!({"remove_no_asn": true})));
    }
    if stages.subnet {
        chain.push(filter("netfence_prefix", json!({"remove_no_ip_prefixes": true})));
    }
    if stages.country {
        chain.push(filter("geofence_country", json!({"remove_no_location": true})));
    }
    if stages.region {
        chain.push(filter("geofence_regional", json!({"remove_no_georegion": true})));
    }
    chain.push(Filter::new("select_first_region", Map::new()));
    chain.push(filter("priority", json!({"eliminate": "1"})));
    chain.push(Filter::new("weighted_shuffle", Map::new()));
    chain.push(filter("select_first_n", json!({"N": "1"})));
    chain
}

fn filter(name: &str, config: Value) -> Filter {
    let config = match config {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    Filter::new(name, config)
}

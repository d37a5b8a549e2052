//! Test doubles and common utilities for reconciliation contract tests
//!
//! [`FakeApi`] is an in-memory managed-DNS service: zones with
//! provider-assigned nameservers and an automatic apex NS record, full
//! record objects, monitoring jobs, notify lists, data sources and data
//! feeds. It logs every mutating call and can inject failures and create
//! races.

#![allow(dead_code)]

use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use zonesync_core::config::{MonitorConfig, SyncConfig};
use zonesync_core::error::{Error, Result};
use zonesync_core::model::{
    DynamicRecord, DynamicSpec, Pool, PoolValue, Record, RecordData, RecordType, Rule, Zone,
};
use zonesync_core::native::{
    Answer, DataFeed, DataSource, MonitorJob, NativeRecord, NativeZone, NotifyList,
};
use zonesync_core::traits::DnsApi;
use zonesync_core::{GeoTable, ReconcileEvent, Reconciler};

/// Nameservers the fake assigns to every new zone
pub const ASSIGNED_NS: [&str; 2] = ["dns1.p01.nsone.net", "dns2.p01.nsone.net"];

#[derive(Debug, Default, Clone)]
pub struct FakeZone {
    pub dns_servers: Vec<String>,
    /// Keyed by (domain, type)
    pub records: BTreeMap<(String, String), NativeRecord>,
}

#[derive(Debug, Default)]
struct FakeState {
    zones: BTreeMap<String, FakeZone>,
    monitors: BTreeMap<String, MonitorJob>,
    notify_lists: BTreeMap<String, NotifyList>,
    data_sources: BTreeMap<String, DataSource>,
    /// Keyed by feed id, with the owning source id
    data_feeds: BTreeMap<String, (String, DataFeed)>,
    next_id: usize,
    calls: Vec<String>,
    failures: Vec<(String, String, u16)>,
    racing_monitor: Option<MonitorJob>,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Log a call and return an injected failure, if one matches
    fn call(&mut self, operation: &str, target: &str) -> Result<()> {
        self.calls.push(format!("{} {}", operation, target));
        match self
            .failures
            .iter()
            .find(|(op, needle, _)| op == operation && target.contains(needle.as_str()))
        {
            Some((_, _, status)) => Err(Error::api(*status, "injected failure")),
            None => Ok(()),
        }
    }
}

/// In-memory managed-DNS API
#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> Arc<dyn DnsApi> {
        Arc::new(self.clone())
    }

    /// Fail every `operation` call whose target contains `needle`
    pub fn fail_on(&self, operation: &str, needle: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((operation.to_string(), needle.to_string(), status));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    /// Make the next monitor create lose a race against `job`
    ///
    /// The job is stored as if another writer created it first, and the
    /// create reports a conflict.
    pub fn race_next_monitor_create(&self, job: MonitorJob) {
        self.state.lock().unwrap().racing_monitor = Some(job);
    }

    /// Every logged call, e.g. `create_record www.example.com A`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Logged calls that change remote state
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !call.starts_with("get_") && !call.starts_with("list_"))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn zone(&self, name: &str) -> Option<FakeZone> {
        self.state.lock().unwrap().zones.get(name).cloned()
    }

    pub fn record(&self, zone: &str, domain: &str, record_type: &str) -> Option<NativeRecord> {
        self.zone(zone)?
            .records
            .get(&(domain.to_string(), record_type.to_string()))
            .cloned()
    }

    pub fn monitors(&self) -> Vec<MonitorJob> {
        self.state.lock().unwrap().monitors.values().cloned().collect()
    }

    pub fn notify_lists(&self) -> Vec<NotifyList> {
        self.state
            .lock()
            .unwrap()
            .notify_lists
            .values()
            .cloned()
            .collect()
    }

    pub fn data_sources(&self) -> Vec<DataSource> {
        self.state
            .lock()
            .unwrap()
            .data_sources
            .values()
            .cloned()
            .collect()
    }

    pub fn data_feeds(&self) -> Vec<DataFeed> {
        self.state
            .lock()
            .unwrap()
            .data_feeds
            .values()
            .map(|(_, feed)| feed.clone())
            .collect()
    }

    /// Job a live feed carries
    pub fn job_of_feed(&self, feed_id: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        let (_, feed) = state.data_feeds.get(feed_id)?;
        feed.job_id().map(String::from)
    }

    /// Live feed carrying a job
    pub fn feed_of_job(&self, job_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .data_feeds
            .iter()
            .find(|(_, (_, feed))| feed.job_id() == Some(job_id))
            .map(|(id, _)| id.clone())
    }

    /// Delete a live feed without logging a call
    pub fn remove_data_feed(&self, id: &str) {
        self.state.lock().unwrap().data_feeds.remove(id);
    }

    /// Seed a zone as if it had been created earlier
    pub fn seed_zone(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.zones.insert(name.to_string(), new_zone(name));
    }

    /// Seed a record without logging a call
    pub fn seed_record(&self, record: NativeRecord) {
        let mut state = self.state.lock().unwrap();
        let zone = state.zones.entry(record.zone.clone()).or_default();
        zone.records
            .insert((record.domain.clone(), record.record_type.clone()), record);
    }

    /// Seed a monitoring job; returns its id
    pub fn seed_monitor(&self, mut job: MonitorJob) -> String {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id("job");
        job.id = Some(id.clone());
        state.monitors.insert(id.clone(), job);
        id
    }

    /// Delete a live job without logging a call
    pub fn remove_monitor(&self, id: &str) {
        self.state.lock().unwrap().monitors.remove(id);
    }

    /// Change a live job as if someone edited it out of band
    pub fn edit_monitor(&self, id: &str, edit: impl FnOnce(&mut MonitorJob)) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.monitors.get_mut(id) {
            edit(job);
        }
    }
}

fn new_zone(name: &str) -> FakeZone {
    let dns_servers: Vec<String> = ASSIGNED_NS.iter().map(|ns| ns.to_string()).collect();
    let apex = NativeRecord {
        zone: name.to_string(),
        domain: name.to_string(),
        record_type: "NS".to_string(),
        ttl: 86400,
        answers: dns_servers
            .iter()
            .map(|ns| Answer::plain(vec![json!(ns)]))
            .collect(),
        ..Default::default()
    };
    let mut records = BTreeMap::new();
    records.insert((name.to_string(), "NS".to_string()), apex);
    FakeZone {
        dns_servers,
        records,
    }
}

/// The listing form of a stored record
fn summary(record: &NativeRecord) -> NativeRecord {
    let advanced = !record.filters.is_empty()
        || !record.regions.is_empty()
        || record
            .answers
            .iter()
            .any(|answer| answer.meta != Default::default() || answer.region.is_some());
    NativeRecord {
        zone: record.zone.clone(),
        domain: record.domain.clone(),
        record_type: record.record_type.clone(),
        ttl: record.ttl,
        short_answers: record.answers.iter().map(Answer::rendered).collect(),
        tier: Some(if advanced { 3 } else { 1 }),
        ..Default::default()
    }
}

fn not_found(what: &str) -> Error {
    Error::api(404, format!("{{\"message\":\"{} not found\"}}", what))
}

#[async_trait::async_trait]
impl DnsApi for FakeApi {
    async fn list_zones(&self) -> Result<Vec<NativeZone>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_zones", "")?;
        Ok(state
            .zones
            .keys()
            .map(|name| NativeZone {
                zone: name.clone(),
                ..Default::default()
            })
            .collect())
    }

    async fn get_zone(&self, zone: &str) -> Result<Option<NativeZone>> {
        let mut state = self.state.lock().unwrap();
        state.call("get_zone", zone)?;
        Ok(state.zones.get(zone).map(|fake| NativeZone {
            zone: zone.to_string(),
            dns_servers: fake.dns_servers.clone(),
            records: fake.records.values().map(summary).collect(),
        }))
    }

    async fn create_zone(&self, zone: &str) -> Result<NativeZone> {
        let mut state = self.state.lock().unwrap();
        state.call("create_zone", zone)?;
        if state.zones.contains_key(zone) {
            return Err(Error::api(400, "zone already exists"));
        }
        let fake = new_zone(zone);
        let created = NativeZone {
            zone: zone.to_string(),
            dns_servers: fake.dns_servers.clone(),
            records: fake.records.values().map(summary).collect(),
        };
        state.zones.insert(zone.to_string(), fake);
        Ok(created)
    }

    async fn get_record(&self, zone: &str, domain: &str, record_type: &str) -> Result<NativeRecord> {
        let mut state = self.state.lock().unwrap();
        state.call("get_record", &format!("{} {}", domain, record_type))?;
        state
            .zones
            .get(zone)
            .and_then(|fake| {
                fake.records
                    .get(&(domain.to_string(), record_type.to_string()))
            })
            .cloned()
            .ok_or_else(|| not_found("record"))
    }

    async fn create_record(&self, record: &NativeRecord) -> Result<NativeRecord> {
        let mut state = self.state.lock().unwrap();
        state.call(
            "create_record",
            &format!("{} {}", record.domain, record.record_type),
        )?;
        let fake = state
            .zones
            .get_mut(&record.zone)
            .ok_or_else(|| not_found("zone"))?;
        let key = (record.domain.clone(), record.record_type.clone());
        if fake.records.contains_key(&key) {
            return Err(Error::api(400, "record already exists"));
        }
        fake.records.insert(key, record.clone());
        Ok(record.clone())
    }

    async fn update_record(&self, record: &NativeRecord) -> Result<NativeRecord> {
        let mut state = self.state.lock().unwrap();
        state.call(
            "update_record",
            &format!("{} {}", record.domain, record.record_type),
        )?;
        let fake = state
            .zones
            .get_mut(&record.zone)
            .ok_or_else(|| not_found("zone"))?;
        let key = (record.domain.clone(), record.record_type.clone());
        if !fake.records.contains_key(&key) {
            return Err(not_found("record"));
        }
        fake.records.insert(key, record.clone());
        Ok(record.clone())
    }

    async fn delete_record(&self, zone: &str, domain: &str, record_type: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_record", &format!("{} {}", domain, record_type))?;
        state
            .zones
            .get_mut(zone)
            .and_then(|fake| {
                fake.records
                    .remove(&(domain.to_string(), record_type.to_string()))
            })
            .map(|_| ())
            .ok_or_else(|| not_found("record"))
    }

    async fn list_monitors(&self) -> Result<Vec<MonitorJob>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_monitors", "")?;
        Ok(state.monitors.values().cloned().collect())
    }

    async fn create_monitor(&self, job: &MonitorJob) -> Result<MonitorJob> {
        let mut state = self.state.lock().unwrap();
        state.call("create_monitor", &job.name)?;
        if let Some(mut winner) = state.racing_monitor.take() {
            let id = state.next_id("job");
            winner.id = Some(id.clone());
            state.monitors.insert(id, winner);
            return Err(Error::api(409, "monitor already exists"));
        }
        let id = state.next_id("job");
        let mut created = job.clone();
        created.id = Some(id.clone());
        // The service fills in fields it owns
        created
            .config
            .entry("tls_add_verify")
            .or_insert(Value::Bool(false));
        state.monitors.insert(id, created.clone());
        Ok(created)
    }

    async fn update_monitor(&self, id: &str, job: &MonitorJob) -> Result<MonitorJob> {
        let mut state = self.state.lock().unwrap();
        state.call("update_monitor", id)?;
        if !state.monitors.contains_key(id) {
            return Err(not_found("monitor"));
        }
        let mut updated = job.clone();
        updated.id = Some(id.to_string());
        state.monitors.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete_monitor(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_monitor", id)?;
        state
            .monitors
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("monitor"))
    }

    async fn list_notify_lists(&self) -> Result<Vec<NotifyList>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_notify_lists", "")?;
        Ok(state.notify_lists.values().cloned().collect())
    }

    async fn create_notify_list(&self, list: &NotifyList) -> Result<NotifyList> {
        let mut state = self.state.lock().unwrap();
        state.call("create_notify_list", &list.name)?;
        let id = state.next_id("nl");
        let mut created = list.clone();
        created.id = Some(id.clone());
        state.notify_lists.insert(id, created.clone());
        Ok(created)
    }

    async fn delete_notify_list(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_notify_list", id)?;
        state
            .notify_lists
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("notify list"))
    }

    async fn list_data_sources(&self) -> Result<Vec<DataSource>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_data_sources", "")?;
        Ok(state.data_sources.values().cloned().collect())
    }

    async fn create_data_source(&self, source: &DataSource) -> Result<DataSource> {
        let mut state = self.state.lock().unwrap();
        state.call("create_data_source", &source.name)?;
        let id = state.next_id("ds");
        let mut created = source.clone();
        created.id = Some(id.clone());
        state.data_sources.insert(id, created.clone());
        Ok(created)
    }

    async fn list_data_feeds(&self, source_id: &str) -> Result<Vec<DataFeed>> {
        let mut state = self.state.lock().unwrap();
        state.call("list_data_feeds", source_id)?;
        if !state.data_sources.contains_key(source_id) {
            return Err(not_found("data source"));
        }
        Ok(state
            .data_feeds
            .values()
            .filter(|(source, _)| source == source_id)
            .map(|(_, feed)| feed.clone())
            .collect())
    }

    async fn create_data_feed(&self, source_id: &str, feed: &DataFeed) -> Result<DataFeed> {
        let mut state = self.state.lock().unwrap();
        state.call("create_data_feed", feed.job_id().unwrap_or_default())?;
        if !state.data_sources.contains_key(source_id) {
            return Err(not_found("data source"));
        }
        let id = state.next_id("feed");
        let mut created = feed.clone();
        created.id = Some(id.clone());
        state
            .data_feeds
            .insert(id, (source_id.to_string(), created.clone()));
        Ok(created)
    }

    async fn delete_data_feed(&self, source_id: &str, feed_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.call("delete_data_feed", feed_id)?;
        match state.data_feeds.get(feed_id) {
            Some((source, _)) if source == source_id => {
                state.data_feeds.remove(feed_id);
                Ok(())
            }
            _ => Err(not_found("data feed")),
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Configuration with one monitor region
pub fn sync_config() -> SyncConfig {
    SyncConfig {
        monitors: MonitorConfig {
            regions: vec!["lga".into()],
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn reconciler(api: &FakeApi) -> (Reconciler, tokio::sync::mpsc::Receiver<ReconcileEvent>) {
    reconciler_with(api, sync_config())
}

pub fn reconciler_with(
    api: &FakeApi,
    config: SyncConfig,
) -> (Reconciler, tokio::sync::mpsc::Receiver<ReconcileEvent>) {
    Reconciler::new(api.shared(), &config, Arc::new(GeoTable::standard()))
        .expect("reconciler construction succeeds")
}

pub fn a_record(name: &str, ips: &[&str]) -> Record {
    Record::simple(
        name,
        300,
        RecordData::A(ips.iter().map(|ip| ip.parse().unwrap()).collect()),
    )
}

pub fn root_ns(values: &[&str]) -> Record {
    Record::simple(
        "",
        3600,
        RecordData::Ns(values.iter().map(|v| v.to_string()).collect()),
    )
}

/// A two-pool geo record: `eu` (falling back to `us`) for Europe, `us`
/// for everyone else
pub fn geo_a_record(name: &str, eu: &str, us: &str) -> Record {
    let spec = DynamicSpec::default()
        .with_pool("eu", Pool::new(vec![PoolValue::new(eu)]).with_fallback("us"))
        .with_pool("us", Pool::new(vec![PoolValue::new(us)]))
        .with_rule(Rule::new("eu").with_geos(["EU"]))
        .with_rule(Rule::new("us"))
        .with_default_values([us]);
    Record::dynamic(name, 60, DynamicRecord::new(RecordType::A, spec))
}

/// A single-pool record obeying monitors for every value
pub fn pooled_a_record(name: &str, values: &[&str]) -> Record {
    let spec = DynamicSpec::default()
        .with_pool(
            "main",
            Pool::new(values.iter().map(|v| PoolValue::new(*v)).collect()),
        )
        .with_rule(Rule::new("main"));
    Record::dynamic(name, 60, DynamicRecord::new(RecordType::A, spec))
}

pub fn zone(name: &str, records: Vec<Record>) -> Zone {
    records
        .into_iter()
        .fold(Zone::new(name), |zone, record| zone.with_record(record))
}

/// Drain every event currently queued
pub fn drain(rx: &mut tokio::sync::mpsc::Receiver<ReconcileEvent>) -> Vec<ReconcileEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

//! Reconciliation engine
//!
//! The Reconciler is responsible for:
//! - Fetching live zone state and parsing it back into the declarative model
//! - Diffing desired zones against live state into ordered change sets
//! - Applying change sets, monitors and notify lists included
//! - Running many zones concurrently on a bounded worker pool
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   desired ────▶ │  Reconciler  │ ───── ReconcileEvent ────▶ (channel)
//!                 └──────────────┘
//!                         │
//!         ┌───────────────┼────────────────┐
//!         ▼               ▼                ▼
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │  Translator  │ │MonitorManager│ │    DnsApi    │
//! │  + compiler  │ │  + registry  │ │   (remote)   │
//! └──────────────┘ └──────────────┘ └──────────────┘
//! ```
//!
//! ## Pass Flow
//!
//! 1. Refresh the fingerprint registry from the remote
//! 2. Populate and plan every zone concurrently
//! 3. Seed monitor claims from every zone's live and desired references
//! 4. When a monitor release is planned, claim the references live records
//!    of zones outside the pass still hold
//! 5. Apply every zone concurrently; a zone failure stops only that zone

mod report;

pub use report::{ApplyReport, ChangeOutcome, ChangeState};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::changes::{Change, ChangeSet, Operation, Resource, ResourceKind};
use crate::compiler::RuleCompiler;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::geo::GeoTable;
use crate::model::{Record, RecordContent, RecordData, RecordKey, RecordType, RootNsPolicy, Zone};
use crate::monitor::{Claimant, Fingerprint, MonitorManager, MonitorStatus};
use crate::native::{Filter, NativeRecord, UpMeta};
use crate::traits::DnsApi;
use crate::translator::{Translator, absolute};

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Population of a zone started
    ZoneStarted { zone: String },

    /// A zone's change set was built
    ZonePlanned { zone: String, changes: usize },

    /// One change reached the remote
    ChangeApplied { zone: String, description: String },

    /// One change failed; the rest of the zone is skipped
    ChangeFailed {
        zone: String,
        description: String,
        error: String,
    },

    /// Every change of a zone was applied
    ZoneFinished { zone: String, applied: usize },

    /// A zone could not be planned or applied
    ZoneFailed { zone: String, error: String },
}

/// Live state of one zone, parsed into the declarative model
#[derive(Debug, Clone, PartialEq)]
pub struct LiveZone {
    /// Parsed records; unsupported types are left out
    pub zone: Zone,

    /// Whether the zone exists remotely
    pub exists: bool,

    /// Provider-assigned nameservers, absolute
    pub dns_servers: Vec<String>,

    /// Live filter chain per record
    pub filters: BTreeMap<RecordKey, Vec<Filter>>,

    /// Data feed each answer value follows, per record
    pub feed_refs: BTreeMap<RecordKey, BTreeMap<String, String>>,
}

impl LiveZone {
    /// A zone that does not exist yet
    pub fn absent(name: &str) -> Self {
        Self {
            zone: Zone::new(name),
            exists: false,
            dns_servers: Vec::new(),
            filters: BTreeMap::new(),
            feed_refs: BTreeMap::new(),
        }
    }
}

/// Result of one zone in a reconcile pass
#[derive(Debug)]
pub struct ZoneOutcome {
    pub zone: String,
    pub result: Result<ApplyReport>,
}

/// Reconciliation engine
///
/// # Concurrency
///
/// Cloning is cheap; clones share the API client, the monitor manager and
/// the worker pool. At most `workers` zones are populated or applied at a
/// time.
#[derive(Clone)]
pub struct Reconciler {
    api: Arc<dyn DnsApi>,
    monitors: Arc<MonitorManager>,
    translator: Arc<Translator>,
    workers: Arc<Semaphore>,
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// # Returns
    ///
    /// A tuple of (Reconciler, event_receiver)
    ///
    /// The event receiver can be used to monitor passes. The channel is
    /// bounded by `engine.event_channel_capacity`; events are dropped with
    /// a warning when it is full.
    pub fn new(
        api: Arc<dyn DnsApi>,
        config: &SyncConfig,
        geo: Arc<GeoTable>,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        config.monitors.validate()?;
        config.engine.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.engine.event_channel_capacity);
        let compiler = RuleCompiler::new(geo, config.monitors.clone());
        let reconciler = Self {
            monitors: Arc::new(MonitorManager::new(api.clone(), config.monitors.clone())),
            translator: Arc::new(Translator::new(compiler)),
            workers: Arc::new(Semaphore::new(config.engine.workers)),
            api,
            event_tx,
        };
        Ok((reconciler, event_rx))
    }

    pub fn monitors(&self) -> &MonitorManager {
        &self.monitors
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Every zone on the account, absolute and sorted
    pub async fn list_zones(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .api
            .list_zones()
            .await?
            .into_iter()
            .map(|zone| absolute(&zone.zone))
            .collect();
        names.sort();
        debug!(zones = names.len(), "Listed zones");
        Ok(names)
    }

    /// Fetch and parse a zone's live state
    pub async fn populate(&self, name: &str) -> Result<LiveZone> {
        let mut live = LiveZone::absent(name);
        let Some(native) = self.api.get_zone(live.zone.api_name()).await? else {
            debug!(zone = %live.zone.name, "Zone does not exist");
            return Ok(live);
        };

        live.exists = true;
        live.dns_servers = native.dns_servers.iter().map(|ns| absolute(ns)).collect();

        for summary in &native.records {
            if summary.record_type.parse::<RecordType>().is_err() {
                debug!(
                    domain = %summary.domain,
                    record_type = %summary.record_type,
                    "Ignoring unsupported record type"
                );
                continue;
            }

            let fetched;
            let native_record = if summary.is_advanced() {
                fetched = self
                    .api
                    .get_record(live.zone.api_name(), &summary.domain, &summary.record_type)
                    .await?;
                &fetched
            } else {
                summary
            };

            let record = self.translator.from_native(&live.zone, native_record)?;
            let key = record.key();
            if !native_record.filters.is_empty() {
                live.filters.insert(key.clone(), native_record.filters.clone());
            }
            let refs = feed_refs(native_record);
            if !refs.is_empty() {
                live.feed_refs.insert(key, refs);
            }
            live.zone.records.push(record);
        }

        debug!(
            zone = %live.zone.name,
            records = live.zone.records.len(),
            "Populated zone"
        );
        Ok(live)
    }

    /// Diff a desired zone against its live state
    pub fn plan(&self, desired: &Zone, live: &LiveZone) -> Result<ChangeSet> {
        let compiler = self.translator.compiler();
        for record in &desired.records {
            if let Some(dynamic) = record.as_dynamic() {
                compiler.validate(&desired.fqdn(&record.name), dynamic)?;
            }
        }

        let mut set = ChangeSet::new(desired.clone(), !live.exists);
        let mut planned_lists = HashSet::new();
        let mut planned_monitors = HashSet::new();
        let mut desired_fingerprints: HashMap<RecordKey, HashSet<Fingerprint>> = HashMap::new();

        for record in &desired.records {
            let record = merge_root_ns(desired, record, &live.dns_servers);
            let key = record.key();
            let claimant = Claimant::new(desired.name.clone(), key.clone());
            let existing = live.zone.record(&record.name, record.record_type());

            let mut write = match existing {
                None => true,
                Some(existing) => {
                    self.translator.canonical(existing) != self.translator.canonical(&record)
                }
            };

            if let Some(dynamic) = record.as_dynamic() {
                let fqdn = desired.fqdn(&record.name);

                if existing.is_some() {
                    let live_chain: Vec<Filter> = live
                        .filters
                        .get(&key)
                        .map(|chain| chain.iter().map(Filter::sanitized).collect())
                        .unwrap_or_default();
                    if live_chain != compiler.expected_filters(&dynamic.spec) {
                        debug!(record = %key, "Filter chain drifted");
                        write = true;
                    }
                }

                let live_refs = live.feed_refs.get(&key);
                for spec in compiler.required_monitors(&fqdn, dynamic) {
                    set.references
                        .push((spec.fingerprint.clone(), claimant.clone()));
                    desired_fingerprints
                        .entry(key.clone())
                        .or_default()
                        .insert(spec.fingerprint.clone());

                    let list = self.monitors.notify_list_name(&spec);
                    if !self.monitors.has_notify_list(&list) && planned_lists.insert(list.clone()) {
                        set.push(Change::create_notify_list(list));
                    }

                    let status = self.monitors.status(&spec);
                    let bound = live_refs.and_then(|refs| refs.get(&spec.value));
                    let expected = self.monitors.feed_for(&spec);
                    if status == MonitorStatus::Missing || bound != expected.as_ref() {
                        debug!(record = %key, value = %spec.value, "Monitor binding changes");
                        write = true;
                    }

                    let operation = match status {
                        MonitorStatus::Missing => Operation::Create,
                        MonitorStatus::NeedsUpdate(_) => Operation::Update,
                        MonitorStatus::Current(_) => continue,
                    };
                    if planned_monitors.insert(spec.fingerprint.clone()) {
                        set.push(Change::ensure_monitor(operation, spec, claimant.clone()));
                    }
                }
            }

            if write {
                let operation = if existing.is_some() || (record.is_root_ns() && !live.exists) {
                    // The provider creates the apex NS record with the zone
                    Operation::Update
                } else {
                    Operation::Create
                };
                set.push(Change::record(operation, record, existing.cloned()));
            }
        }

        // Monitors the live answers obey that the desired record no longer needs
        for (key, refs) in &live.feed_refs {
            let claimant = Claimant::new(desired.name.clone(), key.clone());
            let wanted = desired_fingerprints.get(key);
            let mut released = HashSet::new();
            for feed in refs.values() {
                let Some(fingerprint) = self.monitors.registry().fingerprint_of_feed(feed) else {
                    debug!(record = %key, feed = %feed, "Answer follows an unmanaged feed");
                    continue;
                };
                set.references.push((fingerprint.clone(), claimant.clone()));
                if !wanted.is_some_and(|wanted| wanted.contains(&fingerprint))
                    && released.insert(fingerprint.clone())
                {
                    set.push(Change::release_monitor(fingerprint, claimant.clone()));
                }
            }
        }

        for existing in &live.zone.records {
            if existing.is_root_ns() {
                continue;
            }
            if desired.record(&existing.name, existing.record_type()).is_none() {
                set.push(Change::record(Operation::Delete, existing.clone(), None));
            }
        }

        debug!(
            zone = %desired.name,
            create_zone = set.create_zone,
            changes = set.changes.len(),
            "Planned zone"
        );
        Ok(set)
    }

    /// Apply a change set in order
    ///
    /// Stops at the first failure and returns `Error::PartialApply` with a
    /// report of what was applied, what failed and what was skipped. A set
    /// that releases monitors first claims the references every other zone
    /// on the account still holds; nothing is written when that fails.
    pub async fn apply(&self, set: &ChangeSet) -> Result<ApplyReport> {
        if releases_monitors(set) {
            self.claim_outside(&HashSet::from([set.zone.name.clone()]))
                .await?;
        }
        self.apply_claimed(set).await
    }

    /// Claim the monitors live records of zones outside `covered` follow
    ///
    /// Releases only consult claims, so a zone left out of the pass must
    /// still hold on to the monitors its answers name.
    async fn claim_outside(&self, covered: &HashSet<String>) -> Result<()> {
        let others: Vec<String> = self
            .list_zones()
            .await?
            .into_iter()
            .filter(|name| !covered.contains(name))
            .collect();
        if others.is_empty() {
            return Ok(());
        }
        debug!(zones = others.len(), "Claiming monitor references outside the pass");

        let mut populating = JoinSet::new();
        for name in others {
            let this = self.clone();
            populating.spawn(async move {
                let _permit = this.permit().await?;
                this.populate(&name).await
            });
        }

        let registry = self.monitors.registry();
        while let Some(joined) = populating.join_next().await {
            let live =
                joined.map_err(|e| Error::Other(format!("populate task failed: {}", e)))??;
            for (key, refs) in &live.feed_refs {
                let claimant = Claimant::new(live.zone.name.clone(), key.clone());
                for feed in refs.values() {
                    if let Some(fingerprint) = registry.fingerprint_of_feed(feed) {
                        self.monitors.claim(&fingerprint, claimant.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply a change set whose zone-external claims are already in place
    async fn apply_claimed(&self, set: &ChangeSet) -> Result<ApplyReport> {
        let zone = &set.zone;

        if self.monitors.config().regions.is_empty()
            && set.changes.iter().any(Change::writes_dynamic_record)
        {
            return Err(Error::config(format!(
                "zone {} has dynamic records but no monitor regions are configured",
                zone.name
            )));
        }

        for (fingerprint, claimant) in &set.references {
            self.monitors.claim(fingerprint, claimant.clone());
        }

        let mut report = ApplyReport::new(zone.name.clone());
        if set.create_zone {
            report.outcomes.push(ChangeOutcome::zone_create(&zone.name));
        }
        report
            .outcomes
            .extend(set.changes.iter().map(ChangeOutcome::planned));

        if report.outcomes.is_empty() {
            debug!(zone = %zone.name, "Zone up to date");
            report.finish();
            return Ok(report);
        }

        let mut dns_servers = Vec::new();
        let mut index = 0;
        if set.create_zone {
            report.set_state(index, ChangeState::Applying);
            info!(zone = %zone.name, "Creating zone");
            match self.api.create_zone(zone.api_name()).await {
                Ok(created) => {
                    dns_servers = created.dns_servers.iter().map(|ns| absolute(ns)).collect();
                    self.applied(&mut report, index);
                }
                Err(e) => return Err(self.failed(report, index, e)),
            }
            index += 1;
        }

        for change in &set.changes {
            report.set_state(index, ChangeState::Applying);
            match self.execute(zone, change, &dns_servers).await {
                Ok(()) => self.applied(&mut report, index),
                Err(e) => return Err(self.failed(report, index, e)),
            }
            index += 1;
        }

        report.finish();
        info!(
            zone = %zone.name,
            applied = report.applied(),
            "Zone applied"
        );
        self.emit_event(ReconcileEvent::ZoneFinished {
            zone: zone.name.clone(),
            applied: report.applied(),
        });
        Ok(report)
    }

    async fn execute(&self, zone: &Zone, change: &Change, dns_servers: &[String]) -> Result<()> {
        match &change.resource {
            Resource::NotifyList { name } => {
                self.monitors.ensure_notify_list(name).await?;
            }
            Resource::Monitor {
                spec: Some(spec), ..
            } => {
                self.monitors.ensure(spec).await?;
            }
            Resource::Monitor {
                fingerprint,
                claimant,
                spec: None,
            } => {
                self.monitors.release(fingerprint, claimant).await?;
            }
            Resource::Record { record, .. } => {
                let domain = zone.fqdn(&record.name);
                let domain = domain.trim_end_matches('.');
                let record_type = record.record_type().as_str();
                match change.operation {
                    Operation::Delete => {
                        info!(zone = %zone.name, record = %record.key(), "Deleting record");
                        self.api
                            .delete_record(zone.api_name(), domain, record_type)
                            .await?;
                    }
                    operation => {
                        let record = merge_root_ns(zone, record, dns_servers);
                        let bindings = self.bindings(zone, &record);
                        let native = self.translator.to_native(zone, &record, &bindings)?;
                        info!(
                            zone = %zone.name,
                            record = %record.key(),
                            operation = %operation,
                            "Writing record"
                        );
                        if operation == Operation::Create {
                            self.api.create_record(&native).await?;
                        } else {
                            self.api.update_record(&native).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Data feed of the live job for each monitor a record's answers obey
    fn bindings(&self, zone: &Zone, record: &Record) -> HashMap<Fingerprint, String> {
        let Some(dynamic) = record.as_dynamic() else {
            return HashMap::new();
        };
        self.translator
            .compiler()
            .value_fingerprints(&zone.fqdn(&record.name), dynamic)
            .into_values()
            .filter_map(|fingerprint| {
                let registry = self.monitors.registry();
                let id = registry.lookup(&fingerprint)?.id?;
                Some((fingerprint, registry.feed_of_job(&id)?))
            })
            .collect()
    }

    fn applied(&self, report: &mut ApplyReport, index: usize) {
        report.set_state(index, ChangeState::Applied);
        if let Some(outcome) = report.outcomes.get(index) {
            debug!(zone = %report.zone, change = %outcome.description, "Change applied");
            self.emit_event(ReconcileEvent::ChangeApplied {
                zone: report.zone.clone(),
                description: outcome.description.clone(),
            });
        }
    }

    fn failed(&self, mut report: ApplyReport, index: usize, e: Error) -> Error {
        let description = report
            .outcomes
            .get(index)
            .map(|outcome| outcome.description.clone())
            .unwrap_or_default();
        error!(
            zone = %report.zone,
            change = %description,
            error = %e,
            "Change failed, skipping the rest of the zone"
        );
        self.emit_event(ReconcileEvent::ChangeFailed {
            zone: report.zone.clone(),
            description,
            error: e.to_string(),
        });

        report.set_state(index, ChangeState::Failed(e.to_string()));
        report.skip_after(index);
        report.finish();
        Error::PartialApply(Box::new(report))
    }

    /// Populate and plan one zone
    pub async fn plan_zone(&self, desired: &Zone) -> Result<ChangeSet> {
        self.emit_event(ReconcileEvent::ZoneStarted {
            zone: desired.name.clone(),
        });
        let live = self.populate(&desired.name).await?;
        let set = self.plan(desired, &live)?;
        self.emit_event(ReconcileEvent::ZonePlanned {
            zone: desired.name.clone(),
            changes: set.changes.len() + usize::from(set.create_zone),
        });
        Ok(set)
    }

    /// Reconcile a batch of zones
    ///
    /// Outcomes are returned in input order. Only a failure to load the
    /// monitor registry fails the whole pass. When the references of zones
    /// outside the pass cannot be read, planned monitor releases are held
    /// back until a later pass.
    pub async fn reconcile(&self, zones: Vec<Zone>) -> Result<Vec<ZoneOutcome>> {
        info!(zones = zones.len(), "Starting reconcile pass");
        self.monitors.load().await?;
        self.monitors.registry().clear_claims();

        let total = zones.len();
        let mut planning = JoinSet::new();
        for (index, desired) in zones.into_iter().enumerate() {
            let this = self.clone();
            planning.spawn(async move {
                let result = async {
                    let _permit = this.permit().await?;
                    this.plan_zone(&desired).await
                }
                .await;
                (index, desired.name, result)
            });
        }

        let mut planned = Vec::with_capacity(total);
        while let Some(joined) = planning.join_next().await {
            planned.push(joined.map_err(|e| Error::Other(format!("planning task failed: {}", e)))?);
        }
        planned.sort_by_key(|(index, _, _)| *index);

        // Claims from every zone must be in place before any release runs
        for (_, _, result) in &planned {
            if let Ok(set) = result {
                for (fingerprint, claimant) in &set.references {
                    self.monitors.claim(fingerprint, claimant.clone());
                }
            }
        }
        if planned
            .iter()
            .any(|(_, _, result)| result.as_ref().is_ok_and(releases_monitors))
        {
            // Zones that failed to plan still hold their live references
            let covered: HashSet<String> = planned
                .iter()
                .filter(|(_, _, result)| result.is_ok())
                .map(|(_, zone, _)| zone.clone())
                .collect();
            if let Err(e) = self.claim_outside(&covered).await {
                warn!(
                    error = %e,
                    "Cannot read monitor references outside the pass, keeping monitors"
                );
                for (_, _, result) in &mut planned {
                    if let Ok(set) = result {
                        set.changes.retain(|change| !is_release(change));
                    }
                }
            }
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut applying = JoinSet::new();
        for (index, zone, result) in planned {
            match result {
                Ok(set) => {
                    let this = self.clone();
                    applying.spawn(async move {
                        let result = async {
                            let _permit = this.permit().await?;
                            this.apply_claimed(&set).await
                        }
                        .await;
                        (index, zone, result)
                    });
                }
                Err(e) => outcomes.push((index, zone, Err(e))),
            }
        }
        while let Some(joined) = applying.join_next().await {
            outcomes.push(joined.map_err(|e| Error::Other(format!("apply task failed: {}", e)))?);
        }
        outcomes.sort_by_key(|(index, _, _)| *index);

        let outcomes: Vec<ZoneOutcome> = outcomes
            .into_iter()
            .map(|(_, zone, result)| {
                if let Err(e) = &result {
                    warn!(zone = %zone, error = %e, "Zone failed");
                    self.emit_event(ReconcileEvent::ZoneFailed {
                        zone: zone.clone(),
                        error: e.to_string(),
                    });
                }
                ZoneOutcome { zone, result }
            })
            .collect();

        info!(
            zones = outcomes.len(),
            failed = outcomes.iter().filter(|o| o.result.is_err()).count(),
            "Reconcile pass finished"
        );
        Ok(outcomes)
    }

    async fn permit(&self) -> Result<SemaphorePermit<'_>> {
        self.workers
            .acquire()
            .await
            .map_err(|_| Error::Other("worker pool closed".to_string()))
    }

    fn emit_event(&self, event: ReconcileEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Data feed followed by each answer value
fn feed_refs(native: &NativeRecord) -> BTreeMap<String, String> {
    native
        .answers
        .iter()
        .filter_map(|answer| {
            let feed = answer.meta.up.as_ref().and_then(UpMeta::feed_id)?;
            Some((answer.rendered(), feed.to_string()))
        })
        .collect()
}

fn is_release(change: &Change) -> bool {
    change.kind() == ResourceKind::Monitor && change.operation == Operation::Delete
}

fn releases_monitors(set: &ChangeSet) -> bool {
    set.changes.iter().any(is_release)
}

/// Apex NS record with the provider-assigned nameservers merged in
fn merge_root_ns(zone: &Zone, record: &Record, dns_servers: &[String]) -> Record {
    if !record.is_root_ns() || zone.root_ns_policy != RootNsPolicy::Merge {
        return record.clone();
    }
    let RecordContent::Simple(RecordData::Ns(values)) = &record.content else {
        return record.clone();
    };

    let mut merged: Vec<String> = dns_servers.to_vec();
    for value in values {
        let value = absolute(value);
        if !merged.contains(&value) {
            merged.push(value);
        }
    }
    Record::simple(record.name.clone(), record.ttl, RecordData::Ns(merged))
}

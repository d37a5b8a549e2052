//! Content-addressed monitor identity
//!
//! A monitor's fingerprint is a SHA-256 digest over its canonical semantic
//! configuration, persisted remotely in the job's `notes`. The registry
//! caches live jobs, their data feeds and notify lists by that identity,
//! hands out the per-fingerprint critical sections, and tracks which records
//! still claim each monitor.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::model::RecordKey;
use crate::native::{DataFeed, MonitorJob, NotifyList};

const NOTES_PREFIX: &str = "fingerprint:";

/// Hex-encoded SHA-256 over a job's semantic settings
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Digest a canonical JSON document
    ///
    /// Object keys serialize in sorted order, so equal documents always
    /// produce equal digests.
    pub fn compute(canonical: &Value) -> Self {
        let digest = Sha256::digest(canonical.to_string().as_bytes());
        Self(format!("{:x}", digest))
    }

    /// Read the fingerprint stored in a job's notes
    pub fn from_notes(notes: &str) -> Option<Self> {
        notes
            .split_whitespace()
            .find_map(|part| part.strip_prefix(NOTES_PREFIX))
            .filter(|hex| !hex.is_empty())
            .map(|hex| Self(hex.to_string()))
    }

    /// Wrap an already computed digest
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// The `notes` value carrying this fingerprint
    pub fn to_notes(&self) -> String {
        format!("{}{}", NOTES_PREFIX, self.0)
    }

    /// First 12 hex digits, used in job names
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record holding a reference to a monitor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Claimant {
    /// Zone name, absolute
    pub zone: String,
    /// Record within the zone
    pub record: RecordKey,
}

impl Claimant {
    pub fn new(zone: impl Into<String>, record: RecordKey) -> Self {
        Self {
            zone: zone.into(),
            record,
        }
    }
}

impl fmt::Display for Claimant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.record, self.zone)
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    monitors: HashMap<Fingerprint, MonitorJob>,
    fingerprint_by_id: HashMap<String, Fingerprint>,
    notify_lists: HashMap<String, NotifyList>,
    data_source: Option<String>,
    feed_by_job: HashMap<String, String>,
    job_by_feed: HashMap<String, String>,
    claims: HashMap<Fingerprint, HashSet<Claimant>>,
    locks: HashMap<Fingerprint, Arc<AsyncMutex<()>>>,
}

/// Cache of live monitors and notify lists keyed by identity
///
/// Every method takes the internal lock for the duration of a lookup only;
/// holding a fingerprint's critical section across API calls is done with
/// [`FingerprintRegistry::lock`].
#[derive(Debug, Default)]
pub struct FingerprintRegistry {
    state: Mutex<RegistryState>,
}

impl FingerprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the cached jobs and lists with a fresh listing
    ///
    /// Jobs without a fingerprint in their notes were not created by this
    /// system and are left out. Claims and locks survive a reload.
    pub fn load(&self, monitors: Vec<MonitorJob>, notify_lists: Vec<NotifyList>) {
        let mut state = self.state();
        state.monitors.clear();
        state.fingerprint_by_id.clear();
        state.notify_lists.clear();

        for job in monitors {
            let Some(fingerprint) = job.notes.as_deref().and_then(Fingerprint::from_notes) else {
                debug!(monitor = %job.name, "Ignoring monitor without fingerprint");
                continue;
            };
            if let Some(id) = &job.id {
                state.fingerprint_by_id.insert(id.clone(), fingerprint.clone());
            }
            state.monitors.insert(fingerprint, job);
        }
        for list in notify_lists {
            state.notify_lists.insert(list.name.clone(), list);
        }

        debug!(
            monitors = state.monitors.len(),
            notify_lists = state.notify_lists.len(),
            "Fingerprint registry loaded"
        );
    }

    /// Replace the cached data source and its feeds
    ///
    /// Feeds that name no job are left out.
    pub fn load_feeds(&self, source_id: Option<String>, feeds: Vec<DataFeed>) {
        let mut state = self.state();
        state.data_source = source_id;
        state.feed_by_job.clear();
        state.job_by_feed.clear();

        for feed in feeds {
            let (Some(feed_id), Some(job_id)) = (feed.id.as_deref(), feed.job_id()) else {
                continue;
            };
            state.feed_by_job.insert(job_id.to_string(), feed_id.to_string());
            state.job_by_feed.insert(feed_id.to_string(), job_id.to_string());
        }

        debug!(feeds = state.feed_by_job.len(), "Data feeds loaded");
    }

    /// Id of the monitoring data source, once known
    pub fn data_source(&self) -> Option<String> {
        self.state().data_source.clone()
    }

    pub fn set_data_source(&self, source_id: String) {
        self.state().data_source = Some(source_id);
    }

    /// Feed carrying a job's state
    pub fn feed_of_job(&self, job_id: &str) -> Option<String> {
        self.state().feed_by_job.get(job_id).cloned()
    }

    /// Fingerprint of the job a feed carries
    ///
    /// `None` for feeds of jobs this system does not manage.
    pub fn fingerprint_of_feed(&self, feed_id: &str) -> Option<Fingerprint> {
        let state = self.state();
        let job_id = state.job_by_feed.get(feed_id)?;
        state.fingerprint_by_id.get(job_id).cloned()
    }

    pub fn insert_feed(&self, job_id: String, feed_id: String) {
        let mut state = self.state();
        if let Some(previous) = state.feed_by_job.insert(job_id.clone(), feed_id.clone()) {
            state.job_by_feed.remove(&previous);
        }
        state.job_by_feed.insert(feed_id, job_id);
    }

    /// Forget a job's feed, returning its id
    pub fn remove_feed(&self, job_id: &str) -> Option<String> {
        let mut state = self.state();
        let feed_id = state.feed_by_job.remove(job_id)?;
        state.job_by_feed.remove(&feed_id);
        Some(feed_id)
    }

    /// Live job for a fingerprint
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<MonitorJob> {
        self.state().monitors.get(fingerprint).cloned()
    }

    /// Fingerprint of a live job id
    pub fn fingerprint_of_id(&self, id: &str) -> Option<Fingerprint> {
        self.state().fingerprint_by_id.get(id).cloned()
    }

    /// Record a job created or updated by this process
    pub fn insert_monitor(&self, fingerprint: Fingerprint, job: MonitorJob) {
        let mut state = self.state();
        if let Some(id) = &job.id {
            state.fingerprint_by_id.insert(id.clone(), fingerprint.clone());
        }
        state.monitors.insert(fingerprint, job);
    }

    /// Forget a deleted job
    pub fn remove_monitor(&self, fingerprint: &Fingerprint) -> Option<MonitorJob> {
        let mut state = self.state();
        let job = state.monitors.remove(fingerprint)?;
        if let Some(id) = &job.id {
            state.fingerprint_by_id.remove(id);
        }
        Some(job)
    }

    /// Critical section for one fingerprint
    ///
    /// Create, update and delete of a job all run while holding it.
    pub fn lock(&self, fingerprint: &Fingerprint) -> Arc<AsyncMutex<()>> {
        self.state()
            .locks
            .entry(fingerprint.clone())
            .or_default()
            .clone()
    }

    /// Register a record's reference to a monitor
    pub fn claim(&self, fingerprint: &Fingerprint, claimant: Claimant) {
        self.state()
            .claims
            .entry(fingerprint.clone())
            .or_default()
            .insert(claimant);
    }

    /// Drop a record's reference; true when nothing references it any more
    pub fn release_claim(&self, fingerprint: &Fingerprint, claimant: &Claimant) -> bool {
        let mut state = self.state();
        match state.claims.get_mut(fingerprint) {
            Some(claimants) => {
                claimants.remove(claimant);
                if claimants.is_empty() {
                    state.claims.remove(fingerprint);
                    true
                } else {
                    false
                }
            }
            None => true,
        }
    }

    /// Forget every claim, e.g. at the start of a reconcile pass
    pub fn clear_claims(&self) {
        self.state().claims.clear();
    }

    /// Records currently claiming a fingerprint
    pub fn claimants(&self, fingerprint: &Fingerprint) -> Vec<Claimant> {
        self.state()
            .claims
            .get(fingerprint)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Notify list by name
    pub fn notify_list(&self, name: &str) -> Option<NotifyList> {
        self.state().notify_lists.get(name).cloned()
    }

    /// Notify list by id
    pub fn notify_list_by_id(&self, id: &str) -> Option<NotifyList> {
        self.state()
            .notify_lists
            .values()
            .find(|list| list.id.as_deref() == Some(id))
            .cloned()
    }

    pub fn insert_notify_list(&self, list: NotifyList) {
        self.state().notify_lists.insert(list.name.clone(), list);
    }

    pub fn remove_notify_list(&self, name: &str) -> Option<NotifyList> {
        self.state().notify_lists.remove(name)
    }

    /// Whether any cached job other than `except` links to a notify list id
    pub fn notify_list_in_use(&self, list_id: &str, except: &Fingerprint) -> bool {
        self.state().monitors.iter().any(|(fingerprint, job)| {
            fingerprint != except && job.notify_list.as_deref() == Some(list_id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordType;
    use serde_json::json;

    fn job(id: &str, notes: Option<&str>) -> MonitorJob {
        MonitorJob {
            id: Some(id.into()),
            name: format!("job {}", id),
            job_type: "tcp".into(),
            notes: notes.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprint_is_canonical() {
        let a = Fingerprint::compute(&json!({"b": 1, "a": [1, 2]}));
        let b = Fingerprint::compute(&json!({"a": [1, 2], "b": 1}));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);

        let c = Fingerprint::compute(&json!({"a": [2, 1], "b": 1}));
        assert_ne!(a, c);
    }

    #[test]
    fn test_notes_round_trip() {
        let fp = Fingerprint::compute(&json!({"job_type": "ping"}));
        assert_eq!(Fingerprint::from_notes(&fp.to_notes()), Some(fp));
        assert_eq!(Fingerprint::from_notes("managed by hand"), None);
        assert_eq!(Fingerprint::from_notes("fingerprint:"), None);
    }

    #[test]
    fn test_load_skips_unfingerprinted_jobs() {
        let registry = FingerprintRegistry::new();
        registry.load(
            vec![job("j1", Some("fingerprint:abc")), job("j2", None)],
            vec![NotifyList::for_data_source("list", "ds-1")],
        );

        let fp = Fingerprint::from_hex("abc");
        assert_eq!(registry.lookup(&fp).and_then(|j| j.id), Some("j1".into()));
        assert_eq!(registry.fingerprint_of_id("j1"), Some(fp));
        assert_eq!(registry.fingerprint_of_id("j2"), None);
        assert!(registry.notify_list("list").is_some());
    }

    #[test]
    fn test_claims_track_last_reference() {
        let registry = FingerprintRegistry::new();
        let fp = Fingerprint::from_hex("abc");
        let www = Claimant::new("example.com.", RecordKey::new("www", RecordType::A));
        let api = Claimant::new("example.com.", RecordKey::new("api", RecordType::A));

        registry.claim(&fp, www.clone());
        registry.claim(&fp, api.clone());
        registry.claim(&fp, api.clone());
        assert_eq!(registry.claimants(&fp).len(), 2);

        assert!(!registry.release_claim(&fp, &www));
        assert!(registry.release_claim(&fp, &api));
        assert!(registry.release_claim(&fp, &api));
    }

    #[test]
    fn test_lock_is_shared_per_fingerprint() {
        let registry = FingerprintRegistry::new();
        let fp = Fingerprint::from_hex("abc");
        let first = registry.lock(&fp);
        let second = registry.lock(&fp);
        assert!(Arc::ptr_eq(&first, &second));

        let other = registry.lock(&Fingerprint::from_hex("def"));
        assert!(!Arc::ptr_eq(&first, &other));
    }

    #[test]
    fn test_feeds_resolve_to_managed_fingerprints() {
        let registry = FingerprintRegistry::new();
        registry.load(vec![job("j1", Some("fingerprint:abc")), job("j2", None)], vec![]);

        let orphan = DataFeed::for_job("orphan", "j3");
        let feeds = [("f1", "j1"), ("f2", "j2")]
            .into_iter()
            .map(|(feed, job)| DataFeed {
                id: Some(feed.into()),
                ..DataFeed::for_job(feed, job)
            })
            .chain([orphan])
            .collect();
        registry.load_feeds(Some("ds-1".into()), feeds);

        assert_eq!(registry.data_source().as_deref(), Some("ds-1"));
        assert_eq!(registry.feed_of_job("j1").as_deref(), Some("f1"));
        assert_eq!(registry.fingerprint_of_feed("f1"), Some(Fingerprint::from_hex("abc")));
        assert_eq!(registry.fingerprint_of_feed("f2"), None);
        assert_eq!(registry.feed_of_job("j3"), None);

        registry.insert_feed("j1".into(), "f9".into());
        assert_eq!(registry.fingerprint_of_feed("f1"), None);
        assert_eq!(registry.remove_feed("j1").as_deref(), Some("f9"));
        assert_eq!(registry.fingerprint_of_feed("f9"), None);
    }

    #[test]
    fn test_notify_list_usage() {
        let registry = FingerprintRegistry::new();
        let mut linked = job("j1", Some("fingerprint:abc"));
        linked.notify_list = Some("nl-1".into());
        registry.load(vec![linked], vec![]);

        let fp = Fingerprint::from_hex("abc");
        assert!(!registry.notify_list_in_use("nl-1", &fp));
        assert!(registry.notify_list_in_use("nl-1", &Fingerprint::from_hex("def")));
    }
}

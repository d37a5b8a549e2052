//! Monitor, data feed and notify-list lifecycle
//!
//! The [`MonitorManager`] owns the only mutable state shared between zone
//! workers: the [`FingerprintRegistry`]. Jobs are created on first need,
//! reused by fingerprint, corrected in place when their config fields drift,
//! and deleted once the last record referencing them lets go.
//!
//! Answers never name a job directly. Each job publishes its state through
//! its notify list into the monitoring data source, and a data feed of that
//! source carries it to the answers (`up: {"feed": id}`).
//!
//! ## Critical sections
//!
//! ```text
//! ensure(spec)              release(fp, claimant)
//!   lock(fp)                  lock(fp)
//!     notify_lock               drop claim ── others left? ── done
//!       source_lock             delete feed
//!       lookup/create list      delete job
//!     create/update job         notify_lock
//!     source_lock                 delete dedicated list unless linked
//!     create missing feed
//! ```
//!
//! Locks are always taken in the order fingerprint, notify list, source.

pub mod fingerprint;
pub mod spec;

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::{Error, Result};
use crate::native::{DataFeed, DataSource, MonitorJob, NotifyList};
use crate::traits::DnsApi;

pub use fingerprint::{Claimant, Fingerprint, FingerprintRegistry};
pub use spec::MonitorSpec;

/// Name of the notify list every monitor links to with `shared_notifylist`
pub const SHARED_NOTIFY_LIST: &str = "zonesync shared notify list";

/// Name of the data source monitor feeds belong to
pub const DATA_SOURCE_NAME: &str = "zonesync monitoring";

/// Where a required monitor stands against live state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorStatus {
    /// No live job carries the fingerprint
    Missing,
    /// A job exists but its config fields, notify-list link or feed drifted
    NeedsUpdate(String),
    /// A job exists and matches
    Current(String),
}

impl MonitorStatus {
    /// Live job id, when there is one
    pub fn id(&self) -> Option<&str> {
        match self {
            MonitorStatus::Missing => None,
            MonitorStatus::NeedsUpdate(id) | MonitorStatus::Current(id) => Some(id),
        }
    }
}

/// Creates, updates and deletes monitoring jobs and notify lists
pub struct MonitorManager {
    api: Arc<dyn DnsApi>,
    config: MonitorConfig,
    registry: FingerprintRegistry,
    notify_lock: AsyncMutex<()>,
    source_lock: AsyncMutex<()>,
}

impl MonitorManager {
    pub fn new(api: Arc<dyn DnsApi>, config: MonitorConfig) -> Self {
        Self {
            api,
            config,
            registry: FingerprintRegistry::new(),
            notify_lock: AsyncMutex::new(()),
            source_lock: AsyncMutex::new(()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn registry(&self) -> &FingerprintRegistry {
        &self.registry
    }

    /// Refresh the registry from the API
    pub async fn load(&self) -> Result<()> {
        let monitors = self.api.list_monitors().await?;
        let notify_lists = self.api.list_notify_lists().await?;
        self.registry.load(monitors, notify_lists);

        let source_id = self
            .api
            .list_data_sources()
            .await?
            .into_iter()
            .find(|source| source.name == DATA_SOURCE_NAME)
            .and_then(|source| source.id);
        let feeds = match &source_id {
            Some(id) => self.api.list_data_feeds(id).await?,
            None => Vec::new(),
        };
        self.registry.load_feeds(source_id, feeds);
        Ok(())
    }

    /// Notify list a spec's job links to
    pub fn notify_list_name(&self, spec: &MonitorSpec) -> String {
        if self.config.shared_notifylist {
            SHARED_NOTIFY_LIST.to_string()
        } else {
            spec.job.name.clone()
        }
    }

    /// Whether a notify list with this name exists live
    pub fn has_notify_list(&self, name: &str) -> bool {
        self.registry.notify_list(name).is_some()
    }

    /// Compare a required monitor against the registry
    pub fn status(&self, spec: &MonitorSpec) -> MonitorStatus {
        let Some(live) = self.registry.lookup(&spec.fingerprint) else {
            return MonitorStatus::Missing;
        };
        let Some(id) = live.id.clone() else {
            return MonitorStatus::Missing;
        };
        if spec.is_match(&live)
            && self.notify_link_current(spec, &live)
            && self.registry.feed_of_job(&id).is_some()
        {
            MonitorStatus::Current(id)
        } else {
            MonitorStatus::NeedsUpdate(id)
        }
    }

    fn notify_link_current(&self, spec: &MonitorSpec, live: &MonitorJob) -> bool {
        let expected = self
            .registry
            .notify_list(&self.notify_list_name(spec))
            .and_then(|list| list.id);
        expected.is_some() && live.notify_list == expected
    }

    /// Data feed answers obeying a spec's monitor follow, when it exists
    pub fn feed_for(&self, spec: &MonitorSpec) -> Option<String> {
        let id = self.registry.lookup(&spec.fingerprint)?.id?;
        self.registry.feed_of_job(&id)
    }

    /// Record a reference from a record to a monitor
    pub fn claim(&self, fingerprint: &Fingerprint, claimant: Claimant) {
        self.registry.claim(fingerprint, claimant);
    }

    /// Idempotent upsert of a job and its feed, keyed by its fingerprint
    ///
    /// A create that loses a race against another writer (409) refreshes
    /// the registry and retries the lookup once.
    pub async fn ensure(&self, spec: &MonitorSpec) -> Result<MonitorJob> {
        let lock = self.registry.lock(&spec.fingerprint);
        let _guard = lock.lock().await;

        match self.upsert(spec).await {
            Err(e) if e.is_status(409) => {
                warn!(
                    monitor = %spec.job.name,
                    fingerprint = %spec.fingerprint,
                    "Monitor created concurrently, reloading"
                );
                self.load().await?;
                self.upsert(spec).await
            }
            other => other,
        }
    }

    async fn upsert(&self, spec: &MonitorSpec) -> Result<MonitorJob> {
        let list = self.ensure_notify_list(&self.notify_list_name(spec)).await?;
        let list_id = list
            .id
            .ok_or_else(|| Error::Other(format!("notify list {} has no id", list.name)))?;

        let mut job = spec.job.clone();
        job.notify_list = Some(list_id.clone());

        let job = match self.registry.lookup(&spec.fingerprint) {
            Some(live) => self.refresh(spec, live, job, &list_id).await?,
            None => {
                info!(monitor = %job.name, value = %spec.value, "Creating monitor");
                let created = self.api.create_monitor(&job).await?;
                self.registry
                    .insert_monitor(spec.fingerprint.clone(), created.clone());
                created
            }
        };

        self.ensure_feed(&job).await?;
        Ok(job)
    }

    /// Bring an existing job in line with its spec and notify list
    async fn refresh(
        &self,
        spec: &MonitorSpec,
        live: MonitorJob,
        mut job: MonitorJob,
        list_id: &str,
    ) -> Result<MonitorJob> {
        let id = live
            .id
            .clone()
            .ok_or_else(|| Error::Other(format!("monitor {} has no id", live.name)))?;
        if spec.is_match(&live) && live.notify_list.as_deref() == Some(list_id) {
            debug!(monitor = %live.name, id = %id, "Monitor up to date");
            return Ok(live);
        }

        info!(monitor = %job.name, id = %id, "Updating monitor");
        job.id = Some(id.clone());
        let updated = self.api.update_monitor(&id, &job).await?;
        self.registry
            .insert_monitor(spec.fingerprint.clone(), updated.clone());

        // Relinked away from a dedicated list nothing else uses
        if let Some(previous) = live.notify_list.filter(|previous| previous != list_id) {
            self.release_notify_list(&previous, &spec.fingerprint).await?;
        }
        Ok(updated)
    }

    /// Create the feed carrying a job's state unless it already has one
    async fn ensure_feed(&self, job: &MonitorJob) -> Result<String> {
        let id = job
            .id
            .as_deref()
            .ok_or_else(|| Error::Other(format!("monitor {} has no id", job.name)))?;
        if let Some(feed_id) = self.registry.feed_of_job(id) {
            return Ok(feed_id);
        }

        let source_id = self.ensure_data_source().await?;
        info!(monitor = %job.name, id = %id, "Creating data feed");
        let created = self
            .api
            .create_data_feed(&source_id, &DataFeed::for_job(&job.name, id))
            .await?;
        let feed_id = created
            .id
            .ok_or_else(|| Error::Other(format!("data feed for {} has no id", job.name)))?;
        self.registry.insert_feed(id.to_string(), feed_id.clone());
        Ok(feed_id)
    }

    /// Look up or create the monitoring data source
    pub async fn ensure_data_source(&self) -> Result<String> {
        let _guard = self.source_lock.lock().await;
        if let Some(id) = self.registry.data_source() {
            return Ok(id);
        }

        info!(data_source = DATA_SOURCE_NAME, "Creating data source");
        let created = self
            .api
            .create_data_source(&DataSource::monitoring(DATA_SOURCE_NAME))
            .await?;
        let id = created
            .id
            .ok_or_else(|| Error::Other(format!("data source {} has no id", created.name)))?;
        self.registry.set_data_source(id.clone());
        Ok(id)
    }

    /// Look up or create a notify list by name
    ///
    /// New lists notify the monitoring data source.
    pub async fn ensure_notify_list(&self, name: &str) -> Result<NotifyList> {
        let _guard = self.notify_lock.lock().await;
        if let Some(list) = self.registry.notify_list(name) {
            return Ok(list);
        }

        let source_id = self.ensure_data_source().await?;
        info!(notify_list = name, "Creating notify list");
        let created = self
            .api
            .create_notify_list(&NotifyList::for_data_source(name, &source_id))
            .await?;
        self.registry.insert_notify_list(created.clone());
        Ok(created)
    }

    /// Drop a record's claim; delete the feed and job once no claim remains
    ///
    /// Returns whether the job was deleted.
    pub async fn release(&self, fingerprint: &Fingerprint, claimant: &Claimant) -> Result<bool> {
        let lock = self.registry.lock(fingerprint);
        let _guard = lock.lock().await;

        if !self.registry.release_claim(fingerprint, claimant) {
            debug!(
                fingerprint = %fingerprint,
                claimant = %claimant,
                "Monitor still referenced, keeping"
            );
            return Ok(false);
        }
        let Some(job) = self.registry.lookup(fingerprint) else {
            return Ok(false);
        };
        let Some(id) = job.id.clone() else {
            return Ok(false);
        };

        if let (Some(source_id), Some(feed_id)) =
            (self.registry.data_source(), self.registry.feed_of_job(&id))
        {
            info!(monitor = %job.name, feed = %feed_id, "Deleting data feed");
            match self.api.delete_data_feed(&source_id, &feed_id).await {
                Err(e) if e.is_status(404) => {
                    debug!(feed = %feed_id, "Data feed already gone");
                }
                other => other?,
            }
            self.registry.remove_feed(&id);
        }

        info!(monitor = %job.name, id = %id, "Deleting monitor");
        match self.api.delete_monitor(&id).await {
            Err(e) if e.is_status(404) => {
                debug!(id = %id, "Monitor already gone");
            }
            other => other?,
        }
        self.registry.remove_monitor(fingerprint);

        if let Some(list_id) = &job.notify_list {
            self.release_notify_list(list_id, fingerprint).await?;
        }
        Ok(true)
    }

    async fn release_notify_list(&self, list_id: &str, owner: &Fingerprint) -> Result<()> {
        let _guard = self.notify_lock.lock().await;
        let Some(list) = self.registry.notify_list_by_id(list_id) else {
            return Ok(());
        };
        if list.name == SHARED_NOTIFY_LIST || self.registry.notify_list_in_use(list_id, owner) {
            return Ok(());
        }

        info!(notify_list = %list.name, id = list_id, "Deleting notify list");
        match self.api.delete_notify_list(list_id).await {
            Err(e) if e.is_status(404) => {
                debug!(id = list_id, "Notify list already gone");
            }
            other => other?,
        }
        self.registry.remove_notify_list(&list.name);
        Ok(())
    }
}

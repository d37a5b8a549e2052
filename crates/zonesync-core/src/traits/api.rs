// # Managed DNS API Trait
//
// The REST surface the engine drives: zones, records, monitoring jobs,
// notify lists and the data feeds that carry monitor state into answers. Implementations own transport concerns only (auth,
// pagination, rate limiting, retries through `crate::retry`). Deciding what
// to change is the engine's job.
//
// ## Implementations
//
// - NS1: `zonesync-provider-ns1` crate
//
// ## Usage
//
// ```rust,ignore
// use zonesync_core::DnsApi;
//
// async fn show(api: &dyn DnsApi) -> zonesync_core::Result<()> {
//     if let Some(zone) = api.get_zone("example.com").await? {
//         for record in &zone.records {
//             println!("{} {}", record.domain, record.record_type);
//         }
//     }
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::sync::Arc;

use crate::native::{DataFeed, DataSource, MonitorJob, NativeRecord, NativeZone, NotifyList};

/// Trait for managed-DNS API clients
///
/// # Thread Safety
///
/// Implementations are shared behind an `Arc` by every zone worker and must
/// be usable concurrently.
///
/// # Errors
///
/// - `Error::RateLimited` only escapes once the retry budget is spent
/// - `Error::Api { status, body }` for any other non-success response
/// - `Error::Http` for transport failures
#[async_trait]
pub trait DnsApi: Send + Sync {
    /// All zones on the account (records are not populated)
    async fn list_zones(&self) -> Result<Vec<NativeZone>, crate::Error>;

    /// A zone with its record summaries; `None` when the zone does not exist
    async fn get_zone(&self, zone: &str) -> Result<Option<NativeZone>, crate::Error>;

    /// Create an empty zone
    ///
    /// The service creates the apex NS record itself.
    async fn create_zone(&self, zone: &str) -> Result<NativeZone, crate::Error>;

    /// Full record object, including answers meta, filters and regions
    async fn get_record(
        &self,
        zone: &str,
        domain: &str,
        record_type: &str,
    ) -> Result<NativeRecord, crate::Error>;

    async fn create_record(&self, record: &NativeRecord) -> Result<NativeRecord, crate::Error>;

    async fn update_record(&self, record: &NativeRecord) -> Result<NativeRecord, crate::Error>;

    async fn delete_record(
        &self,
        zone: &str,
        domain: &str,
        record_type: &str,
    ) -> Result<(), crate::Error>;

    async fn list_monitors(&self) -> Result<Vec<MonitorJob>, crate::Error>;

    /// Create a monitoring job
    ///
    /// A job that was created concurrently by another writer is reported as
    /// `Error::Api` with status 409.
    async fn create_monitor(&self, job: &MonitorJob) -> Result<MonitorJob, crate::Error>;

    async fn update_monitor(&self, id: &str, job: &MonitorJob)
    -> Result<MonitorJob, crate::Error>;

    async fn delete_monitor(&self, id: &str) -> Result<(), crate::Error>;

    async fn list_notify_lists(&self) -> Result<Vec<NotifyList>, crate::Error>;

    async fn create_notify_list(&self, list: &NotifyList) -> Result<NotifyList, crate::Error>;

    async fn delete_notify_list(&self, id: &str) -> Result<(), crate::Error>;

    async fn list_data_sources(&self) -> Result<Vec<DataSource>, crate::Error>;

    async fn create_data_source(&self, source: &DataSource) -> Result<DataSource, crate::Error>;

    /// Feeds of the data source `source_id`
    async fn list_data_feeds(&self, source_id: &str) -> Result<Vec<DataFeed>, crate::Error>;

    async fn create_data_feed(
        &self,
        source_id: &str,
        feed: &DataFeed,
    ) -> Result<DataFeed, crate::Error>;

    async fn delete_data_feed(&self, source_id: &str, feed_id: &str) -> Result<(), crate::Error>;

    /// Provider name (for logging/debugging)
    fn provider_name(&self) -> &'static str;
}

/// Helper trait for constructing API clients from configuration
pub trait DnsApiFactory: Send + Sync {
    /// Create a client from the provider configuration
    fn create(
        &self,
        config: &crate::config::ProviderConfig,
    ) -> Result<Arc<dyn DnsApi>, crate::Error>;
}

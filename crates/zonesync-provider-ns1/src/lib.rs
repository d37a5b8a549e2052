// # NS1 Managed DNS API Client
//
// This crate provides the NS1 `DnsApi` implementation for zonesync.
//
// ## Behaviour
//
// - Every request runs through `zonesync_core::retry::RetryPolicy`: a 429 is
//   retried with exponential backoff up to `retry_count` attempts, and the
//   backoff gate is shared by every clone of the client
// - With `parallelism` set, `X-RateLimit-*` headers pace requests before the
//   bucket runs dry
// - `Link: <...>; rel="next"` pagination is followed unless disabled
// - Any other non-success response becomes `Error::Api { status, body }`
// - HTTP timeout is 30 seconds
//
// ## Security Requirements
//
// - The API key NEVER appears in logs or `Debug` output
// - TLS verification can only be disabled explicitly (`ignore_ssl_errors`)
//
// ## API Reference
//
// - Zones: `GET /zones`, `GET/PUT /zones/{zone}`
// - Records: `GET/PUT/POST/DELETE /zones/{zone}/{domain}/{type}`
// - Monitors: `GET/PUT /monitoring/jobs`, `POST/DELETE /monitoring/jobs/{id}`
// - Notify lists: `GET/PUT /lists`, `DELETE /lists/{id}`
// - Data sources: `GET/PUT /data/sources`
// - Data feeds: `GET/PUT /data/feeds/{source}`, `DELETE /data/feeds/{source}/{feed}`

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use zonesync_core::config::{ProviderConfig, RateLimitConfig};
use zonesync_core::native::{
    DataFeed, DataSource, MonitorJob, NativeRecord, NativeZone, NotifyList,
};
use zonesync_core::retry::{RateLimitHeaders, RetryPolicy};
use zonesync_core::traits::{DnsApi, DnsApiFactory};
use zonesync_core::{Error, Result};

/// NS1 API base URL
pub const NS1_API_BASE: &str = "https://api.nsone.net/v1";

/// Default HTTP timeout for API requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const API_KEY_HEADER: &str = "X-NSONE-Key";

/// One response body plus the next page, if any
struct Page {
    body: Value,
    next: Option<String>,
}

/// NS1 REST client
///
/// Cloning is cheap and clones share the connection pool and the
/// rate-limit state.
///
/// # Security
///
/// The Debug implementation intentionally does NOT expose the API key.
#[derive(Clone)]
pub struct Ns1Client {
    /// API key
    /// ⚠️ NEVER log this value
    api_key: String,

    /// Base URL without a trailing slash
    endpoint: String,

    client: reqwest::Client,

    follow_pagination: bool,

    retry: RetryPolicy,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for Ns1Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ns1Client")
            .field("api_key", &"<REDACTED>")
            .field("endpoint", &self.endpoint)
            .field("follow_pagination", &self.follow_pagination)
            .finish()
    }
}

impl Ns1Client {
    /// Create a new client
    ///
    /// # Parameters
    ///
    /// - `api_key`: NS1 API key
    /// - `endpoint`: Base URL override; defaults to [`NS1_API_BASE`]
    /// - `ignore_ssl_errors`: Skip TLS certificate verification
    /// - `follow_pagination`: Follow `Link` headers on list endpoints
    /// - `rate_limit`: Retry and pacing policy
    pub fn new(
        api_key: impl Into<String>,
        endpoint: Option<String>,
        ignore_ssl_errors: bool,
        follow_pagination: bool,
        rate_limit: &RateLimitConfig,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::config("NS1 API key cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .danger_accept_invalid_certs(ignore_ssl_errors)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        let endpoint = endpoint
            .unwrap_or_else(|| NS1_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            api_key,
            endpoint,
            client,
            follow_pagination,
            retry: RetryPolicy::from_config(rate_limit),
        })
    }

    /// Share a retry policy (and its rate-limit state) with other clients
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// One HTTP exchange, without retries
    async fn send(&self, method: &Method, url: &str, body: Option<&Value>) -> Result<Page> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header(API_KEY_HEADER, &self.api_key);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::http(format!("{} {} failed: {}", method, url, e)))?;

        let status = response.status();
        let limits = rate_limit_headers(response.headers());
        self.retry.observe(&limits);

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::rate_limited(limits.period));
        }

        let next = next_link(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            if status == StatusCode::NOT_FOUND {
                debug!(method = %method, url = url, "Resource not found");
            } else {
                error!(
                    method = %method,
                    url = url,
                    status = status.as_u16(),
                    body = %text,
                    "NS1 API request failed"
                );
            }
            return Err(Error::api(status.as_u16(), text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)?
        };
        Ok(Page { body, next })
    }

    /// One exchange through the retry policy
    async fn fetch(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Page> {
        let operation = format!("{} {}", method, url.trim_start_matches(&self.endpoint));
        self.retry
            .run(&operation, || self.send(&method, url, body))
            .await
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let page = self.fetch(method, &self.url(path), body).await?;
        Ok(serde_json::from_value(page.body)?)
    }

    async fn call_with<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.call(method, path, Some(&body)).await
    }

    async fn call_empty(&self, method: Method, path: &str) -> Result<()> {
        self.fetch(method, &self.url(path), None).await?;
        Ok(())
    }

    /// Every item of a list endpoint, following pagination
    async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let mut url = self.url(path);
        let mut items = Vec::new();
        loop {
            let page = self.fetch(Method::GET, &url, None).await?;
            match page.body {
                Value::Array(values) => items.extend(values),
                Value::Null => {}
                other => items.push(other),
            }
            match page.next {
                Some(next) if self.follow_pagination => {
                    debug!(next = %next, "Following pagination");
                    url = next;
                }
                _ => break,
            }
        }
        items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Error::from))
            .collect()
    }

    fn record_path(zone: &str, domain: &str, record_type: &str) -> String {
        format!("/zones/{}/{}/{}", zone, domain, record_type)
    }
}

#[async_trait]
impl DnsApi for Ns1Client {
    async fn list_zones(&self) -> Result<Vec<NativeZone>> {
        self.list("/zones").await
    }

    /// ```http
    /// GET /zones/example.com
    /// X-NSONE-Key: <key>
    /// ```
    ///
    /// Paged responses have their `records` concatenated.
    async fn get_zone(&self, zone: &str) -> Result<Option<NativeZone>> {
        let mut url = self.url(&format!("/zones/{}", zone));
        let mut native: Option<NativeZone> = None;
        loop {
            let page = match self.fetch(Method::GET, &url, None).await {
                Err(e) if e.is_status(404) && native.is_none() => return Ok(None),
                other => other?,
            };
            let parsed: NativeZone = serde_json::from_value(page.body)?;
            match native.as_mut() {
                Some(native) => native.records.extend(parsed.records),
                None => native = Some(parsed),
            }
            match page.next {
                Some(next) if self.follow_pagination => url = next,
                _ => break,
            }
        }
        Ok(native)
    }

    async fn create_zone(&self, zone: &str) -> Result<NativeZone> {
        let body = serde_json::json!({ "zone": zone });
        self.call(Method::PUT, &format!("/zones/{}", zone), Some(&body))
            .await
    }

    async fn get_record(&self, zone: &str, domain: &str, record_type: &str) -> Result<NativeRecord> {
        self.call(
            Method::GET,
            &Self::record_path(zone, domain, record_type),
            None,
        )
        .await
    }

    async fn create_record(&self, record: &NativeRecord) -> Result<NativeRecord> {
        let path = Self::record_path(&record.zone, &record.domain, &record.record_type);
        self.call_with(Method::PUT, &path, record).await
    }

    async fn update_record(&self, record: &NativeRecord) -> Result<NativeRecord> {
        let path = Self::record_path(&record.zone, &record.domain, &record.record_type);
        self.call_with(Method::POST, &path, record).await
    }

    async fn delete_record(&self, zone: &str, domain: &str, record_type: &str) -> Result<()> {
        self.call_empty(Method::DELETE, &Self::record_path(zone, domain, record_type))
            .await
    }

    async fn list_monitors(&self) -> Result<Vec<MonitorJob>> {
        self.list("/monitoring/jobs").await
    }

    async fn create_monitor(&self, job: &MonitorJob) -> Result<MonitorJob> {
        self.call_with(Method::PUT, "/monitoring/jobs", job).await
    }

    async fn update_monitor(&self, id: &str, job: &MonitorJob) -> Result<MonitorJob> {
        self.call_with(Method::POST, &format!("/monitoring/jobs/{}", id), job)
            .await
    }

    async fn delete_monitor(&self, id: &str) -> Result<()> {
        self.call_empty(Method::DELETE, &format!("/monitoring/jobs/{}", id))
            .await
    }

    async fn list_notify_lists(&self) -> Result<Vec<NotifyList>> {
        self.list("/lists").await
    }

    async fn create_notify_list(&self, list: &NotifyList) -> Result<NotifyList> {
        self.call_with(Method::PUT, "/lists", list).await
    }

    async fn delete_notify_list(&self, id: &str) -> Result<()> {
        self.call_empty(Method::DELETE, &format!("/lists/{}", id))
            .await
    }

    async fn list_data_sources(&self) -> Result<Vec<DataSource>> {
        self.list("/data/sources").await
    }

    async fn create_data_source(&self, source: &DataSource) -> Result<DataSource> {
        self.call_with(Method::PUT, "/data/sources", source).await
    }

    async fn list_data_feeds(&self, source_id: &str) -> Result<Vec<DataFeed>> {
        self.list(&format!("/data/feeds/{}", source_id)).await
    }

    async fn create_data_feed(&self, source_id: &str, feed: &DataFeed) -> Result<DataFeed> {
        self.call_with(Method::PUT, &format!("/data/feeds/{}", source_id), feed)
            .await
    }

    async fn delete_data_feed(&self, source_id: &str, feed_id: &str) -> Result<()> {
        self.call_empty(
            Method::DELETE,
            &format!("/data/feeds/{}/{}", source_id, feed_id),
        )
        .await
    }

    fn provider_name(&self) -> &'static str {
        "ns1"
    }
}

/// `X-RateLimit-*` headers of a response
fn rate_limit_headers(headers: &HeaderMap) -> RateLimitHeaders {
    fn number(headers: &HeaderMap, name: &str) -> Option<u64> {
        headers.get(name)?.to_str().ok()?.trim().parse().ok()
    }

    RateLimitHeaders {
        limit: number(headers, "X-RateLimit-Limit").and_then(|n| u32::try_from(n).ok()),
        remaining: number(headers, "X-RateLimit-Remaining").and_then(|n| u32::try_from(n).ok()),
        period: number(headers, "X-RateLimit-Period").map(Duration::from_secs),
    }
}

/// Target of the `rel="next"` entry of `Link` headers
fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|entry| {
            let (target, params) = entry.split_once(';')?;
            let is_next = params
                .split(';')
                .map(str::trim)
                .any(|param| param == "rel=\"next\"" || param == "rel=next");
            is_next.then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
        })
}

/// Factory for creating NS1 clients
pub struct Ns1Factory;

impl DnsApiFactory for Ns1Factory {
    fn create(&self, config: &ProviderConfig) -> Result<Arc<dyn DnsApi>> {
        match config {
            ProviderConfig::Ns1 {
                api_key,
                endpoint,
                ignore_ssl_errors,
                follow_pagination,
                rate_limit,
            } => {
                if *ignore_ssl_errors {
                    tracing::warn!("NS1 client running with TLS verification disabled");
                }
                let client = Ns1Client::new(
                    api_key.clone(),
                    endpoint.clone(),
                    *ignore_ssl_errors,
                    *follow_pagination,
                    rate_limit,
                )?;
                Ok(Arc::new(client))
            }
            _ => Err(Error::config("Invalid config for NS1 provider")),
        }
    }
}

/// Register the NS1 client with a registry
///
/// # Example
///
/// ```rust
/// use zonesync_core::ProviderRegistry;
///
/// let registry = ProviderRegistry::new();
/// zonesync_provider_ns1::register(&registry);
/// assert!(registry.has_provider("ns1"));
/// ```
pub fn register(registry: &zonesync_core::ProviderRegistry) {
    registry.register_provider("ns1", Box::new(Ns1Factory));
}

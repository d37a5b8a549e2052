//! Configuration types for zonesync
//!
//! Values only. Loading them from files or the environment is left to the
//! embedding application.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{HttpVersion, HealthcheckPolicy};

/// Main zonesync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Provider (API client) configuration
    pub provider: ProviderConfig,

    /// Monitor/health-check settings
    #[serde(default)]
    pub monitors: MonitorConfig,

    /// Reconciliation engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl SyncConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.provider.validate()?;
        self.monitors.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// DNS provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// NS1 managed DNS
    Ns1 {
        /// API key
        api_key: String,

        /// API endpoint override
        #[serde(default)]
        endpoint: Option<String>,

        /// Skip TLS certificate verification (private endpoints only)
        #[serde(default)]
        ignore_ssl_errors: bool,

        /// Follow `Link: rel="next"` pagination transparently
        #[serde(default = "default_follow_pagination")]
        follow_pagination: bool,

        /// Retry and pacing policy
        #[serde(default)]
        rate_limit: RateLimitConfig,
    },

    /// Custom provider
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ProviderConfig {
    /// Validate the provider configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            ProviderConfig::Ns1 {
                api_key,
                rate_limit,
                ..
            } => {
                if api_key.is_empty() {
                    return Err(crate::Error::config("NS1 API key cannot be empty"));
                }
                rate_limit.validate()
            }
            ProviderConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config(
                        "Custom provider factory cannot be empty",
                    ));
                }
                if config.is_null() {
                    return Err(crate::Error::config(
                        "Custom provider config cannot be null",
                    ));
                }
                Ok(())
            }
        }
    }

    /// Get the provider type name
    pub fn type_name(&self) -> &str {
        match self {
            ProviderConfig::Ns1 { .. } => "ns1",
            ProviderConfig::Custom { factory, .. } => factory,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Ns1 {
            api_key: String::new(),
            endpoint: None,
            ignore_ssl_errors: false,
            follow_pagination: default_follow_pagination(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Retry and pacing settings shared by every API call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum number of attempts for a rate-limited request
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Expected API concurrency; enables pre-emptive pacing when set
    #[serde(default)]
    pub parallelism: Option<u32>,

    /// First backoff delay (in milliseconds)
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single backoff delay (in milliseconds)
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RateLimitConfig {
    /// Validate the retry settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.retry_count == 0 {
            return Err(crate::Error::config("retry_count must be at least 1"));
        }
        if self.parallelism == Some(0) {
            return Err(crate::Error::config("parallelism must be > 0 when set"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(crate::Error::config(
                "initial_backoff_ms cannot exceed max_backoff_ms",
            ));
        }
        Ok(())
    }

    /// First backoff delay
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Backoff cap
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            parallelism: None,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Health-check monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Regions monitors run from; required once dynamic records are applied
    #[serde(default)]
    pub regions: Vec<String>,

    /// Attach every monitor to one shared notify list
    #[serde(default)]
    pub shared_notifylist: bool,

    /// Use real HTTP jobs instead of TCP jobs emulating HTTP
    #[serde(default)]
    pub use_http_monitors: bool,

    /// HTTP version sent by emulated HTTP checks
    #[serde(default)]
    pub default_http_version: HttpVersion,

    /// Defaults applied when a record does not override them
    #[serde(default)]
    pub healthcheck: HealthcheckDefaults,
}

impl MonitorConfig {
    /// Validate the monitor settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.healthcheck.validate()
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            shared_notifylist: false,
            use_http_monitors: false,
            default_http_version: HttpVersion::default(),
            healthcheck: HealthcheckDefaults::default(),
        }
    }
}

/// Provider-wide health-check job defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthcheckDefaults {
    /// How many regions must agree before a value is marked down
    #[serde(default)]
    pub policy: HealthcheckPolicy,

    /// Seconds between checks
    #[serde(default = "default_frequency")]
    pub frequency: u32,

    /// Seconds allowed to establish a connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u32,

    /// Seconds allowed for the response
    #[serde(default = "default_response_timeout")]
    pub response_timeout: u32,

    /// Re-check immediately on status change
    #[serde(default)]
    pub rapid_recheck: bool,
}

impl HealthcheckDefaults {
    /// Validate the defaults
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.frequency == 0 {
            return Err(crate::Error::config("healthcheck frequency must be > 0"));
        }
        if self.connect_timeout == 0 || self.response_timeout == 0 {
            return Err(crate::Error::config("healthcheck timeouts must be > 0"));
        }
        Ok(())
    }
}

impl Default for HealthcheckDefaults {
    fn default() -> Self {
        Self {
            policy: HealthcheckPolicy::default(),
            frequency: default_frequency(),
            connect_timeout: default_connect_timeout(),
            response_timeout: default_response_timeout(),
            rapid_recheck: false,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of zones reconciled concurrently
    ///
    /// Should match the expected API concurrency (and `parallelism`).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the internal event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.workers == 0 {
            return Err(crate::Error::config("workers must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_follow_pagination() -> bool {
    true
}

fn default_retry_count() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

fn default_frequency() -> u32 {
    60
}

fn default_connect_timeout() -> u32 {
    2
}

fn default_response_timeout() -> u32 {
    10
}

fn default_workers() -> usize {
    4
}

fn default_event_channel_capacity() -> usize {
    1000
}

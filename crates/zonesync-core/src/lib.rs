// # zonesync-core
//
// Core library for reconciling declarative DNS zones against a managed-DNS
// service with dynamic (geo/ASN/subnet) routing and health-checked answers.
//
// ## Architecture Overview
//
// - **DnsApi**: Trait for the managed-DNS REST surface (zones, records,
//   monitoring jobs, notify lists, data sources and feeds)
// - **Translator**: Maps declarative records to native records and back
// - **RuleCompiler**: Compiles pools, rules and health policy into regions,
//   annotated answers and a filter chain
// - **MonitorManager**: Content-addressed lifecycle of monitors, their data
//   feeds and notify lists, keyed by fingerprint
// - **Reconciler**: Populates live state, plans ordered change sets and
//   applies them on a bounded worker pool
// - **ProviderRegistry**: Plugin-based registry for API clients
//
// ## Design Principles
//
// 1. **Stateless**: Every pass starts from a fresh live fetch; nothing is
//    persisted locally
// 2. **Plugin-Based**: API clients are registered dynamically, no hard-coded if-else
// 3. **Library-First**: All core functionality can be used as a library
// 4. **Idempotency**: A second pass over an unchanged zone plans nothing

pub mod changes;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod model;
pub mod monitor;
pub mod native;
pub mod registry;
pub mod retry;
pub mod traits;
pub mod translator;

// Re-export core types for convenience
pub use changes::{Change, ChangeSet, Operation, Resource, ResourceKind};
pub use compiler::RuleCompiler;
pub use config::{EngineConfig, MonitorConfig, ProviderConfig, RateLimitConfig, SyncConfig};
pub use engine::{
    ApplyReport, ChangeOutcome, ChangeState, LiveZone, ReconcileEvent, Reconciler, ZoneOutcome,
};
pub use error::{Error, Result};
pub use geo::GeoTable;
pub use model::{Record, RecordData, RecordKey, RecordType, RootNsPolicy, Zone};
pub use monitor::{Fingerprint, MonitorManager, MonitorSpec};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;
pub use traits::{DnsApi, DnsApiFactory};
pub use translator::Translator;

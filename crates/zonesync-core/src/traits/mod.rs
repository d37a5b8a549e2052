//! Core traits for zonesync
//!
//! - [`DnsApi`]: the managed-DNS REST surface the engine drives

pub mod api;

pub use api::{DnsApi, DnsApiFactory};

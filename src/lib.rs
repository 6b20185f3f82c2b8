//! Prometheus exporter for The Things Network gateway connection statistics.
//!
//! On each scrape of the `/metrics` endpoint every configured gateway is
//! fetched once from the TTN Gateway Server API and the returned statistics
//! are translated into a flat, labeled metric set. Fetches run in parallel
//! and each is bounded by a 10 second timeout; a failed fetch only drops
//! that gateway's `last_scrape_result` to 0.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌─────────────────┐
//! │   TTN API    │<────│  TargetCollector  │<────│   HTTP Server   │
//! │ (per target) │     │ (one per gateway) │     │   (/metrics)    │
//! └──────────────┘     └───────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! Run the exporter binary with a target configuration file:
//!
//! ```bash
//! ttn-gateway-exporter --target-config-path targets.yaml
//! ```
//!
//! # Configuration
//!
//! See [`config::TargetConfig`] for the target file format.

pub mod client;
pub mod config;
pub mod http;
pub mod metrics;
pub mod stats;
pub mod target;

pub use client::{ApiKeyAuthenticator, Authenticator, ClientMetrics, TtnClient};
pub use config::TargetConfig;
pub use http::HttpServer;
pub use metrics::{Collector, Registry};
pub use target::TargetCollector;

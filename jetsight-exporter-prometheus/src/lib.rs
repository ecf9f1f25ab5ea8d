//! Prometheus exporter for Jetson board telemetry.
//!
//! Each scrape of the HTTP endpoint reads one snapshot from the local
//! telemetry daemon, maps it to a fixed set of metric families and renders
//! them in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Telemetry daemon│<────│    Session      │<────│    Collector    │<──── GET /metrics
//! │  (unix socket)  │     │ (one connection)│     │ (map + render)  │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! jetsight-exporter-prometheus --config config.json5 --port 9000
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod backoff;
pub mod collector;
pub mod config;
pub mod exposition;
pub mod fake;
pub mod http;
pub mod mapping;
pub mod session;
pub mod source;
pub mod system;

pub use collector::{CollectorStats, SharedCollector, TelemetryCollector};
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use mapping::{MetricFamily, MetricKind, map_snapshot};
pub use session::{ReconnectOutcome, SessionError, TelemetrySession};
#[cfg(unix)]
pub use source::SocketSource;
pub use source::TelemetrySource;
pub use system::{HostInfo, SysinfoHost};

//! Observability
//!
//! Health probing, the periodic cache monitor and Prometheus export.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         CacheMonitor (tick)                      │
//! │   clear_expired ─► stats ─► health_check ─► log + warn           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐            ┌──────────────────────────┐  │
//! │  │ HealthState        │            │ PrometheusExporter       │  │
//! │  │ (/healthz, ready)  │            │ (/metrics, tier gauges)  │  │
//! │  └────────────────────┘            └──────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod exporter;
pub mod health;
pub mod monitor;

pub use exporter::PrometheusExporter;
pub use health::{HealthReport, HealthState, HealthStatus, TierHealth};
pub use monitor::{CacheMonitor, MonitorReport};

//! # TYL Munin Exporter
//!
//! **Munin-node to Prometheus bridge** for the TYL framework.
//!
//! munin-node publishes measurements through a line-oriented push-style text
//! protocol. This crate speaks that protocol to a single node, discovers its
//! plugins and their declared fields, and keeps one metric holder per field up
//! to date so a pull-based collector can scrape current values.
//!
//! - **Protocol Client**: `ProtocolClient`, with reconnect-and-retry on stream end
//! - **Connection Supervisor**: `ConnectionSupervisor` driven by a `RetryPolicy`
//! - **Catalog**: `CatalogBuilder` registers one `MetricHolder` per plugin field
//! - **Scrape Loop**: `scrape_once` / `run_scrape_loop` refresh holder values on an interval
//! - **Sink Port**: `MetricsSink` trait, with the `InMemorySink` adapter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tyl_munin_exporter::{BridgeConfig, InMemorySink, MuninBridge};
//!
//! # async fn example() -> tyl_munin_exporter::Result<()> {
//! let config = BridgeConfig::new("localhost:4949")
//!     .with_prefix("munin")
//!     .with_ignore_list("if_,irqstats");
//! let sink = Arc::new(InMemorySink::default());
//!
//! // Serve `sink.render()` from your HTTP layer, then scrape forever
//! let bridge = MuninBridge::new(config, sink.clone())?;
//! bridge.run().await
//! # }
//! ```
//!
//! ## Counters
//!
//! Fields declared `COUNTER` or `DERIVE` are exported as counters carrying the
//! raw value munin reports. No rate is computed here; that is left to the
//! collector.

// Re-export TYL framework functionality (CRITICAL pattern)
pub use tyl_config::{ConfigManager, ConfigPlugin};
pub use tyl_errors::{TylError, TylResult};
pub use tyl_logging::Environment;

// Sink port interface
mod port;
pub use port::{HealthStatus, MetricsSink};

// Domain types
mod types;
pub use types::{
    Labels, MetricDescriptor, MetricHolder, MetricKind, MetricSnapshot, Sample, FIELD_LABEL_NAMES,
};

// Error helpers for the bridge domain
mod errors;
pub use errors::{
    bridge_config_error, connection_error, from_io_error, from_serde_json_error, metric_error,
    protocol_error, registration_error, BridgeErrorExt,
};

// Naming, validation and exposition
mod utils;
pub use utils::{
    canonical_metric_name, format_labels, render_exposition, validate_descriptor,
    validate_label_key, validate_label_value, validate_metric_name,
};

mod config;
pub use config::{
    parse_ignore_list, BridgeConfig, RetryConfig, DEFAULT_MUNIN_ADDRESS,
    DEFAULT_SCRAPE_INTERVAL_SECS,
};

mod supervisor;
pub use supervisor::{ConnectionSupervisor, RetryPolicy};

mod protocol;
pub use protocol::{
    parse_banner, Connection, ConnectionState, ProtocolClient, Response, ResponseShape,
    END_MARKER,
};

mod catalog;
pub use catalog::{
    parse_plugin_list, retain_plugins, Catalog, CatalogBuilder, PluginConfig, BUILD_INFO_METRIC,
    FETCH_TIME_METRIC,
};

mod scrape;
pub use scrape::{
    parse_fetch_line, run_scrape_loop, scrape_once, FetchLineError, ScrapeReport,
};

mod bridge;
pub use bridge::MuninBridge;

// In-memory sink adapter
mod memory;
pub use memory::{InMemorySink, InMemorySinkConfig};

/// Result type for bridge operations using TYL error handling
pub type Result<T> = TylResult<T>;

/// Re-export async_trait for sink implementations
pub use async_trait::async_trait;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sink_port_basic_functionality() {
        let sink = InMemorySink::default();
        let holder = Arc::new(MetricHolder::new(MetricDescriptor::new(
            "load_load",
            "Load average: load",
            MetricKind::Gauge,
        )));

        assert!(sink.register(holder.clone()).await.is_ok());
        holder.set(0.5, Vec::<String>::new()).await;
        assert_eq!(sink.gather().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sink_health_check() {
        let sink = InMemorySink::default();
        let health = sink.health_check().await;
        assert!(health.is_ok());
    }

    #[test]
    fn test_bridge_rejects_invalid_config() {
        let config = BridgeConfig::default().with_scrape_interval(0);
        assert!(MuninBridge::new(config, Arc::new(InMemorySink::default())).is_err());
    }

    #[test]
    fn test_tyl_error_integration() {
        let error = metric_error("metric_name", "Invalid metric name");
        assert!(error.to_string().contains("Invalid metric name"));
    }

    #[test]
    fn test_name_and_validation_agree() {
        let name = canonical_metric_name(Some("munin"), "if_eth-0", "down");
        assert!(validate_metric_name(&name).is_ok());
    }
}

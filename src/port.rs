//! Metrics sink port
//!
//! The bridge does not speak any exposition transport itself. It hands each
//! metric holder to a sink, which owns the pull side: whenever a collector
//! scrapes, the sink asks every registered holder for its current sample.
//! Following hexagonal architecture principles, this port defines WHAT a sink
//! must offer, not HOW it serves it.

use super::*;
use async_trait::async_trait;
use std::sync::Arc;

/// **Primary Port Interface** for the exposition side of the bridge
///
/// ## Contract
/// - `register` accepts exactly one holder per canonical name; a second
///   registration under the same name is an error.
/// - `gather` is called concurrently with scrape-loop updates and must only
///   take the per-holder locks to read values.
///
/// ## Example Implementation
/// ```rust
/// use std::sync::Arc;
/// use tyl_munin_exporter::{async_trait, HealthStatus, MetricHolder, MetricSnapshot, MetricsSink, Result};
///
/// struct DiscardSink;
///
/// #[async_trait]
/// impl MetricsSink for DiscardSink {
///     async fn register(&self, _holder: Arc<MetricHolder>) -> Result<()> {
///         Ok(())
///     }
///
///     async fn gather(&self) -> Result<Vec<MetricSnapshot>> {
///         Ok(Vec::new())
///     }
///
///     async fn health_check(&self) -> Result<HealthStatus> {
///         Ok(HealthStatus::healthy())
///     }
/// }
/// ```
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Register a metric holder under its descriptor's canonical name
    ///
    /// # Returns
    /// * `Result<()>` - Error if the name is already taken or invalid
    async fn register(&self, holder: Arc<MetricHolder>) -> Result<()>;

    /// Collect the current sample of every registered holder
    ///
    /// Holders that have not received a value yet are left out.
    async fn gather(&self) -> Result<Vec<MetricSnapshot>>;

    /// Check the health status of the sink
    async fn health_check(&self) -> Result<HealthStatus>;
}

/// Health status information for sinks and the protocol client
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    /// Whether the component is healthy
    pub is_healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Optional additional metadata
    pub metadata: std::collections::HashMap<String, String>,

    /// Timestamp of health check (Unix epoch seconds)
    pub timestamp: u64,
}

impl HealthStatus {
    /// Create a healthy status
    pub fn healthy() -> Self {
        Self::with_state(true, "Munin bridge is healthy")
    }

    /// Create an unhealthy status with a message
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_state(false, message)
    }

    fn with_state(is_healthy: bool, message: impl Into<String>) -> Self {
        Self {
            is_healthy,
            message: message.into(),
            metadata: std::collections::HashMap::new(),
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Add metadata to the health status
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::healthy()
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.is_healthy { "HEALTHY" } else { "UNHEALTHY" };
        write!(f, "[{}] {}", status, self.message)
    }
}

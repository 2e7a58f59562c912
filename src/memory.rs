//! In-memory metrics sink
//!
//! This module provides the registry-backed sink that the bridge registers its
//! holders with. An HTTP layer serves pulls by calling [`InMemorySink::gather`]
//! (or [`InMemorySink::render`] for the text exposition format).

use super::*;
use crate::utils::{render_exposition, validate_descriptor};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration for the in-memory sink
#[derive(Debug, Clone, PartialEq)]
pub struct InMemorySinkConfig {
    /// Name reported in health checks
    pub sink_name: String,

    /// Whether descriptors are validated against metric naming rules
    pub validate_descriptors: bool,
}

impl Default for InMemorySinkConfig {
    fn default() -> Self {
        Self {
            sink_name: "munin-exporter".to_string(),
            validate_descriptors: true,
        }
    }
}

impl InMemorySinkConfig {
    pub fn new(sink_name: impl Into<String>) -> Self {
        Self {
            sink_name: sink_name.into(),
            ..Default::default()
        }
    }

    /// Enable or disable descriptor validation on registration
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_descriptors = validate;
        self
    }
}

#[derive(Default)]
struct Registry {
    names: HashSet<String>,
    holders: Vec<Arc<MetricHolder>>,
}

/// Sink that keeps registered holders in memory
///
/// ## Features
/// - Rejects duplicate canonical names
/// - Gathers in registration order
/// - Thread-safe concurrent pulls; values are read through each holder's own lock
///
/// ## Example Usage
/// ```rust
/// use std::sync::Arc;
/// use tyl_munin_exporter::{InMemorySink, MetricDescriptor, MetricHolder, MetricKind, MetricsSink};
///
/// # tokio_test::block_on(async {
/// let sink = InMemorySink::default();
/// let holder = Arc::new(MetricHolder::new(
///     MetricDescriptor::new("load_load", "Load average: load", MetricKind::Gauge),
/// ));
///
/// sink.register(holder.clone()).await.unwrap();
/// holder.set(0.42, Vec::<String>::new()).await;
///
/// let gathered = sink.gather().await.unwrap();
/// assert_eq!(gathered.len(), 1);
/// # });
/// ```
pub struct InMemorySink {
    config: InMemorySinkConfig,
    registry: RwLock<Registry>,
}

impl InMemorySink {
    pub fn new(config: InMemorySinkConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(Registry::default()),
        }
    }

    pub fn config(&self) -> &InMemorySinkConfig {
        &self.config
    }

    /// Number of registered holders
    pub async fn len(&self) -> usize {
        self.registry.read().await.holders.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Look up a registered holder by canonical name
    pub async fn holder(&self, name: &str) -> Option<Arc<MetricHolder>> {
        self.registry
            .read()
            .await
            .holders
            .iter()
            .find(|h| h.name() == name)
            .cloned()
    }

    /// Gather and render every current sample in the text exposition format
    pub async fn render(&self) -> Result<String> {
        let snapshots = self.gather().await?;
        Ok(render_exposition(&snapshots))
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(InMemorySinkConfig::default())
    }
}

#[async_trait]
impl MetricsSink for InMemorySink {
    async fn register(&self, holder: Arc<MetricHolder>) -> Result<()> {
        if self.config.validate_descriptors {
            validate_descriptor(holder.descriptor())?;
        }

        let mut registry = self.registry.write().await;
        if !registry.names.insert(holder.name().to_string()) {
            return Err(registration_error(
                holder.name(),
                "A metric with this name is already registered",
            ));
        }

        tracing::debug!(metric = holder.name(), kind = %holder.kind(), "Registered metric");
        registry.holders.push(holder);
        Ok(())
    }

    async fn gather(&self) -> Result<Vec<MetricSnapshot>> {
        // Clone the Arcs so the registry lock is not held across holder reads
        let holders = self.registry.read().await.holders.clone();

        let mut snapshots = Vec::with_capacity(holders.len());
        for holder in holders {
            if let Some(snapshot) = holder.snapshot().await {
                snapshots.push(snapshot);
            }
        }
        Ok(snapshots)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        let registered = self.len().await;
        Ok(HealthStatus::healthy()
            .with_metadata("sink", self.config.sink_name.clone())
            .with_metadata("registered", registered.to_string()))
    }
}

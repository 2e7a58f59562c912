//! Bridge wiring
//!
//! [`MuninBridge`] ties the pieces together in startup order: connect to the
//! munin-node, build the catalog against the sink, then scrape forever.

use super::*;
use crate::catalog::{Catalog, CatalogBuilder};
use crate::protocol::ProtocolClient;
use crate::scrape::{self, ScrapeReport};
use std::sync::Arc;
use tracing::info;

/// A munin-node bridged into a metrics sink
pub struct MuninBridge<S: MetricsSink> {
    config: BridgeConfig,
    client: ProtocolClient,
    sink: Arc<S>,
    catalog: Option<Catalog>,
}

impl<S: MetricsSink> MuninBridge<S> {
    /// Create a bridge; nothing is connected until [`MuninBridge::start`]
    pub fn new(config: BridgeConfig, sink: Arc<S>) -> Result<Self> {
        config.validate()?;
        let client = ProtocolClient::new(config.munin_address.clone(), config.retry_policy());

        Ok(Self {
            config,
            client,
            sink,
            catalog: None,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn client(&self) -> &ProtocolClient {
        &self.client
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// The catalog, once [`MuninBridge::start`] succeeded
    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.as_ref()
    }

    /// Connect and build the catalog
    ///
    /// Both steps are startup-fatal: errors are returned for the caller to
    /// terminate on. Calling this again after success is a no-op.
    pub async fn start(&mut self) -> Result<&Catalog> {
        if self.catalog.is_none() {
            self.client.connect().await.map_err(|e| {
                connection_error(
                    self.config.munin_address.clone(),
                    format!("Could not connect: {e}"),
                )
            })?;

            let catalog = CatalogBuilder::from_config(&self.config)
                .build(&mut self.client, self.sink.as_ref())
                .await?;
            info!(
                plugins = catalog.plugins().len(),
                metrics = catalog.len(),
                hostname = self.client.hostname(),
                "Catalog built"
            );
            self.catalog = Some(catalog);
        }

        self.catalog
            .as_ref()
            .ok_or_else(|| protocol_error("list", "catalog unavailable"))
    }

    /// Run a single scrape pass
    pub async fn scrape_once(&mut self) -> Result<ScrapeReport> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| bridge_config_error("catalog", "bridge not started"))?;
        scrape::scrape_once(&mut self.client, catalog).await
    }

    /// Start if needed, then scrape on the configured interval forever
    pub async fn run(mut self) -> Result<()> {
        self.start().await?;

        let interval = self.config.scrape_interval();
        let Some(catalog) = self.catalog.as_ref() else {
            return Err(bridge_config_error("catalog", "bridge not started"));
        };
        scrape::run_scrape_loop(&mut self.client, catalog, interval).await
    }

    /// Combined health of the munin connection and the sink
    pub async fn health(&self) -> Result<HealthStatus> {
        let sink = self.sink.health_check().await?;
        let client = self.client.health();

        let mut status = if client.is_healthy && sink.is_healthy {
            HealthStatus::healthy()
        } else if !client.is_healthy {
            HealthStatus::unhealthy(client.message.clone())
        } else {
            HealthStatus::unhealthy(sink.message.clone())
        };
        status.metadata.extend(client.metadata);
        status.metadata.extend(sink.metadata);
        Ok(status)
    }
}

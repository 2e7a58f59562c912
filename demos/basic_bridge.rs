//! Basic usage example for the TYL Munin Exporter
//!
//! Connects to a munin-node, registers its plugin fields with an
//! `InMemorySink`, and prints the Prometheus exposition every few seconds
//! while the scrape loop runs.
//!
//! ```text
//! cargo run --example basic_bridge -- [config.json]
//! RUST_LOG=debug cargo run --example basic_bridge
//! ```
//!
//! The optional config file is a JSON `BridgeConfig`, for example:
//!
//! ```json
//! { "munin_address": "localhost:4949", "metric_prefix": "munin", "ignore": "if_,irqstats" }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tyl_munin_exporter::{BridgeConfig, InMemorySink, MuninBridge};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BridgeConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => BridgeConfig::default().with_prefix("munin"),
    };
    println!(
        "Bridging munin-node at {} (scrape every {:?})",
        config.munin_address,
        config.scrape_interval()
    );

    let sink = Arc::new(InMemorySink::default());
    let bridge = MuninBridge::new(config, sink.clone())?;

    // Stand-in for an HTTP handler serving the exposition text
    let printer = sink.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            ticker.tick().await;
            match printer.render().await {
                Ok(text) if !text.is_empty() => println!("{text}"),
                Ok(_) => println!("(no samples yet)"),
                Err(e) => eprintln!("render failed: {e}"),
            }
        }
    });

    bridge.run().await?;
    Ok(())
}

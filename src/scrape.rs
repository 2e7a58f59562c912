//! Scrape loop
//!
//! Every interval the loop walks the catalog's plugins in discovery order,
//! sends `fetch <plugin>`, and pushes each reported value into the matching
//! holder. The pass duration is written to the fetch-time gauge once every
//! plugin has been fetched.

use super::*;
use crate::catalog::Catalog;
use crate::protocol::{ConnectionState, ProtocolClient};
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Reason a fetch line was skipped
#[derive(Debug, Clone, PartialEq)]
pub enum FetchLineError {
    /// The line did not have exactly two whitespace-separated tokens
    FieldCount(usize),
    /// The value token is not a number (munin reports unknown values as `U`)
    Value(String),
}

impl std::fmt::Display for FetchLineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchLineError::FieldCount(count) => write!(f, "expected 2 fields, got {count}"),
            FetchLineError::Value(value) => write!(f, "cannot parse value '{value}'"),
        }
    }
}

/// Parse one `fetch` response line into (field, value)
///
/// The key's `.value` suffix (or any other dotted segment) is stripped.
///
/// # Examples
/// ```rust
/// use tyl_munin_exporter::parse_fetch_line;
///
/// assert_eq!(parse_fetch_line("user.value 12.5"), Ok(("user".to_string(), 12.5)));
/// assert!(parse_fetch_line("user.value U").is_err());
/// ```
pub fn parse_fetch_line(line: &str) -> std::result::Result<(String, f64), FetchLineError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let [key, raw_value] = parts.as_slice() else {
        return Err(FetchLineError::FieldCount(parts.len()));
    };

    let field = key.split('.').next().unwrap_or(*key);
    let value = raw_value
        .parse::<f64>()
        .map_err(|_| FetchLineError::Value(raw_value.to_string()))?;

    Ok((field.to_string(), value))
}

/// Outcome of one complete scrape pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeReport {
    /// Plugins fetched
    pub plugins: usize,
    /// Holders updated
    pub updated: usize,
    /// Lines skipped as malformed
    pub skipped: usize,
    /// Lines naming a field the catalog has no holder for
    pub unknown: usize,
    /// Wall-clock duration of the pass
    pub duration: Duration,
}

/// Fetch every plugin once and update the holders
///
/// A protocol error on any plugin aborts the pass; holders updated earlier in
/// the pass keep their new values and the fetch-time gauge is left untouched.
pub async fn scrape_once(client: &mut ProtocolClient, catalog: &Catalog) -> Result<ScrapeReport> {
    let start = Instant::now();
    let mut report = ScrapeReport::default();

    for plugin in catalog.plugins() {
        let response = client
            .fetch(plugin)
            .await
            .map_err(|e| e.with_plugin(plugin.as_str()))?;
        report.plugins += 1;

        for line in &response.lines {
            let (field, value) = match parse_fetch_line(line) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(plugin = %plugin, line = %line, reason = %e, "unexpected line, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            let name = catalog.metric_name(plugin, &field);
            let Some(holder) = catalog.holder(&name) else {
                report.unknown += 1;
                continue;
            };

            debug!(metric = %name, value, "Updating metric");
            holder
                .set(value, [client.hostname(), plugin.as_str(), field.as_str()])
                .await;
            report.updated += 1;
        }
    }

    report.duration = start.elapsed();
    catalog
        .fetch_time()
        .set(report.duration.as_secs_f64(), [client.hostname()])
        .await;

    Ok(report)
}

/// Run scrape passes forever on a fixed interval
///
/// Failed passes are logged and leave values stale until the next pass. The
/// loop only returns when the protocol client reached
/// [`ConnectionState::Failed`], which callers treat as fatal.
pub async fn run_scrape_loop(
    client: &mut ProtocolClient,
    catalog: &Catalog,
    interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        info!("Scraping");

        match scrape_once(client, catalog).await {
            Ok(report) => info!(
                plugins = report.plugins,
                updated = report.updated,
                skipped = report.skipped,
                duration_secs = report.duration.as_secs_f64(),
                "Scrape complete"
            ),
            Err(e) if client.state() == ConnectionState::Failed => {
                error!(error = %e, "Unrecoverable munin-node error, stopping scrape loop");
                return Err(e);
            }
            Err(e) => warn!(error = %e, "Error occurred when trying to fetch metrics"),
        }
    }
}

//! Bridge configuration
//!
//! Holds everything the bridge needs to know about its surroundings: where the
//! munin-node lives, where the metrics endpoint is served, how metric names are
//! prefixed, which plugins are ignored and how often values are scraped.

use super::*;
use crate::errors::from_serde_json_error;
use crate::supervisor::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Default munin-node address
pub const DEFAULT_MUNIN_ADDRESS: &str = "localhost:4949";

/// Default scrape interval in seconds
pub const DEFAULT_SCRAPE_INTERVAL_SECS: u64 = 60;

/// Configuration for the munin bridge
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// munin-node address (`host:port`)
    pub munin_address: String,

    /// Address on which the metrics endpoint is exposed
    pub listen_address: String,

    /// Path on which the metrics endpoint is exposed
    pub listen_path: String,

    /// Optional metric name prefix; an empty string means no prefix
    #[serde(deserialize_with = "deserialize_prefix")]
    pub metric_prefix: Option<String>,

    /// Plugin name prefixes to ignore
    #[serde(deserialize_with = "deserialize_ignore_list")]
    pub ignore: Vec<String>,

    /// Interval in seconds between scrapes
    pub scrape_interval_secs: u64,

    /// Reconnect policy used after the munin-node closes the stream
    pub retry: RetryConfig,
}

/// Reconnect settings as they appear in configuration files
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub delay_secs: u64,
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_secs: 1,
            max_attempts: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            munin_address: DEFAULT_MUNIN_ADDRESS.to_string(),
            listen_address: "0.0.0.0:8080".to_string(),
            listen_path: "/metrics".to_string(),
            metric_prefix: None,
            ignore: Vec::new(),
            scrape_interval_secs: DEFAULT_SCRAPE_INTERVAL_SECS,
            retry: RetryConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a config pointing at the given munin-node
    pub fn new(munin_address: impl Into<String>) -> Self {
        Self {
            munin_address: munin_address.into(),
            ..Default::default()
        }
    }

    /// Load a config from a JSON document; absent keys keep their defaults
    ///
    /// # Examples
    /// ```rust
    /// use tyl_munin_exporter::BridgeConfig;
    ///
    /// let config = BridgeConfig::from_json(r#"{"ignore": "if_,irqstats", "metric_prefix": "munin"}"#).unwrap();
    /// assert_eq!(config.ignore, vec!["if_", "irqstats"]);
    /// assert_eq!(config.scrape_interval_secs, 60);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(from_serde_json_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the metric name prefix; an empty prefix clears it
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.metric_prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    /// Set the ignore list from a comma-separated string
    pub fn with_ignore_list(mut self, list: &str) -> Self {
        self.ignore = parse_ignore_list(list);
        self
    }

    /// Set the ignore prefixes verbatim
    ///
    /// Unlike [`BridgeConfig::with_ignore_list`] this keeps empty entries; an
    /// empty prefix ignores every plugin.
    pub fn with_ignore_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scrape_interval(mut self, secs: u64) -> Self {
        self.scrape_interval_secs = secs;
        self
    }

    pub fn with_listen(mut self, address: impl Into<String>, path: impl Into<String>) -> Self {
        self.listen_address = address.into();
        self.listen_path = path.into();
        self
    }

    pub fn with_retry(mut self, delay_secs: u64, max_attempts: Option<u32>) -> Self {
        self.retry = RetryConfig {
            delay_secs,
            max_attempts,
        };
        self
    }

    /// Prefix as an optional borrowed string
    pub fn prefix(&self) -> Option<&str> {
        self.metric_prefix.as_deref()
    }

    pub fn scrape_interval(&self) -> Duration {
        Duration::from_secs(self.scrape_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(self.retry.delay_secs), self.retry.max_attempts)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.munin_address.trim().is_empty() {
            return Err(bridge_config_error(
                "munin_address",
                "munin-node address cannot be empty",
            ));
        }

        if self.scrape_interval_secs == 0 {
            return Err(bridge_config_error(
                "scrape_interval_secs",
                "Scrape interval must be greater than 0",
            ));
        }

        if !self.listen_path.starts_with('/') {
            return Err(bridge_config_error(
                "listen_path",
                "Listen path must start with '/'",
            ));
        }

        if self.retry.max_attempts == Some(0) {
            return Err(bridge_config_error(
                "retry.max_attempts",
                "Maximum reconnect attempts must be greater than 0 when set",
            ));
        }

        if let Some(prefix) = self.prefix() {
            validate_metric_name(&prefix.replace('-', "_"))
                .map_err(|e| bridge_config_error("metric_prefix", e.to_string()))?;
        }

        Ok(())
    }
}

/// Split a comma-separated ignore list into prefixes
///
/// Entries are trimmed and empty entries dropped, so an empty string yields an
/// empty list (ignore nothing).
pub fn parse_ignore_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_prefix<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let prefix = Option::<String>::deserialize(deserializer)?;
    Ok(prefix.filter(|p| !p.is_empty()))
}

fn deserialize_ignore_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IgnoreList {
        Joined(String),
        Entries(Vec<String>),
    }

    Ok(match IgnoreList::deserialize(deserializer)? {
        IgnoreList::Joined(list) => parse_ignore_list(&list),
        IgnoreList::Entries(entries) => entries,
    })
}

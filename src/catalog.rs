//! Metric catalog
//!
//! The catalog is built once at startup: it asks the munin-node which plugins
//! exist, reads each retained plugin's field declarations, and registers one
//! [`MetricHolder`] per field with the sink. The resulting [`Catalog`] is owned
//! by the bridge and handed by reference to the scrape loop.

use super::*;
use crate::protocol::ProtocolClient;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Name of the static build information gauge
pub const BUILD_INFO_METRIC: &str = "munin_exporter_build_info";

/// Name of the gauge holding the duration of the last complete scrape pass
pub const FETCH_TIME_METRIC: &str = "munin_exporter_fetch_time";

/// Comments munin-node sends in place of a config response when a plugin fails
const ERROR_MARKERS: [&str; 4] = [
    "# Unknown service",
    "# Bad exit",
    "# Unknown command",
    "# Timeout",
];

/// Split the `list` response into plugin names
pub fn parse_plugin_list(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Keep the plugins that no ignore prefix matches, preserving order
///
/// An empty prefix is a prefix of every name, so it ignores everything.
///
/// # Examples
/// ```rust
/// use tyl_munin_exporter::retain_plugins;
///
/// let plugins = vec!["cpu".to_string(), "if_eth0".to_string(), "load".to_string()];
/// assert_eq!(retain_plugins(plugins, &["if_".to_string()]), vec!["cpu", "load"]);
/// ```
pub fn retain_plugins(plugins: Vec<String>, ignore: &[String]) -> Vec<String> {
    plugins
        .into_iter()
        .filter(|name| !ignore.iter().any(|prefix| name.starts_with(prefix.as_str())))
        .collect()
}

/// Parsed `config <plugin>` response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginConfig {
    /// Graph-level attributes (`graph_title`, `graph_vlabel`, ...)
    pub graph: HashMap<String, String>,

    /// Field attributes keyed by field name, then attribute name
    pub fields: BTreeMap<String, HashMap<String, String>>,
}

impl PluginConfig {
    /// Parse config lines (comments already removed)
    ///
    /// Keys containing a `.` are `field.attribute` (segments after the second
    /// are dropped); the rest are graph-level.
    /// Lines without a value are logged and skipped.
    pub fn parse<S: AsRef<str>>(plugin: &str, lines: &[S]) -> Self {
        let mut config = Self::default();

        for line in lines {
            let line = line.as_ref();
            let mut parts = line.split_whitespace();
            let (Some(key), Some(first)) = (parts.next(), parts.next()) else {
                warn!(plugin, line, "Line unexpected, skipping");
                continue;
            };
            let value = std::iter::once(first).chain(parts).collect::<Vec<_>>().join(" ");

            let mut segments = key.split('.');
            match (segments.next(), segments.next()) {
                (Some(field), Some(attribute)) => {
                    config
                        .fields
                        .entry(field.to_string())
                        .or_default()
                        .insert(attribute.to_string(), value);
                }
                _ => {
                    config.graph.insert(key.to_string(), value);
                }
            }
        }

        config
    }

    pub fn graph_title(&self) -> &str {
        self.graph.get("graph_title").map(String::as_str).unwrap_or("")
    }

    /// Build the descriptor for one field of this plugin
    pub fn field_descriptor(&self, prefix: Option<&str>, plugin: &str, field: &str) -> MetricDescriptor {
        let attributes = self.fields.get(field);
        let attribute = |name: &str| attributes.and_then(|a| a.get(name)).map(String::as_str);

        let mut help = format!("{}: {}", self.graph_title(), attribute("label").unwrap_or(""));
        if let Some(info) = attribute("info").filter(|info| !info.is_empty()) {
            help.push_str(", ");
            help.push_str(info);
        }

        let declared = attribute("type");
        let kind = MetricKind::classify(declared);
        let type_label = match kind {
            MetricKind::Counter => declared.unwrap_or_default().to_lowercase(),
            MetricKind::Gauge => "gauge".to_string(),
        };

        MetricDescriptor::new(canonical_metric_name(prefix, plugin, field), help, kind)
            .with_label_names(FIELD_LABEL_NAMES)
            .with_const_label("type", type_label)
    }
}

/// Discovered plugins and the holders registered for their fields
#[derive(Debug)]
pub struct Catalog {
    prefix: Option<String>,
    plugins: Vec<String>,
    holders: HashMap<String, Arc<MetricHolder>>,
    fetch_time: Arc<MetricHolder>,
    build_info: Arc<MetricHolder>,
}

impl Catalog {
    /// Retained plugins in discovery order
    pub fn plugins(&self) -> &[String] {
        &self.plugins
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Holder registered for a plugin field, by canonical name
    pub fn holder(&self, name: &str) -> Option<&Arc<MetricHolder>> {
        self.holders.get(name)
    }

    /// Canonical name for a plugin field under this catalog's prefix
    pub fn metric_name(&self, plugin: &str, field: &str) -> String {
        canonical_metric_name(self.prefix(), plugin, field)
    }

    /// Number of plugin field holders (built-in gauges excluded)
    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    pub fn fetch_time(&self) -> &Arc<MetricHolder> {
        &self.fetch_time
    }

    pub fn build_info(&self) -> &Arc<MetricHolder> {
        &self.build_info
    }
}

/// Builds the [`Catalog`] from munin-node discovery responses
#[derive(Debug, Clone, Default)]
pub struct CatalogBuilder {
    prefix: Option<String>,
    ignore: Vec<String>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            prefix: config.metric_prefix.clone(),
            ignore: config.ignore.clone(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.prefix = (!prefix.is_empty()).then_some(prefix);
        self
    }

    pub fn with_ignore<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Discover plugins and register one holder per field with `sink`
    ///
    /// Fails if `list` or a `config` response carries an error marker, if the
    /// protocol client fails, or if the sink rejects a registration (such as a
    /// duplicate name). Fields whose derived name is not a valid metric name
    /// are logged and skipped.
    pub async fn build<S>(&self, client: &mut ProtocolClient, sink: &S) -> Result<Catalog>
    where
        S: MetricsSink + ?Sized,
    {
        let listing = client.list().await?;
        if listing.starts_with('#') {
            return Err(protocol_error(
                "list",
                format!("Error getting items: {listing}"),
            ));
        }

        let discovered = parse_plugin_list(&listing);
        let plugins = retain_plugins(discovered.clone(), &self.ignore);
        info!(
            discovered = discovered.len(),
            retained = plugins.len(),
            "Discovered munin plugins"
        );

        let prefix = self.prefix.as_deref();
        let mut holders = HashMap::new();

        for plugin in &plugins {
            let command = format!("config {plugin}");
            let response = client
                .config(plugin)
                .await
                .map_err(|e| e.with_plugin(plugin.as_str()))?;

            if let Some(marker) = response
                .comments
                .iter()
                .find(|c| ERROR_MARKERS.iter().any(|m| c.starts_with(m)))
            {
                return Err(protocol_error(command, marker.as_str()).with_plugin(plugin.as_str()));
            }

            let config = PluginConfig::parse(plugin, &response.lines);
            for field in config.fields.keys() {
                let descriptor = config.field_descriptor(prefix, plugin, field);
                if let Err(e) = validate_descriptor(&descriptor) {
                    warn!(
                        plugin = %plugin,
                        field = %field,
                        metric = descriptor.name(),
                        error = %e,
                        "Invalid metric, skipping field"
                    );
                    continue;
                }
                let holder = Arc::new(MetricHolder::new(descriptor));

                sink.register(holder.clone()).await?;
                info!(
                    metric = holder.name(),
                    kind = %holder.kind(),
                    help = holder.descriptor().help(),
                    const_labels = %format_labels(holder.descriptor().const_labels()),
                    "Registered metric"
                );
                holders.insert(holder.name().to_string(), holder);
            }
        }

        let build_info = Arc::new(MetricHolder::new(
            MetricDescriptor::new(BUILD_INFO_METRIC, "Munin exporter build info", MetricKind::Gauge)
                .with_label_names(["version", "package"])
                .with_const_label("type", "gauge"),
        ));
        build_info
            .set(1.0, [env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_NAME")])
            .await;
        sink.register(build_info.clone()).await?;

        let fetch_time = Arc::new(MetricHolder::new(
            MetricDescriptor::new(
                FETCH_TIME_METRIC,
                "Time taken to fetch data from all registered munin plugins",
                MetricKind::Gauge,
            )
            .with_label_names(["hostname"])
            .with_const_label("type", "gauge"),
        ));
        sink.register(fetch_time.clone()).await?;

        Ok(Catalog {
            prefix: self.prefix.clone(),
            plugins,
            holders,
            fetch_time,
            build_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_plugin_list() {
        assert_eq!(
            parse_plugin_list("cpu  df if_eth0\tload"),
            strings(&["cpu", "df", "if_eth0", "load"])
        );
        assert!(parse_plugin_list("").is_empty());
    }

    #[test]
    fn test_retain_plugins_filters_by_prefix() {
        let plugins = strings(&["cpu", "if_eth0", "if_err_eth0", "irqstats", "load"]);
        let retained = retain_plugins(plugins.clone(), &strings(&["if_", "irq"]));
        assert_eq!(retained, strings(&["cpu", "load"]));

        // Every retained name is free of ignored prefixes, every dropped one has one
        for name in &plugins {
            let ignored = ["if_", "irq"].iter().any(|p| name.starts_with(p));
            assert_eq!(retained.contains(name), !ignored);
        }
    }

    #[test]
    fn test_retain_plugins_empty_ignore_list_keeps_all() {
        let plugins = strings(&["cpu", "load"]);
        assert_eq!(retain_plugins(plugins.clone(), &[]), plugins);
    }

    #[test]
    fn test_retain_plugins_empty_prefix_ignores_all() {
        let plugins = strings(&["cpu", "load"]);
        assert!(retain_plugins(plugins, &strings(&[""])).is_empty());
    }

    #[test]
    fn test_parse_plugin_config() {
        let lines = [
            "graph_title CPU usage",
            "graph_vlabel %",
            "user.label user",
            "user.info CPU time spent by normal programs",
            "system.label system",
            "system.type DERIVE",
            "orphan",
        ];
        let config = PluginConfig::parse("cpu", &lines);

        assert_eq!(config.graph_title(), "CPU usage");
        assert_eq!(config.graph.get("graph_vlabel"), Some(&"%".to_string()));
        assert_eq!(config.fields.len(), 2);
        assert_eq!(
            config.fields["user"].get("info"),
            Some(&"CPU time spent by normal programs".to_string())
        );
        assert_eq!(config.fields["system"].get("type"), Some(&"DERIVE".to_string()));
        assert!(!config.graph.contains_key("orphan"));
    }

    #[test]
    fn test_field_descriptor() {
        let lines = [
            "graph_title CPU usage",
            "user.label user",
            "user.info normal programs",
            "system.label system",
            "system.type DERIVE",
            "idle.label idle",
            "idle.info ",
        ];
        let config = PluginConfig::parse("cpu", &lines);

        let user = config.field_descriptor(None, "cpu", "user");
        assert_eq!(user.name(), "cpu_user");
        assert_eq!(user.help(), "CPU usage: user, normal programs");
        assert_eq!(user.kind(), MetricKind::Gauge);
        assert_eq!(user.const_labels().get("type"), Some(&"gauge".to_string()));

        let system = config.field_descriptor(Some("prefix"), "cpu", "system");
        assert_eq!(system.name(), "prefix_cpu_system");
        assert_eq!(system.help(), "CPU usage: system");
        assert_eq!(system.kind(), MetricKind::Counter);
        assert_eq!(system.const_labels().get("type"), Some(&"derive".to_string()));
        assert_eq!(system.label_names(), &FIELD_LABEL_NAMES.map(String::from));

        let idle = config.field_descriptor(None, "cpu", "idle");
        assert_eq!(idle.help(), "CPU usage: idle");
    }

    #[test]
    fn test_parse_keeps_second_key_segment_only() {
        let config = PluginConfig::parse("if_eth0", &["down.label.extra received", "down.type DERIVE"]);

        assert_eq!(config.fields.len(), 1);
        assert_eq!(config.fields["down"].get("label"), Some(&"received".to_string()));
        assert!(!config.fields["down"].contains_key("label.extra"));
    }

    #[test]
    fn test_field_descriptor_without_graph_title() {
        let config = PluginConfig::parse("uptime", &["uptime.label uptime"]);
        let descriptor = config.field_descriptor(None, "uptime", "uptime");
        assert_eq!(descriptor.help(), ": uptime");
    }
}

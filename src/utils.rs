//! Naming, validation and exposition utilities
//!
//! This module holds the canonical-name derivation shared by the catalog
//! builder and the scrape loop, validation of names and labels accepted by
//! sinks, and the Prometheus text exposition renderer.

use super::*;
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt::Write as _;

// Maximum allowed lengths for various metric components
const MAX_METRIC_NAME_LENGTH: usize = 255;
const MAX_LABEL_KEY_LENGTH: usize = 128;
const MAX_LABEL_VALUE_LENGTH: usize = 1024;

/// Derive the canonical external metric name for a plugin field
///
/// Joins the optional prefix, the plugin name and the field name with `_`,
/// then replaces every `-` with `_`. An empty prefix is treated as absent.
///
/// # Examples
/// ```rust
/// use tyl_munin_exporter::canonical_metric_name;
///
/// assert_eq!(canonical_metric_name(None, "cpu", "user"), "cpu_user");
/// assert_eq!(canonical_metric_name(Some("munin"), "if_eth-0", "down"), "munin_if_eth_0_down");
/// ```
pub fn canonical_metric_name(prefix: Option<&str>, plugin: &str, field: &str) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(prefix) = prefix.filter(|p| !p.is_empty()) {
        parts.push(prefix);
    }
    parts.push(plugin);
    parts.push(field);
    parts.join("_").replace('-', "_")
}

/// Validate a metric name
///
/// Ensures metric names follow the Prometheus conventions:
/// - Must not be empty
/// - Must start with a letter, underscore or colon
/// - Can contain letters, numbers, underscores, and colons
/// - Must be within reasonable length limits
///
/// # Examples
/// ```rust
/// use tyl_munin_exporter::validate_metric_name;
///
/// assert!(validate_metric_name("cpu_user").is_ok());
/// assert!(validate_metric_name("").is_err());
/// ```
pub fn validate_metric_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(metric_error("metric_name", "Metric name cannot be empty"));
    }

    if name.len() > MAX_METRIC_NAME_LENGTH {
        return Err(metric_error(
            "metric_name",
            format!("Metric name too long (max {MAX_METRIC_NAME_LENGTH} chars)"),
        ));
    }

    lazy_static! {
        static ref METRIC_NAME_REGEX: Regex = Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").unwrap();
    }

    if !METRIC_NAME_REGEX.is_match(name) {
        return Err(metric_error(
            "metric_name",
            format!("Invalid metric name format '{name}' (must match [a-zA-Z_:][a-zA-Z0-9_:]*)"),
        ));
    }

    Ok(())
}

/// Validate a label key
///
/// Label keys must match `[a-zA-Z_][a-zA-Z0-9_]*` and must not start with the
/// reserved `__` prefix.
pub fn validate_label_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(metric_error("label_key", "Label key cannot be empty"));
    }

    if key.len() > MAX_LABEL_KEY_LENGTH {
        return Err(metric_error(
            "label_key",
            format!("Label key too long (max {MAX_LABEL_KEY_LENGTH} chars)"),
        ));
    }

    if key.starts_with("__") {
        return Err(metric_error(
            "label_key",
            "Label keys starting with '__' are reserved",
        ));
    }

    lazy_static! {
        static ref LABEL_KEY_REGEX: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
    }

    if !LABEL_KEY_REGEX.is_match(key) {
        return Err(metric_error(
            "label_key",
            "Invalid label key format (must match [a-zA-Z_][a-zA-Z0-9_]*)",
        ));
    }

    Ok(())
}

/// Validate a label value
pub fn validate_label_value(value: &str) -> Result<()> {
    if value.len() > MAX_LABEL_VALUE_LENGTH {
        return Err(metric_error(
            "label_value",
            format!("Label value too long (max {MAX_LABEL_VALUE_LENGTH} chars)"),
        ));
    }

    if value.contains('\0') {
        return Err(metric_error(
            "label_value",
            "Label values cannot contain null bytes",
        ));
    }

    Ok(())
}

/// Validate a descriptor before registration
///
/// Checks the name, every variable label name and every constant label.
pub fn validate_descriptor(descriptor: &MetricDescriptor) -> Result<()> {
    validate_metric_name(descriptor.name())?;

    for name in descriptor.label_names() {
        validate_label_key(name)?;
    }

    for (key, value) in descriptor.const_labels() {
        validate_label_key(key)?;
        validate_label_value(value)?;
    }

    Ok(())
}

/// Format labels as a string for logging/debugging
///
/// The format is `key1=value1,key2=value2`, sorted by key.
pub fn format_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return "{}".to_string();
    }

    let mut pairs: Vec<(&String, &String)> = labels.iter().collect();
    pairs.sort_by_key(|(k, _)| *k);

    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Render snapshots in the Prometheus text exposition format
///
/// Snapshots sharing a name are grouped under a single `HELP`/`TYPE` header.
/// Labels are sorted by key so output is stable between pulls.
///
/// # Examples
/// ```rust
/// use tyl_munin_exporter::{render_exposition, Labels, MetricKind, MetricSnapshot};
///
/// let snapshot = MetricSnapshot::new("load_load".into(), MetricKind::Gauge, 0.5, Labels::new())
///     .with_help("Load average: load");
/// let text = render_exposition(&[snapshot]);
/// assert!(text.contains("# TYPE load_load gauge"));
/// assert!(text.contains("load_load 0.5"));
/// ```
pub fn render_exposition(snapshots: &[MetricSnapshot]) -> String {
    let mut out = String::new();
    let mut previous: Option<&str> = None;

    for snapshot in snapshots {
        if previous != Some(snapshot.name.as_str()) {
            if let Some(help) = &snapshot.help {
                let _ = writeln!(out, "# HELP {} {}", snapshot.name, escape_help(help));
            }
            let _ = writeln!(out, "# TYPE {} {}", snapshot.name, snapshot.kind);
            previous = Some(snapshot.name.as_str());
        }

        out.push_str(&snapshot.name);
        if !snapshot.labels.is_empty() {
            let mut pairs: Vec<(&String, &String)> = snapshot.labels.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let rendered = pairs
                .into_iter()
                .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
                .collect::<Vec<_>>()
                .join(",");
            let _ = write!(out, "{{{rendered}}}");
        }
        let _ = writeln!(out, " {}", format_value(snapshot.value));
    }

    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

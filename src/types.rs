//! Core domain types for the metric model
//!
//! This module defines the value objects shared by the catalog builder, the
//! scrape loop and the metrics sink: metric kinds, descriptors, the per-field
//! holder that stores the latest reported sample, and exported snapshots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Type alias for metric labels - a map of string key-value pairs
pub type Labels = HashMap<String, String>;

/// Label names attached to every metric derived from a munin plugin field
pub const FIELD_LABEL_NAMES: [&str; 3] = ["hostname", "graphname", "muninlabel"];

/// Kind of an exported metric
///
/// Munin declares `GAUGE`, `COUNTER`, `DERIVE` and `ABSOLUTE` field types. Only
/// the monotonic ones map to counters; everything else is exported as a gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Latest observed sample
    Gauge,

    /// Raw monotonic value, passed through without rate computation
    Counter,
}

impl MetricKind {
    /// Classify a munin field from its declared `type` attribute
    ///
    /// `counter` and `derive` (any case) are counters; any other value, or no
    /// declared type at all, is a gauge.
    ///
    /// # Examples
    /// ```rust
    /// use tyl_munin_exporter::MetricKind;
    ///
    /// assert_eq!(MetricKind::classify(Some("DERIVE")), MetricKind::Counter);
    /// assert_eq!(MetricKind::classify(None), MetricKind::Gauge);
    /// ```
    pub fn classify(declared_type: Option<&str>) -> Self {
        match declared_type.map(str::to_lowercase).as_deref() {
            Some("counter") | Some("derive") => MetricKind::Counter,
            _ => MetricKind::Gauge,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

/// Static description of an exported metric
///
/// Built once during catalog construction and handed to the sink on
/// registration. The label schema is fixed: `label_names` are filled per
/// sample, `const_labels` are attached to every sample unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    name: String,
    help: String,
    kind: MetricKind,
    label_names: Vec<String>,
    const_labels: Labels,
}

impl MetricDescriptor {
    /// Create a new descriptor with no labels
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            label_names: Vec::new(),
            const_labels: Labels::new(),
        }
    }

    /// Set the variable label names
    pub fn with_label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Add a constant label
    pub fn with_const_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.const_labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn const_labels(&self) -> &Labels {
        &self.const_labels
    }
}

/// Latest value reported for a holder together with its label values
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub value: f64,
    pub label_values: Vec<String>,
}

/// Holder for the current value of one exported metric
///
/// One holder exists per canonical name. The scrape loop writes through
/// [`MetricHolder::set`] while the sink reads through
/// [`MetricHolder::snapshot`]; each holder carries its own lock so unrelated
/// metrics never contend.
///
/// Gauges and counters share this type. For a counter the stored pair is the
/// raw reported value plus the label values used when it was reported, so the
/// exported sample is synthesized at pull time rather than accumulated.
#[derive(Debug)]
pub struct MetricHolder {
    descriptor: MetricDescriptor,
    current: RwLock<Option<Sample>>,
}

impl MetricHolder {
    /// Create an empty holder for `descriptor`
    pub fn new(descriptor: MetricDescriptor) -> Self {
        Self {
            descriptor,
            current: RwLock::new(None),
        }
    }

    pub fn descriptor(&self) -> &MetricDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn kind(&self) -> MetricKind {
        self.descriptor.kind()
    }

    /// Replace the stored value and label values
    ///
    /// Label values are matched positionally against the descriptor's label
    /// names.
    pub async fn set<I, S>(&self, value: f64, label_values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sample = Sample {
            value,
            label_values: label_values.into_iter().map(Into::into).collect(),
        };
        *self.current.write().await = Some(sample);
    }

    /// Current sample, if any value has been reported yet
    pub async fn current(&self) -> Option<Sample> {
        self.current.read().await.clone()
    }

    /// Produce the exported point-in-time sample for this holder
    ///
    /// Returns `None` until a value has been reported.
    pub async fn snapshot(&self) -> Option<MetricSnapshot> {
        let sample = self.current().await?;

        let mut labels = self.descriptor.const_labels().clone();
        for (name, value) in self
            .descriptor
            .label_names()
            .iter()
            .zip(sample.label_values)
        {
            labels.insert(name.clone(), value);
        }

        Some(
            MetricSnapshot::new(
                self.descriptor.name().to_string(),
                self.descriptor.kind(),
                sample.value,
                labels,
            )
            .with_help(self.descriptor.help()),
        )
    }
}

/// Snapshot of a metric at a point in time
///
/// This is what a sink hands out on every pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// The metric name
    pub name: String,

    /// The metric kind
    pub kind: MetricKind,

    /// The current value
    pub value: f64,

    /// Variable and constant labels merged
    pub labels: Labels,

    /// Optional help text
    pub help: Option<String>,

    /// Timestamp of this snapshot (Unix epoch nanoseconds)
    pub timestamp: u64,
}

impl MetricSnapshot {
    /// Create a new metric snapshot
    pub fn new(name: String, kind: MetricKind, value: f64, labels: Labels) -> Self {
        Self {
            name,
            kind,
            value,
            labels,
            help: None,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64,
        }
    }

    /// Add help text to the snapshot
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

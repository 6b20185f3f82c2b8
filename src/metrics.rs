//! Metric descriptors, registry, and Prometheus text exposition.
//!
//! The registry is an explicit object constructed once at startup. Each
//! collector owns a fixed descriptor set; only data values and repeated-group
//! label sets vary between collection cycles.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

/// Prometheus metric type, fixed per descriptor at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Gauge,
    Counter,
    Histogram,
}

impl MetricType {
    /// The TYPE comment string for the exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Histogram => "histogram",
        }
    }
}

/// An immutable metric descriptor.
#[derive(Debug)]
pub struct Desc {
    name: String,
    help: String,
    metric_type: MetricType,
    variable_labels: Vec<String>,
    const_labels: Vec<(String, String)>,
}

impl Desc {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        metric_type: MetricType,
        variable_labels: &[&str],
        const_labels: &[(&str, &str)],
    ) -> Self {
        let mut const_labels: Vec<(String, String)> = const_labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        const_labels.sort();

        Self {
            name: name.into(),
            help: help.into(),
            metric_type,
            variable_labels: variable_labels.iter().map(|l| l.to_string()).collect(),
            const_labels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity used for duplicate detection: name plus const label set.
    fn id(&self) -> String {
        let mut id = self.name.clone();
        for (key, value) in &self.const_labels {
            id.push('|');
            id.push_str(key);
            id.push('=');
            id.push_str(value);
        }
        id
    }
}

/// The value carried by one metric point.
#[derive(Debug, Clone)]
pub enum Value {
    Single(f64),
    Histogram {
        /// Per-bucket (upper bound, count) pairs, not cumulative.
        buckets: Vec<(f64, u64)>,
        sum: f64,
        count: u64,
    },
}

/// One point of the snapshot: a descriptor, its variable label values, and
/// the observed value.
#[derive(Debug, Clone)]
pub struct MetricPoint {
    desc: Arc<Desc>,
    label_values: Vec<String>,
    value: Value,
}

impl MetricPoint {
    pub fn new(desc: &Arc<Desc>, label_values: Vec<String>, value: f64) -> Self {
        debug_assert_eq!(desc.variable_labels.len(), label_values.len());
        Self {
            desc: Arc::clone(desc),
            label_values,
            value: Value::Single(value),
        }
    }

    pub fn histogram(
        desc: &Arc<Desc>,
        label_values: Vec<String>,
        buckets: Vec<(f64, u64)>,
        sum: f64,
        count: u64,
    ) -> Self {
        debug_assert_eq!(desc.variable_labels.len(), label_values.len());
        Self {
            desc: Arc::clone(desc),
            label_values,
            value: Value::Histogram {
                buckets,
                sum,
                count,
            },
        }
    }

    /// Const labels plus variable labels, sorted by label name.
    fn labels(&self) -> Vec<(String, String)> {
        let mut labels = self.desc.const_labels.clone();
        labels.extend(
            self.desc
                .variable_labels
                .iter()
                .cloned()
                .zip(self.label_values.iter().cloned()),
        );
        labels.sort_by(|a, b| a.0.cmp(&b.0));
        labels
    }
}

/// A source of metric points with a fixed descriptor shape.
#[async_trait]
pub trait Collector: Send + Sync {
    /// The fixed descriptor set this collector emits points for. Must return
    /// the same set on every call.
    fn describe(&self) -> Vec<Arc<Desc>>;

    /// Produce the current snapshot of metric points.
    async fn collect(&self) -> Vec<MetricPoint>;
}

/// Registration errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("descriptor {0} is already registered")]
    Duplicate(String),
}

/// Process-wide collector registry.
#[derive(Default)]
pub struct Registry {
    collectors: Vec<Arc<dyn Collector>>,
    registered: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector.
    ///
    /// Rejects the whole collector if any of its descriptors collides with
    /// an already registered identity (name plus const labels), so two
    /// targets with the same gateway identifier cannot coexist.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<(), RegistryError> {
        let descs = collector.describe();

        for desc in &descs {
            if self.registered.contains(&desc.id()) {
                return Err(RegistryError::Duplicate(desc.name.clone()));
            }
        }
        for desc in &descs {
            self.registered.insert(desc.id());
        }

        self.collectors.push(collector);
        Ok(())
    }

    /// Collect from every registered collector concurrently and render the
    /// combined snapshot in the Prometheus text exposition format.
    pub async fn gather(&self) -> String {
        let handles: Vec<_> = self
            .collectors
            .iter()
            .map(|collector| {
                let collector = Arc::clone(collector);
                tokio::spawn(async move { collector.collect().await })
            })
            .collect();

        let mut points = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(mut collected) => points.append(&mut collected),
                Err(err) => error!(error = %err, "collector task failed"),
            }
        }

        encode(&points)
    }
}

/// Render metric points in the Prometheus text exposition format.
///
/// Output is grouped by metric name, names are sorted, and series within a
/// name are sorted by label values, so repeated scrapes of unchanged data
/// are byte-identical.
fn encode(points: &[MetricPoint]) -> String {
    let mut by_name: HashMap<&str, Vec<&MetricPoint>> = HashMap::new();
    for point in points {
        by_name.entry(point.desc.name()).or_default().push(point);
    }

    let mut names: Vec<_> = by_name.keys().copied().collect();
    names.sort();

    let mut output = Vec::with_capacity(points.len() * 100);

    for name in names {
        let mut series = by_name[name].clone();
        series.sort_by(|a, b| a.label_values.cmp(&b.label_values));

        let desc = &series[0].desc;
        writeln!(output, "# HELP {} {}", name, desc.help).ok();
        writeln!(output, "# TYPE {} {}", name, desc.metric_type.as_str()).ok();

        for point in series {
            match &point.value {
                Value::Single(value) => {
                    writeln!(
                        output,
                        "{}{} {}",
                        name,
                        format_labels(&point.labels()),
                        format_value(*value)
                    )
                    .ok();
                }
                Value::Histogram {
                    buckets,
                    sum,
                    count,
                } => {
                    let base_labels = point.labels();
                    let mut cumulative = 0;
                    for (upper, bucket_count) in buckets {
                        cumulative += bucket_count;
                        let mut labels = base_labels.clone();
                        labels.push(("le".to_string(), format_value(*upper)));
                        writeln!(
                            output,
                            "{}_bucket{} {}",
                            name,
                            format_labels(&labels),
                            cumulative
                        )
                        .ok();
                    }
                    let mut labels = base_labels.clone();
                    labels.push(("le".to_string(), "+Inf".to_string()));
                    writeln!(output, "{}_bucket{} {}", name, format_labels(&labels), count).ok();
                    writeln!(
                        output,
                        "{}_sum{} {}",
                        name,
                        format_labels(&base_labels),
                        format_value(*sum)
                    )
                    .ok();
                    writeln!(
                        output,
                        "{}_count{} {}",
                        name,
                        format_labels(&base_labels),
                        count
                    )
                    .ok();
                }
            }
        }
    }

    String::from_utf8(output).unwrap_or_default()
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for the exposition format.
fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }

    let parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();

    format!("{{{}}}", parts.join(","))
}

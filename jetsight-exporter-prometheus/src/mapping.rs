//! Mapping from a telemetry [`Snapshot`] to Prometheus metric families.

use jetsight_common::Snapshot;

/// Bytes per reported gigabyte.
const BYTES_PER_GB: f64 = 1e9;

/// Prometheus metric kind of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Info,
    Gauge,
    Counter,
}

impl MetricKind {
    /// Get the TYPE comment string for Prometheus exposition format.
    pub fn as_str(&self) -> &'static str {
        match self {
            // Text format 0.0.4 has no info type; info families are gauges.
            MetricKind::Info => "gauge",
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// One labeled value of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label pairs in output order.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// A named group of samples sharing help text and kind.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    fn new(name: String, help: &str, kind: MetricKind) -> Self {
        Self {
            name,
            help: help.to_string(),
            kind,
            samples: Vec::new(),
        }
    }

    /// Info family with one sample whose labels carry the information.
    pub fn info(name: String, help: &str, labels: Vec<(String, String)>) -> Self {
        let mut family = Self::new(name, help, MetricKind::Info);
        family.samples.push(Sample { labels, value: 1.0 });
        family
    }

    /// Gauge family whose samples are discriminated by a single label.
    pub fn gauge(name: String, help: &str, label: &str, values: &[(&str, f64)]) -> Self {
        Self::labeled(name, help, MetricKind::Gauge, label, values)
    }

    /// Counter family whose samples are discriminated by a single label.
    pub fn counter(name: String, help: &str, label: &str, values: &[(&str, f64)]) -> Self {
        Self::labeled(name, help, MetricKind::Counter, label, values)
    }

    fn labeled(
        name: String,
        help: &str,
        kind: MetricKind,
        label: &str,
        values: &[(&str, f64)],
    ) -> Self {
        let mut family = Self::new(name, help, kind);
        family.samples = values
            .iter()
            .map(|(label_value, value)| Sample {
                labels: vec![(label.to_string(), label_value.to_string())],
                value: *value,
            })
            .collect();
        family
    }

    /// Value of the sample whose labels contain `key="value"`.
    pub fn sample_value(&self, key: &str, value: &str) -> Option<f64> {
        self.samples
            .iter()
            .find(|s| s.labels.iter().any(|(k, v)| k == key && v == value))
            .map(|s| s.value)
    }
}

/// Translate one snapshot into the fixed, ordered list of families.
///
/// Absent fields map to 0 (or an empty string for the power mode).
pub fn map_snapshot(snapshot: &Snapshot, prefix: &str) -> Vec<MetricFamily> {
    let name = |suffix: &str| build_metric_name(prefix, suffix);

    let board = MetricFamily::info(
        name("info_board"),
        "Board sys info",
        vec![
            label("board_info", "info"),
            label("username", &snapshot.username),
            label("hostname", &snapshot.hostname),
        ],
    );

    let power_mode = MetricFamily::info(
        name("nvpmode"),
        "NV power mode",
        vec![
            label("nvpmode", "mode"),
            label("mode", snapshot.power_mode.as_deref().unwrap_or("")),
        ],
    );

    let uptime = snapshot.uptime.unwrap_or_default();
    let uptime = MetricFamily::gauge(
        name("uptime"),
        "System uptime",
        "uptime",
        &[
            ("days", uptime.days as f64),
            ("hours", uptime.hours() as f64),
            ("minutes", uptime.minutes() as f64),
        ],
    );

    let disk = snapshot.disk.unwrap_or_default();
    let disk = MetricFamily::gauge(
        name("usage_disk"),
        "Disk space usage",
        "disk",
        &[
            ("free", disk.free as f64 / BYTES_PER_GB),
            ("total", disk.total as f64 / BYTES_PER_GB),
            ("used", disk.used as f64 / BYTES_PER_GB),
            ("percent", disk.percent),
        ],
    );

    let fan = MetricFamily::gauge(
        name("usage_fan"),
        "Fan usage",
        "fan",
        &[("speed", snapshot.fan_speed.unwrap_or(0.0))],
    );

    let temperatures = MetricFamily::gauge(
        name("temperatures"),
        "Sensor temperatures",
        "temperature",
        &[
            ("gpu", snapshot.temperature("GPU").unwrap_or(0.0)),
            ("thermal", snapshot.temperature("thermal").unwrap_or(0.0)),
        ],
    );

    let power = MetricFamily::gauge(
        name("usage_power"),
        "Power usage",
        "power",
        &[("soc", snapshot.rail_current("SOC").unwrap_or(0.0))],
    );

    vec![board, power_mode, uptime, disk, fan, temperatures, power]
}

fn label(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Build a full Prometheus metric name from a prefix and a suffix.
pub fn build_metric_name(prefix: &str, suffix: &str) -> String {
    if prefix.is_empty() {
        suffix.to_string()
    } else {
        format!("{}_{}", prefix, suffix)
    }
}

/// Sanitize a metric name to be Prometheus-compatible.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
/// This function:
/// - Replaces invalid characters with underscores
/// - Ensures the name starts with a letter or underscore
/// - Collapses multiple underscores into one
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;
    let mut chars = name.chars().peekable();

    // A leading digit gets an underscore in front
    if let Some(&first) = chars.peek()
        && first.is_ascii_digit()
    {
        result.push('_');
        last_was_underscore = true;
    }

    for c in chars {
        let is_valid_char = c.is_ascii_alphanumeric() || c == '_' || c == ':';

        if is_valid_char {
            if c == '_' {
                if !last_was_underscore {
                    result.push(c);
                    last_was_underscore = true;
                }
            } else {
                result.push(c);
                last_was_underscore = false;
            }
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push_str("unnamed");
    }

    result
}

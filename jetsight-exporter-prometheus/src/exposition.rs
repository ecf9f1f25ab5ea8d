//! Prometheus text exposition format (version 0.0.4).

use std::fmt::Write;

use crate::mapping::{MetricFamily, MetricKind};

/// Content type served with [`encode`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Render families in order. No families renders as an empty document.
pub fn encode(families: &[MetricFamily]) -> String {
    let mut output = String::with_capacity(families.len() * 160);

    for family in families {
        let exposed = exposed_name(family);
        writeln!(output, "# HELP {} {}", exposed, escape_help(&family.help)).ok();
        writeln!(output, "# TYPE {} {}", exposed, family.kind.as_str()).ok();

        let sample_name = match family.kind {
            MetricKind::Counter => format!("{}_total", family.name),
            _ => exposed,
        };

        for sample in &family.samples {
            writeln!(
                output,
                "{}{} {}",
                sample_name,
                format_labels(&sample.labels),
                format_value(sample.value)
            )
            .ok();
        }
    }

    output
}

/// Name used in HELP/TYPE lines.
fn exposed_name(family: &MetricFamily) -> String {
    match family.kind {
        MetricKind::Info => format!("{}_info", family.name),
        _ => family.name.clone(),
    }
}

/// Format labels for Prometheus exposition format.
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

/// HELP text escapes only backslash and newline.
fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
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

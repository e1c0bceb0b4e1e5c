//! Prometheus text exposition of a [`RegistrySnapshot`].

use std::{
    fmt::{self, Write},
    sync::Arc,
};

use super::registry::{MetricKind, MetricRegistry, MetricSnapshot, RegistrySnapshot, SeriesValue};
use crate::error::MetricsError;

/// `Content-Type` of the rendered document.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Clone)]
pub struct MetricsExporter {
    registry: Arc<MetricRegistry>,
}

impl MetricsExporter {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self { registry }
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    pub fn render(&self) -> Result<String, MetricsError> {
        render_snapshot(&self.registry.snapshot())
    }
}

/// Render metrics in registration order, series in first-seen order.
pub fn render_snapshot(snapshot: &RegistrySnapshot) -> Result<String, MetricsError> {
    let mut out = String::new();
    for metric in &snapshot.metrics {
        write_metric(&mut out, metric).map_err(|e| MetricsError::ExportFailure(format!("{}: {e}", metric.name)))?;
    }
    Ok(out)
}

fn write_metric(out: &mut String, metric: &MetricSnapshot) -> fmt::Result {
    writeln!(out, "# HELP {} {}", metric.name, escape_help(&metric.help))?;
    writeln!(out, "# TYPE {} {}", metric.name, metric.kind.as_str())?;
    for series in &metric.series {
        let pairs: Vec<(&str, &str)> = metric
            .label_names
            .iter()
            .map(String::as_str)
            .zip(series.label_values.iter().map(String::as_str))
            .collect();
        match (&series.value, metric.kind) {
            (SeriesValue::Counter(v), MetricKind::Counter) => {
                writeln!(out, "{}{} {}", metric.name, label_block(&pairs, None), format_value(*v))?;
            }
            (SeriesValue::Histogram(h), MetricKind::Histogram) => {
                for (bound, hits) in &h.buckets {
                    let le = format_value(*bound);
                    writeln!(out, "{}_bucket{} {}", metric.name, label_block(&pairs, Some(le.as_str())), hits)?;
                }
                writeln!(out, "{}_bucket{} {}", metric.name, label_block(&pairs, Some("+Inf")), h.count)?;
                writeln!(out, "{}_sum{} {}", metric.name, label_block(&pairs, None), format_value(h.sum))?;
                writeln!(out, "{}_count{} {}", metric.name, label_block(&pairs, None), h.count)?;
            }
            // a series always carries the value shape of its metric kind
            _ => return Err(fmt::Error),
        }
    }
    Ok(())
}

fn label_block(pairs: &[(&str, &str)], le: Option<&str>) -> String {
    let mut parts: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}=\"{}\"", escape_label(v))).collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{le}\""));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}

fn format_value(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 { "+Inf".to_string() } else { "-Inf".to_string() }
    } else {
        v.to_string()
    }
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

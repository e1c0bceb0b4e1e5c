//! Request metrics: registry, exporter and the HTTP metric family.

pub mod exporter;
pub mod registry;

pub use exporter::{CONTENT_TYPE, MetricsExporter};
pub use registry::{DEFAULT_BUCKETS, Metric, MetricKind, MetricRegistry, Observation, RegistrySnapshot, SeriesValue};

use crate::error::MetricsError;

pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
/// Label names shared by both HTTP metrics.
pub const HTTP_LABELS: &[&str] = &["method", "route", "status"];

/// Register the metrics written by [`RequestTimingLayer`](crate::layers::timing::RequestTimingLayer).
///
/// Must run before the server accepts traffic; errors here are fatal.
pub fn register_http_metrics(registry: &MetricRegistry, buckets: &[f64]) -> Result<(), MetricsError> {
    registry.register(Metric::histogram(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request latency in seconds.",
        HTTP_LABELS,
        buckets,
    ))?;
    registry.register(Metric::counter(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests.", HTTP_LABELS))?;
    Ok(())
}

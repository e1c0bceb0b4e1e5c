use std::fmt::Display;

use anyhow::anyhow;
use axum::response::{IntoResponse, Response};
use hyper::StatusCode;

/// Errors raised by [`MetricRegistry`](crate::metrics::MetricRegistry) and the exporter.
///
/// Registration errors are programmer errors and abort startup. Observation
/// errors are swallowed by the timing middleware.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MetricsError {
    #[error("metric `{0}` is already registered")]
    DuplicateMetricName(String),
    #[error("metric `{0}` is not registered")]
    UnknownMetric(String),
    #[error("metric `{name}` expects {expected} label values, got {actual}")]
    LabelCardinalityMismatch { name: String, expected: usize, actual: usize },
    #[error("invalid metric or label name `{0}`")]
    InvalidName(String),
    #[error("invalid buckets for `{name}`: {reason}")]
    InvalidBuckets { name: String, reason: &'static str },
    #[error("invalid value {value} for `{name}`")]
    InvalidValue { name: String, value: f64 },
    #[error("failed to render metrics: {0}")]
    ExportFailure(String),
}

/// Handler-level error that wraps `anyhow::Error` and renders as a 500.
#[derive(Debug)]
pub struct AppError(anyhow::Error);

impl Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        // TraceLayer's span already carries method and path
        tracing::error!(%err, "error");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("ERROR: {}", &err)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl AppError {
    pub fn new<T: std::error::Error + Send + Sync + 'static>(err: T) -> Self {
        Self(anyhow!(err))
    }
}

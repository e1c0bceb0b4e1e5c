//! Route table and request handlers.
//!
//! # 路由列表
//! - `GET /api/health`: 存活检查
//! - `GET /api/hello`: 前端展示的问候语
//! - `GET /metrics`: 请求指标 (metrics 开启时)
//! - `GET *`: 静态文件，未匹配时返回 fallback 文档 (静态服务开启时)

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{ConnectInfo, MatchedPath, State},
    http::{self, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    assets::StaticAssetRouter,
    error::AppError,
    layers::timing::RequestTimingLayer,
    metrics::{MetricRegistry, MetricsExporter},
};

pub const HEALTH_BODY: &str = "Backend is healthy!";
pub const HELLO_MESSAGE: &str = "Hello from the backend!";

/// 跨请求共享的状态
#[derive(Clone)]
pub struct AppState {
    pub exporter: Option<MetricsExporter>,
    pub assets: Option<Arc<StaticAssetRouter>>,
}

/// Which optional parts of the route table are mounted.
#[derive(Clone)]
pub struct RouterOptions {
    pub registry: Option<Arc<MetricRegistry>>,
    pub assets: Option<StaticAssetRouter>,
    pub request_timeout: Duration,
    pub cors: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            registry: None,
            assets: None,
            request_timeout: Duration::from_secs(30),
            cors: true,
        }
    }
}

#[derive(Serialize)]
pub struct HelloResponse {
    pub message: &'static str,
}

/// Build the route table.
///
/// The API and metrics routes always take precedence over the static
/// catch-all, which is only consulted for paths no route matched. The timing
/// layer is the outermost layer so timeouts and 404s are measured too.
pub fn build_router(options: RouterOptions) -> Router {
    let state = AppState {
        exporter: options.registry.clone().map(MetricsExporter::new),
        assets: options.assets.map(Arc::new),
    };

    let mut router = Router::new().route("/api/health", get(health_handler)).route("/api/hello", get(hello_handler));
    if state.exporter.is_some() {
        router = router.route("/metrics", get(metrics_handler));
    }
    if state.assets.is_some() {
        router = router.fallback(static_handler);
    }

    let mut router = router
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, options.request_timeout))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_span)
                // AppError logs its own failures
                .on_failure(()),
        );
    if options.cors {
        router = router.layer(CorsLayer::permissive());
    }
    if let Some(registry) = options.registry {
        router = router.layer(RequestTimingLayer::new(registry));
    }
    router.with_state(state)
}

fn make_span(req: &http::Request<axum::body::Body>) -> tracing::Span {
    let method = req.method();
    let path = req.uri().path();
    let matched_path = req.extensions().get::<MatchedPath>().map(|matched_path| matched_path.as_str());
    // only present when served through `Server`
    let client = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ConnectInfo(addr)| addr.ip().to_canonical());

    tracing::debug_span!("recv request", %method, %path, matched_path, client = ?client)
}

pub async fn health_handler() -> &'static str {
    HEALTH_BODY
}

pub async fn hello_handler() -> Json<HelloResponse> {
    Json(HelloResponse { message: HELLO_MESSAGE })
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<Response, AppError> {
    let Some(exporter) = state.exporter else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let body = exporter.render().inspect_err(|e| log::error!("Failed to encode metrics: {e}"))?;
    Ok(([(header::CONTENT_TYPE, HeaderValue::from_static(exporter.content_type()))], body).into_response())
}

/// Catch-all for the single-page frontend.
pub async fn static_handler(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let Some(assets) = state.assets else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if method != Method::GET && method != Method::HEAD {
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET, HEAD")]).into_response();
    }
    match assets.resolve(uri.path()).await {
        Ok(asset) => {
            let body = if method == Method::HEAD { Vec::new() } else { asset.body };
            ([(header::CONTENT_TYPE, HeaderValue::from_static(asset.content_type))], body).into_response()
        }
        Err(e) => {
            log::warn!("static fallback failed: {e}");
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    }
}

use std::{fs, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use spa_backend::{
    assets::StaticAssetRouter,
    handler::{RouterOptions, build_router},
    metrics::{DEFAULT_BUCKETS, MetricRegistry, register_http_metrics},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower::ServiceExt;

const INDEX: &str = "<!doctype html><title>spa</title><div id=\"root\"></div>";

struct Site {
    _dir: tempfile::TempDir,
    registry: Arc<MetricRegistry>,
    router: Router,
}

fn full_site() -> Site {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("api")).unwrap();
    fs::write(dir.path().join("index.html"), INDEX).unwrap();
    fs::write(dir.path().join("favicon.svg"), "<svg/>").unwrap();
    fs::write(dir.path().join("release notes.txt"), "v1").unwrap();
    // must never shadow the real endpoint
    fs::write(dir.path().join("api/health"), "static health").unwrap();

    let registry = Arc::new(MetricRegistry::new());
    register_http_metrics(&registry, DEFAULT_BUCKETS).unwrap();
    let router = build_router(RouterOptions {
        registry: Some(registry.clone()),
        assets: Some(StaticAssetRouter::new(dir.path(), "index.html").unwrap()),
        ..Default::default()
    });
    Site { _dir: dir, registry, router }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, String, Vec<u8>) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let res = router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let content_type = res
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, content_type, body.to_vec())
}

#[tokio::test]
async fn hello_returns_exact_json() {
    let router = build_router(RouterOptions::default());
    let (status, content_type, body) = get(&router, "/api/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "application/json");
    assert_eq!(body, br#"{"message":"Hello from the backend!"}"#);

    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["message"], "Hello from the backend!");
}

#[tokio::test]
async fn unknown_page_serves_fallback_document() {
    let site = full_site();
    let (status, content_type, body) = get(&site.router, "/nonexistent-page").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/html"));
    assert_eq!(body, INDEX.as_bytes());

    let (status, content_type, body) = get(&site.router, "/favicon.svg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "image/svg+xml");
    assert_eq!(body, b"<svg/>");
}

#[tokio::test]
async fn api_routes_win_over_catch_all() {
    let site = full_site();
    let (status, _, body) = get(&site.router, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Backend is healthy!");

    let (status, content_type, _) = get(&site.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/plain; version=0.0.4"));
}

#[tokio::test]
async fn traversal_is_answered_with_fallback() {
    let site = full_site();
    for uri in ["/../../etc/passwd", "/%2e%2e/%2e%2e/etc/passwd"] {
        let (status, _, body) = get(&site.router, uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, INDEX.as_bytes(), "{uri}");
    }
}

#[tokio::test]
async fn encoded_file_names_are_served() {
    let site = full_site();
    let (status, content_type, body) = get(&site.router, "/release%20notes.txt").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "text/plain; charset=utf-8");
    assert_eq!(body, b"v1");
}

#[tokio::test]
async fn metrics_reflect_served_requests() {
    let site = full_site();
    get(&site.router, "/api/hello").await;
    get(&site.router, "/api/hello").await;
    get(&site.router, "/deep/client/route").await;

    let (_, _, body) = get(&site.router, "/metrics").await;
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("http_requests_total{method=\"GET\",route=\"/api/hello\",status=\"200\"} 2\n"));
    assert!(text.contains("http_request_duration_seconds_count{method=\"GET\",route=\"/api/hello\",status=\"200\"} 2\n"));
    assert!(text.contains(
        "http_request_duration_seconds_bucket{method=\"GET\",route=\"/api/hello\",status=\"200\",le=\"+Inf\"} 2\n"
    ));
    assert!(text.contains("http_requests_total{method=\"GET\",route=\"unknown_route\",status=\"200\"} 1\n"));

    // histogram is declared before the counter
    let histogram_at = text.find("# TYPE http_request_duration_seconds histogram").unwrap();
    let counter_at = text.find("# TYPE http_requests_total counter").unwrap();
    assert!(histogram_at < counter_at);
    assert!(site.registry.contains("http_requests_total"));
}

#[tokio::test]
async fn without_static_serving_unknown_paths_are_404() {
    let router = build_router(RouterOptions::default());
    let (status, _, _) = get(&router, "/nonexistent-page").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn server_answers_over_tcp_and_shuts_down() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (server, shutdown_tx) = spa_backend::new_server(addr.port(), build_router(RouterOptions::default()));
    let handle = tokio::spawn(server.with_timeout(Duration::from_secs(5)).serve(listener));

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /api/health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let raw = String::from_utf8(raw).unwrap();
    assert!(raw.starts_with("HTTP/1.1 200 OK"), "{raw}");
    assert!(raw.ends_with("Backend is healthy!"), "{raw}");

    shutdown_tx.send(()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(15), handle).await.unwrap().unwrap().unwrap();
}

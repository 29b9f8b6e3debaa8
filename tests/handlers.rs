//! Handler-level tests using tower::ServiceExt::oneshot.
//!
//! Exercises the full Axum router (admin endpoints + proxy pipeline entry)
//! without binding a TCP listener. Faster and more deterministic than the
//! E2E tests.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use ilinden::config::Config;
use ilinden::server::build_router;
use tower::ServiceExt;

/// Config for router tests: HMAC validation on, origin pointed at a dead
/// address (these tests never reach it).
fn test_config() -> Config {
    let mut config = Config::default();
    config.server.public_url = "http://proxy.test".to_string();
    config.origin.base_url = "http://127.0.0.1:1".to_string();
    config.jwt.secret = Some("handler-test-secret".to_string());
    config.validate().expect("test config must be valid");
    config
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ── Health ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_returns_success_envelope() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "OK");
}

// ── Status ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_reports_version_and_uptime() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/status")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["uptime_seconds"].is_number());
    assert!(json["active_players"].is_number());
}

// ── Metrics ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn metrics_endpoint_dumps_registry() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert!(json["counters"].is_object());
    assert!(json["gauges"].is_object());
    assert!(json["histograms"].is_object());
}

#[tokio::test]
async fn metrics_respects_configured_path() {
    let mut config = test_config();
    config.metrics.path = "/internal/metrics".to_string();
    let app = build_router(config).await;

    let req = Request::builder()
        .uri("/internal/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

// ── Config dump ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn config_endpoint_redacts_the_secret() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/config")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["jwt"]["secret"], "<redacted>");
    assert_eq!(json["server"]["port"], 8080);
}

// ── Cache admin ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cache_stats_reports_counters() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/cache/stats")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["size"], 0);
    assert_eq!(json["hits"], 0);
    assert_eq!(json["misses"], 0);
}

#[tokio::test]
async fn cache_clear_requires_post() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/cache/clear")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);

    let req = Request::builder()
        .method("POST")
        .uri("/cache/clear")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
}

// ── Players ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn players_starts_empty() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/players")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json, serde_json::json!([]));
}

// ── Credential failures on the proxy route ──────────────────────────────────

#[tokio::test]
async fn proxy_without_token_is_unauthorized() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/live/master.m3u8")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(resp).await;
    assert_eq!(json["code"], "token_error");
    assert_eq!(json["status"], 401);
}

#[tokio::test]
async fn proxy_with_two_part_token_is_unauthorized() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/live/master.m3u8?token=abc.def")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(resp).await;
    assert_eq!(json["code"], "token_error");
}

#[tokio::test]
async fn proxy_with_garbage_bearer_header_is_unauthorized() {
    let app = build_router(test_config()).await;

    let req = Request::builder()
        .uri("/live/master.m3u8")
        .header("Authorization", "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ── Target resolution ───────────────────────────────────────────────────────

#[tokio::test]
async fn missing_origin_and_url_param_is_bad_request() {
    let mut config = test_config();
    config.origin.base_url = String::new();
    config.jwt.enabled = false;
    let app = build_router(config).await;

    let req = Request::builder()
        .uri("/live/master.m3u8?token=a.b.c")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let json = body_json(resp).await;
    assert_eq!(json["code"], "proxy_error");
}

#[tokio::test]
async fn malformed_url_param_is_bad_request() {
    let mut config = test_config();
    config.jwt.enabled = false;
    let app = build_router(config).await;

    let req = Request::builder()
        .uri("/?url=%3A%2F%2Fnot-a-url&token=a.b.c")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

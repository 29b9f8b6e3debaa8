//! HTTP server: router assembly, serving, graceful shutdown.

pub mod handlers;
pub mod state;

use std::any::Any;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ErrorBody;
use state::AppState;

/// Build the full router. Admin routes are registered first so the
/// catch-all proxy route cannot shadow them.
pub async fn build_router(config: Config) -> Router {
    let state = AppState::new(config).await;
    routes(state)
}

pub fn routes(state: AppState) -> Router {
    let metrics_path = state.config.metrics.path.clone();

    let mut router = Router::new()
        .route("/health", get(handlers::admin::health))
        .route("/status", get(handlers::admin::status))
        .route("/config", get(handlers::admin::config))
        .route("/cache/stats", get(handlers::admin::cache_stats))
        .route("/cache/clear", post(handlers::admin::cache_clear))
        .route("/players", get(handlers::admin::players));

    if state.config.metrics.enabled {
        router = router.route(&metrics_path, get(handlers::admin::metrics));
    }

    // One deadline bounds the whole request, reading and writing included.
    let request_deadline = state.config.server.read_timeout + state.config.server.write_timeout;

    router
        .route("/", get(handlers::proxy::proxy))
        .route("/*path", get(handlers::proxy::proxy))
        .layer(CatchPanicLayer::custom(render_panic))
        .layer(TimeoutLayer::new(request_deadline))
        .with_state(state)
}

/// Bind and serve until SIGINT/SIGTERM, then drain in-flight requests
/// within the shutdown timeout.
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = config.server.shutdown_timeout;

    let state = AppState::new(config).await;
    let app = routes(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", addr, e);
            return Err(e.into());
        }
    };

    info!("ilinden listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    info!("server stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. Once signaled, a watchdog enforces the
/// shutdown timeout as a hard upper bound on draining.
async fn shutdown_signal(timeout: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }

    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        warn!("shutdown timeout exceeded, terminating");
        std::process::exit(0);
    });
}

/// Panic recovery: log and answer with the standard error shape.
fn render_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };

    error!("handler panicked: {detail}");

    let body = ErrorBody::new(
        "Internal server error",
        "internal_panic",
        StatusCode::INTERNAL_SERVER_ERROR,
    );
    let json = serde_json::to_string(&body)
        .unwrap_or_else(|_| r#"{"message":"Internal server error","code":"internal_panic","status":500}"#.to_string());

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/json")],
        json,
    )
        .into_response()
}

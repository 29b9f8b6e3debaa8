//! The proxy request pipeline.
//!
//! For one request: extract and validate the credential, resolve the target
//! URL, consult the cache, fetch from origin on a miss (single-flight per
//! cache key), rewrite playlist bodies, cache, respond. Non-playlist bytes
//! skip the rewrite entirely.

use std::collections::HashMap;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::Method;
use tracing::{debug, error};
use url::Url;

use crate::cache::{jittered_ttl, CachedBody, CachedValue};
use crate::error::{Error, Result};
use crate::hls::{self, RewriteOptions};
use crate::jwt::Claims;
use crate::server::state::AppState;

const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const RAW_CONTENT_TYPE: &str = "application/octet-stream";

/// Catch-all GET handler: the full player-facing pipeline.
pub async fn proxy(State(state): State<AppState>, req: Request<Body>) -> Response {
    let start = Instant::now();
    let path = req.uri().path().to_string();

    let response = match run_pipeline(&state, req).await {
        Ok(response) => response,
        Err(err) => {
            let status = err.status();
            error!(path = %path, status = status.as_u16(), "proxy error: {err}");
            state
                .metrics
                .inc_counter(&format!("error.{}", status.as_u16()));
            err.into_response()
        }
    };

    state.metrics.observe_request_duration(&path, start.elapsed());
    response
}

async fn run_pipeline(state: &AppState, req: Request<Body>) -> Result<Response> {
    let headers = req.headers().clone();
    let query = parse_query(req.uri().query());

    // 1. Credential.
    let token = state.extractor.extract(&headers, &query)?;
    let claims = if state.config.jwt.enabled {
        state.validator.validate(&token).await?
    } else {
        Claims::default()
    };

    // Fire-and-forget player tracking; never on the request path.
    if let Some(player_id) = claims.player_id(&state.config.jwt.claims_namespace) {
        let tracker = state.tracker.clone();
        let path = req.uri().path().to_string();
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        tokio::spawn(async move {
            tracker.track(&player_id, &path, &user_agent).await;
        });
    }

    // 2. Target URL.
    let target = resolve_target(state, &req, &query)?;

    // 3. Classification.
    let is_playlist = target.path().to_ascii_lowercase().ends_with(".m3u8");
    let kind = if is_playlist { "playlist" } else { "segment" };

    // 4. Cache key.
    let cache_key = format!("{kind}:{target}:{token}");
    let cache_enabled = state.config.cache.enabled;

    // 5. Cache lookup.
    if cache_enabled {
        if let Some(response) = serve_from_cache(state, &cache_key, is_playlist) {
            return Ok(response);
        }
        state.metrics.inc_counter("cache.miss");
    }

    // Single-flight: at most one origin fetch per key. Whoever was first
    // has filled the cache by the time the guard is acquired.
    let _fill_guard = if cache_enabled {
        let guard = state.flight.acquire(&cache_key).await;
        if let Some(response) = serve_from_cache(state, &cache_key, is_playlist) {
            return Ok(response);
        }
        Some(guard)
    } else {
        None
    };

    // 6. Origin fetch.
    let origin_started = Instant::now();
    let origin_response = state
        .origin
        .fetch(Method::GET, &target, outbound_headers(&headers))
        .await?;
    state.metrics.observe_origin_duration(
        target.host_str().unwrap_or_default(),
        origin_started.elapsed(),
    );

    let status = origin_response.status();
    if status.as_u16() >= 400 {
        // Pass the origin's answer through untouched.
        debug!(%target, status = status.as_u16(), "passing origin status through");
        return pass_through(origin_response).await;
    }

    let origin_headers = origin_response.headers().clone();
    let effective_url = origin_response.url().clone();
    let body = origin_response
        .bytes()
        .await
        .map_err(|e| Error::Internal(format!("reading origin body: {e}")))?;

    // 7. Rewrite playlists; raw bytes go straight through.
    if is_playlist {
        serve_playlist(
            state,
            &cache_key,
            cache_enabled,
            &effective_url,
            &token,
            body,
            &origin_headers,
        )
    } else {
        serve_raw(state, &cache_key, cache_enabled, body, &origin_headers)
    }
}

fn parse_query(raw: Option<&str>) -> HashMap<String, String> {
    let Some(raw) = raw else {
        return HashMap::new();
    };
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Target resolution: explicit `url` query parameter, else the configured
/// origin base joined with the request path and raw query.
fn resolve_target(
    state: &AppState,
    req: &Request<Body>,
    query: &HashMap<String, String>,
) -> Result<Url> {
    if let Some(explicit) = query.get("url") {
        return Url::parse(explicit).map_err(|_| Error::MalformedTarget(explicit.clone()));
    }

    let base = &state.config.origin.base_url;
    if base.is_empty() {
        return Err(Error::MissingTarget);
    }

    let mut target =
        Url::parse(base).map_err(|_| Error::MalformedTarget(base.clone()))?;
    target.set_path(req.uri().path());
    target.set_query(req.uri().query());
    Ok(target)
}

fn serve_from_cache(state: &AppState, cache_key: &str, is_playlist: bool) -> Option<Response> {
    let CachedValue::Body(cached) = state.cache.get(cache_key)? else {
        return None;
    };

    state.metrics.inc_counter("cache.hit");

    let content_type = cached
        .content_type
        .clone()
        .unwrap_or_else(|| default_content_type(is_playlist).to_string());

    Some(build_response(
        StatusCode::OK,
        cached.bytes,
        &content_type,
        "HIT",
        None,
    ))
}

fn serve_playlist(
    state: &AppState,
    cache_key: &str,
    cache_enabled: bool,
    effective_url: &Url,
    token: &str,
    body: Bytes,
    origin_headers: &reqwest::header::HeaderMap,
) -> Result<Response> {
    let text = String::from_utf8_lossy(&body);
    let mut playlist = hls::parse(&text)?;

    let proxy_url = Url::parse(&state.config.server.public_url)
        .map_err(|_| Error::Internal("server.public_url is not a valid URL".to_string()))?;
    let options = RewriteOptions {
        token_param: state.config.jwt.param_name.clone(),
        ..Default::default()
    };

    hls::rewrite(&mut playlist, effective_url, &proxy_url, token, &options)?;
    let rendered = playlist.render();

    let content_type = origin_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(HLS_CONTENT_TYPE)
        .to_string();

    // Master playlists change rarely; media playlists roll every few
    // seconds. Classify by the rewritten body, jitter so a mass fill does
    // not expire all at once.
    let ttl = if rendered.contains("#EXT-X-STREAM-INF") {
        state.config.cache.ttl_master
    } else {
        state.config.cache.ttl_media
    };
    let rewritten = Bytes::from(rendered);

    if cache_enabled {
        let ttl = jittered_ttl(ttl, state.config.cache.ttl_jitter);
        state.cache.set(
            cache_key,
            CachedValue::Body(CachedBody {
                bytes: rewritten.clone(),
                content_type: Some(content_type.clone()),
            }),
            ttl,
        );
    }

    Ok(build_response(
        StatusCode::OK,
        rewritten,
        &content_type,
        "MISS",
        Some(origin_headers),
    ))
}

fn serve_raw(
    state: &AppState,
    cache_key: &str,
    cache_enabled: bool,
    body: Bytes,
    origin_headers: &reqwest::header::HeaderMap,
) -> Result<Response> {
    let content_type = origin_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(RAW_CONTENT_TYPE)
        .to_string();

    if cache_enabled && state.config.cache.cache_segments {
        state.cache.set(
            cache_key,
            CachedValue::Body(CachedBody {
                bytes: body.clone(),
                content_type: Some(content_type.clone()),
            }),
            state.config.cache.ttl_media,
        );
    }

    Ok(build_response(
        StatusCode::OK,
        body,
        &content_type,
        "MISS",
        Some(origin_headers),
    ))
}

/// Relay an origin >= 400 answer: status, headers, and body unmodified.
async fn pass_through(origin_response: reqwest::Response) -> Result<Response> {
    let status = StatusCode::from_u16(origin_response.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = origin_response.headers().clone();
    let body = origin_response.bytes().await.unwrap_or_default();

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        if skip_relayed_header(name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    builder
        .body(Body::from(body))
        .map_err(|e| Error::Internal(format!("building pass-through response: {e}")))
}

fn build_response(
    status: StatusCode,
    body: Bytes,
    content_type: &str,
    cache_state: &str,
    origin_headers: Option<&reqwest::header::HeaderMap>,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len())
        .header("X-Cache", cache_state);

    // Copy origin response headers back, except the ones set above.
    if let Some(headers) = origin_headers {
        for (name, value) in headers.iter() {
            let lowered = name.as_str().to_ascii_lowercase();
            if lowered == "content-length" || lowered == "content-type" {
                continue;
            }
            if skip_relayed_header(&lowered) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }
    }

    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Hop-by-hop headers that must not be relayed from the origin response.
fn skip_relayed_header(name: &str) -> bool {
    matches!(
        name,
        "connection" | "transfer-encoding" | "keep-alive" | "upgrade"
    )
}

/// Headers forwarded to the origin: the client's, minus `x-*` headers and
/// the ones the outbound client manages itself.
fn outbound_headers(inbound: &HeaderMap) -> reqwest::header::HeaderMap {
    let mut out = reqwest::header::HeaderMap::new();
    for (name, value) in inbound.iter() {
        let lowered = name.as_str().to_ascii_lowercase();
        if lowered.starts_with("x-") {
            continue;
        }
        if matches!(
            lowered.as_str(),
            "host" | "content-length" | "connection" | "accept-encoding" | "transfer-encoding"
        ) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.insert(name, value);
        }
    }
    out
}

fn default_content_type(is_playlist: bool) -> &'static str {
    if is_playlist {
        HLS_CONTENT_TYPE
    } else {
        RAW_CONTENT_TYPE
    }
}

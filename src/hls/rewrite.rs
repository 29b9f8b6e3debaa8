//! Playlist URI rewriting.
//!
//! Master playlists point their entries back at the proxy so the next hop is
//! rewritten too; media playlists send players straight to the origin with
//! the token appended, keeping the proxy off the segment hot path. Key and
//! initialization-map URIs follow the segment rule.

use thiserror::Error;
use url::Url;

use super::playlist::{Playlist, PlaylistKind};

/// Options controlling how rewritten URIs are constructed.
#[derive(Debug, Clone)]
pub struct RewriteOptions {
    /// Query parameter carrying the credential.
    pub token_param: String,
    /// Query parameter carrying the target URL when `use_path_param` is set.
    pub path_param: String,
    /// Carry the target URL in `path_param` instead of appending its path.
    pub use_path_param: bool,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            token_param: "token".to_string(),
            path_param: "url".to_string(),
            use_path_param: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("empty token")]
    EmptyToken,
    #[error("empty token parameter name")]
    EmptyTokenParam,
    #[error("invalid URI in playlist: {0:?}")]
    InvalidUri(String),
    #[error("playlist is neither master nor media")]
    UnclassifiedPlaylist,
}

/// Rewrite every URI field of `playlist` in place.
///
/// `base` is the effective URL of the origin fetch (used to resolve relative
/// URIs), `proxy` is this service's public URL. Empty URIs are skipped; an
/// unparseable one fails the whole rewrite.
pub fn rewrite(
    playlist: &mut Playlist,
    base: &Url,
    proxy: &Url,
    token: &str,
    options: &RewriteOptions,
) -> Result<(), RewriteError> {
    if token.is_empty() {
        return Err(RewriteError::EmptyToken);
    }
    if options.token_param.is_empty() {
        return Err(RewriteError::EmptyTokenParam);
    }

    match playlist.kind {
        PlaylistKind::Master => rewrite_master(playlist, base, proxy, token, options),
        PlaylistKind::Media => rewrite_media(playlist, base, token, options),
        PlaylistKind::Unknown => Err(RewriteError::UnclassifiedPlaylist),
    }
}

fn rewrite_master(
    playlist: &mut Playlist,
    base: &Url,
    proxy: &Url,
    token: &str,
    options: &RewriteOptions,
) -> Result<(), RewriteError> {
    let master = &mut playlist.master;

    for variant in &mut master.variants {
        if variant.uri.is_empty() {
            continue;
        }
        variant.uri = to_proxy_url(base, proxy, &variant.uri, token, options)?;
    }

    for iframe in &mut master.iframe_variants {
        if iframe.uri.is_empty() {
            continue;
        }
        let rewritten = to_proxy_url(base, proxy, &iframe.uri, token, options)?;
        iframe.set_uri(rewritten);
    }

    for groups in master.media_groups.values_mut() {
        for group in groups {
            // EXT-X-MEDIA without a URI names an in-stream rendition; leave it.
            let Some(uri) = group.uri.clone() else {
                continue;
            };
            if uri.is_empty() {
                continue;
            }
            let rewritten = to_proxy_url(base, proxy, &uri, token, options)?;
            group.set_uri(rewritten);
        }
    }

    Ok(())
}

fn rewrite_media(
    playlist: &mut Playlist,
    base: &Url,
    token: &str,
    options: &RewriteOptions,
) -> Result<(), RewriteError> {
    for segment in &mut playlist.media.segments {
        if !segment.uri.is_empty() {
            segment.uri = to_origin_url(base, &segment.uri, token, options)?;
        }

        if let Some(key) = &mut segment.key {
            if let Some(uri) = key.uri.clone() {
                if !uri.is_empty() {
                    let rewritten = to_origin_url(base, &uri, token, options)?;
                    key.set_uri(rewritten);
                }
            }
        }

        if let Some(map) = &mut segment.map {
            if !map.uri.is_empty() {
                let rewritten = to_origin_url(base, &map.uri, token, options)?;
                map.set_uri(rewritten);
            }
        }
    }

    Ok(())
}

/// Resolve `uri` against `base` and point it back at the proxy.
///
/// The resolved target is carried either appended to the proxy path or in
/// the configured path parameter; the token rides in the query either way.
/// A URI that already targets the proxy and carries the token parameter is
/// only re-tokenized, which makes the rewrite idempotent.
fn to_proxy_url(
    base: &Url,
    proxy: &Url,
    uri: &str,
    token: &str,
    options: &RewriteOptions,
) -> Result<String, RewriteError> {
    let resolved = resolve(base, uri)?;

    if points_at(&resolved, proxy) && has_query_param(&resolved, &options.token_param) {
        let mut out = resolved;
        set_query_param(&mut out, &options.token_param, token);
        return Ok(out.to_string());
    }

    let mut out = proxy.clone();
    out.set_query(None);
    out.set_fragment(None);

    if options.use_path_param {
        set_query_param(&mut out, &options.path_param, resolved.as_str());
    } else {
        let prefix = proxy.path().trim_end_matches('/');
        out.set_path(&format!("{}{}", prefix, resolved.path()));
        if let Some(query) = resolved.query() {
            out.set_query(Some(query));
        }
    }

    set_query_param(&mut out, &options.token_param, token);
    Ok(out.to_string())
}

/// Resolve `uri` against `base` and append the token, leaving the target on
/// the origin host.
fn to_origin_url(
    base: &Url,
    uri: &str,
    token: &str,
    options: &RewriteOptions,
) -> Result<String, RewriteError> {
    let mut resolved = resolve(base, uri)?;
    set_query_param(&mut resolved, &options.token_param, token);
    Ok(resolved.to_string())
}

fn resolve(base: &Url, uri: &str) -> Result<Url, RewriteError> {
    base.join(uri)
        .map_err(|_| RewriteError::InvalidUri(uri.to_string()))
}

fn points_at(url: &Url, proxy: &Url) -> bool {
    url.scheme() == proxy.scheme()
        && url.host_str() == proxy.host_str()
        && url.port_or_known_default() == proxy.port_or_known_default()
}

fn has_query_param(url: &Url, name: &str) -> bool {
    url.query_pairs().any(|(k, _)| k == name)
}

/// Set `name=value` in the query, replacing any existing pair of that name.
fn set_query_param(url: &mut Url, name: &str, value: &str) {
    let existing: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in &existing {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(name, value);
    }
}

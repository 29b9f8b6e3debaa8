//! ilinden — a JWT-authenticating HLS reverse proxy.
//!
//! Players arrive with a short-lived bearer token; the proxy validates it,
//! fetches the requested playlist from the origin, rewrites every URI so
//! continuation requests carry the same credential, caches the result
//! briefly, and serves it back. Master playlist entries point back at the
//! proxy; media segments go straight to the origin.

pub mod cache;
pub mod config;
pub mod error;
pub mod hls;
pub mod jwt;
pub mod metrics;
pub mod origin;
pub mod server;
pub mod tracker;

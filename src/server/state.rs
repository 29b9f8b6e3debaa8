//! Shared application state.

use std::sync::Arc;
use std::time::Instant;

use crate::cache::{Cache, Flight};
use crate::config::Config;
use crate::jwt::{Extractor, Validator};
use crate::metrics::Metrics;
use crate::origin::OriginClient;
use crate::tracker::PlayerTracker;

/// Everything a handler needs, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: Cache,
    pub flight: Flight,
    pub origin: Arc<OriginClient>,
    pub extractor: Extractor,
    pub validator: Arc<Validator>,
    pub metrics: Metrics,
    pub tracker: PlayerTracker,
    pub started_at: Instant,
}

impl AppState {
    /// Wire up every collaborator from config and start the background
    /// tasks (cache sweeper, tracker eviction loop).
    pub async fn new(config: Config) -> Self {
        let cache = Cache::new(config.cache.max_size, config.cache.shards);
        if config.cache.enabled {
            cache.start_sweeper(config.cache.sweep_interval);
        }

        let origin = Arc::new(OriginClient::new(&config.origin));

        let extractor = Extractor::new(
            config.jwt.header_name.clone(),
            config.jwt.param_name.clone(),
        );
        let validator = Arc::new(Validator::new(
            &config.jwt,
            cache.clone(),
            origin.http_client(),
        ));

        let tracker = Self::build_tracker(&config).await;
        tracker.start_cleanup_worker();

        Self {
            config: Arc::new(config),
            cache,
            flight: Flight::new(),
            origin,
            extractor,
            validator,
            metrics: Metrics::new(),
            tracker,
            started_at: Instant::now(),
        }
    }

    #[cfg(feature = "redis")]
    async fn build_tracker(config: &Config) -> PlayerTracker {
        if config.redis.enabled {
            if let Some(address) = config.redis.addresses.first() {
                match PlayerTracker::new_redis(
                    address,
                    &config.redis.key_prefix,
                    config.redis.tracking_expiry,
                )
                .await
                {
                    Ok(tracker) => return tracker,
                    Err(e) => {
                        tracing::error!("Redis tracker unavailable, using memory: {}", e);
                    }
                }
            }
        }
        PlayerTracker::new_memory(config.redis.tracking_expiry)
    }

    #[cfg(not(feature = "redis"))]
    async fn build_tracker(config: &Config) -> PlayerTracker {
        if config.redis.enabled {
            tracing::warn!(
                "redis tracking is enabled in config but this build lacks the `redis` feature; using the in-memory tracker"
            );
        }
        PlayerTracker::new_memory(config.redis.tracking_expiry)
    }
}

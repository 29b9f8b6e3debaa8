//! Player activity tracking.
//!
//! Records one `(player, path, user agent, activity)` row per credential
//! subject, evicted after an inactivity window. The pipeline fires updates
//! as background tasks, so tracking never sits on the request path. The
//! default backend is in-memory; a Redis backend is available behind the
//! `redis` cargo feature.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[cfg(feature = "redis")]
use tracing::{error, info};

#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;

/// Tracking record for one player.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub player_id: String,
    pub path: String,
    pub user_agent: String,
    #[serde(with = "epoch_secs")]
    pub first_seen: SystemTime,
    #[serde(with = "epoch_secs")]
    pub last_activity: SystemTime,
    pub activity_count: u64,
}

/// Serde helper: SystemTime <-> u64 epoch seconds.
mod epoch_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        serializer.serialize_u64(secs)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[derive(Clone)]
enum Backend {
    Memory {
        players: Arc<DashMap<String, PlayerInfo>>,
    },
    #[cfg(feature = "redis")]
    Redis {
        conn: ConnectionManager,
        key_prefix: String,
    },
}

/// Player tracker; same public API regardless of backend.
#[derive(Clone)]
pub struct PlayerTracker {
    backend: Backend,
    expiry: Duration,
}

impl PlayerTracker {
    /// In-memory tracker (default).
    pub fn new_memory(expiry: Duration) -> Self {
        Self {
            backend: Backend::Memory {
                players: Arc::new(DashMap::new()),
            },
            expiry,
        }
    }

    /// Redis-backed tracker.
    #[cfg(feature = "redis")]
    pub async fn new_redis(
        url: &str,
        key_prefix: &str,
        expiry: Duration,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to Redis at {}", url);
        Ok(Self {
            backend: Backend::Redis {
                conn,
                key_prefix: format!("{key_prefix}:player"),
            },
            expiry,
        })
    }

    /// Record activity for a player.
    pub async fn track(&self, player_id: &str, path: &str, user_agent: &str) {
        let now = SystemTime::now();

        match &self.backend {
            Backend::Memory { players } => {
                players
                    .entry(player_id.to_string())
                    .and_modify(|info| {
                        info.last_activity = now;
                        info.path = path.to_string();
                        info.activity_count += 1;
                    })
                    .or_insert_with(|| PlayerInfo {
                        player_id: player_id.to_string(),
                        path: path.to_string(),
                        user_agent: user_agent.to_string(),
                        first_seen: now,
                        last_activity: now,
                        activity_count: 1,
                    });
            }
            #[cfg(feature = "redis")]
            Backend::Redis { conn, key_prefix } => {
                let key = format!("{}:{}", key_prefix, player_id);
                let mut conn = conn.clone();

                let info = match redis::cmd("GET")
                    .arg(&key)
                    .query_async::<Option<String>>(&mut conn)
                    .await
                {
                    Ok(Some(json)) => serde_json::from_str::<PlayerInfo>(&json)
                        .map(|mut info| {
                            info.last_activity = now;
                            info.path = path.to_string();
                            info.activity_count += 1;
                            info
                        })
                        .ok(),
                    _ => None,
                };

                let info = info.unwrap_or_else(|| PlayerInfo {
                    player_id: player_id.to_string(),
                    path: path.to_string(),
                    user_agent: user_agent.to_string(),
                    first_seen: now,
                    last_activity: now,
                    activity_count: 1,
                });

                if let Ok(json) = serde_json::to_string(&info) {
                    if let Err(e) = redis::cmd("SET")
                        .arg(&key)
                        .arg(&json)
                        .arg("EX")
                        .arg(self.expiry.as_secs())
                        .query_async::<()>(&mut conn)
                        .await
                    {
                        error!("failed to store player record in Redis: {}", e);
                    }
                }
            }
        }
    }

    /// Number of players active within the expiry window.
    pub async fn active_count(&self) -> usize {
        match &self.backend {
            Backend::Memory { players } => {
                let now = SystemTime::now();
                players
                    .iter()
                    .filter(|entry| {
                        now.duration_since(entry.last_activity)
                            .map(|idle| idle < self.expiry)
                            .unwrap_or(true)
                    })
                    .count()
            }
            #[cfg(feature = "redis")]
            Backend::Redis { conn, key_prefix } => {
                let pattern = format!("{}:*", key_prefix);
                let mut conn = conn.clone();
                // SCAN, not KEYS, so Redis is never blocked on a big keyspace.
                let mut cursor: u64 = 0;
                let mut count = 0;
                loop {
                    let result: (u64, Vec<String>) = match redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn)
                        .await
                    {
                        Ok(r) => r,
                        Err(e) => {
                            error!("Redis SCAN failed in active_count: {}", e);
                            return 0;
                        }
                    };
                    count += result.1.len();
                    cursor = result.0;
                    if cursor == 0 {
                        break;
                    }
                }
                count
            }
        }
    }

    /// Snapshot of the active player records, for the admin endpoint.
    pub async fn players(&self) -> Vec<PlayerInfo> {
        match &self.backend {
            Backend::Memory { players } => {
                let now = SystemTime::now();
                players
                    .iter()
                    .filter(|entry| {
                        now.duration_since(entry.last_activity)
                            .map(|idle| idle < self.expiry)
                            .unwrap_or(true)
                    })
                    .map(|entry| entry.value().clone())
                    .collect()
            }
            #[cfg(feature = "redis")]
            Backend::Redis { conn, key_prefix } => {
                let pattern = format!("{}:*", key_prefix);
                let mut conn = conn.clone();
                let mut cursor: u64 = 0;
                let mut out = Vec::new();
                loop {
                    let result: (u64, Vec<String>) = match redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn)
                        .await
                    {
                        Ok(r) => r,
                        Err(e) => {
                            error!("Redis SCAN failed in players: {}", e);
                            return out;
                        }
                    };
                    for key in &result.1 {
                        if let Ok(Some(json)) = redis::cmd("GET")
                            .arg(key)
                            .query_async::<Option<String>>(&mut conn)
                            .await
                        {
                            if let Ok(info) = serde_json::from_str(&json) {
                                out.push(info);
                            }
                        }
                    }
                    cursor = result.0;
                    if cursor == 0 {
                        break;
                    }
                }
                out
            }
        }
    }

    /// Drop records idle past the expiry window (no-op on Redis, where the
    /// key TTL handles it).
    pub async fn cleanup_expired(&self) {
        match &self.backend {
            Backend::Memory { players } => {
                let now = SystemTime::now();
                players.retain(|_, info| {
                    now.duration_since(info.last_activity)
                        .map(|idle| idle < self.expiry)
                        .unwrap_or(true)
                });
            }
            #[cfg(feature = "redis")]
            Backend::Redis { .. } => {}
        }
    }

    /// Spawn the periodic eviction task.
    pub fn start_cleanup_worker(&self) {
        let tracker = self.clone();
        let period = (self.expiry / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracker.cleanup_expired().await;
            }
        });
    }
}

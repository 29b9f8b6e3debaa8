//! Application configuration.
//!
//! Loaded from a YAML file with every field defaulted, then overridden by
//! `ILINDEN_<SECTION>_<FIELD>` environment variables from the explicit list
//! in [`Config::apply_env_overrides`]. The config object is immutable after
//! load; handlers receive it behind an `Arc`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub origin: OriginConfig,
    pub jwt: JwtConfig,
    pub cache: CacheConfig,
    pub redis: RedisConfig,
    pub log: LogConfig,
    pub metrics: MetricsConfig,
    pub tracing: TracingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL of this proxy, used when rewriting master playlists.
    pub public_url: String,
    #[serde(with = "duration_str")]
    pub read_timeout: Duration,
    #[serde(with = "duration_str")]
    pub write_timeout: Duration,
    #[serde(with = "duration_str")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_url: "http://localhost:8080".to_string(),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(20),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OriginConfig {
    /// Base URL joined with the request path when no `url` parameter is given.
    pub base_url: String,
    /// Deadline for one origin request, including retries of a single attempt.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Bounds TCP connect and TLS setup for new connections.
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_str")]
    pub idle_conn_timeout: Duration,
    pub max_idle_per_host: usize,
    pub retry: RetryConfig,
    pub circuit_breaker: BreakerConfig,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            idle_conn_timeout: Duration::from_secs(90),
            max_idle_per_host: 32,
            retry: RetryConfig::default(),
            circuit_breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, initial request included. Minimum 1.
    pub max_attempts: u32,
    #[serde(with = "duration_str")]
    pub backoff_min: Duration,
    #[serde(with = "duration_str")]
    pub backoff_max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_min: Duration::from_millis(100),
            backoff_max: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub enabled: bool,
    /// Consecutive failures per origin host before the breaker opens.
    pub failure_threshold: u32,
    #[serde(with = "duration_str")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub enabled: bool,
    pub header_name: String,
    pub param_name: String,
    /// HMAC secret. Redacted in the admin config dump.
    pub secret: Option<String>,
    /// JWKS endpoint for RSA verification.
    pub keys_url: Option<String>,
    pub required_claims: Vec<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
    /// Empty list accepts any algorithm.
    pub allowed_algs: Vec<String>,
    pub claims_namespace: String,
    /// Ceiling for cached validation verdicts.
    #[serde(with = "duration_str")]
    pub cache_ttl: Duration,
    #[serde(with = "duration_str")]
    pub jwks_cache_ttl: Duration,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_name: "Authorization".to_string(),
            param_name: "token".to_string(),
            secret: None,
            keys_url: None,
            required_claims: Vec::new(),
            issuer: None,
            audience: None,
            allowed_algs: Vec::new(),
            claims_namespace: String::new(),
            cache_ttl: Duration::from_secs(60),
            jwks_cache_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub shards: usize,
    /// TTL for rewritten master playlists.
    #[serde(with = "duration_str")]
    pub ttl_master: Duration,
    /// TTL for rewritten media playlists and raw segment bodies.
    #[serde(with = "duration_str")]
    pub ttl_media: Duration,
    /// Jitter fraction applied to playlist TTLs.
    pub ttl_jitter: f64,
    #[serde(with = "duration_str")]
    pub sweep_interval: Duration,
    /// Cache raw (non-playlist) bodies too.
    pub cache_segments: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 10_000,
            shards: 16,
            ttl_master: Duration::from_secs(60),
            ttl_media: Duration::from_secs(4),
            ttl_jitter: 0.2,
            sweep_interval: Duration::from_secs(300),
            cache_segments: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub enabled: bool,
    pub addresses: Vec<String>,
    pub key_prefix: String,
    /// Player records idle longer than this are evicted.
    #[serde(with = "duration_str")]
    pub tracking_expiry: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addresses: Vec::new(),
            key_prefix: "ilinden".to_string(),
            tracking_expiry: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// "text" or "json".
    pub format: String,
    pub output: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            output: "stdout".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub enabled: bool,
    pub service_name: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "ilinden".to_string(),
        }
    }
}

impl Config {
    /// Load a config file, apply env overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let mut config = Self::from_yaml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply `ILINDEN_<SECTION>_<FIELD>` environment overrides.
    ///
    /// The mapping is a closed list rather than reflection over field names;
    /// anything not listed here is not overridable from the environment.
    pub fn apply_env_overrides(&mut self) {
        env_string("ILINDEN_SERVER_HOST", &mut self.server.host);
        env_parse("ILINDEN_SERVER_PORT", &mut self.server.port);
        env_string("ILINDEN_SERVER_PUBLIC_URL", &mut self.server.public_url);
        env_duration("ILINDEN_SERVER_READ_TIMEOUT", &mut self.server.read_timeout);
        env_duration(
            "ILINDEN_SERVER_WRITE_TIMEOUT",
            &mut self.server.write_timeout,
        );
        env_duration(
            "ILINDEN_SERVER_SHUTDOWN_TIMEOUT",
            &mut self.server.shutdown_timeout,
        );

        env_string("ILINDEN_ORIGIN_BASE_URL", &mut self.origin.base_url);
        env_duration("ILINDEN_ORIGIN_TIMEOUT", &mut self.origin.timeout);
        env_duration(
            "ILINDEN_ORIGIN_CONNECT_TIMEOUT",
            &mut self.origin.connect_timeout,
        );
        env_parse(
            "ILINDEN_ORIGIN_MAX_IDLE_PER_HOST",
            &mut self.origin.max_idle_per_host,
        );
        env_parse(
            "ILINDEN_ORIGIN_RETRY_MAX_ATTEMPTS",
            &mut self.origin.retry.max_attempts,
        );

        env_parse("ILINDEN_JWT_ENABLED", &mut self.jwt.enabled);
        env_string("ILINDEN_JWT_HEADER_NAME", &mut self.jwt.header_name);
        env_string("ILINDEN_JWT_PARAM_NAME", &mut self.jwt.param_name);
        env_opt_string("ILINDEN_JWT_SECRET", &mut self.jwt.secret);
        env_opt_string("ILINDEN_JWT_KEYS_URL", &mut self.jwt.keys_url);
        env_opt_string("ILINDEN_JWT_ISSUER", &mut self.jwt.issuer);
        env_opt_string("ILINDEN_JWT_AUDIENCE", &mut self.jwt.audience);
        env_list("ILINDEN_JWT_ALLOWED_ALGS", &mut self.jwt.allowed_algs);
        env_list(
            "ILINDEN_JWT_REQUIRED_CLAIMS",
            &mut self.jwt.required_claims,
        );
        env_string(
            "ILINDEN_JWT_CLAIMS_NAMESPACE",
            &mut self.jwt.claims_namespace,
        );
        env_duration("ILINDEN_JWT_CACHE_TTL", &mut self.jwt.cache_ttl);

        env_parse("ILINDEN_CACHE_ENABLED", &mut self.cache.enabled);
        env_parse("ILINDEN_CACHE_MAX_SIZE", &mut self.cache.max_size);
        env_parse("ILINDEN_CACHE_SHARDS", &mut self.cache.shards);
        env_duration("ILINDEN_CACHE_TTL_MASTER", &mut self.cache.ttl_master);
        env_duration("ILINDEN_CACHE_TTL_MEDIA", &mut self.cache.ttl_media);
        env_parse("ILINDEN_CACHE_TTL_JITTER", &mut self.cache.ttl_jitter);

        env_parse("ILINDEN_REDIS_ENABLED", &mut self.redis.enabled);
        env_list("ILINDEN_REDIS_ADDRESSES", &mut self.redis.addresses);
        env_string("ILINDEN_REDIS_KEY_PREFIX", &mut self.redis.key_prefix);
        env_duration(
            "ILINDEN_REDIS_TRACKING_EXPIRY",
            &mut self.redis.tracking_expiry,
        );

        env_string("ILINDEN_LOG_LEVEL", &mut self.log.level);
        env_string("ILINDEN_LOG_FORMAT", &mut self.log.format);
        env_string("ILINDEN_LOG_OUTPUT", &mut self.log.output);

        env_parse("ILINDEN_METRICS_ENABLED", &mut self.metrics.enabled);
        env_string("ILINDEN_METRICS_PATH", &mut self.metrics.path);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid(
                "server.port must be between 1 and 65535".to_string(),
            ));
        }

        if url::Url::parse(&self.server.public_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "server.public_url is not a valid URL: {:?}",
                self.server.public_url
            )));
        }

        if !self.origin.base_url.is_empty() && url::Url::parse(&self.origin.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "origin.base_url is not a valid URL: {:?}",
                self.origin.base_url
            )));
        }

        if self.jwt.enabled {
            let has_secret = self.jwt.secret.as_deref().is_some_and(|s| !s.is_empty());
            let has_keys = self.jwt.keys_url.as_deref().is_some_and(|s| !s.is_empty());
            if !has_secret && !has_keys {
                return Err(ConfigError::Invalid(
                    "jwt is enabled but neither jwt.secret nor jwt.keys_url is set".to_string(),
                ));
            }
        }

        if self.redis.enabled && self.redis.addresses.is_empty() {
            return Err(ConfigError::Invalid(
                "redis is enabled but redis.addresses is empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Copy for the admin `/config` endpoint with secrets blanked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.jwt.secret.is_some() {
            copy.jwt.secret = Some("<redacted>".to_string());
        }
        copy
    }
}

fn env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        *target = value;
    }
}

fn env_opt_string(name: &str, target: &mut Option<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = if value.is_empty() { None } else { Some(value) };
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

fn env_duration(name: &str, target: &mut Duration) {
    if let Ok(value) = std::env::var(name) {
        if let Some(parsed) = parse_duration(&value) {
            *target = parsed;
        }
    }
}

fn env_list(name: &str, target: &mut Vec<String>) {
    if let Ok(value) = std::env::var(name) {
        *target = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
}

/// Parse `"500ms"`, `"5s"`, `"2m"`, `"1h"`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();

    let (number, unit) = if let Some(n) = input.strip_suffix("ms") {
        (n, "ms")
    } else if let Some(n) = input.strip_suffix('s') {
        (n, "s")
    } else if let Some(n) = input.strip_suffix('m') {
        (n, "m")
    } else if let Some(n) = input.strip_suffix('h') {
        (n, "h")
    } else {
        (input, "s")
    };

    let value: f64 = number.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }

    let seconds = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };

    Some(Duration::from_secs_f64(seconds))
}

fn format_duration(d: &Duration) -> String {
    if d.subsec_nanos() != 0 {
        format!("{}ms", d.as_millis())
    } else {
        let secs = d.as_secs();
        if secs >= 3600 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

/// Serde adapter: durations read from `"5s"`-style strings or bare numbers
/// of seconds, and written back as strings.
mod duration_str {
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a duration string like \"5s\" or a number of seconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                super::parse_duration(v)
                    .ok_or_else(|| E::custom(format!("invalid duration {v:?}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("negative duration"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
                if v < 0.0 {
                    return Err(E::custom("negative duration"));
                }
                Ok(Duration::from_secs_f64(v))
            }
        }

        d.deserialize_any(DurationVisitor)
    }
}

/// Used by CLI loading: an explicit `--config` path must load; otherwise the
/// fallback path is used.
pub fn load_with_fallback(
    explicit: Option<&Path>,
    fallback: &Path,
) -> Result<(Config, String), ConfigError> {
    let path = explicit.unwrap_or(fallback);
    let config = Config::load(path)?;
    Ok((config, path.display().to_string()))
}

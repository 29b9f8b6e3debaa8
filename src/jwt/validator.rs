//! Token validation and verdict caching.
//!
//! Checks run in a fixed order, each producing its own error: algorithm
//! allow-list, required claims, expiry, issuer, audience, then signature.
//! Successful verdicts are memoized in the shared cache under
//! `jwt:token:<raw>` for `min(ceiling, exp - now - 30s)`.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::{Cache, CachedValue};
use crate::config::JwtConfig;

use super::verify::{Header, JwksCache, Verifier};
use super::{now_unix, Claims, TokenError};

/// Margin subtracted from the token expiry when caching a verdict, so a
/// cached entry never outlives the token it vouches for.
const VERDICT_EXPIRY_MARGIN: i64 = 30;

const VERDICT_KEY_PREFIX: &str = "jwt:token:";

pub struct Validator {
    allowed_algs: Vec<String>,
    required_claims: Vec<String>,
    issuer: Option<String>,
    audience: Option<String>,
    cache_ttl_ceiling: Duration,
    verifier: Option<Verifier>,
    cache: Cache,
}

impl Validator {
    /// Build a validator from config. The verifier is HMAC when a secret is
    /// configured, JWKS-backed RSA when a keys URL is; config validation
    /// guarantees one of them whenever JWT checking is enabled.
    pub fn new(config: &JwtConfig, cache: Cache, client: reqwest::Client) -> Self {
        let verifier = if let Some(secret) = config.secret.as_ref().filter(|s| !s.is_empty()) {
            Some(Verifier::Hmac(secret.as_bytes().to_vec()))
        } else {
            config
                .keys_url
                .as_ref()
                .filter(|u| !u.is_empty())
                .map(|url| {
                    Verifier::Jwks(JwksCache::new(
                        url.clone(),
                        client,
                        config.jwks_cache_ttl,
                    ))
                })
        };

        Self {
            allowed_algs: config.allowed_algs.clone(),
            required_claims: config.required_claims.clone(),
            issuer: config.issuer.clone().filter(|s| !s.is_empty()),
            audience: config.audience.clone().filter(|s| !s.is_empty()),
            cache_ttl_ceiling: config.cache_ttl,
            verifier,
            cache,
        }
    }

    /// Validate `token` and return its claims, consulting the verdict cache
    /// first. A cached verdict whose token has since expired is evicted and
    /// the token re-validated.
    pub async fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let cache_key = format!("{VERDICT_KEY_PREFIX}{token}");

        if let Some(CachedValue::Claims(claims)) = self.cache.get(&cache_key) {
            if claims.is_expired() {
                self.cache.delete(&cache_key);
            } else {
                return Ok(claims);
            }
        }

        let claims = self.check(token).await?;

        let ttl = self.verdict_ttl(&claims);
        if !ttl.is_zero() {
            self.cache
                .set(&cache_key, CachedValue::Claims(claims.clone()), ttl);
        }

        Ok(claims)
    }

    async fn check(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };
        if parts.next().is_some() {
            return Err(TokenError::Malformed);
        }

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|e| TokenError::Decode(format!("header: {e}")))?;
        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| TokenError::Decode(format!("payload: {e}")))?;

        let header: Header = serde_json::from_slice(&header_bytes)
            .map_err(|e| TokenError::Decode(format!("header: {e}")))?;

        // 1. Algorithm allow-list; an empty list accepts anything.
        if !self.allowed_algs.is_empty() && !self.allowed_algs.contains(&header.alg) {
            return Err(TokenError::InvalidAlgorithm(header.alg));
        }

        let payload: Map<String, Value> = serde_json::from_slice(&payload_bytes)
            .map_err(|e| TokenError::Decode(format!("payload: {e}")))?;
        let claims = Claims::from_payload(payload);

        // 2. Required claims, with registered-claim type checks.
        claims.check_required(&self.required_claims)?;

        // 3. Expiry.
        if claims.is_expired() {
            return Err(TokenError::Expired);
        }

        // 4. Issuer, when both sides have one.
        if let (Some(expected), Some(iss)) = (&self.issuer, &claims.iss) {
            if !iss.is_empty() && iss != expected {
                return Err(TokenError::InvalidIssuer);
            }
        }

        // 5. Audience.
        if let Some(expected) = &self.audience {
            if !claims.has_audience(expected) {
                return Err(TokenError::InvalidAudience);
            }
        }

        // 6. Signature.
        if let Some(verifier) = &self.verifier {
            let signature = URL_SAFE_NO_PAD
                .decode(signature_b64)
                .map_err(|_| TokenError::InvalidSignature)?;
            let signing_input_len = header_b64.len() + 1 + payload_b64.len();
            let signing_input = &token[..signing_input_len];
            verifier.verify(&header, signing_input, &signature).await?;
        } else {
            debug!("no JWT verifier configured; skipping signature check");
        }

        Ok(claims)
    }

    /// Lesser of the configured ceiling and the token's remaining life
    /// minus a safety margin.
    fn verdict_ttl(&self, claims: &Claims) -> Duration {
        match claims.exp {
            Some(exp) => {
                let remaining = exp - now_unix() - VERDICT_EXPIRY_MARGIN;
                if remaining <= 0 {
                    Duration::ZERO
                } else {
                    self.cache_ttl_ceiling.min(Duration::from_secs(remaining as u64))
                }
            }
            None => self.cache_ttl_ceiling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use serde_json::json;
    use sha2::Sha256;

    const SECRET: &str = "unit-test-secret";

    fn encode(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    /// Build an HS256 token signed with `SECRET`.
    fn signed_token(header: Value, payload: Value) -> String {
        let signing_input = format!("{}.{}", encode(&header), encode(&payload));
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(signing_input.as_bytes());
        let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{signing_input}.{sig}")
    }

    fn hs256_header() -> Value {
        json!({ "alg": "HS256", "typ": "JWT" })
    }

    fn config() -> JwtConfig {
        JwtConfig {
            secret: Some(SECRET.to_string()),
            ..Default::default()
        }
    }

    fn validator_with(config: JwtConfig) -> (Validator, Cache) {
        let cache = Cache::new(1000, 4);
        let validator = Validator::new(&config, cache.clone(), reqwest::Client::new());
        (validator, cache)
    }

    #[tokio::test]
    async fn valid_token_yields_claims() {
        let (validator, _) = validator_with(config());
        let token = signed_token(
            hs256_header(),
            json!({ "sub": "player-1", "exp": now_unix() + 300 }),
        );

        let claims = validator.validate(&token).await.unwrap();
        assert_eq!(claims.sub.as_deref(), Some("player-1"));
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let (validator, _) = validator_with(config());
        let token = signed_token(hs256_header(), json!({ "exp": now_unix() - 60 }));

        let err = validator.validate(&token).await.unwrap_err();
        assert_eq!(err, TokenError::Expired);
    }

    #[tokio::test]
    async fn missing_required_claim_is_rejected() {
        let mut cfg = config();
        cfg.required_claims = vec!["sub".to_string()];
        let (validator, _) = validator_with(cfg);

        let token = signed_token(hs256_header(), json!({ "exp": now_unix() + 300 }));

        let err = validator.validate(&token).await.unwrap_err();
        assert_eq!(err, TokenError::MissingClaim("sub".to_string()));
    }

    #[tokio::test]
    async fn disallowed_algorithm_is_rejected() {
        let mut cfg = config();
        cfg.allowed_algs = vec!["RS256".to_string()];
        let (validator, _) = validator_with(cfg);

        let token = signed_token(hs256_header(), json!({ "exp": now_unix() + 300 }));

        let err = validator.validate(&token).await.unwrap_err();
        assert_eq!(err, TokenError::InvalidAlgorithm("HS256".to_string()));
    }

    #[tokio::test]
    async fn audience_list_containing_expected_is_accepted() {
        let mut cfg = config();
        cfg.audience = Some("players".to_string());
        let (validator, _) = validator_with(cfg);

        let token = signed_token(
            hs256_header(),
            json!({ "aud": ["web", "players"], "exp": now_unix() + 300 }),
        );
        assert!(validator.validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn audience_list_without_expected_is_rejected() {
        let mut cfg = config();
        cfg.audience = Some("players".to_string());
        let (validator, _) = validator_with(cfg);

        let token = signed_token(
            hs256_header(),
            json!({ "aud": ["web", "admins"], "exp": now_unix() + 300 }),
        );

        let err = validator.validate(&token).await.unwrap_err();
        assert_eq!(err, TokenError::InvalidAudience);
    }

    #[tokio::test]
    async fn wrong_issuer_is_rejected() {
        let mut cfg = config();
        cfg.issuer = Some("https://auth.example.com".to_string());
        let (validator, _) = validator_with(cfg);

        let token = signed_token(
            hs256_header(),
            json!({ "iss": "https://rogue.example.com", "exp": now_unix() + 300 }),
        );

        let err = validator.validate(&token).await.unwrap_err();
        assert_eq!(err, TokenError::InvalidIssuer);
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let (validator, _) = validator_with(config());
        let token = signed_token(
            hs256_header(),
            json!({ "sub": "player-1", "exp": now_unix() + 300 }),
        );
        let mut parts: Vec<&str> = token.split('.').collect();
        let bogus = URL_SAFE_NO_PAD.encode(b"bogus-signature-bytes-0000000000");
        parts[2] = &bogus;
        let tampered = parts.join(".");

        let err = validator.validate(&tampered).await.unwrap_err();
        assert_eq!(err, TokenError::InvalidSignature);
    }

    #[tokio::test]
    async fn garbage_payload_is_a_decode_error() {
        let (validator, _) = validator_with(config());

        let err = validator.validate("aaa.bbb.ccc").await.unwrap_err();
        assert!(matches!(err, TokenError::Decode(_)));
    }

    #[tokio::test]
    async fn verdict_is_cached() {
        let (validator, cache) = validator_with(config());
        let token = signed_token(
            hs256_header(),
            json!({ "sub": "player-1", "exp": now_unix() + 300 }),
        );

        validator.validate(&token).await.unwrap();
        assert_eq!(cache.size(), 1, "verdict should be memoized");

        let before = cache.stats().hits;
        validator.validate(&token).await.unwrap();
        assert_eq!(cache.stats().hits, before + 1, "second call hits the cache");
    }

    #[tokio::test]
    async fn nearly_expired_token_is_not_cached() {
        // Remaining validity is under the 30s margin, so no verdict entry.
        let (validator, cache) = validator_with(config());
        let token = signed_token(
            hs256_header(),
            json!({ "sub": "p", "exp": now_unix() + 10 }),
        );

        validator.validate(&token).await.unwrap();
        assert_eq!(cache.size(), 0);
    }
}

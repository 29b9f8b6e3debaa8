//! Token signature verification.
//!
//! Two concrete verifiers: HMAC-SHA2 against a shared secret, and RSA
//! PKCS#1 v1.5 against keys fetched from a JWKS endpoint. JWKS keys are
//! fetched on the first unknown `kid`, cached for a bounded interval, and
//! refreshed with exponential backoff after failures.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier as _;
use rsa::{BigUint, RsaPublicKey};
use serde::Deserialize;
use sha2::{Sha256, Sha384, Sha512};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::TokenError;

/// Decoded JWT header segment.
#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub alg: String,
    #[serde(default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
}

/// Signature verification backend.
pub enum Verifier {
    Hmac(Vec<u8>),
    Jwks(JwksCache),
}

impl Verifier {
    /// Verify `signature` over `signing_input` (the `header.payload` text)
    /// using the algorithm named in the token header.
    pub async fn verify(
        &self,
        header: &Header,
        signing_input: &str,
        signature: &[u8],
    ) -> Result<(), TokenError> {
        match self {
            Verifier::Hmac(secret) => verify_hmac(secret, &header.alg, signing_input, signature),
            Verifier::Jwks(jwks) => {
                let key = jwks.key_for(header.kid.as_deref()).await?;
                verify_rsa(&key, &header.alg, signing_input, signature)
            }
        }
    }
}

fn verify_hmac(
    secret: &[u8],
    alg: &str,
    signing_input: &str,
    signature: &[u8],
) -> Result<(), TokenError> {
    match alg {
        "HS256" => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret)
                .map_err(|_| TokenError::InvalidSignature)?;
            mac.update(signing_input.as_bytes());
            mac.verify_slice(signature)
                .map_err(|_| TokenError::InvalidSignature)
        }
        "HS384" => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(secret)
                .map_err(|_| TokenError::InvalidSignature)?;
            mac.update(signing_input.as_bytes());
            mac.verify_slice(signature)
                .map_err(|_| TokenError::InvalidSignature)
        }
        "HS512" => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(secret)
                .map_err(|_| TokenError::InvalidSignature)?;
            mac.update(signing_input.as_bytes());
            mac.verify_slice(signature)
                .map_err(|_| TokenError::InvalidSignature)
        }
        other => Err(TokenError::InvalidAlgorithm(other.to_string())),
    }
}

fn verify_rsa(
    key: &RsaPublicKey,
    alg: &str,
    signing_input: &str,
    signature: &[u8],
) -> Result<(), TokenError> {
    let signature =
        Signature::try_from(signature).map_err(|_| TokenError::InvalidSignature)?;

    let result = match alg {
        "RS256" => VerifyingKey::<Sha256>::new(key.clone())
            .verify(signing_input.as_bytes(), &signature),
        "RS384" => VerifyingKey::<Sha384>::new(key.clone())
            .verify(signing_input.as_bytes(), &signature),
        "RS512" => VerifyingKey::<Sha512>::new(key.clone())
            .verify(signing_input.as_bytes(), &signature),
        other => return Err(TokenError::InvalidAlgorithm(other.to_string())),
    };

    result.map_err(|_| TokenError::InvalidSignature)
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

struct JwksState {
    keys: HashMap<String, RsaPublicKey>,
    fetched_at: Option<Instant>,
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
}

/// Cached view of a remote JWKS document.
pub struct JwksCache {
    url: String,
    client: reqwest::Client,
    ttl: Duration,
    state: RwLock<JwksState>,
}

/// Key used for JWKS entries that carry no `kid`.
const ANONYMOUS_KID: &str = "";

/// Base delay for refetch backoff after a failed JWKS fetch.
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

impl JwksCache {
    pub fn new(url: String, client: reqwest::Client, ttl: Duration) -> Self {
        Self {
            url,
            client,
            ttl,
            state: RwLock::new(JwksState {
                keys: HashMap::new(),
                fetched_at: None,
                consecutive_failures: 0,
                last_attempt: None,
            }),
        }
    }

    /// Resolve the public key for `kid`.
    ///
    /// Serves from cache while fresh; fetches on the first unknown `kid`
    /// or when the cached document has aged out.
    pub async fn key_for(&self, kid: Option<&str>) -> Result<RsaPublicKey, TokenError> {
        let kid = kid.unwrap_or(ANONYMOUS_KID);

        {
            let state = self.state.read().await;
            if let Some(key) = state.keys.get(kid) {
                let fresh = state
                    .fetched_at
                    .is_some_and(|at| at.elapsed() < self.ttl);
                if fresh {
                    return Ok(key.clone());
                }
            }
        }

        let mut state = self.state.write().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(key) = state.keys.get(kid) {
            if state.fetched_at.is_some_and(|at| at.elapsed() < self.ttl) {
                return Ok(key.clone());
            }
        }

        // Respect the failure backoff window; a stale key beats hammering a
        // broken endpoint.
        if state.consecutive_failures > 0 {
            let wait = backoff(state.consecutive_failures);
            let in_backoff = state
                .last_attempt
                .is_some_and(|at| at.elapsed() < wait);
            if in_backoff {
                if let Some(key) = state.keys.get(kid) {
                    return Ok(key.clone());
                }
                return Err(TokenError::Keys("JWKS fetch backing off".to_string()));
            }
        }

        state.last_attempt = Some(Instant::now());
        match self.fetch().await {
            Ok(keys) => {
                debug!(url = %self.url, count = keys.len(), "JWKS refreshed");
                state.keys = keys;
                state.fetched_at = Some(Instant::now());
                state.consecutive_failures = 0;
            }
            Err(err) => {
                state.consecutive_failures += 1;
                warn!(url = %self.url, failures = state.consecutive_failures, "JWKS fetch failed: {err}");
                if let Some(key) = state.keys.get(kid) {
                    return Ok(key.clone());
                }
                return Err(TokenError::Keys(err));
            }
        }

        state
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| TokenError::Keys(format!("no key for kid {kid:?}")))
    }

    async fn fetch(&self) -> Result<HashMap<String, RsaPublicKey>, String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| format!("fetch failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("JWKS endpoint returned {}", response.status()));
        }

        let set: JwkSet = response
            .json()
            .await
            .map_err(|e| format!("invalid JWKS document: {e}"))?;

        let mut keys = HashMap::new();
        for jwk in set.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            match jwk_to_rsa(&jwk) {
                Ok(key) => {
                    keys.insert(jwk.kid.unwrap_or_default(), key);
                }
                Err(err) => {
                    warn!(kid = ?jwk.kid, "skipping unusable JWK: {err}");
                }
            }
        }

        if keys.is_empty() {
            return Err("JWKS document contains no usable RSA keys".to_string());
        }

        Ok(keys)
    }
}

fn backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(exp))
        .min(BACKOFF_MAX)
}

fn jwk_to_rsa(jwk: &Jwk) -> Result<RsaPublicKey, String> {
    let n = jwk.n.as_deref().ok_or("missing modulus")?;
    let e = jwk.e.as_deref().ok_or("missing exponent")?;

    let n = URL_SAFE_NO_PAD
        .decode(n)
        .map_err(|e| format!("bad modulus encoding: {e}"))?;
    let e = URL_SAFE_NO_PAD
        .decode(e)
        .map_err(|e| format!("bad exponent encoding: {e}"))?;

    RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .map_err(|e| format!("invalid RSA key: {e}"))
}

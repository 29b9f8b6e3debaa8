//! Credential extraction and validation.
//!
//! Tokens are JWT-shaped bearer credentials arriving in the `Authorization`
//! header or a query parameter. The validator decodes and checks claims,
//! verifies the signature (HMAC secret or JWKS-fetched RSA key), and
//! memoizes verdicts in the shared cache.

pub mod claims;
pub mod extract;
pub mod validator;
pub mod verify;

pub use claims::Claims;
pub use extract::{is_token_shaped, Extractor};
pub use validator::Validator;
pub use verify::{JwksCache, Verifier};

use thiserror::Error;

/// Credential failures, each rendered as a distinct error to the player.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("authentication token is required")]
    Missing,
    #[error("authentication token is malformed")]
    Malformed,
    #[error("authentication token has expired")]
    Expired,
    #[error("authentication token signature is invalid")]
    InvalidSignature,
    #[error("token algorithm {0:?} is not allowed")]
    InvalidAlgorithm(String),
    #[error("required claim {0:?} is missing")]
    MissingClaim(String),
    #[error("token issuer is not accepted")]
    InvalidIssuer,
    #[error("token audience is not accepted")]
    InvalidAudience,
    #[error("token could not be decoded: {0}")]
    Decode(String),
    #[error("signature keys unavailable: {0}")]
    Keys(String),
}

/// Current wall-clock time as Unix seconds.
pub(crate) fn now_unix() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

//! JWT claims model and helpers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{now_unix, TokenError};

/// Registered claims plus everything else the token carried.
///
/// `aud` stays an untyped JSON value because it is legally either a string
/// or a list of strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    pub iss: Option<String>,
    pub sub: Option<String>,
    pub aud: Option<Value>,
    pub exp: Option<i64>,
    pub nbf: Option<i64>,
    pub iat: Option<i64>,
    pub jti: Option<String>,
    pub custom: Map<String, Value>,
}

impl Claims {
    /// Build claims from a decoded payload object, splitting registered
    /// claims from custom ones. Badly typed registered claims are dropped
    /// (so a later required-claim check reports them as missing).
    pub fn from_payload(payload: Map<String, Value>) -> Self {
        let mut claims = Claims::default();

        for (key, value) in payload {
            match key.as_str() {
                "iss" => claims.iss = value.as_str().map(str::to_string),
                "sub" => claims.sub = value.as_str().map(str::to_string),
                "aud" => claims.aud = Some(value),
                "exp" => claims.exp = as_unix_seconds(&value),
                "nbf" => claims.nbf = as_unix_seconds(&value),
                "iat" => claims.iat = as_unix_seconds(&value),
                "jti" => claims.jti = value.as_str().map(str::to_string),
                _ => {
                    claims.custom.insert(key, value);
                }
            }
        }

        claims
    }

    /// Check that each claim in `required` is present (and, for the
    /// registered ones, correctly typed).
    pub fn check_required(&self, required: &[String]) -> Result<(), TokenError> {
        for claim in required {
            let present = match claim.as_str() {
                "iss" => self.iss.is_some(),
                "sub" => self.sub.is_some(),
                "aud" => self.aud.is_some(),
                "exp" => self.exp.is_some(),
                "nbf" => self.nbf.is_some(),
                "iat" => self.iat.is_some(),
                "jti" => self.jti.is_some(),
                other => self.custom.contains_key(other),
            };
            if !present {
                return Err(TokenError::MissingClaim(claim.clone()));
            }
        }
        Ok(())
    }

    /// A token with no `exp` never expires.
    pub fn is_expired(&self) -> bool {
        match self.exp {
            Some(exp) => now_unix() > exp,
            None => false,
        }
    }

    /// Seconds until expiry, zero when expired or when there is no `exp`.
    pub fn remaining_validity(&self) -> i64 {
        match self.exp {
            Some(exp) => (exp - now_unix()).max(0),
            None => 0,
        }
    }

    /// The player identity for tracking: `sub`, then the namespaced
    /// `playerId` custom claim, then the bare one.
    pub fn player_id(&self, namespace: &str) -> Option<String> {
        if let Some(sub) = &self.sub {
            if !sub.is_empty() {
                return Some(sub.clone());
            }
        }

        if !namespace.is_empty() {
            let key = format!("{namespace}playerId");
            if let Some(id) = self.custom.get(&key).and_then(Value::as_str) {
                if !id.is_empty() {
                    return Some(id.to_string());
                }
            }
        }

        self.custom
            .get("playerId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    }

    /// Look up a custom claim, preferring the namespaced variant.
    pub fn custom_claim(&self, namespace: &str, name: &str) -> Option<&Value> {
        if !namespace.is_empty() {
            let key = format!("{namespace}{name}");
            if let Some(value) = self.custom.get(&key) {
                return Some(value);
            }
        }
        self.custom.get(name)
    }

    /// Does `aud` (string or list of strings) contain `expected`?
    pub fn has_audience(&self, expected: &str) -> bool {
        match &self.aud {
            Some(Value::String(aud)) => aud == expected,
            Some(Value::Array(list)) => list
                .iter()
                .any(|v| v.as_str().is_some_and(|s| s == expected)),
            _ => false,
        }
    }

    /// Does the `roles` custom claim contain `role`?
    pub fn has_role(&self, role: &str) -> bool {
        match self.custom.get("roles") {
            Some(Value::Array(roles)) => roles
                .iter()
                .any(|v| v.as_str().is_some_and(|s| s == role)),
            _ => false,
        }
    }
}

/// JSON numbers arrive as integers or floats depending on the issuer.
fn as_unix_seconds(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

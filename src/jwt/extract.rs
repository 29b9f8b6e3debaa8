//! Token extraction from inbound requests.
//!
//! Looks at the configured header first (stripping a `Bearer ` or `JWT `
//! prefix), then the configured query parameter. Candidates must look like
//! a JWT: three non-empty dot-separated parts.

use std::collections::HashMap;

use axum::http::HeaderMap;

use super::TokenError;

const BEARER_PREFIX: &str = "Bearer ";
const JWT_PREFIX: &str = "JWT ";

/// Pulls the credential out of a request.
#[derive(Debug, Clone)]
pub struct Extractor {
    header_name: String,
    param_name: String,
}

impl Extractor {
    pub fn new(header_name: impl Into<String>, param_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
            param_name: param_name.into(),
        }
    }

    /// Extract a token from the header or query parameters.
    ///
    /// Fails with [`TokenError::Missing`] when neither source yields a
    /// non-empty value and [`TokenError::Malformed`] when the candidate is
    /// not three non-empty dot-separated parts.
    pub fn extract(
        &self,
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<String, TokenError> {
        let candidate = self
            .from_header(headers)
            .or_else(|| self.from_query(query))
            .ok_or(TokenError::Missing)?;

        if !is_token_shaped(&candidate) {
            return Err(TokenError::Malformed);
        }

        Ok(candidate)
    }

    fn from_header(&self, headers: &HeaderMap) -> Option<String> {
        let value = headers.get(&self.header_name)?.to_str().ok()?;
        let token = value
            .strip_prefix(BEARER_PREFIX)
            .or_else(|| value.strip_prefix(JWT_PREFIX))
            .unwrap_or(value);

        if token.is_empty() {
            None
        } else {
            Some(token.to_string())
        }
    }

    fn from_query(&self, query: &HashMap<String, String>) -> Option<String> {
        query
            .get(&self.param_name)
            .filter(|t| !t.is_empty())
            .cloned()
    }
}

/// Basic JWT shape check: `A.B.C` with three non-empty parts.
pub fn is_token_shaped(token: &str) -> bool {
    let mut parts = token.split('.');
    let shaped = parts.by_ref().take(3).filter(|p| !p.is_empty()).count() == 3;
    shaped && parts.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn extractor() -> Extractor {
        Extractor::new("Authorization", "token")
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn extracts_bearer_token_from_header() {
        let headers = headers_with("Bearer aaa.bbb.ccc");
        let token = extractor().extract(&headers, &HashMap::new()).unwrap();
        assert_eq!(token, "aaa.bbb.ccc");
    }

    #[test]
    fn extracts_jwt_prefixed_token_from_header() {
        let headers = headers_with("JWT aaa.bbb.ccc");
        let token = extractor().extract(&headers, &HashMap::new()).unwrap();
        assert_eq!(token, "aaa.bbb.ccc");
    }

    #[test]
    fn extracts_bare_header_value() {
        let headers = headers_with("aaa.bbb.ccc");
        let token = extractor().extract(&headers, &HashMap::new()).unwrap();
        assert_eq!(token, "aaa.bbb.ccc");
    }

    #[test]
    fn falls_back_to_query_parameter() {
        let mut query = HashMap::new();
        query.insert("token".to_string(), "aaa.bbb.ccc".to_string());

        let token = extractor().extract(&HeaderMap::new(), &query).unwrap();
        assert_eq!(token, "aaa.bbb.ccc");
    }

    #[test]
    fn header_wins_over_query() {
        let headers = headers_with("Bearer aaa.bbb.ccc");
        let mut query = HashMap::new();
        query.insert("token".to_string(), "xxx.yyy.zzz".to_string());

        let token = extractor().extract(&headers, &query).unwrap();
        assert_eq!(token, "aaa.bbb.ccc");
    }

    #[test]
    fn missing_everywhere_is_missing() {
        let err = extractor()
            .extract(&HeaderMap::new(), &HashMap::new())
            .unwrap_err();
        assert_eq!(err, TokenError::Missing);
    }

    #[test]
    fn two_part_candidate_is_malformed() {
        let mut query = HashMap::new();
        query.insert("token".to_string(), "abc.def".to_string());

        let err = extractor().extract(&HeaderMap::new(), &query).unwrap_err();
        assert_eq!(err, TokenError::Malformed);
    }

    #[test]
    fn empty_part_is_malformed() {
        assert!(!is_token_shaped("a..c"));
        assert!(!is_token_shaped(".b.c"));
        assert!(!is_token_shaped("a.b."));
        assert!(!is_token_shaped("a.b.c.d"));
        assert!(is_token_shaped("a.b.c"));
    }

    #[test]
    fn custom_header_and_param_names() {
        let extractor = Extractor::new("X-Stream-Auth", "auth");
        let mut headers = HeaderMap::new();
        headers.insert("X-Stream-Auth", HeaderValue::from_static("a.b.c"));

        assert_eq!(
            extractor.extract(&headers, &HashMap::new()).unwrap(),
            "a.b.c"
        );
    }
}

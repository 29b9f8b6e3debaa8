//! Error taxonomy and the JSON error writer.
//!
//! Every failure surfaced to a player renders as
//! `{"message", "code", "status", "details"?}`. Credential failures map to
//! 401, target resolution to 400, playlist parsing to 500, and origin
//! transport failures to the gateway statuses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::hls::{ParseError, RewriteError};
use crate::jwt::TokenError;
use crate::origin::OriginError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error("no target URL could be determined")]
    MissingTarget,
    #[error("invalid target URL: {0:?}")]
    MalformedTarget(String),
    #[error("failed to parse playlist: {0}")]
    Playlist(#[from] ParseError),
    #[error("failed to rewrite playlist: {0}")]
    Rewrite(#[from] RewriteError),
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Token(TokenError::Keys(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Token(_) => StatusCode::UNAUTHORIZED,
            Error::MissingTarget | Error::MalformedTarget(_) => StatusCode::BAD_REQUEST,
            Error::Playlist(_) | Error::Rewrite(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Origin(OriginError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            Error::Origin(OriginError::CircuitOpen { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Origin(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Token(_) => "token_error",
            Error::MissingTarget | Error::MalformedTarget(_) => "proxy_error",
            Error::Playlist(_) | Error::Rewrite(_) => "playlist_error",
            Error::Origin(_) => "origin_error",
            Error::Internal(_) => "internal_error",
        }
    }
}

/// Wire shape of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>, code: impl Into<String>, status: StatusCode) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            status: status.as_u16(),
            details: None,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::new(self.to_string(), self.code(), status);
        (status, Json(body)).into_response()
    }
}

//! Proxy-wide error type and its translation into an Anthropic-shaped HTTP response.

use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use crate::messages::anthropic::ErrorResponse;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("model {0:?} is not configured for the active provider")]
    ModelUnresolvable(String),

    #[error("upstream authentication failed: {0}")]
    Authentication(String),

    #[error("upstream denied permission: {0}")]
    Permission(String),

    #[error("rate limited by upstream: {0}")]
    RateLimit(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream overloaded: {0}")]
    Overloaded(String),

    #[error("failed to reach upstream: {0}")]
    ApiConnection(String),

    #[error("upstream error: {0}")]
    Api(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("token counting is unavailable: {0}")]
    NotImplemented(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_) | ProxyError::ModelUnresolvable(_) => StatusCode::BAD_REQUEST,
            ProxyError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ProxyError::Permission(_) => StatusCode::FORBIDDEN,
            ProxyError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::NotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::ApiConnection(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Api(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// The Anthropic `error.type` discriminator for this failure.
    pub fn error_type(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) | ProxyError::ModelUnresolvable(_) => "invalid_request_error",
            ProxyError::Authentication(_) => "authentication_error",
            ProxyError::Permission(_) => "permission_error",
            ProxyError::RateLimit(_) => "rate_limit_error",
            ProxyError::NotFound(_) => "not_found_error",
            ProxyError::Overloaded(_) => "overloaded_error",
            ProxyError::ApiConnection(_) => "api_connection_error",
            ProxyError::Api(_) | ProxyError::Internal(_) => "api_error",
            ProxyError::NotImplemented(_) => "api_error",
        }
    }

    pub fn to_anthropic_error_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.error_type(), self.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = self.to_anthropic_error_response();
        (status, Json(body)).into_response()
    }
}

/// Maps an upstream error (structured JSON body, or a transport failure) to a [`ProxyError`].
///
/// Mirrors the corpus's convention of matching substrings of the upstream
/// `error.type` rather than requiring an exact enum match, since different
/// OpenAI-compatible providers don't agree on the exact spelling.
pub fn map_upstream_error(upstream_type: Option<&str>, message: String) -> ProxyError {
    let Some(kind) = upstream_type else {
        return ProxyError::Api(message);
    };
    let kind = kind.to_ascii_lowercase();

    if kind.contains("auth") || kind.contains("permission") || kind.contains("key") {
        return ProxyError::Authentication(message);
    }
    if kind.contains("rate_limit") {
        return ProxyError::RateLimit(message);
    }
    if kind.contains("invalid_request") || kind.contains("validation") || kind.contains("bad_request") {
        return ProxyError::InvalidRequest(message);
    }
    if kind.contains("not_found") || kind.contains("model_not_found") {
        return ProxyError::NotFound(message);
    }
    if kind.contains("overloaded") || kind.contains("capacity") || kind.contains("unavailable") {
        return ProxyError::Overloaded(message);
    }
    ProxyError::Api(message)
}

/// Translates a non-2xx upstream HTTP body into a [`ProxyError`], tolerating a
/// malformed (non-JSON) error body by surfacing the raw bytes as the message.
pub fn map_upstream_response_body(body: &[u8]) -> ProxyError {
    match serde_json::from_slice::<crate::messages::openai::ErrorEnvelope>(body) {
        Ok(envelope) => map_upstream_error(envelope.error.r#type.as_deref(), envelope.error.message),
        Err(_) => {
            let raw = String::from_utf8_lossy(body).to_string();
            ProxyError::Api(raw)
        }
    }
}

//! C6: upstream error → Anthropic error translation, including the in-band
//! SSE `error` event used when a failure happens after headers have flushed.

use crate::error::{ProxyError, map_upstream_response_body};
use crate::messages::anthropic::{ErrorBody, StreamEvent};

/// Builds the single `error` SSE event emitted when an upstream failure
/// happens mid-stream. The caller is responsible for following this with a
/// `message_stop` event and closing any block that was still open.
pub fn stream_error_event(err: &ProxyError) -> StreamEvent {
    StreamEvent::Error {
        error: ErrorBody {
            kind: err.error_type().to_string(),
            message: err.to_string(),
        },
    }
}

/// Translates a raw, non-2xx upstream response body into a [`ProxyError`].
pub fn translate_response_body(body: &[u8]) -> ProxyError {
    map_upstream_response_body(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_auth_substring_to_authentication_error() {
        let body = br#"{"error":{"type":"invalid_api_key","message":"bad key"}}"#;
        let err = translate_response_body(body);
        assert_eq!(err.error_type(), "authentication_error");
        assert_eq!(err.status_code(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn maps_malformed_body_to_api_error_with_raw_message() {
        let body = b"not json at all";
        let err = translate_response_body(body);
        assert_eq!(err.error_type(), "api_error");
        assert_eq!(err.to_string(), "upstream error: not json at all");
    }

    #[test]
    fn stream_error_event_carries_type_and_message() {
        let err = ProxyError::Overloaded("try later".to_string());
        let event = stream_error_event(&err);
        match event {
            StreamEvent::Error { error } => {
                assert_eq!(error.kind, "overloaded_error");
                assert_eq!(error.message, "upstream overloaded: try later");
            }
            _ => panic!("expected Error variant"),
        }
    }
}

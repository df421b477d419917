//! Upstream transport: sends a translated request to the configured provider
//! and hands back either a parsed unary response or a chunk stream, mapping
//! transport failures and non-2xx bodies to [`ProxyError`] via C6 before any
//! bytes reach the caller.
//!
//! Kept separate from the orchestrator so the orchestrator's branching logic
//! (unary vs. streaming, error vs. success) stays readable; this module only
//! knows how to talk to the wire.

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use secrecy::ExposeSecret;

use crate::config::ProviderConfig;
use crate::error::{ProxyError, map_upstream_response_body};
use crate::messages::openai::{Chunk, Request, Response};

/// A response whose status line has already been inspected: either the
/// upstream's raw success body (unary JSON or the start of an SSE stream),
/// or a translated error ready to surface to the caller.
pub enum Dispatched {
    Unary(Response),
    Stream(reqwest::Response),
}

/// Sends `request` to `provider`'s `/chat/completions` endpoint and resolves
/// the HTTP status before returning, so non-2xx responses become a
/// [`ProxyError`] rather than a stream the caller has to inspect further.
pub async fn dispatch(client: &Client, provider: &ProviderConfig, request: &Request) -> Result<Dispatched, ProxyError> {
    let streaming = request.stream;
    let url = format!("{}/chat/completions", provider.base_url.trim_end_matches('/'));

    let response = client
        .post(url)
        .bearer_auth(provider.api_key.expose_secret())
        .json(request)
        .send()
        .await
        .map_err(|err| ProxyError::ApiConnection(err.to_string()))?;

    if !response.status().is_success() {
        let body = response
            .bytes()
            .await
            .map_err(|err| ProxyError::ApiConnection(err.to_string()))?;
        return Err(map_upstream_response_body(&body));
    }

    if streaming {
        return Ok(Dispatched::Stream(response));
    }

    let body: Response = response
        .json()
        .await
        .map_err(|err| ProxyError::Internal(format!("failed to parse upstream response: {err}")))?;
    Ok(Dispatched::Unary(body))
}

/// Turns a successful streaming upstream response into a stream of parsed
/// `chat.completion.chunk` values. A chunk that fails to parse is reported as
/// a transport-shaped error rather than silently dropped, since the stream
/// translator (C5) needs to know to emit its mid-stream error path.
pub fn chunk_stream(response: reqwest::Response) -> impl Stream<Item = Result<Chunk, ProxyError>> {
    response.bytes_stream().eventsource().filter_map(|event| async move {
        let event = match event {
            Ok(event) => event,
            Err(err) => return Some(Err(ProxyError::ApiConnection(err.to_string()))),
        };
        if event.data == "[DONE]" {
            return None;
        }
        match serde_json::from_str::<Chunk>(&event.data) {
            Ok(chunk) => Some(Ok(chunk)),
            Err(err) => Some(Err(ProxyError::Internal(format!("failed to parse upstream chunk: {err}")))),
        }
    })
}

//! C7: HTTP surface and per-request orchestration.
//!
//! Ties the router (C2), the request/response/stream translators (C3/C4/C5)
//! and the error translator (C6) around the upstream dispatch in
//! [`crate::dispatch`]. Mirrors the corpus's pattern of a thin axum handler
//! that does translate → dispatch → translate-back, with `?` propagating a
//! [`ProxyError`] straight into an [`axum::response::IntoResponse`].

use std::collections::VecDeque;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::to_bytes,
    extract::{FromRequest, Request as AxumRequest, State},
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::dispatch::{self, Dispatched};
use crate::error::ProxyError;
use crate::http_client::http_client;
use crate::messages::anthropic as a;
use crate::messages::openai as o;
use crate::messages::translate::{StreamTranslator, translate_request, translate_response};
use crate::model_router::resolve_model;
use crate::token_counter;

/// Body size limit applied by [`AnthropicJson`], matching Anthropic's own
/// `/v1/messages` request size cap. Read explicitly via [`to_bytes`] rather
/// than axum's `Bytes` extractor, which would apply its own (hidden, and
/// differently-sized) default body limit instead.
const BODY_LIMIT_BYTES: usize = 32 << 20;

/// A `Json`-like extractor whose rejection is the Anthropic-shaped
/// [`ProxyError::InvalidRequest`] (400 `invalid_request_error`) rather than
/// axum's default `Json` extractor, which surfaces a malformed body or an
/// unrecognised content-block/event `type` discriminator as a plain-text
/// `422`. §4.1 requires unknown discriminators to fail with
/// `invalid_request_error`, and §7 requires schema-level violations of the
/// input contract to surface as `invalid_request` — this extractor is where
/// that mapping happens, ahead of the handler body.
pub struct AnthropicJson<T>(pub T);

impl<S, T> FromRequest<S> for AnthropicJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ProxyError;

    async fn from_request(req: AxumRequest, _state: &S) -> Result<Self, Self::Rejection> {
        let bytes = to_bytes(req.into_body(), BODY_LIMIT_BYTES)
            .await
            .map_err(|err| ProxyError::InvalidRequest(format!("failed to read request body: {err}")))?;
        let value = serde_json::from_slice(&bytes)
            .map_err(|err| ProxyError::InvalidRequest(format!("failed to parse request body: {err}")))?;
        Ok(Self(value))
    }
}

#[derive(Clone)]
pub struct AppState(Arc<Config>);

impl AppState {
    pub fn new(config: Config) -> Self {
        Self(Arc::new(config))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "target_llm_provider": state.0.target_provider.as_str(),
    }))
}

async fn count_tokens(
    AnthropicJson(req): AnthropicJson<a::CountTokensRequest>,
) -> Result<impl IntoResponse, ProxyError> {
    let input_tokens = token_counter::count_tokens(&req)?;
    Ok(Json(serde_json::json!({ "input_tokens": input_tokens })))
}

async fn messages(
    State(state): State<AppState>,
    AnthropicJson(req): AnthropicJson<a::Request>,
) -> Result<Response, ProxyError> {
    let config = state.0;
    log::info!("dispatching request model={} stream={}", req.model, req.stream);

    let upstream_model = resolve_model(&config.routes, &req.model)?;
    let upstream_request = translate_request(&req, &upstream_model);
    let client = http_client();

    match dispatch::dispatch(&client, &config.provider, &upstream_request).await {
        Ok(Dispatched::Unary(body)) => {
            let response = translate_response(&body, &req.model);
            log::info!("request complete model={} stop_reason={:?}", req.model, response.stop_reason);
            Ok(Json(response).into_response())
        }
        Ok(Dispatched::Stream(upstream_response)) => {
            let translator = StreamTranslator::new(req.model.clone());
            let chunks = dispatch::chunk_stream(upstream_response);
            Ok(Sse::new(sse_stream(translator, chunks)).into_response())
        }
        Err(err) => {
            log::warn!("upstream dispatch failed: {err}");
            Err(err)
        }
    }
}

type ChunkStream = Pin<Box<dyn Stream<Item = Result<o::Chunk, ProxyError>> + Send>>;

/// Drives the stream translator one upstream chunk at a time, queueing the
/// (possibly several) Anthropic SSE events each chunk produces and draining
/// that queue before pulling the next chunk. When the upstream body ends
/// without ever sending a `finish_reason`, the translator's own `finish()`
/// synthesises the closing sequence; once the translator has closed, further
/// calls return an empty vec and the combinator ends the stream.
fn sse_stream(
    translator: StreamTranslator,
    chunks: impl Stream<Item = Result<o::Chunk, ProxyError>> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let boxed: ChunkStream = Box::pin(chunks);
    futures::stream::unfold(
        (translator, boxed, VecDeque::new()),
        |(mut translator, mut chunks, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((to_sse_event(event), (translator, chunks, pending)));
                }
                match chunks.next().await {
                    Some(Ok(chunk)) => pending.extend(translator.push_chunk(&chunk)),
                    Some(Err(err)) => pending.extend(translator.error(&err)),
                    None => {
                        let closing = translator.finish();
                        if closing.is_empty() {
                            return None;
                        }
                        pending.extend(closing);
                    }
                }
            }
        },
    )
}

fn to_sse_event(event: a::StreamEvent) -> Result<Event, Infallible> {
    let data = serde_json::to_string(&event).unwrap_or_else(|err| {
        log::error!("failed to serialize stream event: {err}");
        r#"{"type":"error","error":{"type":"api_error","message":"event serialization failed"}}"#.to_string()
    });
    Ok(Event::default().event(event.event_name()).data(data))
}

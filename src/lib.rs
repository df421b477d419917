//! Reverse proxy that translates the Anthropic Messages API into an
//! OpenAI-compatible upstream protocol.
//!
//! The module layout mirrors the protocol pipeline: [`config`] resolves
//! process settings, [`model_router`] maps a caller-facing model id onto the
//! configured upstream model, [`messages`] holds the wire schemas and the
//! request/response/stream translators, [`dispatch`] talks to the upstream
//! HTTP API, and [`server`] wires it all together behind an axum [`Router`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod http_client;
pub mod messages;
pub mod model_router;
pub mod server;
pub mod token_counter;

pub use server::{AppState, router};

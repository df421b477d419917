//! C2: maps a caller-supplied model identifier to the upstream model id to
//! actually send. Never silently substitutes a default when the lookup
//! misses — that is ambiguous, surprising behaviour and is treated as a bug
//! rather than a convenience.

use crate::config::ModelRoutes;
use crate::error::ProxyError;

/// Resolves `caller_model` against the configured routing table.
///
/// Passthrough providers (where the caller id is also a valid upstream id,
/// e.g. when running against `anthropic` directly) should populate the
/// routing table with an identity entry rather than bypassing this
/// function, so a genuinely unconfigured model still fails loudly.
pub fn resolve_model(routes: &ModelRoutes, caller_model: &str) -> Result<String, ProxyError> {
    routes
        .resolve(caller_model)
        .map(str::to_string)
        .ok_or_else(|| ProxyError::ModelUnresolvable(caller_model.to_string()))
}

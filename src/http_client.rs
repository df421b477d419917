//! Shared upstream HTTP client (ambient, §5 "Shared resources").
//!
//! A single pooled [`reqwest::Client`] is built once and cloned into every
//! request; `reqwest::Client` is internally `Arc`-backed so cloning is cheap
//! and all clones share the same connection pool.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::Client;

/// Returns the process-wide upstream HTTP client, building it on first use.
pub fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            Client::builder()
                .timeout(Duration::from_secs(300))
                .pool_idle_timeout(Some(Duration::from_secs(90)))
                .tcp_keepalive(Some(Duration::from_secs(60)))
                .build()
                .expect("failed to build upstream HTTP client")
        })
        .clone()
}

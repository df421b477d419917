//! Process entrypoint: loads configuration, wires the router, and serves it.

use anthropic_llm_proxy::{AppState, config::Config, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|err| anyhow::anyhow!("configuration error: {err}"))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    let port = config.port;
    let target_provider = config.target_provider.as_str();
    let app = router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("listening on :{port}, forwarding to {target_provider}");
    axum::serve(listener, app).await?;

    Ok(())
}

#![forbid(unsafe_code)]

use std::{env, net::SocketAddr, sync::Arc};

use funnel_adapter::{router, RelayRuntime};
use funnel_engines::config::FunnelConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let bind = env::var("FUNNEL_HTTP_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
    let addr: SocketAddr = bind.parse()?;
    let config = FunnelConfig::from_env();
    if config.postback_url.is_none() {
        tracing::warn!("FUNNEL_POSTBACK_URL is not set, relay events will be accepted but not forwarded");
    }

    let runtime = Arc::new(RelayRuntime::from_config(&config));
    let app = router(runtime);

    tracing::info!(
        %addr,
        max_attempts = config.postback_max_attempts,
        timeout_ms = config.http_timeout_ms,
        "funnel_relay_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

//! tm-relay: streaming relay that forwards prefixed requests to a
//! configurable upstream.

use std::sync::Arc;

use tm_relay::config::RelayConfig;
use tm_relay::relay::engine::RelayEngine;
use tm_relay::relay::upstream::UpstreamClient;
use tm_relay::server::{self, AppState};
use tm_relay::stats::RelayStats;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("TM_RELAY_CONFIG").ok())
        .unwrap_or_else(|| "tm-relay.toml".to_string());

    let upstream_override = args
        .iter()
        .position(|a| a == "--upstream-url")
        .and_then(|i| args.get(i + 1).cloned());

    // Load configuration
    let mut config = RelayConfig::load(&config_path)?;

    // CLI override takes precedence over TOML and env vars
    if let Some(url) = upstream_override {
        config.upstream.base_url = url;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        // Initialize tracing (OTLP export is optional — falls back to fmt-only)
        let _tracing_guard = tm_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            path_prefix = %config.relay.path_prefix,
            upstream_base_url = %config.upstream.base_url,
            "Starting tm-relay"
        );

        run(config).await
    })
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let stats = RelayStats::new();

    let upstream = UpstreamClient::new(&config.upstream)?;
    let engine = RelayEngine::new(config.clone(), upstream, stats.clone());

    let state = AppState {
        config,
        engine,
        stats,
    };

    server::run(state).await
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mosaic_config::{apply_env_overrides, ensure_workspace_config, validate_config};
use mosaic_gateway::load_gateway;
use mosaic_store::{AnalysisLogStore, open_database};
use mosaicd::cli::parse_cli;
use mosaicd::logging::init_tracing;
use mosaicd::{AnalysisService, router};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli();
    init_tracing(cli.log_format);

    let workspace = cli.workspace.clone();
    let config = ensure_workspace_config(&workspace)
        .with_context(|| format!("failed to load config under {}", workspace.display()))?;
    let config = apply_env_overrides(config, |name| std::env::var(name).ok());
    let config = cli.apply_overrides(config);

    for warning in validate_config(&config) {
        tracing::warn!(code = warning.code, "{}", warning.message);
    }

    let db = open_database(&config.storage, &workspace).with_context(|| {
        format!(
            "failed to open {} storage",
            config.storage.backend.as_str()
        )
    })?;
    let store = AnalysisLogStore::new(db);

    let loaded = load_gateway(&config.analysis).context("failed to build analysis gateway")?;
    tracing::info!(
        provider = %loaded.provider_name,
        endpoint = loaded.endpoint.as_deref().unwrap_or("-"),
        storage = config.storage.backend.as_str(),
        "analysis gateway ready"
    );

    let service = AnalysisService::new(
        Arc::from(loaded.gateway),
        store,
        Duration::from_secs(config.analysis.cache_window_secs),
    );

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    let addr = listener.local_addr().context("failed to read bound address")?;
    tracing::info!(%addr, "climate mosaic service listening");

    axum::serve(listener, router(Arc::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("received ctrl-c, shutting down");
}

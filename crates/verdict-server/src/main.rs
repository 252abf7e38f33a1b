// ─────────────────────────────────────────────────────────────────────
// Director-Class AI — Verdict Kernel Server
// ─────────────────────────────────────────────────────────────────────
//! `verdict-server`: loads the verifier and serves the HTTP boundary.
//!
//! Configuration comes from the JSON file named by `VERDICT_CONFIG` (if
//! set), then `VERDICT_*` environment overrides. Logging follows
//! `RUST_LOG` (default `info`).

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use verdict_core::{HeuristicLoader, MetricsRegistry, VerificationService};
use verdict_server::{serve, AppState};
use verdict_types::KernelConfig;

fn load_config() -> Result<KernelConfig> {
    let mut config = match std::env::var("VERDICT_CONFIG") {
        Ok(path) => {
            let text = std::fs::read_to_string(Path::new(&path))
                .with_context(|| format!("failed to read config file {path}"))?;
            KernelConfig::from_json(&text).with_context(|| format!("invalid config file {path}"))?
        }
        Err(_) => KernelConfig::default(),
    };
    config
        .apply_env()
        .context("invalid VERDICT_* environment override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = load_config()?;
    let registry = Arc::new(
        MetricsRegistry::with_process_metrics().context("failed to create metrics registry")?,
    );

    let service = Arc::new(VerificationService::new(
        config.verifier.clone(),
        Arc::new(HeuristicLoader),
        registry.verifier_metrics().clone(),
    ));
    {
        let service = Arc::clone(&service);
        let loaded = tokio::task::spawn_blocking(move || service.load_model())
            .await
            .context("model load task failed")?;
        // Keep serving; /readyz reports it and POST /v1/model/load retries.
        if let Err(e) = loaded {
            log::error!("starting without a verifier model: {e}");
        }
    }

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    log::info!(
        "verdict-server listening on {}",
        listener.local_addr().context("listener has no local address")?
    );

    serve(listener, AppState::new(service, registry), shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

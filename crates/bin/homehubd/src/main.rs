//! # homehubd — homehub daemon
//!
//! Composition root that wires plugins into the kernel and runs it.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize logging
//! - Build the [`Hub`] and register enabled plugins
//! - Load declared entities, flows and scenes (bad items are skipped)
//! - Enter `Running`, then wait for SIGTERM/SIGINT
//! - Shut the kernel down gracefully and report what was cut short
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer — no domain logic belongs here.

mod config;

use std::sync::Arc;

use anyhow::Context as _;
use tracing_subscriber::EnvFilter;

use homehub_adapter_virtual::VirtualPlugin;
use homehub_app::hub::Hub;
use homehub_app::load::LoadReport;

use crate::config::Config;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter).context("invalid log filter")?)
        .init();

    let hub = Hub::new(config.core.scheduler_config());

    // Plugins
    if config.plugins.virtual_enabled {
        hub.add_plugin(Arc::new(VirtualPlugin::new()))
            .context("failed to register the virtual plugin")?;
    }

    // Declarative items
    summarize("entities", &hub.registry().load_entities(&config.entities));
    summarize("flows", &hub.flows().load_flows(&config.flows).await);
    summarize("scenes", &hub.registry().add_scenes(&config.scenes));

    hub.start();
    tracing::info!(plugins = ?hub.plugins(), "homehubd running");

    shutdown_signal().await.context("failed to listen for shutdown signals")?;
    tracing::info!("shutdown requested");

    let report = hub.shutdown().await?;
    for err in &report.protected_errors {
        tracing::error!(%err, "protected task failed during shutdown");
    }
    tracing::info!(
        uptime = ?report.uptime,
        cancelled = report.cancelled,
        dropped_jobs = report.dropped_jobs,
        "homehubd stopped"
    );
    Ok(())
}

fn summarize(kind: &str, report: &LoadReport) {
    tracing::info!(
        kind,
        loaded = report.loaded.len(),
        skipped = report.failed.len(),
        "configuration loaded"
    );
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

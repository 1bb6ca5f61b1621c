//! Sentinel — collateral risk & liquidation engine.
//!
//! Wires the price oracle, vault health monitor and liquidation manager
//! together:
//! - Multi-source price aggregation with deviation rejection
//! - Price history, volatility and trend analytics
//! - Periodic vault health sweeps with transition alerts
//! - Liquidation lifecycle with an ordered proceeds waterfall

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sentinel_core::{EngineConfig, HealthMonitor, LogAlertSink, RiskRegistry};
use sentinel_feeds::{HttpPriceSource, SimulatedPriceSource};
use sentinel_oracle::{
    AggregationEngine, PriceHistory, SourceConfig, SourceRegistry, SystemClock,
};

/// Environment variable names.
mod env {
    pub const CONFIG_PATH: &str = "SENTINEL_CONFIG";
    pub const PRIMARY_FEED_URL: &str = "SENTINEL_PRIMARY_FEED_URL";
    pub const SECONDARY_FEED_URL: &str = "SENTINEL_SECONDARY_FEED_URL";
}

const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sentinel_core=debug,sentinel_oracle=debug")),
        )
        .init();

    info!("Starting Sentinel risk engine");

    let config_path =
        std::env::var(env::CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = EngineConfig::from_file(&config_path)
        .with_context(|| format!("loading engine config from {config_path}"))?;
    info!(
        config = %config_path,
        assets = config.assets.len(),
        sweep_interval_secs = config.monitor.sweep_interval_secs,
        "Configuration loaded"
    );

    let clock = Arc::new(SystemClock);

    // Price sources
    let source_registry = Arc::new(SourceRegistry::new());
    let aggregator = Arc::new(AggregationEngine::new(source_registry.clone(), clock.clone()));
    register_sources(&source_registry, &aggregator)?;

    // Risk parameters and feed policies
    let registry = Arc::new(RiskRegistry::from_config(&config)?);
    for symbol in registry.symbols() {
        let risk = registry.get(&symbol)?;
        aggregator
            .register_asset(risk.feed)
            .map_err(|e| anyhow::anyhow!("invalid feed policy for {symbol}: {e}"))?;
    }
    info!(assets = ?registry.symbols(), "Risk registry loaded");

    // Health monitoring
    let history = Arc::new(PriceHistory::new(clock.clone()));
    let monitor = Arc::new(
        HealthMonitor::new(
            aggregator.clone(),
            history.clone(),
            registry.clone(),
            config.monitor.clone(),
            clock,
        )
        .with_sink(Arc::new(LogAlertSink)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.run(shutdown_rx).await }
    });

    info!("Sentinel running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;

    info!("Shutdown requested, draining");
    shutdown_tx.send(true).ok();
    monitor_handle.await.context("monitor task panicked")?;
    info!("Shutdown complete");

    Ok(())
}

/// Register the configured price sources and their adapters.
///
/// HTTP feeds come from the environment; when none are set, a pair of
/// simulated feeds keeps the engine observable without upstream access.
fn register_sources(
    registry: &Arc<SourceRegistry>,
    aggregator: &Arc<AggregationEngine>,
) -> Result<()> {
    let primary_url = std::env::var(env::PRIMARY_FEED_URL).ok();
    let secondary_url = std::env::var(env::SECONDARY_FEED_URL).ok();

    if primary_url.is_none() && secondary_url.is_none() {
        info!("No feed URLs configured; using simulated sources");
        for (id, amplitude_bp) in [("sim-primary", 40), ("sim-secondary", 60)] {
            registry
                .upsert(source_config(id, String::new(), 50))
                .map_err(|e| anyhow::anyhow!("source {id}: {e}"))?;
            aggregator.register_adapter(Arc::new(SimulatedPriceSource::new(id, 2.50, amplitude_bp)));
        }
        return Ok(());
    }

    if let Some(url) = primary_url {
        registry
            .upsert(source_config("primary", url.clone(), 60))
            .map_err(|e| anyhow::anyhow!("source primary: {e}"))?;
        aggregator.register_adapter(Arc::new(HttpPriceSource::new("primary", url)));
        info!(source = "primary", "HTTP feed registered");
    }
    if let Some(url) = secondary_url {
        registry
            .upsert(source_config("secondary", url.clone(), 40))
            .map_err(|e| anyhow::anyhow!("source secondary: {e}"))?;
        aggregator.register_adapter(Arc::new(HttpPriceSource::new("secondary", url)));
        info!(source = "secondary", "HTTP feed registered");
    }
    Ok(())
}

fn source_config(id: &str, endpoint: String, trust_weight: u32) -> SourceConfig {
    SourceConfig {
        id: id.to_string(),
        name: id.to_string(),
        endpoint,
        trust_weight,
        active: true,
        last_update_ms: 0,
        reliability: 95.0,
    }
}

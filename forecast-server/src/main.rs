use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use forecast_common::PoolName;
use forecast_server::config::Config;
use forecast_server::device::{Device, DeviceInventory, DeviceResolver};
use forecast_server::engine::{DriftForecaster, ResourceSet};
use forecast_server::gateway::HealthMonitor;
use forecast_server::state::AppState;
use forecast_server::{api, logging};
use tokio::net::TcpListener;
use tokio::sync::watch;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle --version / -V
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("forecast-server {}", VERSION);
        return Ok(());
    }

    let config = Config::load().map_err(|e| {
        format!(
            "Failed to load configuration: {}. \
             Check config.toml or the FORECAST__* environment variables.",
            e
        )
    })?;
    logging::init_tracing(&config.logging);
    config.validate()?;

    tracing::info!("Starting forecast-server {}", VERSION);

    // Devices are probed once; every later lookup reads this snapshot.
    let inventory = DeviceInventory::from_config(&config.device);
    let resolved = DeviceResolver::new(inventory).resolve(&config.device.selection)?;
    match &resolved.warning {
        Some(warning) => tracing::warn!("{}", warning),
        None => tracing::info!(
            "Using device {} (requested '{}')",
            resolved.device,
            resolved.spec.raw
        ),
    }

    let resources = ResourceSet::new()
        .with(
            PoolName::Fast,
            Arc::new(DriftForecaster::new(resolved.device, &config.prediction)),
        )
        .with(
            PoolName::Slow,
            Arc::new(DriftForecaster::new(Device::Cpu, &config.prediction)),
        );

    let state = Arc::new(AppState::build(config.clone(), resolved, resources)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor = HealthMonitor::new(
        state.service.router().clone(),
        config.routing.health_interval(),
    )
    .with_admission(state.admission.clone());
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    let app = api::router(state);

    let addr = format!("{}:{}", config.api.host, config.api.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown signal received");
    })
    .await?;

    let _ = shutdown_tx.send(true);
    let _ = monitor_handle.await;

    Ok(())
}

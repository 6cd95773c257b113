//! Satellite Modbus Proxy (`satproxy`)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::serve;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use common::service_bootstrap::ServiceInfo;
use satproxy::{
    core::{
        bootstrap::{self, Args, ServiceArgs},
        config::{SatProxyConfig, DEFAULT_API_PORT},
    },
    routes::create_routes,
    shutdown_services, spawn_reload_task, start_proxy_services, wait_for_shutdown, AppState,
    SatProxyError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let service_args: ServiceArgs = args.clone().into();

    let service_info = ServiceInfo::new(
        "satproxy",
        "Satellite Modbus Proxy - compact payloads served as Modbus TCP",
        DEFAULT_API_PORT,
    )
    .with_version(env!("CARGO_PKG_VERSION"));

    // Config first: it carries the logging settings
    let config_path = PathBuf::from(&service_args.config);
    let config = SatProxyConfig::load(&config_path)?;

    bootstrap::initialize_logging(&service_args, &service_info, &config.logging)?;
    if !args.no_color {
        common::service_bootstrap::print_startup_banner(&service_info);
    }

    // Validation mode: validate and exit
    if args.validate {
        bootstrap::validate_configuration(&config)?;
        info!("Validation completed successfully");
        return Ok(());
    }

    let bind_address = bootstrap::determine_bind_address(args.bind_address, &config.api);
    let addr: SocketAddr = bind_address.parse().map_err(|e| {
        SatProxyError::config(format!("Invalid bind address '{}': {}", bind_address, e))
    })?;

    let state = Arc::new(AppState::new(config, Some(config_path))?);
    let shutdown_token = CancellationToken::new();

    let running = start_proxy_services(&state, shutdown_token.clone()).await?;
    let mut tasks = running.tasks();
    tasks.push(spawn_reload_task(
        Arc::clone(&state),
        common::shutdown::reload_requests(),
        shutdown_token.clone(),
    ));

    let app = create_routes(Arc::clone(&state));
    let socket = match addr {
        SocketAddr::V4(_) => tokio::net::TcpSocket::new_v4(),
        SocketAddr::V6(_) => tokio::net::TcpSocket::new_v6(),
    }
    .map_err(|e| SatProxyError::io(format!("Failed to create socket: {}", e)))?;
    socket
        .set_reuseaddr(true)
        .map_err(|e| SatProxyError::io(format!("Failed to set SO_REUSEADDR: {}", e)))?;
    socket
        .bind(addr)
        .map_err(|e| SatProxyError::io(format!("Failed to bind to {}: {}", addr, e)))?;
    let listener = socket
        .listen(1024)
        .map_err(|e| SatProxyError::io(format!("Failed to listen: {}", e)))?;

    info!("API server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);
    let server = serve(listener, app);
    let server_token = shutdown_token.clone();
    tasks.push(tokio::spawn(async move {
        let shutdown = async move { server_token.cancelled().await };
        if let Err(e) = server.with_graceful_shutdown(shutdown).await {
            error!("Server error: {}", e);
        }
    }));

    wait_for_shutdown().await;
    info!("Shutdown signal received");
    shutdown_services(shutdown_token, tasks, Duration::from_secs(10)).await;

    info!("Service shutdown complete");
    Ok(())
}

// ABOUTME: Gatehouse auth server binary: configuration, wiring, and the HTTP listener
// ABOUTME: Runs the OAuth protocol routes, dashboard routes, health endpoints, and the session sweep task
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

#![allow(clippy::expect_used)] // Safe: startup-time failures should abort with a clear message

use anyhow::Result;
use clap::Parser;
use gatehouse_auth_server::{
    config::environment::ServerConfig,
    context::ServerResources,
    dashboard::DashboardRoutes,
    database_plugins::{factory::Database, DatabaseProvider},
    health::HealthRoutes,
    logging::LoggingConfig,
    oauth2_server::OAuth2Routes,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "gatehouse-server",
    about = "Gatehouse OAuth 2.0 authorization server"
)]
struct Args {
    /// Override the HTTP port from the environment
    #[arg(long)]
    port: Option<u16>,

    /// Storage URL (memory:// is the reference backend)
    #[arg(long, default_value = "memory://")]
    database_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    LoggingConfig::from_env().init()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(port) = args.port {
        config.http_port = port;
    }

    let database = Database::new(&args.database_url)?;
    info!("storage backend: {}", database.backend_info());

    let resources = Arc::new(ServerResources::new(database, config));

    spawn_session_sweep(resources.clone());

    let router = OAuth2Routes::routes(resources.clone())
        .merge(DashboardRoutes::routes(resources.clone()))
        .merge(HealthRoutes::routes())
        .layer(TraceLayer::new_for_http());

    let bind = format!(
        "{}:{}",
        resources.config.bind_address, resources.config.http_port
    );
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("gatehouse auth server listening on {bind}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gatehouse auth server stopped");
    Ok(())
}

/// Periodic sweep of expired sessions
///
/// Expiry is enforced at read time regardless; the sweep only reclaims
/// storage for sessions nobody will touch again.
fn spawn_session_sweep(resources: Arc<ServerResources>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            match resources
                .database
                .delete_expired_sessions(chrono::Utc::now())
                .await
            {
                Ok(0) => {}
                Ok(removed) => info!(removed, "swept expired sessions"),
                Err(e) => warn!("session sweep failed: {e:#}"),
            }
        }
    });
}

/// Resolve on SIGINT
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install SIGINT handler");
    info!("shutdown signal received");
}

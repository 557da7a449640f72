//! Gateway entry-point: loads settings, prepares storage and serves HTTP.

mod server;

use std::io;

use actix_web::web;
use ortho_config::OrthoConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use gateway::inbound::http::health::HealthState;
use gateway::outbound::persistence::{DbPool, PoolLimits, run_migrations};
use gateway::settings::GatewaySettings;

use server::{ServerConfig, create_server};

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}

/// Application bootstrap.
#[actix_web::main]
async fn main() -> io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = GatewaySettings::load().map_err(|err| io::Error::other(err.to_string()))?;
    let bind_addr = settings.bind_addr().map_err(io::Error::other)?;
    let mut config = ServerConfig::new(settings.clone(), bind_addr);

    if let Some(database_url) = settings.database_url.as_deref() {
        run_migrations(database_url).await.map_err(io::Error::other)?;
        let limits = PoolLimits::with_max_size(settings.db_pool_max_size());
        let pool = DbPool::connect(database_url, limits)
            .await
            .map_err(io::Error::other)?;
        config = config.with_db_pool(pool);
    }

    let health_state = web::Data::new(HealthState::new());
    let server = create_server(health_state.clone(), config)?;
    let handle = server.handle();
    actix_web::rt::spawn(async move {
        shutdown_signal().await;
        health_state.mark_draining();
        handle.stop(true).await;
    });
    info!(%bind_addr, "gateway listening");
    server.await
}

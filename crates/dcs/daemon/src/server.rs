//! Server setup and lifecycle management

use crate::api::{create_router, AppState};
use crate::config::DcsConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::services::Services;
use dcs_types::SystemClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// DCS Daemon Server
pub struct Server {
    config: DcsConfig,
    services: Services,
}

impl Server {
    /// Create a new server with the given configuration
    pub async fn new(config: DcsConfig) -> DaemonResult<Self> {
        let services = Services::build(&config, Arc::new(SystemClock)).await?;
        Ok(Self { config, services })
    }

    /// Run until a shutdown signal, then stop the sweeper and the
    /// revocation reactor and close the ledger.
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = create_router(AppState::new(&self.services), &self.config.server);
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("DCS daemon listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = self.config.sweeper.enabled.then(|| {
            self.services
                .sweeper(Duration::from_secs(self.config.sweeper.interval_secs))
                .spawn(shutdown_rx)
        });

        // Run server with graceful shutdown
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()));

        tracing::info!("DCS daemon shutting down");

        let _ = shutdown_tx.send(true);
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "sweeper did not stop cleanly");
            }
        }
        self.services.shutdown().await?;

        served
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

//! Server setup and lifecycle management

use std::net::SocketAddr;

use lorekeeper::{Lorekeeper, LorekeeperConfig, SharedLorekeeper};
use tokio::net::TcpListener;

use crate::api::{create_router, AppState};
use crate::error::{GatewayError, GatewayResult};

/// Lorekeeper gateway server
pub struct Server {
    listen_addr: SocketAddr,
    lorekeeper: SharedLorekeeper,
}

impl Server {
    /// Create a new server around an assembled core
    pub fn new(lorekeeper: SharedLorekeeper, listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            lorekeeper,
        }
    }

    /// Assemble the core from configuration; invalid settings are a config error
    pub fn from_config(config: LorekeeperConfig, listen_addr: SocketAddr) -> GatewayResult<Self> {
        let lorekeeper = Lorekeeper::new(config)
            .map_err(|e| GatewayError::Config(e.to_string()))?
            .shared();
        Ok(Self::new(lorekeeper, listen_addr))
    }

    pub fn lorekeeper(&self) -> &SharedLorekeeper {
        &self.lorekeeper
    }

    /// Run until a shutdown signal, then stop the core gracefully
    pub async fn run(self) -> GatewayResult<()> {
        let state = AppState::new(self.lorekeeper.clone());
        let app = create_router(state);

        let listener = TcpListener::bind(self.listen_addr).await?;
        tracing::info!(addr = %self.listen_addr, "Lorekeeper gateway listening");

        self.lorekeeper.start_background();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| GatewayError::Server(e.to_string()))?;

        tracing::info!("Lorekeeper gateway shutting down");
        self.lorekeeper.shutdown().await;

        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

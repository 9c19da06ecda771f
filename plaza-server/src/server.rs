//! Server state and HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::lifecycle::SessionController;
use crate::reconciler::Reconciler;
use crate::registry::Registry;
use crate::transport::ConnectionTable;

/// Shared server state, handed to every request handler.
pub struct SharedState {
    pub config: ServerConfig,
    /// Outbound queues of every open WebSocket, joined or not.
    pub connections: Arc<ConnectionTable>,
    pub controller: Arc<SessionController>,
    pub started_at: Instant,
}

impl SharedState {
    pub fn registry(&self) -> &Arc<Registry> {
        self.controller.registry()
    }
}

pub struct Server {
    config: ServerConfig,
    clock: Arc<dyn Clock>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a server with a custom clock (for testing).
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    fn build_state(&self) -> Arc<SharedState> {
        let connections = Arc::new(ConnectionTable::new(self.config.send_queue));
        let registry = Arc::new(Registry::new(self.clock.clone()));
        let controller = Arc::new(SessionController::new(
            registry,
            connections.clone(),
            self.clock.clone(),
            self.config.limits(),
        ));
        Arc::new(SharedState {
            config: self.config.clone(),
            connections,
            controller,
            started_at: Instant::now(),
        })
    }

    /// Serve until Ctrl-C or SIGTERM, then drain and return.
    pub async fn run(self) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        let state = self.build_state();
        let reconciler =
            Reconciler::new(state.controller.clone(), self.config.reconcile_interval()).spawn();

        let router = crate::web::router(state);
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error");

        reconciler.shutdown().await;
        tracing::info!("Server stopped");
        served
    }

    /// Start the server and return the bound address + task handle (for testing).
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {addr}");

        let state = self.build_state();
        let reconciler =
            Reconciler::new(state.controller.clone(), self.config.reconcile_interval()).spawn();
        let router = crate::web::router(state);

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router).await;
            reconciler.shutdown().await;
            served.context("HTTP server error")
        });

        Ok((addr, handle))
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

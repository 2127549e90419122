//! HTTP API server for the relay
//!
//! One axum server exposes the duplex call stream under `/ws` and the
//! health and readiness probes at the root.

pub mod health;
pub mod stream;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::orchestrator::Orchestrator;

/// Shared state for API handlers
pub struct ApiState {
    /// The session orchestrator
    pub orchestrator: Arc<Orchestrator>,
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a server around an orchestrator
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, port: u16) -> Self {
        Self {
            state: Arc::new(ApiState { orchestrator }),
            port,
        }
    }

    /// Build the router with all routes
    fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .nest("/ws", stream::router(self.state.clone()))
            .merge(health::router(self.state.clone()))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
    }

    /// Run the server until shutdown.
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

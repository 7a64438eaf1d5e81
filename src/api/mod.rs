//! HTTP listener for the relay
//!
//! Any path accepts a WebSocket upgrade; a plain request gets `200 OK`.
//! `/health` additionally reports liveness as JSON.

pub mod health;
pub mod websocket;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::relay::Relay;

/// Relay HTTP server
pub struct ApiServer {
    relay: Relay,
    host: String,
    port: u16,
}

impl ApiServer {
    /// Create a new server bound to `host:port` once run
    pub fn new(relay: Relay, host: impl Into<String>, port: u16) -> Self {
        Self {
            relay,
            host: host.into(),
            port,
        }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let router = Router::new()
            .merge(health::router())
            .merge(websocket::router(self.relay.clone()));

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind relay on {addr}: {e}")))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener
    ///
    /// # Errors
    ///
    /// Returns error if the server fails while running
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "HTTP & WebSocket relay listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Transport(format!("relay server error: {e}")))?;

        Ok(())
    }

    /// Run the server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

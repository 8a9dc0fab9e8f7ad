//! HTTP server: chat streaming, relay stats, certificate facade
//!
//! Routes are declared as [`RouteGroup`]s in [`route_groups`], which is the
//! single place the public surface is enumerated.

mod chat;
mod ledger;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::ledger::Ledger;
use crate::relay::{PipelineSettings, RelayPipeline, UpstreamCaller};

/// Shared application state for all handlers
pub struct AppState {
    pub config: Config,
    pub pipeline: RelayPipeline,
    pub ledger: Arc<dyn Ledger>,
    /// Cancelled on server shutdown; parent of every session's disconnect token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, upstream: Arc<dyn UpstreamCaller>, ledger: Arc<dyn Ledger>) -> Self {
        let pipeline = RelayPipeline::new(upstream, PipelineSettings::from(&config.relay));
        Self {
            config,
            pipeline,
            ledger,
            shutdown: CancellationToken::new(),
        }
    }
}

/// A named set of routes mounted under one prefix
pub struct RouteGroup {
    pub name: &'static str,
    pub prefix: &'static str,
    routes: fn() -> Router<Arc<AppState>>,
}

/// Every route group the server mounts
pub fn route_groups() -> Vec<RouteGroup> {
    vec![
        RouteGroup {
            name: "health",
            prefix: "/",
            routes: || Router::new().route("/health", get(health_handler)),
        },
        RouteGroup {
            name: "chat",
            prefix: "/api/v1/chat",
            routes: chat::routes,
        },
        RouteGroup {
            name: "ledger",
            prefix: "/api",
            routes: ledger::routes,
        },
    ]
}

/// Create the router with all route groups mounted
pub fn create_router(state: Arc<AppState>) -> Router {
    route_groups()
        .into_iter()
        .fold(Router::new(), |router, group| {
            let routes = (group.routes)();
            if group.prefix == "/" {
                router.merge(routes)
            } else {
                router.nest(group.prefix, routes)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The chat relay HTTP server
pub struct RelayServer {
    state: Arc<AppState>,
}

impl RelayServer {
    pub fn new(config: Config, upstream: Arc<dyn UpstreamCaller>, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            state: Arc::new(AppState::new(config, upstream, ledger)),
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Bind and serve until Ctrl+C or SIGTERM
    pub async fn serve(&self) -> Result<()> {
        let addr: SocketAddr = self
            .state
            .config
            .server
            .listen_addr
            .parse()
            .map_err(|e| RelayError::Config(format!("Invalid listen address: {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RelayError::Server(format!("Failed to bind to {addr}: {e}")))?;

        self.serve_on(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `signal` resolves
    ///
    /// Open relay sessions are disconnected when `signal` fires so graceful
    /// shutdown does not wait on long-running streams.
    pub async fn serve_on(
        &self,
        listener: TcpListener,
        signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener
            .local_addr()
            .map_err(|e| RelayError::Server(format!("Failed to read local address: {e}")))?;

        tracing::info!("Starting chat relay server on {addr}");
        for group in route_groups() {
            tracing::info!("Mounted route group '{}' at {}", group.name, group.prefix);
        }
        tracing::info!(
            "Upstream model: {}, session timeout: {}s",
            self.state.config.chat.model,
            self.state.config.relay.session_timeout_secs
        );

        let shutdown = self.state.shutdown.clone();
        let app = create_router(self.state());

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                signal.await;
                shutdown.cancel();
            })
            .await
            .map_err(|e| RelayError::Server(format!("Server error: {e}")))?;

        tracing::info!("Chat relay server shut down gracefully");
        Ok(())
    }
}

/// Health check endpoint - returns JSON status
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub(crate) fn create_error_response(status: StatusCode, error_type: &str, message: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
        }
    });
    (status, Json(body)).into_response()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

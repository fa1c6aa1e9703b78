//! HTTP server with coordinated graceful shutdown.

use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    config::Config,
    error::Result,
    middleware::{request_id_layer, request_id_propagation_layer, sensitive_headers_layer},
    shutdown::ShutdownHandle,
};

/// Server instance
pub struct Server {
    config: Config,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Create a new server instance, signaling the given handle when the
    /// process receives SIGINT/SIGTERM.
    pub fn new(config: Config, shutdown: ShutdownHandle) -> Self {
        Self { config, shutdown }
    }

    /// Run the server with the given router.
    ///
    /// Once the OS signal fires, the listener stops accepting connections
    /// and the shared [`ShutdownHandle`] is signaled so SSE write loops can
    /// drain independently. `serve` then waits up to `shutdown.drain_secs`
    /// for `axum::serve` to finish flushing in-flight requests.
    pub async fn serve(self, app: Router) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.service.port));

        tracing::info!("starting {} on {}", self.config.service.name, addr);
        self.log_middleware_config();

        let body_limit = self.config.middleware.body_limit_mb * 1024 * 1024;
        let cors_layer = self.build_cors_layer();

        let app = app
            .layer(cors_layer)
            .layer(CompressionLayer::new())
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(self.config.service.timeout_secs),
            ))
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            )
            .layer(sensitive_headers_layer())
            .layer(request_id_propagation_layer())
            .layer(request_id_layer())
            .layer(CatchPanicLayer::new());

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("server listening on {}", addr);

        let shutdown = self.shutdown.clone();
        let drain_timeout = self.config.shutdown.drain_timeout();

        let serve_future = axum::serve(listener, app).with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.signal();
        });

        match tokio::time::timeout(drain_timeout, serve_future).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(
                    "drain window of {:?} elapsed before graceful shutdown finished",
                    drain_timeout
                );
            }
        }

        tracing::info!("server shutdown complete");

        Ok(())
    }

    /// Log middleware configuration for debugging
    fn log_middleware_config(&self) {
        tracing::info!("middleware configuration:");
        tracing::info!("  - panic recovery: enabled");
        tracing::info!("  - request id tracking: enabled");
        tracing::info!("  - sensitive header masking: enabled");
        tracing::info!(
            "  - request body limit: {} MB",
            self.config.middleware.body_limit_mb
        );
        tracing::info!("  - compression: enabled");
        tracing::info!("  - cors mode: {}", self.config.middleware.cors_mode);
        tracing::info!(
            "  - request timeout: {} seconds",
            self.config.service.timeout_secs
        );
        tracing::info!(
            "  - shutdown drain window: {} seconds",
            self.config.shutdown.drain_secs
        );
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build CORS layer based on configuration
    fn build_cors_layer(&self) -> CorsLayer {
        match self.config.middleware.cors_mode.as_str() {
            "permissive" => {
                tracing::debug!("enabling permissive CORS");
                CorsLayer::permissive()
            }
            "restrictive" => {
                tracing::debug!("enabling restrictive CORS (default deny)");
                CorsLayer::new()
            }
            "disabled" => {
                tracing::debug!("CORS disabled (using restrictive)");
                CorsLayer::new()
            }
            _ => {
                tracing::warn!(
                    "unknown CORS mode: {}, defaulting to permissive",
                    self.config.middleware.cors_mode
                );
                CorsLayer::permissive()
            }
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT (Ctrl+C), starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!("shutdown signal received, draining requests...");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_creation() {
        let config = Config::default();
        let server = Server::new(config.clone(), ShutdownHandle::new());
        assert_eq!(server.config().service.port, config.service.port);
    }
}

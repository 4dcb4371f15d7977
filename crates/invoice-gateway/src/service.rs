//! Gateway service - binds the HTTP server and wires the middleware stack

use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayServiceError;
use crate::middleware::{create_cors_layer, GatewayMetrics, MetricsLayer, TimeoutLayer, TracingLayer};
use crate::routes::{self, AppState};
use axum::{extract::DefaultBodyLimit, Router};
use hold_invoice::{HoldInvoiceApi, WalletGateway};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::info;

/// HTTP gateway in front of the lifecycle manager and the wallet
pub struct InvoiceGatewayService {
    config: GatewayConfig,
    api: Arc<dyn HoldInvoiceApi>,
    wallet: Arc<dyn WalletGateway>,
    metrics: Arc<GatewayMetrics>,
}

impl InvoiceGatewayService {
    /// Create a new gateway service
    pub fn new(
        config: GatewayConfig,
        api: Arc<dyn HoldInvoiceApi>,
        wallet: Arc<dyn WalletGateway>,
    ) -> Result<Self, GatewayServiceError> {
        config
            .validate()
            .map_err(|e| GatewayServiceError::Config(e.to_string()))?;

        Ok(Self {
            config,
            api,
            wallet,
            metrics: Arc::new(GatewayMetrics::new()),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get metrics
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<(), GatewayServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.config.http.enabled {
            info!("HTTP server disabled");
            shutdown.await;
            return Ok(());
        }

        let addr = self.config.http_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayServiceError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), GatewayServiceError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, backend = self.api.node_backend(), "Starting HTTP server");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Received shutdown signal");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Build the HTTP router with the full middleware stack
    pub fn router(&self) -> Router {
        let state = AppState {
            api: Arc::clone(&self.api),
            wallet: Arc::clone(&self.wallet),
            metrics: Arc::clone(&self.metrics),
            limits: self.config.limits.clone(),
        };

        let middleware = ServiceBuilder::new()
            .layer(create_cors_layer(&self.config.cors))
            .layer(TracingLayer::new())
            .layer(MetricsLayer::new(Arc::clone(&self.metrics)))
            .layer(TimeoutLayer::new(self.config.timeouts.clone()));

        routes::routes()
            .layer(DefaultBodyLimit::max(self.config.limits.max_request_size))
            .layer(middleware)
            .with_state(state)
    }
}

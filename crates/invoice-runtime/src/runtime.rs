//! Service wiring
//!
//! Builds the node backend, the lifecycle service and the HTTP gateway, then
//! runs the gateway next to the expiry sweeper until shutdown.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use hold_invoice::{sweep_task, HoldInvoiceService, NodeGateway, SimulatedNode, WalletGateway};
use invoice_gateway::InvoiceGatewayService;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::adapters::LndRestClient;
use crate::config::{NodeBackendConfig, RuntimeConfig};

/// The running hold-invoice service
pub struct InvoiceRuntime {
    config: RuntimeConfig,
    lifecycle: Arc<HoldInvoiceService>,
    gateway: InvoiceGatewayService,
}

impl InvoiceRuntime {
    /// Wire every component for `config`
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let (node, wallet): (Arc<dyn NodeGateway>, Arc<dyn WalletGateway>) = match &config.backend
        {
            NodeBackendConfig::Simulated => {
                warn!("Using the simulated node backend; invoices are not real");
                let node = Arc::new(SimulatedNode::new());
                (node.clone() as Arc<dyn NodeGateway>, node as Arc<dyn WalletGateway>)
            }
            NodeBackendConfig::Lnd(lnd) => {
                let client = Arc::new(
                    LndRestClient::new(lnd).context("Failed to build the LND REST client")?,
                );
                (client.clone() as Arc<dyn NodeGateway>, client as Arc<dyn WalletGateway>)
            }
        };

        let lifecycle = Arc::new(
            HoldInvoiceService::new(config.lifecycle.clone(), node)
                .context("Invalid lifecycle configuration")?,
        );
        let gateway = InvoiceGatewayService::new(config.gateway.clone(), lifecycle.clone(), wallet)
            .context("Invalid gateway configuration")?;

        Ok(Self {
            config,
            lifecycle,
            gateway,
        })
    }

    pub fn lifecycle(&self) -> Arc<HoldInvoiceService> {
        Arc::clone(&self.lifecycle)
    }

    pub fn gateway(&self) -> &InvoiceGatewayService {
        &self.gateway
    }

    /// Bind the configured address and run until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.banner();
        let sweeper = self.spawn_sweeper();
        let served = self.gateway.start(shutdown).await;
        sweeper.abort();
        served.context("HTTP gateway failed")?;
        info!("Shutdown complete");
        Ok(())
    }

    /// Run on an already bound listener until `shutdown` resolves
    pub async fn run_on<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.banner();
        let sweeper = self.spawn_sweeper();
        let served = self.gateway.serve(listener, shutdown).await;
        sweeper.abort();
        served.context("HTTP gateway failed")?;
        Ok(())
    }

    fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(sweep_task(
            Arc::clone(&self.lifecycle),
            self.config.lifecycle.sweep_interval,
        ))
    }

    fn banner(&self) {
        info!("===========================================");
        info!("  Hold-Invoice Service v{}", crate::VERSION);
        info!("===========================================");
        info!(
            backend = self.config.backend.name(),
            custody = ?self.config.lifecycle.secret_custody,
            default_ttl_secs = self.config.lifecycle.default_ttl.as_secs(),
            "Lifecycle ready"
        );
    }
}

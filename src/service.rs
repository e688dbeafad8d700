//! Service lifecycle: wires configuration, ledger, gate and sweeper together.

use crate::config::GateConfig;
use crate::error::Result;
use crate::event::GateEventsChannel;
use crate::ledger::{JsonRpcLedger, LedgerRpc};
use crate::payment::{PaymentGate, ReferenceGenerator, SweeperHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Builder for constructing a gate service.
pub struct GateServiceBuilder {
    config: GateConfig,
    ledger: Option<Arc<dyn LedgerRpc>>,
    generator: Option<Arc<dyn ReferenceGenerator>>,
}

impl GateServiceBuilder {
    /// Create a new builder with the given configuration.
    #[must_use]
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            ledger: None,
            generator: None,
        }
    }

    /// Use `ledger` instead of a JSON-RPC client built from the configuration.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerRpc>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Use a custom reference generator.
    #[must_use]
    pub fn with_reference_generator(mut self, generator: Arc<dyn ReferenceGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Build the gate and start its sweeper.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the RPC client
    /// cannot be created.
    pub fn build(self) -> Result<RunningService> {
        info!("Building x402-gate with config: {:?}", self.config);

        let ledger = match self.ledger {
            Some(ledger) => ledger,
            None => {
                let url = self.config.rpc_url()?;
                info!("Using JSON-RPC ledger at {}", url);
                Arc::new(JsonRpcLedger::new(
                    url,
                    Duration::from_secs(self.config.rpc.timeout_secs),
                )?)
            }
        };

        let mut gate = PaymentGate::new(&self.config, ledger)?;
        if let Some(generator) = self.generator {
            gate = gate.with_reference_generator(generator);
        }
        let gate = Arc::new(gate);
        let sweeper = gate.start_sweeper();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(RunningService {
            config: self.config,
            gate,
            sweeper: Some(sweeper),
            shutdown_tx,
            shutdown_rx,
        })
    }
}

/// A running gate service.
pub struct RunningService {
    config: GateConfig,
    gate: Arc<PaymentGate>,
    sweeper: Option<SweeperHandle>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RunningService {
    /// The payment gate.
    #[must_use]
    pub fn gate(&self) -> Arc<PaymentGate> {
        Arc::clone(&self.gate)
    }

    /// Address the HTTP adapter should listen on.
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        self.config.listen_addr
    }

    /// Path served behind the gate.
    #[must_use]
    pub fn protected_path(&self) -> &str {
        &self.config.protected_path
    }

    /// Subscribe to gate events.
    #[must_use]
    pub fn subscribe_events(&self) -> GateEventsChannel {
        self.gate.subscribe_events()
    }

    /// Resolves once shutdown is requested, either through
    /// [`RunningService::shutdown`] or Ctrl-C.
    pub fn shutdown_signal(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        async move {
            if *shutdown_rx.borrow_and_update() {
                return;
            }
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!("Shutdown signal received");
                            break;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Ctrl-C received, initiating shutdown");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                }
            }
        }
    }

    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop background work.
    pub async fn stop(mut self) {
        self.shutdown();
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.stop().await;
        }
        info!("Gate shutdown complete");
    }
}

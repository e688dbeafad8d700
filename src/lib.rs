//! # x402-gate
//!
//! A per-request micropayment gate implementing the x402 "payment required"
//! protocol on top of Solana SPL token transfers.
//!
//! A request without proof of payment is answered with `402 Payment Required`
//! and a fresh requirement naming a single-use reference account. The client
//! pays with a transfer bound to that reference and retries; the gate proves
//! the payment on chain, memoizes the settlement for a TTL and lets the
//! request through with an `X-PAYMENT-RESPONSE` header.
//!
//! Two settlement modes are supported:
//!
//! - **verify-only**: the client broadcasts its own transaction and presents
//!   the reference; the gate searches the reference's history
//! - **submit-and-settle**: the client hands over a signed transaction; the
//!   gate simulates, broadcasts and confirms it
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use x402_gate::{GateConfig, GateRequest, GateResponse, JsonRpcLedger, PaymentGate};
//!
//! # async fn demo(config: GateConfig) -> x402_gate::Result<()> {
//! let ledger = JsonRpcLedger::new(config.rpc_url()?, std::time::Duration::from_secs(30))?;
//! let gate = PaymentGate::new(&config, Arc::new(ledger))?;
//!
//! let request = GateRequest::new("GET", "/paid");
//! let response = gate
//!     .handle(request, |_| async {
//!         GateResponse::json(200, serde_json::json!({ "content": "paid" }))
//!     })
//!     .await;
//! assert_eq!(response.status, 402);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod payment;
pub mod service;

pub use config::{GateConfig, Network, ProtocolVersion, SettlementMode};
pub use error::{Error, PaymentError, Result};
pub use event::{create_event_channel, GateEvent, GateEventsChannel, GateEventsSender};
pub use ledger::{InMemoryLedger, JsonRpcLedger, LedgerRpc, TransactionBuilder};
pub use payment::{
    GateDecision, GateRequest, GateResponse, PaymentGate, PaymentPayload, PaymentRequirement,
    SettlementCache, SettlementReceipt,
};
pub use service::{GateServiceBuilder, RunningService};

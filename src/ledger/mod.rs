//! Ledger access for the payment engine.
//!
//! The engine never talks to a node directly; it goes through the narrow
//! [`LedgerRpc`] interface, which exposes exactly the six calls the
//! verification and settlement flow needs. Two implementations ship with the
//! crate:
//!
//! - [`JsonRpcLedger`]: Solana JSON-RPC over HTTP with per-call timeouts
//! - [`InMemoryLedger`]: a scripted in-process ledger for tests and local runs

mod memory;
mod rpc;
mod types;

pub use memory::{InMemoryLedger, TransactionBuilder};
pub use rpc::JsonRpcLedger;
pub use types::{
    AccountKey, Commitment, InnerInstructions, Instruction, LoadedAddresses, Message,
    SendOptions, SignatureInfo, SignatureStatus, SimulateOptions, SimulationResult,
    TokenBalance, TransactionBody, TransactionMeta, TransactionRecord, UiTokenAmount,
    TOKEN_2022_PROGRAM_ID, TOKEN_PROGRAM_ID,
};

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// The ledger operations the payment engine depends on.
///
/// Signed transactions travel as the base64 string the client supplied.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Most recent signatures touching `address`, newest first.
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>>;

    /// Fetch a landed transaction; `Ok(None)` if the ledger has no record of it.
    async fn get_transaction(
        &self,
        signature: &str,
        commitment: Commitment,
    ) -> Result<Option<TransactionRecord>>;

    /// Dry-run a signed transaction.
    async fn simulate_transaction(
        &self,
        transaction: &str,
        options: SimulateOptions,
    ) -> Result<SimulationResult>;

    /// Broadcast a signed transaction and return the raw acknowledgement.
    async fn send_transaction(&self, transaction: &str, options: SendOptions) -> Result<Value>;

    /// Status of each signature, `None` where unknown.
    async fn get_signature_statuses(
        &self,
        signatures: &[String],
    ) -> Result<Vec<Option<SignatureStatus>>>;

    /// Supply of a mint; only `decimals` is used.
    async fn get_token_supply(&self, mint: &str) -> Result<UiTokenAmount>;
}

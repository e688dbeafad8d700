//! In-memory ledger.
//!
//! A scripted stand-in for a real node: transactions, simulations, broadcast
//! acknowledgements and status sequences are registered up front, and every
//! call is counted so callers can assert which paths touched the ledger.

use super::types::{
    AccountKey, Commitment, InnerInstructions, Instruction, Message, SendOptions, SignatureInfo,
    SignatureStatus, SimulateOptions, SimulationResult, TokenBalance, TransactionBody,
    TransactionMeta, TransactionRecord, UiTokenAmount, TOKEN_PROGRAM_ID,
};
use super::LedgerRpc;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A broadcast the ledger will accept.
#[derive(Debug, Clone)]
struct ScriptedBroadcast {
    ack: Value,
    lands: Option<(String, TransactionRecord)>,
}

#[derive(Debug, Default)]
struct LedgerState {
    transactions: HashMap<String, TransactionRecord>,
    /// Newest first.
    history: HashMap<String, Vec<SignatureInfo>>,
    simulations: HashMap<String, SimulationResult>,
    broadcasts: HashMap<String, ScriptedBroadcast>,
    statuses: HashMap<String, VecDeque<Option<SignatureStatus>>>,
    supplies: HashMap<String, UiTokenAmount>,
    calls: HashMap<&'static str, usize>,
    unavailable: bool,
}

/// Scripted in-process [`LedgerRpc`].
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a landed transaction and index it under every account key it touches.
    pub fn insert_transaction(&self, signature: impl Into<String>, record: TransactionRecord) {
        let signature = signature.into();
        let mut state = self.state.lock();
        index_transaction(&mut state, &signature, &record);
        state.transactions.insert(signature, record);
    }

    /// Script the result of simulating `transaction`.
    pub fn set_simulation(&self, transaction: impl Into<String>, result: SimulationResult) {
        self.state.lock().simulations.insert(transaction.into(), result);
    }

    /// Script a broadcast: `ack` is returned to the caller and, if given, the
    /// record lands under `signature` once sent.
    pub fn script_broadcast(
        &self,
        transaction: impl Into<String>,
        ack: Value,
        lands: Option<(String, TransactionRecord)>,
    ) {
        self.state
            .lock()
            .broadcasts
            .insert(transaction.into(), ScriptedBroadcast { ack, lands });
    }

    /// Script successive `getSignatureStatuses` answers; the last one repeats.
    pub fn script_statuses(
        &self,
        signature: impl Into<String>,
        statuses: Vec<Option<SignatureStatus>>,
    ) {
        self.state
            .lock()
            .statuses
            .insert(signature.into(), statuses.into());
    }

    /// Set the supply (and decimals) reported for a mint.
    pub fn set_token_supply(
        &self,
        mint: impl Into<String>,
        amount: impl Into<String>,
        decimals: u8,
    ) {
        self.state.lock().supplies.insert(
            mint.into(),
            UiTokenAmount {
                amount: amount.into(),
                decimals,
            },
        );
    }

    /// Make every call fail with a network error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// How many times `method` (JSON-RPC name) was called.
    #[must_use]
    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Total number of calls made.
    #[must_use]
    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    fn enter(&self, method: &'static str) -> Result<parking_lot::MutexGuard<'_, LedgerState>> {
        let mut state = self.state.lock();
        *state.calls.entry(method).or_insert(0) += 1;
        if state.unavailable {
            return Err(Error::Network(format!("{method}: ledger unavailable")));
        }
        Ok(state)
    }
}

fn index_transaction(state: &mut LedgerState, signature: &str, record: &TransactionRecord) {
    let info = SignatureInfo {
        signature: signature.to_string(),
        slot: record.slot,
        err: record.error().cloned(),
        confirmation_status: Some(Commitment::Finalized),
    };
    let mut touched: Vec<String> = record.account_keys().map(str::to_string).collect();
    for instruction in record.all_instructions() {
        touched.extend(instruction.accounts.iter().cloned());
    }
    touched.sort();
    touched.dedup();
    for key in touched {
        state.history.entry(key).or_default().insert(0, info.clone());
    }
}

#[async_trait]
impl LedgerRpc for InMemoryLedger {
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let state = self.enter("getSignaturesForAddress")?;
        Ok(state
            .history
            .get(address)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_transaction(
        &self,
        signature: &str,
        _commitment: Commitment,
    ) -> Result<Option<TransactionRecord>> {
        let state = self.enter("getTransaction")?;
        Ok(state.transactions.get(signature).cloned())
    }

    async fn simulate_transaction(
        &self,
        transaction: &str,
        _options: SimulateOptions,
    ) -> Result<SimulationResult> {
        let state = self.enter("simulateTransaction")?;
        state
            .simulations
            .get(transaction)
            .cloned()
            .ok_or_else(|| Error::Rpc {
                code: -32602,
                message: "invalid transaction: failed to deserialize".to_string(),
            })
    }

    async fn send_transaction(&self, transaction: &str, _options: SendOptions) -> Result<Value> {
        let mut state = self.enter("sendTransaction")?;
        let Some(broadcast) = state.broadcasts.get(transaction).cloned() else {
            return Err(Error::Rpc {
                code: -32002,
                message: "transaction rejected".to_string(),
            });
        };
        if let Some((signature, record)) = broadcast.lands {
            index_transaction(&mut state, &signature, &record);
            state.transactions.insert(signature, record);
        }
        Ok(broadcast.ack)
    }

    async fn get_signature_statuses(
        &self,
        signatures: &[String],
    ) -> Result<Vec<Option<SignatureStatus>>> {
        let mut state = self.enter("getSignatureStatuses")?;
        let mut statuses = Vec::with_capacity(signatures.len());
        for signature in signatures {
            let scripted = state.statuses.get_mut(signature).and_then(|queue| {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            });
            let status = match scripted {
                Some(status) => status,
                None => state.transactions.get(signature).map(|record| SignatureStatus {
                    slot: record.slot,
                    confirmations: None,
                    err: record.error().cloned(),
                    confirmation_status: Some(Commitment::Finalized),
                }),
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    async fn get_token_supply(&self, mint: &str) -> Result<UiTokenAmount> {
        let state = self.enter("getTokenSupply")?;
        state.supplies.get(mint).cloned().ok_or_else(|| Error::Rpc {
            code: -32602,
            message: format!("Invalid param: could not find mint {mint}"),
        })
    }
}

/// Builds synthetic [`TransactionRecord`]s shaped like `jsonParsed` RPC output.
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    signature: String,
    slot: u64,
    account_keys: Vec<String>,
    instructions: Vec<Instruction>,
    inner: Vec<Instruction>,
    pre: Vec<TokenBalance>,
    post: Vec<TokenBalance>,
    err: Option<Value>,
}

impl TransactionBuilder {
    /// Start a transaction with the given signature.
    #[must_use]
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            slot: 1,
            ..Self::default()
        }
    }

    /// Slot the transaction lands in.
    #[must_use]
    pub fn slot(mut self, slot: u64) -> Self {
        self.slot = slot;
        self
    }

    /// Add a static account key.
    #[must_use]
    pub fn account(mut self, key: impl Into<String>) -> Self {
        self.account_keys.push(key.into());
        self
    }

    /// Add a `transferChecked` of `amount` raw units of `mint` from `from` to
    /// `to`, with matching balance snapshots.
    #[must_use]
    pub fn transfer(mut self, from: &str, to: &str, mint: &str, amount: u64, decimals: u8) -> Self {
        const PAYER_FLOAT: u64 = 1_000_000_000;

        let base = u32::try_from(self.pre.len()).unwrap_or(u32::MAX);
        let source = format!("{from}-ata");
        let destination = format!("{to}-ata");

        self.pre.push(TokenBalance::new(
            base,
            from,
            mint,
            (PAYER_FLOAT + amount).to_string(),
            decimals,
        ));
        self.pre.push(TokenBalance::new(base + 1, to, mint, "0", decimals));
        self.post
            .push(TokenBalance::new(base, from, mint, PAYER_FLOAT.to_string(), decimals));
        self.post
            .push(TokenBalance::new(base + 1, to, mint, amount.to_string(), decimals));

        for key in [from.to_string(), source.clone(), destination.clone()] {
            if !self.account_keys.contains(&key) {
                self.account_keys.push(key);
            }
        }

        self.instructions.push(Instruction {
            program: Some("spl-token".to_string()),
            program_id: Some(TOKEN_PROGRAM_ID.to_string()),
            parsed: Some(json!({
                "type": "transferChecked",
                "info": {
                    "source": source,
                    "destination": destination,
                    "authority": from,
                    "mint": mint,
                    "tokenAmount": { "amount": amount.to_string(), "decimals": decimals },
                },
            })),
            ..Instruction::default()
        });
        self
    }

    /// Add an inner raw token `Transfer` that carries `extra` as a trailing account.
    #[must_use]
    pub fn inner_transfer_with_account(mut self, extra: impl Into<String>) -> Self {
        let mut data = vec![3u8];
        data.extend_from_slice(&0u64.to_le_bytes());
        self.inner.push(Instruction {
            program_id: Some(TOKEN_PROGRAM_ID.to_string()),
            accounts: vec![
                "inner-source".to_string(),
                "inner-destination".to_string(),
                "inner-authority".to_string(),
                extra.into(),
            ],
            data: Some(bs58::encode(data).into_string()),
            ..Instruction::default()
        });
        self
    }

    /// Mark the transaction as failed with the given error.
    #[must_use]
    pub fn failed(mut self, err: Value) -> Self {
        self.err = Some(err);
        self
    }

    /// Balances as a simulation would report them.
    #[must_use]
    pub fn simulation(&self) -> SimulationResult {
        SimulationResult {
            err: self.err.clone(),
            logs: Some(vec!["Program log: Instruction: TransferChecked".to_string()]),
            pre_token_balances: Some(self.pre.clone()),
            post_token_balances: Some(self.post.clone()),
        }
    }

    /// The signature this builder was created with.
    #[must_use]
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Finish the record.
    #[must_use]
    pub fn build(self) -> TransactionRecord {
        let inner = if self.inner.is_empty() {
            Vec::new()
        } else {
            vec![InnerInstructions {
                index: 0,
                instructions: self.inner,
            }]
        };
        TransactionRecord {
            slot: self.slot,
            block_time: None,
            meta: Some(TransactionMeta {
                err: self.err,
                pre_token_balances: Some(self.pre),
                post_token_balances: Some(self.post),
                inner_instructions: Some(inner),
                log_messages: None,
                loaded_addresses: None,
            }),
            transaction: TransactionBody {
                signatures: vec![self.signature],
                message: Message {
                    account_keys: self.account_keys.into_iter().map(AccountKey::Plain).collect(),
                    instructions: self.instructions,
                },
            },
        }
    }
}

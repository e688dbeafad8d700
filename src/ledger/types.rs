//! Ledger record shapes, as returned by Solana JSON-RPC (`jsonParsed` encoding).
//!
//! Only the fields the gate reads are modelled; everything else is ignored on
//! deserialization. Amounts stay integer strings, the float `uiAmount` field is
//! never read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SPL Token program id.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

/// SPL Token-2022 program id.
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

/// Raw instruction tag of `Transfer`.
const TRANSFER_TAG: u8 = 3;

/// Raw instruction tag of `TransferChecked`.
const TRANSFER_CHECKED_TAG: u8 = 12;

/// How durably a transaction's effect is settled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    /// Seen by the leader.
    Processed,
    /// Voted on by a supermajority.
    #[default]
    Confirmed,
    /// Rooted.
    Finalized,
}

impl Commitment {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

/// Integer token amount with its decimal scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiTokenAmount {
    /// Raw integer amount, as a decimal string.
    pub amount: String,
    /// Decimal places of the mint.
    pub decimals: u8,
}

/// One entry of a pre/post token balance snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    /// Index of the token account in the transaction's account list.
    #[serde(default)]
    pub account_index: u32,
    /// Token mint.
    pub mint: String,
    /// Wallet owning the token account.
    #[serde(default)]
    pub owner: Option<String>,
    /// Balance.
    pub ui_token_amount: UiTokenAmount,
}

impl TokenBalance {
    /// Build a snapshot entry.
    #[must_use]
    pub fn new(
        account_index: u32,
        owner: impl Into<String>,
        mint: impl Into<String>,
        amount: impl Into<String>,
        decimals: u8,
    ) -> Self {
        Self {
            account_index,
            mint: mint.into(),
            owner: Some(owner.into()),
            ui_token_amount: UiTokenAmount {
                amount: amount.into(),
                decimals,
            },
        }
    }
}

/// Entry returned by `getSignaturesForAddress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    /// Transaction signature.
    pub signature: String,
    /// Slot the transaction landed in.
    #[serde(default)]
    pub slot: u64,
    /// Execution error, if any.
    #[serde(default)]
    pub err: Option<Value>,
    /// Commitment reached so far.
    #[serde(default)]
    pub confirmation_status: Option<Commitment>,
}

/// Entry returned by `getSignatureStatuses`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
    /// Slot the transaction landed in.
    #[serde(default)]
    pub slot: u64,
    /// Confirmations; `None` once rooted.
    #[serde(default)]
    pub confirmations: Option<u64>,
    /// Execution error, if any.
    #[serde(default)]
    pub err: Option<Value>,
    /// Commitment reached so far.
    #[serde(default)]
    pub confirmation_status: Option<Commitment>,
}

impl SignatureStatus {
    /// Whether the transaction reached `commitment` or better.
    #[must_use]
    pub fn reached(&self, commitment: Commitment) -> bool {
        match self.confirmation_status {
            Some(status) => status >= commitment,
            // Older nodes omit the status but report `confirmations: null` once rooted.
            None => self.confirmations.is_none(),
        }
    }
}

/// Result of `simulateTransaction`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// Execution error, if any.
    #[serde(default)]
    pub err: Option<Value>,
    /// Program log lines.
    #[serde(default)]
    pub logs: Option<Vec<String>>,
    /// Token balances before execution.
    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    /// Token balances after execution.
    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
}

impl SimulationResult {
    /// Log lines, empty if none were returned.
    #[must_use]
    pub fn logs(&self) -> &[String] {
        self.logs.as_deref().unwrap_or_default()
    }

    /// Pre-execution token balances.
    #[must_use]
    pub fn pre_balances(&self) -> &[TokenBalance] {
        self.pre_token_balances.as_deref().unwrap_or_default()
    }

    /// Post-execution token balances.
    #[must_use]
    pub fn post_balances(&self) -> &[TokenBalance] {
        self.post_token_balances.as_deref().unwrap_or_default()
    }
}

/// Account key, either bare or with `jsonParsed` metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountKey {
    /// Bare base58 address.
    Plain(String),
    /// Address with signer/writable flags.
    Parsed {
        /// Base58 address.
        pubkey: String,
        /// Whether the key signed.
        #[serde(default)]
        signer: bool,
        /// Whether the key is writable.
        #[serde(default)]
        writable: bool,
    },
}

impl AccountKey {
    /// The base58 address.
    #[must_use]
    pub fn pubkey(&self) -> &str {
        match self {
            Self::Plain(key) | Self::Parsed { pubkey: key, .. } => key,
        }
    }
}

/// A (possibly parsed) instruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    /// Program name, present on parsed instructions.
    #[serde(default)]
    pub program: Option<String>,
    /// Program id.
    #[serde(default)]
    pub program_id: Option<String>,
    /// Account addresses, present on unparsed instructions.
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Base58 instruction data, present on unparsed instructions.
    #[serde(default)]
    pub data: Option<String>,
    /// Parsed body: `{ "type": .., "info": {..} }`, or a bare string for some programs.
    #[serde(default)]
    pub parsed: Option<Value>,
}

impl Instruction {
    fn is_token_program(&self) -> bool {
        matches!(
            self.program.as_deref(),
            Some("spl-token" | "spl-token-2022")
        ) || matches!(
            self.program_id.as_deref(),
            Some(TOKEN_PROGRAM_ID | TOKEN_2022_PROGRAM_ID)
        )
    }

    /// Parsed instruction type, e.g. `transferChecked`.
    #[must_use]
    pub fn parsed_type(&self) -> Option<&str> {
        self.parsed.as_ref()?.get("type")?.as_str()
    }

    /// Whether this is an SPL token `Transfer` or `TransferChecked`.
    #[must_use]
    pub fn is_token_transfer(&self) -> bool {
        if !self.is_token_program() {
            return false;
        }
        if let Some(kind) = self.parsed_type() {
            return matches!(kind, "transfer" | "transferChecked");
        }
        self.data
            .as_deref()
            .and_then(|data| bs58::decode(data).into_vec().ok())
            .and_then(|bytes| bytes.first().copied())
            .is_some_and(|tag| tag == TRANSFER_TAG || tag == TRANSFER_CHECKED_TAG)
    }

    /// Every address the instruction names: raw accounts plus string fields of parsed info.
    #[must_use]
    pub fn referenced_accounts(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.accounts.iter().map(String::as_str).collect();
        if let Some(info) = self
            .parsed
            .as_ref()
            .and_then(|parsed| parsed.get("info"))
            .and_then(Value::as_object)
        {
            for value in info.values() {
                match value {
                    Value::String(key) => keys.push(key),
                    Value::Array(items) => keys.extend(items.iter().filter_map(Value::as_str)),
                    _ => {}
                }
            }
        }
        keys
    }
}

/// Inner instructions emitted by one top-level instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InnerInstructions {
    /// Index of the top-level instruction.
    pub index: u32,
    /// Instructions invoked by it.
    pub instructions: Vec<Instruction>,
}

/// Addresses loaded from address lookup tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedAddresses {
    /// Writable addresses.
    #[serde(default)]
    pub writable: Vec<String>,
    /// Read-only addresses.
    #[serde(default)]
    pub readonly: Vec<String>,
}

/// Execution metadata of a landed transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
    /// Execution error, if any.
    #[serde(default)]
    pub err: Option<Value>,
    /// Token balances before execution.
    #[serde(default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    /// Token balances after execution.
    #[serde(default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
    /// Inner (CPI) instructions.
    #[serde(default)]
    pub inner_instructions: Option<Vec<InnerInstructions>>,
    /// Program log lines.
    #[serde(default)]
    pub log_messages: Option<Vec<String>>,
    /// Lookup-table addresses.
    #[serde(default)]
    pub loaded_addresses: Option<LoadedAddresses>,
}

/// Transaction message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Static account keys.
    pub account_keys: Vec<AccountKey>,
    /// Top-level instructions.
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

/// Signed transaction body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionBody {
    /// Signatures, fee payer first.
    #[serde(default)]
    pub signatures: Vec<String>,
    /// Message.
    pub message: Message,
}

/// Result of `getTransaction`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    /// Slot the transaction landed in.
    #[serde(default)]
    pub slot: u64,
    /// Block time, unix seconds.
    #[serde(default)]
    pub block_time: Option<i64>,
    /// Execution metadata.
    #[serde(default)]
    pub meta: Option<TransactionMeta>,
    /// Transaction.
    pub transaction: TransactionBody,
}

impl TransactionRecord {
    /// Execution error, if the transaction failed.
    #[must_use]
    pub fn error(&self) -> Option<&Value> {
        self.meta.as_ref().and_then(|meta| meta.err.as_ref())
    }

    /// Pre-execution token balances.
    #[must_use]
    pub fn pre_balances(&self) -> &[TokenBalance] {
        self.meta
            .as_ref()
            .and_then(|meta| meta.pre_token_balances.as_deref())
            .unwrap_or_default()
    }

    /// Post-execution token balances.
    #[must_use]
    pub fn post_balances(&self) -> &[TokenBalance] {
        self.meta
            .as_ref()
            .and_then(|meta| meta.post_token_balances.as_deref())
            .unwrap_or_default()
    }

    /// Static keys followed by lookup-table addresses.
    pub fn account_keys(&self) -> impl Iterator<Item = &str> {
        let loaded = self
            .meta
            .as_ref()
            .and_then(|meta| meta.loaded_addresses.as_ref());
        self.transaction
            .message
            .account_keys
            .iter()
            .map(AccountKey::pubkey)
            .chain(
                loaded
                    .into_iter()
                    .flat_map(|l| l.writable.iter().chain(l.readonly.iter()))
                    .map(String::as_str),
            )
    }

    /// Top-level instructions followed by all inner instructions.
    pub fn all_instructions(&self) -> impl Iterator<Item = &Instruction> {
        let inner = self
            .meta
            .as_ref()
            .and_then(|meta| meta.inner_instructions.as_deref())
            .unwrap_or_default();
        self.transaction
            .message
            .instructions
            .iter()
            .chain(inner.iter().flat_map(|group| group.instructions.iter()))
    }
}

/// Options for `simulateTransaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulateOptions {
    /// Verify signatures during simulation.
    pub sig_verify: bool,
    /// Commitment of the bank to simulate against.
    pub commitment: Commitment,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            sig_verify: true,
            commitment: Commitment::Confirmed,
        }
    }
}

/// Options for `sendTransaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Skip the node's own preflight simulation.
    pub skip_preflight: bool,
    /// Commitment used for preflight.
    pub preflight_commitment: Commitment,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            // Already simulated by the validator.
            skip_preflight: true,
            preflight_commitment: Commitment::Confirmed,
        }
    }
}

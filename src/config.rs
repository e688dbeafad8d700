//! Configuration for x402-gate.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Ledger networks the gate can settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Solana mainnet-beta.
    Solana,
    /// Solana devnet.
    SolanaDevnet,
    /// Solana testnet.
    SolanaTestnet,
}

impl Network {
    /// Identifier used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solana => "solana",
            Self::SolanaDevnet => "solana-devnet",
            Self::SolanaTestnet => "solana-testnet",
        }
    }

    /// Public RPC endpoint for this network.
    #[must_use]
    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Self::Solana => "https://api.mainnet-beta.solana.com",
            Self::SolanaDevnet => "https://api.devnet.solana.com",
            Self::SolanaTestnet => "https://api.testnet.solana.com",
        }
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "solana" | "solana-mainnet" | "mainnet-beta" => Ok(Self::Solana),
            "solana-devnet" | "devnet" => Ok(Self::SolanaDevnet),
            "solana-testnet" | "testnet" => Ok(Self::SolanaTestnet),
            other => Err(Error::Config(format!("unsupported network: {other}"))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the 402 response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// Single flattened requirement object with `scheme: "x402"`.
    V1,
    /// `paymentRequirements` array.
    #[default]
    V2,
}

/// How the client proves payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettlementMode {
    /// Client broadcasts its own transaction and sends the reference.
    VerifyOnly,
    /// Client hands over a signed transaction; the gate broadcasts it.
    #[default]
    SubmitAndSettle,
}

/// Gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Network identifier (`solana`, `solana-devnet`, `solana-testnet`).
    #[serde(default = "default_network")]
    pub network: String,

    /// Address the adapter binary listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Path of the protected route served by the adapter binary.
    #[serde(default = "default_protected_path")]
    pub protected_path: String,

    /// 402 body generation.
    #[serde(default)]
    pub protocol_version: ProtocolVersion,

    /// Proof convention accepted from clients.
    #[serde(default)]
    pub mode: SettlementMode,

    /// Price of the protected resource.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Submission and confirmation tuning.
    #[serde(default)]
    pub settlement: SettlementConfig,

    /// Settlement cache tuning.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Header names.
    #[serde(default)]
    pub headers: HeaderConfig,

    /// Ledger RPC endpoint.
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// What a request costs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Token mint address.
    #[serde(default)]
    pub mint: String,

    /// Amount as an exact decimal string, e.g. `"0.05"`.
    #[serde(default)]
    pub amount: String,

    /// Recipient wallet (token owner) address.
    #[serde(default)]
    pub recipient: String,

    /// Seconds a payment requirement stays outstanding.
    #[serde(default = "default_expires_in")]
    pub expires_in_secs: u64,

    /// Decimals assumed when neither the transaction nor the mint reports any.
    #[serde(default = "default_decimals")]
    pub default_decimals: u8,
}

/// Settlement tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Delay between status polls in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum status polls before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Signatures inspected per reference in verify-only mode.
    #[serde(default = "default_lookback")]
    pub lookback_limit: usize,

    /// Smallest signed transaction blob considered plausible, in bytes.
    #[serde(default = "default_min_transaction_size")]
    pub min_transaction_size: usize,
}

/// Settlement cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// How long a settled reference stays paid, in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of cached settlements.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Interval of the background sweep, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Header names, matched case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderConfig {
    /// Bare reference header (verify-only mode).
    #[serde(default = "default_reference_header")]
    pub reference: String,

    /// Encoded payment payload header (submit-and-settle mode).
    #[serde(default = "default_payment_header")]
    pub payment: String,

    /// Success header set on settled responses.
    #[serde(default = "default_response_header")]
    pub response: String,
}

/// Ledger RPC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC URL; the network's public endpoint when unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Per-call timeout in seconds.
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            listen_addr: default_listen_addr(),
            protected_path: default_protected_path(),
            protocol_version: ProtocolVersion::default(),
            mode: SettlementMode::default(),
            pricing: PricingConfig::default(),
            settlement: SettlementConfig::default(),
            cache: CacheConfig::default(),
            headers: HeaderConfig::default(),
            rpc: RpcConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            mint: String::new(),
            amount: String::new(),
            recipient: String::new(),
            expires_in_secs: default_expires_in(),
            default_decimals: default_decimals(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            lookback_limit: default_lookback(),
            min_transaction_size: default_min_transaction_size(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            capacity: default_cache_capacity(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            reference: default_reference_header(),
            payment: default_payment_header(),
            response: default_response_header(),
        }
    }
}

fn default_network() -> String {
    "solana-devnet".to_string()
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8402))
}

fn default_protected_path() -> String {
    "/paid".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_expires_in() -> u64 {
    300
}

const fn default_decimals() -> u8 {
    6
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_max_attempts() -> u32 {
    30
}

const fn default_lookback() -> usize {
    5
}

const fn default_min_transaction_size() -> usize {
    64
}

const fn default_ttl_secs() -> u64 {
    3_600
}

const fn default_cache_capacity() -> usize {
    100_000
}

const fn default_sweep_interval() -> u64 {
    60
}

fn default_reference_header() -> String {
    "X-Payment-Reference".to_string()
}

fn default_payment_header() -> String {
    "X-PAYMENT".to_string()
}

fn default_response_header() -> String {
    "X-PAYMENT-RESPONSE".to_string()
}

const fn default_rpc_timeout() -> u64 {
    30
}

impl GateConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parsed network identifier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unsupported network.
    pub fn network(&self) -> Result<Network> {
        self.network.parse()
    }

    /// RPC URL, falling back to the network's public endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unsupported network.
    pub fn rpc_url(&self) -> Result<String> {
        match &self.rpc.url {
            Some(url) => Ok(url.clone()),
            None => Ok(self.network()?.default_rpc_url().to_string()),
        }
    }
}

impl CacheConfig {
    /// Settlement TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Sweep interval.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl SettlementConfig {
    /// Status poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

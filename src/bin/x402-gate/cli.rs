//! Command-line interface definition.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use x402_gate::config::{GateConfig, ProtocolVersion, SettlementMode};

/// HTTP 402 payment gate settling SPL token micropayments on Solana.
#[derive(Parser, Debug)]
#[command(name = "x402-gate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, short, env = "X402_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Network identifier (solana, solana-devnet, solana-testnet).
    #[arg(long, short, env = "X402_NETWORK")]
    pub network: Option<String>,

    /// JSON-RPC endpoint; defaults to the network's public endpoint.
    #[arg(long, env = "X402_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Token mint the price is denominated in.
    #[arg(long, env = "X402_MINT")]
    pub mint: Option<String>,

    /// Wallet receiving payments.
    #[arg(long, env = "X402_RECIPIENT")]
    pub recipient: Option<String>,

    /// Price per request as a decimal string, e.g. `0.05`.
    #[arg(long, env = "X402_AMOUNT")]
    pub amount: Option<String>,

    /// How clients prove payment.
    #[arg(long, value_enum, env = "X402_MODE")]
    pub mode: Option<CliMode>,

    /// Shape of the 402 response body.
    #[arg(long, value_enum, env = "X402_PROTOCOL")]
    pub protocol: Option<CliProtocol>,

    /// Path served behind the gate.
    #[arg(long, env = "X402_PROTECTED_PATH")]
    pub protected_path: Option<String>,

    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,

    /// Emit logs as JSON.
    #[arg(long)]
    pub json_logs: bool,

    /// Path to configuration file.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

/// Settlement mode CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliMode {
    /// Client broadcasts and sends the reference.
    VerifyOnly,
    /// Client sends a signed transaction for the gate to broadcast.
    SubmitAndSettle,
}

/// Protocol generation CLI enum.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliProtocol {
    /// Flat requirement body.
    V1,
    /// `paymentRequirements` array body.
    V2,
}

impl Cli {
    /// Convert CLI arguments into a `GateConfig`.
    ///
    /// An explicit `--config` must exist; otherwise the per-user config file
    /// is used when present.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be loaded.
    pub fn into_config(self) -> color_eyre::Result<GateConfig> {
        let path = self.config.clone().or_else(|| {
            default_config_path().filter(|path| path.exists())
        });
        let mut config = match path {
            Some(ref path) => GateConfig::from_file(path)?,
            None => GateConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(network) = self.network {
            config.network = network;
        }
        if let Some(url) = self.rpc_url {
            config.rpc.url = Some(url);
        }
        if let Some(mint) = self.mint {
            config.pricing.mint = mint;
        }
        if let Some(recipient) = self.recipient {
            config.pricing.recipient = recipient;
        }
        if let Some(amount) = self.amount {
            config.pricing.amount = amount;
        }
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(protocol) = self.protocol {
            config.protocol_version = protocol.into();
        }
        if let Some(path) = self.protected_path {
            config.protected_path = path;
        }
        config.log_level = self.log_level;

        Ok(config)
    }
}

/// `config.toml` in the platform config directory.
fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "x402-gate")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl From<CliMode> for SettlementMode {
    fn from(m: CliMode) -> Self {
        match m {
            CliMode::VerifyOnly => SettlementMode::VerifyOnly,
            CliMode::SubmitAndSettle => SettlementMode::SubmitAndSettle,
        }
    }
}

impl From<CliProtocol> for ProtocolVersion {
    fn from(p: CliProtocol) -> Self {
        match p {
            CliProtocol::V1 => ProtocolVersion::V1,
            CliProtocol::V2 => ProtocolVersion::V2,
        }
    }
}

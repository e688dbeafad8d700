//! Error types for x402-gate.

use thiserror::Error;

/// Result alias for crate-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level error.
///
/// These cover configuration, I/O and ledger transport failures. Payment
/// verification outcomes use [`PaymentError`] instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unsupported configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level failure talking to the ledger.
    #[error("network error: {0}")]
    Network(String),

    /// The ledger answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message returned by the node.
        message: String,
    },

    /// A ledger call did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A response could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a payment could not be accepted.
///
/// Every variant is caught at the boundary of the component that detects it.
/// The orchestrator only ever turns these into a fresh 402 response; the
/// message is for operators, never for the paying client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// Proof header could not be decoded.
    #[error("malformed payment payload: {0}")]
    MalformedPayload(String),

    /// Payload targets a different network than the one configured.
    #[error("network mismatch: expected {expected}, got {actual}")]
    NetworkMismatch {
        /// Configured network.
        expected: String,
        /// Network named by the payload.
        actual: String,
    },

    /// Reference is not outstanding, or is not bound to the transaction.
    #[error("reference mismatch: {0}")]
    ReferenceMismatch(String),

    /// Dry-run of the signed transaction failed.
    #[error("simulation rejected: {0}")]
    SimulationRejected(String),

    /// Recipient received less than required.
    #[error("insufficient amount: received {received} raw units, required {required}")]
    InsufficientAmount {
        /// Raw units received by the recipient.
        received: String,
        /// Raw units required.
        required: String,
    },

    /// Broadcast failed or returned no signature.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// Status polling ran out of attempts.
    #[error("confirmation of {signature} timed out after {attempts} attempts")]
    ConfirmationTimeout {
        /// Broadcast signature.
        signature: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The transaction executed with an error.
    #[error("transaction {signature} failed on chain: {reason}")]
    ConfirmationFailedOnChain {
        /// Transaction signature.
        signature: String,
        /// Ledger error rendered as text.
        reason: String,
    },

    /// The reference account has no usable ledger activity.
    #[error("no transaction found for reference {0}")]
    ReferenceNotFound(String),

    /// The ledger has no record of the transaction.
    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    /// A decimal amount string could not be scaled to raw units.
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),

    /// A ledger call failed before producing an answer.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

impl From<Error> for PaymentError {
    fn from(err: Error) -> Self {
        Self::LedgerUnavailable(err.to_string())
    }
}

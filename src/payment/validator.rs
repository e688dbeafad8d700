//! Pre-submission validation of client-signed transactions.
//!
//! Screens a signed transaction before the gate spends a broadcast on it:
//! structural sanity, a signature-verifying simulation, and the amount the
//! recipient would receive. Reference binding is not checked here because a
//! simulation does not expose the resolved account list; the confirmer does
//! that authoritatively after landing.

use crate::error::PaymentError;
use crate::ledger::{LedgerRpc, SimulateOptions};
use crate::payment::delta::check_amount;
use crate::payment::types::PaymentRequirement;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Length of an ed25519 signature.
const SIGNATURE_LEN: usize = 64;

/// Validator settings.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Smallest blob considered plausible, in bytes.
    pub min_transaction_size: usize,
    /// Decimals assumed when the mint's cannot be resolved.
    pub default_decimals: u8,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_transaction_size: SIGNATURE_LEN,
            default_decimals: 6,
        }
    }
}

/// Result of a successful validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Simulation succeeded and the amount is sufficient.
    Passed,
    /// Simulation hit an expired blockhash; amount checking is left to the confirmer.
    Deferred,
}

/// Dry-runs signed transactions against the ledger.
pub struct PreSubmissionValidator {
    ledger: Arc<dyn LedgerRpc>,
    config: ValidatorConfig,
}

impl PreSubmissionValidator {
    /// Create a validator.
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerRpc>, config: ValidatorConfig) -> Self {
        Self { ledger, config }
    }

    /// Validate `transaction` (base64) against `requirement`.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::MalformedPayload`] for undecodable or implausibly small blobs
    /// - [`PaymentError::SimulationRejected`] for unsigned transactions and failed simulations
    /// - [`PaymentError::InsufficientAmount`] if the recipient would receive too little
    pub async fn validate(
        &self,
        transaction: &str,
        requirement: &PaymentRequirement,
    ) -> Result<Validation, PaymentError> {
        let bytes = BASE64
            .decode(transaction)
            .map_err(|e| {
                PaymentError::MalformedPayload(format!("transaction is not base64: {e}"))
            })?;

        if bytes.len() < self.config.min_transaction_size {
            return Err(PaymentError::MalformedPayload(format!(
                "transaction is {} bytes, expected at least {}",
                bytes.len(),
                self.config.min_transaction_size
            )));
        }

        let signatures = declared_signatures(&bytes)?;
        if signatures == 0 {
            return Err(PaymentError::SimulationRejected(
                "transaction declares no signatures".to_string(),
            ));
        }

        let options = SimulateOptions {
            sig_verify: true,
            ..SimulateOptions::default()
        };
        let simulation = self
            .ledger
            .simulate_transaction(transaction, options)
            .await
            .map_err(|e| PaymentError::SimulationRejected(e.to_string()))?;

        if let Some(line) = simulation
            .logs()
            .iter()
            .find(|line| line.to_ascii_lowercase().contains("signature verification fail"))
        {
            return Err(PaymentError::SimulationRejected(line.clone()));
        }

        if let Some(err) = &simulation.err {
            if is_blockhash_expired(err) {
                warn!(
                    "Simulation for {} hit an expired blockhash; deferring to submission",
                    requirement.reference
                );
                return Ok(Validation::Deferred);
            }
            return Err(PaymentError::SimulationRejected(err.to_string()));
        }

        let check = check_amount(
            self.ledger.as_ref(),
            simulation.pre_balances(),
            simulation.post_balances(),
            &requirement.mint,
            &requirement.recipient,
            &requirement.amount,
            self.config.default_decimals,
        )
        .await?
        .into_result()?;

        debug!(
            "Simulation for {} passes: recipient receives {} of {} required",
            requirement.reference, check.received, check.required
        );
        Ok(Validation::Passed)
    }
}

/// Read the compact-u16 signature count at the start of a wire transaction
/// and check the blob can hold that many signatures.
fn declared_signatures(bytes: &[u8]) -> Result<usize, PaymentError> {
    let mut count: usize = 0;
    let mut consumed = 0;
    for (i, byte) in bytes.iter().take(3).enumerate() {
        count |= usize::from(byte & 0x7f) << (7 * i);
        consumed = i + 1;
        if byte & 0x80 == 0 {
            break;
        }
        if i == 2 {
            return Err(PaymentError::MalformedPayload(
                "signature count overflows compact-u16".to_string(),
            ));
        }
    }

    let needed = consumed + count * SIGNATURE_LEN;
    if bytes.len() < needed {
        return Err(PaymentError::MalformedPayload(format!(
            "transaction declares {count} signatures but is only {} bytes",
            bytes.len()
        )));
    }
    Ok(count)
}

/// Whether a simulation error is the "blockhash no longer recent" class.
fn is_blockhash_expired(err: &Value) -> bool {
    match err {
        Value::String(kind) => kind == "BlockhashNotFound",
        Value::Object(map) => map.contains_key("BlockhashNotFound"),
        _ => false,
    }
}

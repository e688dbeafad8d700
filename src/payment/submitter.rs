//! Broadcast and confirmation polling.
//!
//! Broadcasting is irreversible, so the submitter only runs after the
//! validator has accepted a transaction. Confirmation is polled at a fixed
//! interval with a bounded number of attempts; there is no backoff.

use crate::error::PaymentError;
use crate::ledger::{Commitment, LedgerRpc, SendOptions};
use crate::payment::types::Signature;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default number of status polls before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Polling settings.
#[derive(Debug, Clone, Copy)]
pub struct SubmitterConfig {
    /// Delay between polls.
    pub poll_interval: Duration,
    /// Maximum number of polls.
    pub max_attempts: u32,
    /// Commitment a status must reach to count as confirmed.
    pub commitment: Commitment,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            commitment: Commitment::Confirmed,
        }
    }
}

/// Broadcasts signed transactions and waits for them to land.
pub struct Submitter {
    ledger: Arc<dyn LedgerRpc>,
    config: SubmitterConfig,
}

impl Submitter {
    /// Create a submitter.
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerRpc>, config: SubmitterConfig) -> Self {
        Self { ledger, config }
    }

    /// Broadcast `transaction` (base64) and return its signature.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::SubmissionFailed`] if the ledger refuses the
    /// transaction or acknowledges it without a signature.
    pub async fn broadcast(&self, transaction: &str) -> Result<Signature, PaymentError> {
        let ack = self
            .ledger
            .send_transaction(transaction, SendOptions::default())
            .await
            .map_err(|e| PaymentError::SubmissionFailed(e.to_string()))?;

        let signature = extract_signature(&ack).ok_or_else(|| {
            PaymentError::SubmissionFailed(format!("acknowledgement carries no signature: {ack}"))
        })?;
        info!("Broadcast transaction {}", signature);
        Ok(signature)
    }

    /// Poll until `signature` reaches the configured commitment.
    ///
    /// Ledger errors while polling consume an attempt but do not end the wait.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::ConfirmationFailedOnChain`] if the transaction executed with an error
    /// - [`PaymentError::ConfirmationTimeout`] if the attempt budget runs out
    pub async fn wait_for_confirmation(&self, signature: &str) -> Result<(), PaymentError> {
        let query = [signature.to_string()];

        for attempt in 1..=self.config.max_attempts {
            match self.ledger.get_signature_statuses(&query).await {
                Ok(statuses) => {
                    if let Some(Some(status)) = statuses.into_iter().next() {
                        if let Some(err) = status.err {
                            return Err(PaymentError::ConfirmationFailedOnChain {
                                signature: signature.to_string(),
                                reason: err.to_string(),
                            });
                        }
                        if status.reached(self.config.commitment) {
                            debug!(
                                "Transaction {} reached {} after {} polls",
                                signature,
                                self.config.commitment.as_str(),
                                attempt
                            );
                            return Ok(());
                        }
                    }
                }
                Err(e) => {
                    warn!("Status poll {} for {} failed: {}", attempt, signature, e);
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        Err(PaymentError::ConfirmationTimeout {
            signature: signature.to_string(),
            attempts: self.config.max_attempts,
        })
    }
}

/// The signature in a `sendTransaction` acknowledgement: either the bare
/// string or an object whose `value` is one.
fn extract_signature(ack: &Value) -> Option<Signature> {
    let signature = match ack {
        Value::String(s) => s.as_str(),
        Value::Object(map) => map.get("value")?.as_str()?,
        _ => return None,
    };
    if signature.is_empty() {
        None
    } else {
        Some(signature.to_string())
    }
}

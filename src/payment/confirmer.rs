//! Post-submission confirmation.
//!
//! The confirmer is the authoritative check: it looks at what a transaction
//! actually did on chain, recomputes the recipient's balance delta and
//! requires the transaction to be bound to the request's reference.
//!
//! ```text
//!   signature ──► getTransaction ──► executed ok? ──► amount ≥ required? ──► bound? ──► settled
//!                       │                  │                   │                │
//!                       ▼                  ▼                   ▼                ▼
//!               TransactionNotFound  FailedOnChain    InsufficientAmount  ReferenceMismatch
//! ```

use crate::error::PaymentError;
use crate::ledger::{Commitment, LedgerRpc};
use crate::payment::binding::is_reference_bound;
use crate::payment::delta::check_amount;
use crate::payment::types::{PaymentRequirement, Signature};
use num_bigint::BigInt;
use std::sync::Arc;
use tracing::{debug, info};

/// Default number of history entries inspected per reference.
pub const DEFAULT_LOOKBACK: usize = 5;

/// Confirmer settings.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmerConfig {
    /// Commitment used when fetching transactions.
    pub commitment: Commitment,
    /// Decimals assumed when the mint's cannot be resolved.
    pub default_decimals: u8,
    /// History entries inspected by [`Confirmer::find_settlement`].
    pub lookback: usize,
}

impl Default for ConfirmerConfig {
    fn default() -> Self {
        Self {
            commitment: Commitment::Confirmed,
            default_decimals: 6,
            lookback: DEFAULT_LOOKBACK,
        }
    }
}

/// A confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    /// Transaction signature.
    pub signature: Signature,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Raw units the recipient received.
    pub received: BigInt,
}

/// Checks landed transactions against a requirement.
pub struct Confirmer {
    ledger: Arc<dyn LedgerRpc>,
    config: ConfirmerConfig,
}

impl Confirmer {
    /// Create a confirmer.
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerRpc>, config: ConfirmerConfig) -> Self {
        Self { ledger, config }
    }

    /// Confirm that `signature` pays `requirement`.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::LedgerUnavailable`] if the transaction cannot be fetched
    /// - [`PaymentError::TransactionNotFound`] if the ledger has no record of it
    /// - [`PaymentError::ConfirmationFailedOnChain`] if it executed with an error
    /// - [`PaymentError::InsufficientAmount`] / [`PaymentError::InvalidAmount`] from the delta check
    /// - [`PaymentError::ReferenceMismatch`] if the reference does not participate
    pub async fn confirm(
        &self,
        signature: &str,
        requirement: &PaymentRequirement,
    ) -> Result<Settlement, PaymentError> {
        let record = self
            .ledger
            .get_transaction(signature, self.config.commitment)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(signature.to_string()))?;

        if let Some(err) = record.error() {
            return Err(PaymentError::ConfirmationFailedOnChain {
                signature: signature.to_string(),
                reason: err.to_string(),
            });
        }

        let check = check_amount(
            self.ledger.as_ref(),
            record.pre_balances(),
            record.post_balances(),
            &requirement.mint,
            &requirement.recipient,
            &requirement.amount,
            self.config.default_decimals,
        )
        .await?
        .into_result()?;

        if !is_reference_bound(&record, &requirement.reference) {
            return Err(PaymentError::ReferenceMismatch(format!(
                "reference {} does not participate in {}",
                requirement.reference, signature
            )));
        }

        debug!(
            "Transaction {} pays {} raw units for reference {}",
            signature, check.received, requirement.reference
        );
        Ok(Settlement {
            signature: signature.to_string(),
            slot: record.slot,
            received: check.received,
        })
    }

    /// Search the reference's recent history for a transaction that pays
    /// `requirement`, newest first.
    ///
    /// Entries that failed on chain, and entries for which `is_spent`
    /// returns true, are skipped without fetching them.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::LedgerUnavailable`] if the history cannot be fetched
    /// - [`PaymentError::ReferenceNotFound`] if the reference has no usable history
    /// - otherwise the failure of the most recent candidate
    pub async fn find_settlement<F>(
        &self,
        requirement: &PaymentRequirement,
        is_spent: F,
    ) -> Result<Settlement, PaymentError>
    where
        F: Fn(&str) -> bool,
    {
        let history = self
            .ledger
            .get_signatures_for_address(&requirement.reference, self.config.lookback)
            .await?;

        let mut first_failure = None;
        for entry in history.iter().filter(|entry| entry.err.is_none()) {
            if is_spent(&entry.signature) {
                debug!("Candidate {} already settled another reference", entry.signature);
                first_failure.get_or_insert_with(|| {
                    PaymentError::ReferenceMismatch(format!(
                        "{} already settled another reference",
                        entry.signature
                    ))
                });
                continue;
            }
            match self.confirm(&entry.signature, requirement).await {
                Ok(settlement) => {
                    info!(
                        "Found settlement {} for reference {}",
                        settlement.signature, requirement.reference
                    );
                    return Ok(settlement);
                }
                Err(e) => {
                    debug!("Candidate {} rejected: {}", entry.signature, e);
                    first_failure.get_or_insert(e);
                }
            }
        }

        Err(first_failure
            .unwrap_or_else(|| PaymentError::ReferenceNotFound(requirement.reference.clone())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedger, TransactionBuilder};
    use serde_json::json;

    fn requirement(amount: &str) -> PaymentRequirement {
        PaymentRequirement {
            network: "solana-devnet".to_string(),
            mint: "Mint".to_string(),
            amount: amount.to_string(),
            recipient: "Merchant".to_string(),
            reference: "Ref".to_string(),
            expires_in: 300,
        }
    }

    fn confirmer(ledger: &InMemoryLedger) -> Confirmer {
        Confirmer::new(Arc::new(ledger.clone()), ConfirmerConfig::default())
    }

    fn land(ledger: &InMemoryLedger, signature: &str, raw: u64) {
        let record = TransactionBuilder::new(signature)
            .slot(42)
            .transfer("Payer", "Merchant", "Mint", raw, 6)
            .account("Ref")
            .build();
        ledger.insert_transaction(signature, record);
    }

    #[tokio::test]
    async fn test_confirm_true_iff_amount_sufficient() {
        let ledger = InMemoryLedger::new();
        land(&ledger, "exact", 50_000);
        land(&ledger, "short", 49_999);
        land(&ledger, "over", 1_000_000);
        let c = confirmer(&ledger);

        let settled = c.confirm("exact", &requirement("0.05")).await.expect("exact");
        assert_eq!(settled.slot, 42);
        assert_eq!(settled.received, BigInt::from(50_000));

        assert!(c.confirm("over", &requirement("0.05")).await.is_ok());
        assert!(matches!(
            c.confirm("short", &requirement("0.05")).await,
            Err(PaymentError::InsufficientAmount { .. })
        ));
    }

    #[tokio::test]
    async fn test_binding_is_necessary() {
        let ledger = InMemoryLedger::new();
        let record = TransactionBuilder::new("unbound")
            .transfer("Payer", "Merchant", "Mint", 50_000, 6)
            .build();
        ledger.insert_transaction("unbound", record);

        let result = confirmer(&ledger).confirm("unbound", &requirement("0.05")).await;
        assert!(matches!(result, Err(PaymentError::ReferenceMismatch(_))));
    }

    #[tokio::test]
    async fn test_missing_and_failed_transactions() {
        let ledger = InMemoryLedger::new();
        let failed = TransactionBuilder::new("failed")
            .transfer("Payer", "Merchant", "Mint", 50_000, 6)
            .account("Ref")
            .failed(json!({ "InstructionError": [0, { "Custom": 1 }] }))
            .build();
        ledger.insert_transaction("failed", failed);
        let c = confirmer(&ledger);

        assert_eq!(
            c.confirm("absent", &requirement("0.05")).await,
            Err(PaymentError::TransactionNotFound("absent".to_string()))
        );
        assert!(matches!(
            c.confirm("failed", &requirement("0.05")).await,
            Err(PaymentError::ConfirmationFailedOnChain { .. })
        ));
    }

    #[tokio::test]
    async fn test_ledger_outage_is_unavailable() {
        let ledger = InMemoryLedger::new();
        ledger.set_unavailable(true);
        let result = confirmer(&ledger).confirm("sig", &requirement("0.05")).await;
        assert!(matches!(result, Err(PaymentError::LedgerUnavailable(_))));
    }

    #[tokio::test]
    async fn test_find_settlement_skips_failures() {
        let ledger = InMemoryLedger::new();
        land(&ledger, "good", 50_000);
        let failed = TransactionBuilder::new("failed")
            .transfer("Payer", "Merchant", "Mint", 50_000, 6)
            .account("Ref")
            .failed(json!("InsufficientFundsForFee"))
            .build();
        ledger.insert_transaction("failed", failed);
        land(&ledger, "short", 10);

        let settled = confirmer(&ledger)
            .find_settlement(&requirement("0.05"), |_| false)
            .await
            .expect("settlement");
        assert_eq!(settled.signature, "good");
        // The failed entry is skipped without a getTransaction call.
        assert_eq!(ledger.calls("getTransaction"), 2);
    }

    #[tokio::test]
    async fn test_find_settlement_without_history() {
        let ledger = InMemoryLedger::new();
        let result = confirmer(&ledger)
            .find_settlement(&requirement("0.05"), |_| false)
            .await;
        assert_eq!(result, Err(PaymentError::ReferenceNotFound("Ref".to_string())));
    }

    #[tokio::test]
    async fn test_find_settlement_reports_candidate_failure() {
        let ledger = InMemoryLedger::new();
        land(&ledger, "short", 10);
        let result = confirmer(&ledger)
            .find_settlement(&requirement("0.05"), |_| false)
            .await;
        assert!(matches!(result, Err(PaymentError::InsufficientAmount { .. })));
    }

    #[tokio::test]
    async fn test_find_settlement_skips_spent_signatures() {
        let ledger = InMemoryLedger::new();
        land(&ledger, "older", 50_000);
        land(&ledger, "spent", 50_000);

        let settled = confirmer(&ledger)
            .find_settlement(&requirement("0.05"), |signature| signature == "spent")
            .await
            .expect("settlement");
        assert_eq!(settled.signature, "older");
        assert_eq!(ledger.calls("getTransaction"), 1);

        let result = confirmer(&ledger)
            .find_settlement(&requirement("0.05"), |_| true)
            .await;
        assert!(matches!(result, Err(PaymentError::ReferenceMismatch(_))));
    }
}

//! Reference-binding check.
//!
//! A payment belongs to a request only if the request's reference account
//! participates in the transaction, either as one of its account keys or as
//! an account of a token transfer instruction (top-level or inner).

use crate::ledger::TransactionRecord;

/// Whether `reference` participates in `record`.
#[must_use]
pub fn is_reference_bound(record: &TransactionRecord, reference: &str) -> bool {
    if reference.is_empty() {
        return false;
    }

    if record.account_keys().any(|key| key == reference) {
        return true;
    }

    record
        .all_instructions()
        .filter(|instruction| instruction.is_token_transfer())
        .any(|instruction| {
            instruction
                .referenced_accounts()
                .into_iter()
                .any(|key| key == reference)
        })
}

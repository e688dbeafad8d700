//! Outstanding payment requirements.
//!
//! Every 402 response registers the requirement it advertised under its
//! reference. A proof is only considered if its reference is still
//! outstanding here, which is what makes references single-use: settlement
//! removes the entry, and an expired entry is never returned.

use crate::payment::types::{PaymentRequirement, Signature};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Produces fresh reference addresses.
pub trait ReferenceGenerator: Send + Sync {
    /// A new, never-before-issued address.
    fn generate(&self) -> String;
}

/// Random 32-byte addresses, base58-encoded like Solana public keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomReferenceGenerator;

impl ReferenceGenerator for RandomReferenceGenerator {
    fn generate(&self) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bs58::encode(bytes).into_string()
    }
}

/// A requirement awaiting payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPayment {
    /// The advertised requirement.
    pub requirement: PaymentRequirement,
    /// Instant after which the requirement lapses.
    pub deadline: Instant,
    /// Signature broadcast for it whose confirmation is still unknown.
    pub submitted: Option<Signature>,
}

/// Outstanding requirements keyed by reference.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct RequirementRegistry {
    inner: Arc<Mutex<HashMap<String, PendingPayment>>>,
}

impl RequirementRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a requirement; it lapses after `requirement.expires_in` seconds.
    ///
    /// Returns `false` (and leaves the registry untouched) if the reference is
    /// already outstanding.
    pub fn issue(&self, requirement: PaymentRequirement) -> bool {
        let deadline = Instant::now() + Duration::from_secs(requirement.expires_in);
        let mut pending = self.inner.lock();
        if pending.contains_key(&requirement.reference) {
            return false;
        }
        debug!("Issued requirement for reference {}", requirement.reference);
        pending.insert(
            requirement.reference.clone(),
            PendingPayment {
                requirement,
                deadline,
                submitted: None,
            },
        );
        true
    }

    /// The outstanding entry for `reference`; an expired entry is removed.
    pub fn get(&self, reference: &str) -> Option<PendingPayment> {
        let now = Instant::now();
        let mut pending = self.inner.lock();
        let entry = pending.get(reference)?.clone();
        if now > entry.deadline {
            pending.remove(reference);
            return None;
        }
        Some(entry)
    }

    /// Remember a broadcast signature and restart the entry's lifetime.
    pub fn record_submission(&self, reference: &str, signature: &str) {
        if let Some(entry) = self.inner.lock().get_mut(reference) {
            entry.submitted = Some(signature.to_string());
            entry.deadline =
                Instant::now() + Duration::from_secs(entry.requirement.expires_in);
        }
    }

    /// Remove a requirement, typically once settled.
    pub fn complete(&self, reference: &str) -> Option<PendingPayment> {
        self.inner.lock().remove(reference)
    }

    /// Drop every lapsed requirement; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.inner.lock();
        let before = pending.len();
        pending.retain(|_, entry| now <= entry.deadline);
        before - pending.len()
    }

    /// Number of outstanding requirements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nothing is outstanding.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

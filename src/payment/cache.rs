//! TTL-bounded cache of settled references.
//!
//! Once a reference has been proven paid on chain, repeated requests carrying
//! the same proof are served from this cache instead of re-querying the
//! ledger. Entries expire strictly after `now > expiry`; expired entries are
//! dropped lazily on read and eagerly by [`SettlementCache::cleanup`].
//!
//! The cache also remembers which reference each signature settled, so one
//! transaction listing several references can only ever settle one of them.
//! Claims live outside the LRU and are kept for the claim TTL, which callers
//! set to at least the requirement lifetime.
//!
//! Capacity is a hard bound: once full, the least recently used settlement
//! is evicted even if it has not expired, and its holder has to pay again.
//! Size the capacity for the expected number of live settlements per TTL.

use crate::error::PaymentError;
use crate::payment::types::Signature;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Default cache capacity.
const DEFAULT_CACHE_CAPACITY: usize = 100_000;

/// A settled reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Reference account.
    pub reference: String,
    /// Instant after which the entry is no longer valid.
    pub expiry: Instant,
    /// Settlement signature.
    pub signature: Signature,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expiry
    }
}

/// The reference a signature settled.
#[derive(Debug, Clone)]
struct Claim {
    reference: String,
    expiry: Instant,
}

/// Settlement cache.
///
/// Cloning shares the underlying map.
#[derive(Clone)]
pub struct SettlementCache {
    inner: Arc<Mutex<LruCache<String, CacheEntry>>>,
    claims: Arc<Mutex<HashMap<Signature, Claim>>>,
    stats: Arc<Mutex<CacheStats>>,
    ttl: Duration,
    claim_ttl: Duration,
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries added.
    pub additions: u64,
    /// Number of entries dropped for expiry.
    pub expirations: u64,
    /// Number of unexpired entries evicted for capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl SettlementCache {
    /// Create a cache with default capacity.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            claims: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(Mutex::new(CacheStats::default())),
            ttl,
            claim_ttl: ttl,
        }
    }

    /// Keep signature claims for `claim_ttl` instead of the cache TTL.
    ///
    /// The effective retention is never shorter than the cache TTL.
    #[must_use]
    pub fn with_claim_ttl(mut self, claim_ttl: Duration) -> Self {
        self.claim_ttl = claim_ttl.max(self.ttl);
        self
    }

    /// Configured time-to-live.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether `reference` is settled and unexpired.
    ///
    /// An expired entry is removed.
    pub fn is_paid(&self, reference: &str) -> bool {
        self.signature(reference).is_some()
    }

    /// Settlement signature of a live entry.
    ///
    /// An expired entry is removed.
    pub fn signature(&self, reference: &str) -> Option<Signature> {
        let now = Instant::now();
        let mut cache = self.inner.lock();

        let (found, expired) = match cache.get(reference) {
            Some(entry) if entry.is_expired(now) => (None, true),
            Some(entry) => (Some(entry.signature.clone()), false),
            None => (None, false),
        };
        if expired {
            cache.pop(reference);
        }
        drop(cache);

        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        if expired {
            stats.expirations += 1;
        }

        found
    }

    /// Record a settlement; expires `ttl` from now. Overwrites any existing
    /// entry and any claim on the signature.
    pub fn mark_paid(&self, reference: &str, signature: impl Into<Signature>) {
        let signature = signature.into();
        let mut claims = self.claims.lock();
        self.insert(&mut claims, reference, signature);
    }

    /// Record a settlement unless `signature` already settled another
    /// live reference.
    ///
    /// The claim check and the insert happen under one lock, so concurrent
    /// settlements of different references by the same signature cannot
    /// both succeed.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::ReferenceMismatch`] naming the reference the
    /// signature is already bound to.
    pub fn try_mark_paid(
        &self,
        reference: &str,
        signature: impl Into<Signature>,
    ) -> Result<(), PaymentError> {
        let signature = signature.into();
        let now = Instant::now();
        let mut claims = self.claims.lock();
        if let Some(claim) = claims.get(&signature) {
            if claim.reference != reference && now <= claim.expiry {
                return Err(PaymentError::ReferenceMismatch(format!(
                    "{signature} already settled reference {}",
                    claim.reference
                )));
            }
        }
        self.insert(&mut claims, reference, signature);
        Ok(())
    }

    /// Reference `signature` is bound to, if the claim is live.
    pub fn claimed_by(&self, signature: &str) -> Option<String> {
        let now = Instant::now();
        self.claims
            .lock()
            .get(signature)
            .filter(|claim| now <= claim.expiry)
            .map(|claim| claim.reference.clone())
    }

    fn insert(
        &self,
        claims: &mut HashMap<Signature, Claim>,
        reference: &str,
        signature: Signature,
    ) {
        let now = Instant::now();
        claims.insert(
            signature.clone(),
            Claim {
                reference: reference.to_string(),
                expiry: now + self.claim_ttl,
            },
        );

        let entry = CacheEntry {
            reference: reference.to_string(),
            expiry: now + self.ttl,
            signature,
        };
        let evicted = self.inner.lock().push(reference.to_string(), entry);

        let mut stats = self.stats.lock();
        stats.additions += 1;
        if let Some((key, old)) = evicted {
            if key != reference && !old.is_expired(now) {
                warn!(
                    "Settlement cache full, evicted live reference {} before expiry",
                    key
                );
                stats.evictions += 1;
            }
        }
    }

    /// Invalidate a reference.
    pub fn remove(&self, reference: &str) -> bool {
        self.inner.lock().pop(reference).is_some()
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let mut cache = self.inner.lock();

        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(reference, _)| reference.clone())
            .collect();
        for reference in &expired {
            cache.pop(reference);
        }
        drop(cache);

        self.claims.lock().retain(|_, claim| now <= claim.expiry);

        self.stats.lock().expirations += expired.len() as u64;
        expired.len()
    }

    /// Number of entries, expired or not. Diagnostic only.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Clear all entries and claims.
    pub fn clear(&self) {
        self.claims.lock().clear();
        self.inner.lock().clear();
    }
}

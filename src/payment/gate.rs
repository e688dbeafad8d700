//! The per-request payment state machine.
//!
//! A request without proof gets a 402 carrying a fresh requirement. A request
//! with proof is admitted from the settlement cache, or settled against the
//! ledger according to the configured [`SettlementMode`]. Every failure is
//! answered with a fresh 402; the reason is logged and published as a
//! [`GateEvent`] but never returned to the client.

use crate::config::{GateConfig, HeaderConfig, Network, ProtocolVersion, SettlementMode};
use crate::error::{Error, PaymentError, Result};
use crate::event::{create_event_channel, GateEvent, GateEventsChannel, GateEventsSender};
use crate::ledger::{Commitment, LedgerRpc};
use crate::payment::cache::SettlementCache;
use crate::payment::confirmer::{Confirmer, ConfirmerConfig, Settlement};
use crate::payment::delta::to_raw_units;
use crate::payment::registry::{RandomReferenceGenerator, ReferenceGenerator, RequirementRegistry};
use crate::payment::submitter::{Submitter, SubmitterConfig};
use crate::payment::sweeper::{spawn_sweeper, SweeperHandle};
use crate::payment::types::{
    PaymentPayload, PaymentProof, PaymentRequirement, SettlementReceipt, Signature,
};
use crate::payment::validator::{PreSubmissionValidator, Validation, ValidatorConfig};
use bytes::Bytes;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// HTTP status for "payment required".
pub const PAYMENT_REQUIRED: u16 = 402;

/// HTTP status when no fresh reference could be issued.
pub const SERVICE_UNAVAILABLE: u16 = 503;

/// Draws from the reference generator before giving up on a unique reference.
const MAX_REFERENCE_ATTEMPTS: usize = 4;

/// Framework-neutral view of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct GateRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Bytes,
}

impl GateRequest {
    /// A request with no headers or body.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of header `name`, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Framework-neutral response.
#[derive(Debug, Clone, PartialEq)]
pub struct GateResponse {
    /// HTTP status.
    pub status: u16,
    /// JSON body.
    pub body: Value,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
}

impl GateResponse {
    /// A JSON response with no headers.
    #[must_use]
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            headers: Vec::new(),
        }
    }

    /// First value of header `name`, matched case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Outcome of [`PaymentGate::process`].
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// The request is paid for.
    Proceed {
        /// Settled reference.
        reference: String,
        /// Settlement signature.
        signature: Signature,
    },
    /// The request must be answered with this 402.
    PaymentRequired(GateResponse),
}

/// Payment gate in front of a protected resource.
pub struct PaymentGate {
    network: Network,
    mint: String,
    amount: String,
    recipient: String,
    expires_in: u64,
    version: ProtocolVersion,
    mode: SettlementMode,
    headers: HeaderConfig,
    sweep_interval: Duration,
    cache: SettlementCache,
    registry: RequirementRegistry,
    generator: Arc<dyn ReferenceGenerator>,
    validator: PreSubmissionValidator,
    submitter: Submitter,
    confirmer: Confirmer,
    events_tx: GateEventsSender,
}

impl PaymentGate {
    /// Create a gate from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an unsupported network, a mint or
    /// recipient that is not a 32-byte base58 address, an unparseable price,
    /// or a zero requirement or cache TTL.
    pub fn new(config: &GateConfig, ledger: Arc<dyn LedgerRpc>) -> Result<Self> {
        let network = config.network()?;
        let pricing = &config.pricing;
        validate_address("mint", &pricing.mint)?;
        validate_address("recipient", &pricing.recipient)?;
        to_raw_units(&pricing.amount, pricing.default_decimals)
            .map_err(|e| Error::Config(format!("price: {e}")))?;
        if pricing.expires_in_secs == 0 {
            return Err(Error::Config("requirement TTL must be non-zero".to_string()));
        }
        if config.cache.ttl_secs == 0 {
            return Err(Error::Config("cache TTL must be non-zero".to_string()));
        }
        if config.cache.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep interval must be non-zero".to_string()));
        }

        let settlement = &config.settlement;
        let validator = PreSubmissionValidator::new(
            Arc::clone(&ledger),
            ValidatorConfig {
                min_transaction_size: settlement.min_transaction_size,
                default_decimals: pricing.default_decimals,
            },
        );
        let submitter = Submitter::new(
            Arc::clone(&ledger),
            SubmitterConfig {
                poll_interval: settlement.poll_interval(),
                max_attempts: settlement.max_attempts,
                commitment: Commitment::Confirmed,
            },
        );
        let confirmer = Confirmer::new(
            ledger,
            ConfirmerConfig {
                commitment: Commitment::Confirmed,
                default_decimals: pricing.default_decimals,
                lookback: settlement.lookback_limit,
            },
        );
        let (events_tx, _) = create_event_channel();

        info!(
            "Payment gate on {}: {} of {} to {}, mode {:?}, protocol {:?}",
            network,
            pricing.amount,
            pricing.mint,
            pricing.recipient,
            config.mode,
            config.protocol_version
        );

        // A transaction can only list references issued before it landed, so
        // its claim must outlive every requirement it could still settle.
        let cache = SettlementCache::with_capacity(config.cache.ttl(), config.cache.capacity)
            .with_claim_ttl(Duration::from_secs(pricing.expires_in_secs));

        Ok(Self {
            network,
            mint: pricing.mint.clone(),
            amount: pricing.amount.clone(),
            recipient: pricing.recipient.clone(),
            expires_in: pricing.expires_in_secs,
            version: config.protocol_version,
            mode: config.mode,
            headers: config.headers.clone(),
            sweep_interval: config.cache.sweep_interval(),
            cache,
            registry: RequirementRegistry::new(),
            generator: Arc::new(RandomReferenceGenerator),
            validator,
            submitter,
            confirmer,
            events_tx,
        })
    }

    /// Replace the reference generator.
    #[must_use]
    pub fn with_reference_generator(mut self, generator: Arc<dyn ReferenceGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// The settlement cache.
    #[must_use]
    pub fn cache(&self) -> &SettlementCache {
        &self.cache
    }

    /// Outstanding requirements.
    #[must_use]
    pub fn registry(&self) -> &RequirementRegistry {
        &self.registry
    }

    /// Configured settlement mode.
    #[must_use]
    pub fn mode(&self) -> SettlementMode {
        self.mode
    }

    /// Subscribe to gate events.
    #[must_use]
    pub fn subscribe_events(&self) -> GateEventsChannel {
        self.events_tx.subscribe()
    }

    /// Start pruning the cache and registry in the background.
    #[must_use]
    pub fn start_sweeper(&self) -> SweeperHandle {
        spawn_sweeper(
            self.cache.clone(),
            self.registry.clone(),
            self.sweep_interval,
            Some(self.events_tx.clone()),
        )
    }

    /// Issue a fresh requirement and render its 402 response.
    ///
    /// If the generator keeps producing references that are already
    /// outstanding, nothing is issued and the response is a 503.
    pub fn payment_required(&self) -> GateResponse {
        let Some(requirement) = self.issue_requirement() else {
            error!(
                "No unique reference after {} attempts; refusing to issue a requirement",
                MAX_REFERENCE_ATTEMPTS
            );
            return GateResponse::json(
                SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": "payment requirements temporarily unavailable" }),
            );
        };
        let _ = self.events_tx.send(GateEvent::PaymentRequired {
            reference: requirement.reference.clone(),
        });

        let mut response =
            GateResponse::json(PAYMENT_REQUIRED, requirement.to_response_body(self.version));
        response
            .headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        response
    }

    fn issue_requirement(&self) -> Option<PaymentRequirement> {
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let requirement = PaymentRequirement {
                network: self.network.as_str().to_string(),
                mint: self.mint.clone(),
                amount: self.amount.clone(),
                recipient: self.recipient.clone(),
                reference: self.generator.generate(),
                expires_in: self.expires_in,
            };
            if self.registry.issue(requirement.clone()) {
                return Some(requirement);
            }
            warn!("Reference {} is already outstanding", requirement.reference);
        }
        None
    }

    /// The success header for a settlement signature.
    #[must_use]
    pub fn success_header(&self, signature: &str) -> (String, String) {
        (
            self.headers.response.clone(),
            SettlementReceipt::settled(signature).encode(),
        )
    }

    /// Decide whether `request` is paid for.
    pub async fn process(&self, request: &GateRequest) -> GateDecision {
        let proof = match self.extract_proof(request) {
            Ok(Some(proof)) => proof,
            Ok(None) => {
                debug!("{} {} carries no payment proof", request.method, request.path);
                return GateDecision::PaymentRequired(self.payment_required());
            }
            Err(e) => return self.reject(None, &e),
        };

        let reference = proof.reference().to_string();
        match self.settle(proof).await {
            Ok(signature) => GateDecision::Proceed {
                reference,
                signature,
            },
            Err(e) => self.reject(Some(reference), &e),
        }
    }

    /// Run `handler` if `request` is paid for, attaching the success header;
    /// otherwise answer with a 402.
    pub async fn handle<F, Fut>(&self, request: GateRequest, handler: F) -> GateResponse
    where
        F: FnOnce(GateRequest) -> Fut,
        Fut: Future<Output = GateResponse>,
    {
        match self.process(&request).await {
            GateDecision::Proceed { signature, .. } => {
                let mut response = handler(request).await;
                response.headers.push(self.success_header(&signature));
                response
            }
            GateDecision::PaymentRequired(response) => response,
        }
    }

    fn extract_proof(
        &self,
        request: &GateRequest,
    ) -> std::result::Result<Option<PaymentProof>, PaymentError> {
        match self.mode {
            SettlementMode::VerifyOnly => {
                let Some(value) = request.header(&self.headers.reference) else {
                    return Ok(None);
                };
                let reference = value.trim();
                if reference.is_empty() {
                    return Err(PaymentError::MalformedPayload(
                        "empty reference header".to_string(),
                    ));
                }
                Ok(Some(PaymentProof::Reference(reference.to_string())))
            }
            SettlementMode::SubmitAndSettle => match request.header(&self.headers.payment) {
                Some(value) => PaymentPayload::decode(value.trim())
                    .map(|payload| Some(PaymentProof::Signed(payload))),
                None => Ok(None),
            },
        }
    }

    async fn settle(&self, proof: PaymentProof) -> std::result::Result<Signature, PaymentError> {
        if let PaymentProof::Signed(ref payload) = proof {
            if payload.network != self.network.as_str() {
                return Err(PaymentError::NetworkMismatch {
                    expected: self.network.as_str().to_string(),
                    actual: payload.network.clone(),
                });
            }
        }

        let reference = proof.reference();
        if let Some(signature) = self.cache.signature(reference) {
            debug!("Reference {} already settled by {}", reference, signature);
            let _ = self.events_tx.send(GateEvent::CacheHit {
                reference: reference.to_string(),
            });
            return Ok(signature);
        }

        let pending = self.registry.get(reference).ok_or_else(|| {
            PaymentError::ReferenceMismatch(format!("reference {reference} is not outstanding"))
        })?;
        let requirement = &pending.requirement;

        let settlement = match &proof {
            PaymentProof::Reference(_) => {
                self.confirmer
                    .find_settlement(requirement, |signature| {
                        self.cache
                            .claimed_by(signature)
                            .is_some_and(|owner| owner != reference)
                    })
                    .await?
            }
            PaymentProof::Signed(payload) => {
                self.submit_and_settle(payload, requirement, pending.submitted.as_deref())
                    .await?
            }
        };

        // Cache first: a concurrent request must find the settlement or the requirement.
        self.cache
            .try_mark_paid(&requirement.reference, settlement.signature.clone())?;
        self.registry.complete(&requirement.reference);
        info!(
            "Reference {} settled by {} in slot {}",
            requirement.reference, settlement.signature, settlement.slot
        );
        let _ = self.events_tx.send(GateEvent::Settled {
            reference: requirement.reference.clone(),
            signature: settlement.signature.clone(),
        });
        Ok(settlement.signature)
    }

    async fn submit_and_settle(
        &self,
        payload: &PaymentPayload,
        requirement: &PaymentRequirement,
        submitted: Option<&str>,
    ) -> std::result::Result<Settlement, PaymentError> {
        // A previous attempt broadcast but timed out waiting; it may have landed since.
        if let Some(signature) = submitted {
            match self.confirmer.confirm(signature, requirement).await {
                Ok(settlement) => {
                    info!(
                        "Earlier broadcast {} for {} has landed",
                        signature, requirement.reference
                    );
                    return Ok(settlement);
                }
                Err(e) => debug!("Earlier broadcast {} not usable: {}", signature, e),
            }
        }

        let validation = self.validator.validate(&payload.transaction, requirement).await?;
        if validation == Validation::Deferred {
            debug!(
                "Amount check for {} deferred to confirmation",
                requirement.reference
            );
        }

        let signature = self.submitter.broadcast(&payload.transaction).await?;
        if let Some(owner) = self.cache.claimed_by(&signature) {
            if owner != requirement.reference {
                return Err(PaymentError::ReferenceMismatch(format!(
                    "{signature} already settled reference {owner}"
                )));
            }
        }
        self.registry.record_submission(&requirement.reference, &signature);
        let _ = self.events_tx.send(GateEvent::Submitted {
            reference: requirement.reference.clone(),
            signature: signature.clone(),
        });

        self.submitter.wait_for_confirmation(&signature).await?;
        self.confirmer.confirm(&signature, requirement).await
    }

    fn reject(&self, reference: Option<String>, reason: &PaymentError) -> GateDecision {
        match &reference {
            Some(reference) => warn!("Payment for {} rejected: {}", reference, reason),
            None => warn!("Payment rejected: {}", reason),
        }
        let _ = self.events_tx.send(GateEvent::Rejected {
            reference,
            reason: reason.to_string(),
        });
        GateDecision::PaymentRequired(self.payment_required())
    }
}

fn validate_address(field: &str, address: &str) -> Result<()> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| Error::Config(format!("{field} {address:?} is not base58: {e}")))?;
    if bytes.len() != 32 {
        return Err(Error::Config(format!(
            "{field} {address:?} decodes to {} bytes, expected 32",
            bytes.len()
        )));
    }
    Ok(())
}

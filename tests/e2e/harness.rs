//! Test harness wrapping a gate and its in-memory ledger.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use x402_gate::payment::ReferenceGenerator;
use x402_gate::{
    GateConfig, GateDecision, GateRequest, GateResponse, InMemoryLedger, PaymentGate,
    PaymentPayload, ProtocolVersion, SettlementMode, TransactionBuilder,
};

/// Network the harness gate settles on.
pub const NETWORK: &str = "solana-devnet";

/// Issues `ref-0`, `ref-1`, ...
pub struct SequentialReferences(AtomicUsize);

impl ReferenceGenerator for SequentialReferences {
    fn generate(&self) -> String {
        format!("ref-{}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// A gate priced at 0.05 of a 6-decimal mint, backed by an in-memory ledger.
pub struct TestGate {
    /// The gate under test.
    pub gate: PaymentGate,
    /// Ledger behind it.
    pub ledger: InMemoryLedger,
}

impl TestGate {
    /// Gate in `mode` rendering `version` bodies.
    pub fn new(mode: SettlementMode, version: ProtocolVersion) -> Self {
        Self::with_config(|config| {
            config.mode = mode;
            config.protocol_version = version;
        })
    }

    /// Gate from the default harness configuration adjusted by `adjust`.
    pub fn with_config(adjust: impl FnOnce(&mut GateConfig)) -> Self {
        let mut config = GateConfig::default();
        config.network = NETWORK.to_string();
        config.pricing.mint = Self::mint();
        config.pricing.recipient = Self::recipient();
        config.pricing.amount = "0.05".to_string();
        config.settlement.max_attempts = 3;
        config.settlement.poll_interval_ms = 10;
        adjust(&mut config);

        let ledger = InMemoryLedger::new();
        let gate = PaymentGate::new(&config, Arc::new(ledger.clone()))
            .expect("gate")
            .with_reference_generator(Arc::new(SequentialReferences(AtomicUsize::new(0))));
        Self { gate, ledger }
    }

    /// Token mint.
    pub fn mint() -> String {
        bs58::encode([7u8; 32]).into_string()
    }

    /// Merchant wallet.
    pub fn recipient() -> String {
        bs58::encode([9u8; 32]).into_string()
    }

    /// Request a 402 and return the reference it issued.
    pub async fn issue(&self) -> String {
        let GateDecision::PaymentRequired(response) =
            self.gate.process(&GateRequest::new("GET", "/paid")).await
        else {
            panic!("expected 402");
        };
        reference_of(&response.body)
    }

    /// Land a transfer of `raw` units to the merchant, bound to `reference`.
    pub fn land_payment(&self, signature: &str, reference: &str, raw: u64) {
        let record = self.transfer(signature, raw).account(reference).build();
        self.ledger.insert_transaction(signature, record);
    }

    /// A transfer of `raw` units from `Payer` to the merchant.
    pub fn transfer(&self, signature: &str, raw: u64) -> TransactionBuilder {
        TransactionBuilder::new(signature).transfer(
            "Payer",
            &Self::recipient(),
            &Self::mint(),
            raw,
            6,
        )
    }

    /// Script a signed transaction for `reference`: its simulation shows
    /// `tx`'s balances and broadcasting it lands `tx` when `lands` is set.
    /// Returns the `X-PAYMENT` header value.
    pub fn script_signed(
        &self,
        tag: u8,
        reference: &str,
        tx: TransactionBuilder,
        lands: bool,
    ) -> String {
        let blob = signed_blob(tag);
        let signature = tx.signature().to_string();
        self.ledger.set_simulation(blob.clone(), tx.simulation());
        let landed = lands.then(|| (signature.clone(), tx.build()));
        self.ledger
            .script_broadcast(blob.clone(), json!(signature), landed);

        PaymentPayload {
            network: NETWORK.to_string(),
            transaction: blob,
            reference: reference.to_string(),
        }
        .encode()
    }

    /// Request carrying a bare reference.
    pub fn with_reference(reference: &str) -> GateRequest {
        GateRequest::new("GET", "/paid").with_header("X-Payment-Reference", reference)
    }

    /// Request carrying a payment payload.
    pub fn with_payment(header: &str) -> GateRequest {
        GateRequest::new("GET", "/paid").with_header("X-PAYMENT", header)
    }

    /// Run `request` through the gate in front of a 200 handler.
    pub async fn call(&self, request: GateRequest) -> GateResponse {
        self.gate
            .handle(request, |_| async {
                GateResponse::json(200, json!({ "content": "paid content" }))
            })
            .await
    }
}

/// Reference carried by a 402 body of either generation.
pub fn reference_of(body: &Value) -> String {
    let requirement = if body["x402Version"] == json!(2) {
        &body["paymentRequirements"][0]
    } else {
        body
    };
    requirement["reference"]
        .as_str()
        .expect("reference")
        .to_string()
}

/// A plausible one-signature wire transaction.
pub fn signed_blob(tag: u8) -> String {
    let mut bytes = vec![1u8];
    bytes.extend(std::iter::repeat(tag).take(64));
    bytes.extend(std::iter::repeat(0u8).take(96));
    BASE64.encode(bytes)
}

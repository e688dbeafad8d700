//! Full request flows through the gate.

use super::harness::{reference_of, signed_blob, TestGate};
use serde_json::json;
use std::time::Duration;
use x402_gate::ledger::{SignatureStatus, SimulationResult};
use x402_gate::{
    GateDecision, GateEvent, GateRequest, PaymentPayload, ProtocolVersion, SettlementMode,
    SettlementReceipt,
};

// A request without proof gets a 402 naming a fresh reference.
#[tokio::test]
async fn test_no_proof_gets_requirement() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);

    let response = t.call(GateRequest::new("GET", "/paid")).await;
    assert_eq!(response.status, 402);
    assert_eq!(
        response.body,
        json!({
            "x402Version": 2,
            "paymentRequirements": [{
                "network": "solana-devnet",
                "mint": TestGate::mint(),
                "amount": "0.05",
                "recipient": TestGate::recipient(),
                "reference": "ref-0",
                "expires_in": 300,
            }],
        })
    );

    let second = t.call(GateRequest::new("GET", "/paid")).await;
    assert_eq!(reference_of(&second.body), "ref-1", "references are never reused");
    assert_eq!(t.ledger.total_calls(), 0);
}

#[tokio::test]
async fn test_v1_body_is_flat() {
    let t = TestGate::new(SettlementMode::VerifyOnly, ProtocolVersion::V1);

    let response = t.call(GateRequest::new("GET", "/paid")).await;
    assert_eq!(response.body["x402Version"], json!(1));
    assert_eq!(response.body["scheme"], json!("x402"));
    assert_eq!(response.body["reference"], json!("ref-0"));
    assert!(response.body.get("paymentRequirements").is_none());
}

// A verify-only reference settles once, then repeats are served from the cache.
#[tokio::test]
async fn test_verify_only_settles_then_hits_cache() {
    let t = TestGate::new(SettlementMode::VerifyOnly, ProtocolVersion::V2);
    let reference = t.issue().await;
    t.land_payment("sig-b", &reference, 50_000);

    let response = t.call(TestGate::with_reference(&reference)).await;
    assert_eq!(response.status, 200);
    let receipt =
        SettlementReceipt::decode(response.header("x-payment-response").expect("header"))
            .expect("receipt");
    assert_eq!(receipt, SettlementReceipt::settled("sig-b"));

    let calls = t.ledger.total_calls();
    for _ in 0..3 {
        let repeat = t.call(TestGate::with_reference(&reference)).await;
        assert_eq!(repeat.status, 200);
        assert!(repeat.header("X-PAYMENT-RESPONSE").is_some());
    }
    assert_eq!(t.ledger.total_calls(), calls);
    assert_eq!(t.gate.cache().stats().hits, 3);
}

// A signed payload is simulated, broadcast, confirmed and cached.
#[tokio::test(start_paused = true)]
async fn test_submit_and_settle() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let mut events = t.gate.subscribe_events();
    let reference = t.issue().await;
    let header = t.script_signed(
        1,
        &reference,
        t.transfer("sig-c", 50_000).account(&reference),
        true,
    );

    let response = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!({ "content": "paid content" }));
    assert_eq!(t.ledger.calls("simulateTransaction"), 1);
    assert_eq!(t.ledger.calls("sendTransaction"), 1);
    assert!(t.gate.cache().is_paid(&reference));
    assert!(t.gate.registry().get(&reference).is_none());

    let seen: Vec<GateEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(seen.contains(&GateEvent::Submitted {
        reference: reference.clone(),
        signature: "sig-c".to_string(),
    }));
    assert!(seen.contains(&GateEvent::Settled {
        reference: reference.clone(),
        signature: "sig-c".to_string(),
    }));

    // Replaying the payload is served from the cache without a second broadcast.
    let replay = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(replay.status, 200);
    assert_eq!(t.ledger.calls("sendTransaction"), 1);
}

// A transfer below the price is refused before broadcast.
#[tokio::test]
async fn test_insufficient_payment_is_not_broadcast() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let reference = t.issue().await;
    let header = t.script_signed(
        2,
        &reference,
        t.transfer("sig-d", 49_999).account(&reference),
        true,
    );

    let response = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(response.status, 402);
    assert_ne!(reference_of(&response.body), reference);
    assert!(!response.body.to_string().contains("insufficient"));
    assert_eq!(t.ledger.calls("sendTransaction"), 0);
    assert!(!t.gate.cache().is_paid(&reference));
}

#[tokio::test]
async fn test_malformed_payload_gets_fresh_requirement() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    t.issue().await;

    let response = t.call(TestGate::with_payment("%%% not base64 %%%")).await;
    assert_eq!(response.status, 402);
    assert_eq!(reference_of(&response.body), "ref-1");
    assert_eq!(t.ledger.total_calls(), 0);
}

#[tokio::test]
async fn test_payload_for_unissued_reference_is_rejected() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let header = t.script_signed(
        3,
        "made-up",
        t.transfer("sig", 50_000).account("made-up"),
        true,
    );

    let response = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(response.status, 402);
    assert_eq!(t.ledger.total_calls(), 0);
}

#[tokio::test]
async fn test_network_mismatch_is_rejected() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let reference = t.issue().await;
    let header = PaymentPayload {
        network: "solana".to_string(),
        transaction: signed_blob(4),
        reference,
    }
    .encode();

    let response = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(response.status, 402);
    assert_eq!(t.ledger.total_calls(), 0);
}

// Binding is necessary: a sufficient transfer without the reference is refused.
#[tokio::test(start_paused = true)]
async fn test_unbound_transfer_is_not_settled() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let reference = t.issue().await;
    let header = t.script_signed(
        5,
        &reference,
        t.transfer("sig-unbound", 50_000),
        true,
    );

    let response = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(response.status, 402);
    assert_eq!(t.ledger.calls("sendTransaction"), 1);
    assert!(!t.gate.cache().is_paid(&reference));
}

#[tokio::test(start_paused = true)]
async fn test_on_chain_failure_is_not_settled() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let reference = t.issue().await;
    let header = t.script_signed(
        6,
        &reference,
        t.transfer("sig-f", 50_000).account(&reference),
        false,
    );
    t.ledger.script_statuses(
        "sig-f",
        vec![Some(SignatureStatus {
            slot: 9,
            confirmations: Some(1),
            err: Some(json!({ "InstructionError": [0, { "Custom": 1 }] })),
            confirmation_status: None,
        })],
    );

    let response = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(response.status, 402);
    assert!(!t.gate.cache().is_paid(&reference));
}

// One transfer listing two references pays for only one of them.
#[tokio::test]
async fn test_shared_transaction_unlocks_one_request() {
    let t = TestGate::new(SettlementMode::VerifyOnly, ProtocolVersion::V2);
    let first = t.issue().await;
    let second = t.issue().await;
    let record = t
        .transfer("sig-shared", 50_000)
        .account(&first)
        .account(&second)
        .build();
    t.ledger.insert_transaction("sig-shared", record);

    let paid = t.call(TestGate::with_reference(&first)).await;
    assert_eq!(paid.status, 200);

    let freeloader = t.call(TestGate::with_reference(&second)).await;
    assert_eq!(freeloader.status, 402);
    assert!(!t.gate.cache().is_paid(&second));
    assert_eq!(t.gate.cache().size(), 1);
    assert_eq!(
        t.gate.cache().claimed_by("sig-shared").as_deref(),
        Some(first.as_str())
    );
}

// The same shared transaction submitted for a second reference is refused
// after broadcast, before it is recorded against that reference.
#[tokio::test(start_paused = true)]
async fn test_shared_signed_transaction_unlocks_one_request() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let first = t.issue().await;
    let second = t.issue().await;
    let tx = t
        .transfer("sig-shared", 50_000)
        .account(&first)
        .account(&second);
    let paid = t.script_signed(8, &first, tx, true);
    let replayed = PaymentPayload::decode(&paid)
        .map(|payload| PaymentPayload {
            reference: second.clone(),
            ..payload
        })
        .expect("payload")
        .encode();

    assert_eq!(t.call(TestGate::with_payment(&paid)).await.status, 200);
    assert_eq!(t.call(TestGate::with_payment(&replayed)).await.status, 402);
    assert!(!t.gate.cache().is_paid(&second));
    let pending = t.gate.registry().get(&second).expect("still outstanding");
    assert_eq!(pending.submitted, None);
}

// An expired blockhash during simulation defers the amount check; the
// transaction is still broadcast and settles through confirmation.
#[tokio::test(start_paused = true)]
async fn test_expired_blockhash_settles_through_confirmation() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let mut events = t.gate.subscribe_events();
    let reference = t.issue().await;
    let header = t.script_signed(
        9,
        &reference,
        t.transfer("sig-stale", 50_000).account(&reference),
        true,
    );
    t.ledger.set_simulation(
        signed_blob(9),
        SimulationResult {
            err: Some(json!("BlockhashNotFound")),
            ..SimulationResult::default()
        },
    );

    let response = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(response.status, 200);
    assert_eq!(t.ledger.calls("simulateTransaction"), 1);
    assert_eq!(t.ledger.calls("sendTransaction"), 1);
    assert!(t.gate.cache().is_paid(&reference));

    let seen: Vec<GateEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(seen.contains(&GateEvent::Settled {
        reference: reference.clone(),
        signature: "sig-stale".to_string(),
    }));
}

// With an expired blockhash the amount is only checked on chain, where a
// short transfer is still refused.
#[tokio::test(start_paused = true)]
async fn test_expired_blockhash_short_transfer_fails_confirmation() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let reference = t.issue().await;
    let header = t.script_signed(
        10,
        &reference,
        t.transfer("sig-short", 10).account(&reference),
        true,
    );
    t.ledger.set_simulation(
        signed_blob(10),
        SimulationResult {
            err: Some(json!("BlockhashNotFound")),
            ..SimulationResult::default()
        },
    );

    let response = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(response.status, 402);
    assert_eq!(t.ledger.calls("sendTransaction"), 1);
    assert!(!t.gate.cache().is_paid(&reference));
}

// A broadcast that times out is not cached; a retry reconciles against the
// recorded signature once it lands, without broadcasting again.
#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_then_reconcile() {
    let t = TestGate::new(SettlementMode::SubmitAndSettle, ProtocolVersion::V2);
    let reference = t.issue().await;
    let tx = t.transfer("sig-slow", 50_000).account(&reference);
    let header = t.script_signed(7, &reference, tx.clone(), false);
    t.ledger.script_statuses("sig-slow", vec![None]);

    let first = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(first.status, 402);
    assert!(!t.gate.cache().is_paid(&reference));
    assert_eq!(t.ledger.calls("getSignatureStatuses"), 3);
    let pending = t.gate.registry().get(&reference).expect("still outstanding");
    assert_eq!(pending.submitted.as_deref(), Some("sig-slow"));

    t.ledger.insert_transaction("sig-slow", tx.build());

    let retry = t.call(TestGate::with_payment(&header)).await;
    assert_eq!(retry.status, 200);
    assert_eq!(t.ledger.calls("sendTransaction"), 1);
    assert!(t.gate.cache().is_paid(&reference));
}

#[tokio::test(start_paused = true)]
async fn test_expired_requirement_is_rejected() {
    let t = TestGate::with_config(|config| {
        config.mode = SettlementMode::VerifyOnly;
        config.pricing.expires_in_secs = 30;
    });
    let reference = t.issue().await;
    t.land_payment("sig-late", &reference, 50_000);

    tokio::time::advance(Duration::from_secs(31)).await;

    let response = t.call(TestGate::with_reference(&reference)).await;
    assert_eq!(response.status, 402);
    assert_eq!(t.ledger.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_settlement_expires_from_cache() {
    let t = TestGate::with_config(|config| {
        config.mode = SettlementMode::VerifyOnly;
        config.cache.ttl_secs = 60;
    });
    let reference = t.issue().await;
    t.land_payment("sig", &reference, 50_000);

    assert_eq!(t.call(TestGate::with_reference(&reference)).await.status, 200);

    tokio::time::advance(Duration::from_secs(61)).await;
    // The requirement was consumed at settlement, so the expired proof is refused.
    assert_eq!(t.call(TestGate::with_reference(&reference)).await.status, 402);
}

#[tokio::test]
async fn test_verify_only_without_payment() {
    let t = TestGate::new(SettlementMode::VerifyOnly, ProtocolVersion::V2);
    let reference = t.issue().await;

    let decision = t.gate.process(&TestGate::with_reference(&reference)).await;
    assert!(matches!(decision, GateDecision::PaymentRequired(_)));
    assert_eq!(t.ledger.calls("getSignaturesForAddress"), 1);
    // The reference stays outstanding so the client can retry once it pays.
    assert!(t.gate.registry().get(&reference).is_some());
}

#[tokio::test]
async fn test_ledger_outage_rejects() {
    let t = TestGate::new(SettlementMode::VerifyOnly, ProtocolVersion::V2);
    let reference = t.issue().await;
    t.land_payment("sig", &reference, 50_000);
    t.ledger.set_unavailable(true);

    assert_eq!(t.call(TestGate::with_reference(&reference)).await.status, 402);

    t.ledger.set_unavailable(false);
    assert_eq!(t.call(TestGate::with_reference(&reference)).await.status, 200);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_prunes_lapsed_requirements() {
    let t = TestGate::with_config(|config| {
        config.pricing.expires_in_secs = 5;
        config.cache.sweep_interval_secs = 10;
    });
    let mut events = t.gate.subscribe_events();
    t.issue().await;
    t.issue().await;
    assert_eq!(t.gate.registry().len(), 2);

    let sweeper = t.gate.start_sweeper();
    let swept = loop {
        if let GateEvent::CacheSwept { requirements, .. } = events.recv().await.expect("event") {
            break requirements;
        }
    };
    assert_eq!(swept, 2);
    assert!(t.gate.registry().is_empty());
    sweeper.stop().await;
}

#[tokio::test]
async fn test_concurrent_settlements_are_independent() {
    let t = TestGate::new(SettlementMode::VerifyOnly, ProtocolVersion::V2);
    let mut references = Vec::new();
    for i in 0..5 {
        let reference = t.issue().await;
        // Every other payment falls one raw unit short.
        let raw = if i % 2 == 0 { 50_000 } else { 49_999 };
        t.land_payment(&format!("sig-{i}"), &reference, raw);
        references.push(reference);
    }

    let responses = futures::future::join_all(
        references
            .iter()
            .map(|reference| t.call(TestGate::with_reference(reference))),
    )
    .await;

    let statuses: Vec<u16> = responses.iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![200, 402, 200, 402, 200]);
    assert_eq!(t.gate.cache().size(), 3);
}

//! End-to-end tests for x402-gate.
//!
//! These drive the full gate against the scripted in-memory ledger: 402
//! issuance, verify-only settlement, submit-and-settle, caching and the
//! failure paths.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod harness;
mod scenarios;

//! Payment verification and settlement.
//!
//! Every request to a protected resource passes through [`PaymentGate`],
//! which binds a single-use reference account to the request and only lets
//! it through once a sufficient token transfer bound to that reference has
//! been proven on chain.
//!
//! # Architecture
//!
//! ```text
//! request received
//!        │
//!        ▼
//! ┌─────────────────────┐
//! │ Extract proof       │──── none / malformed ───► 402 (fresh reference)
//! └─────────┬───────────┘
//!           ▼
//! ┌─────────────────────┐
//! │ Settlement cache    │──── HIT ───► proceed
//! └─────────┬───────────┘
//!           │ MISS
//!           ▼
//! ┌─────────────────────┐
//! │ Requirement registry│──── unknown / expired ───► 402
//! └─────────┬───────────┘
//!           │
//!    ┌──────┴───────────────┐
//!    │                      │
//! verify-only        submit-and-settle
//!    │                      │
//!    │               validate (simulate)
//!    │                      │
//!    │               broadcast + poll
//!    │                      │
//!    ▼                      ▼
//! reference history ──► confirm (amount + binding)
//!                           │
//!                           ▼
//!                 cache + proceed, or 402
//! ```

mod binding;
mod cache;
mod confirmer;
mod delta;
mod gate;
mod registry;
mod submitter;
mod sweeper;
mod types;
mod validator;

pub use binding::is_reference_bound;
pub use cache::{CacheEntry, CacheStats, SettlementCache};
pub use confirmer::{Confirmer, ConfirmerConfig, Settlement, DEFAULT_LOOKBACK};
pub use delta::{
    check_amount, resolve_decimals, to_raw_units, AmountCheck, BalanceDeltas, Decimals,
    DecimalsSource,
};
pub use gate::{
    GateDecision, GateRequest, GateResponse, PaymentGate, PAYMENT_REQUIRED, SERVICE_UNAVAILABLE,
};
pub use registry::{
    PendingPayment, RandomReferenceGenerator, ReferenceGenerator, RequirementRegistry,
};
pub use submitter::{Submitter, SubmitterConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
pub use sweeper::{spawn_sweeper, SweeperHandle};
pub use types::{
    Address, PaymentPayload, PaymentProof, PaymentRequirement, SettlementReceipt, Signature,
};
pub use validator::{PreSubmissionValidator, Validation, ValidatorConfig};

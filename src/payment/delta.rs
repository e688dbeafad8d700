//! Balance-delta engine.
//!
//! Computes how many raw token units each owner gained or lost in a
//! transaction from its pre/post token balance snapshots. All arithmetic is
//! done on arbitrary-precision integers; decimal amounts are scaled to raw
//! units by string manipulation, never through floating point.

use crate::error::PaymentError;
use crate::ledger::{LedgerRpc, TokenBalance};
use num_bigint::BigInt;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Net raw-unit change per owner, for one mint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceDeltas {
    mint: String,
    deltas: HashMap<String, BigInt>,
}

impl BalanceDeltas {
    /// Subtract every pre entry and add every post entry for `mint`.
    ///
    /// Entries for other mints, and entries without an owner, are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidAmount`] if a raw amount is not an integer.
    pub fn compute(
        pre: &[TokenBalance],
        post: &[TokenBalance],
        mint: &str,
    ) -> Result<Self, PaymentError> {
        let mut deltas: HashMap<String, BigInt> = HashMap::new();

        for (entries, sign) in [(pre, Sign::Minus), (post, Sign::Plus)] {
            for entry in entries.iter().filter(|e| e.mint == mint) {
                let Some(owner) = entry.owner.as_deref() else {
                    continue;
                };
                let raw: BigInt = entry
                    .ui_token_amount
                    .amount
                    .parse()
                    .map_err(|_| {
                        PaymentError::InvalidAmount(entry.ui_token_amount.amount.clone())
                    })?;
                let slot = deltas.entry(owner.to_string()).or_default();
                match sign {
                    Sign::Minus => *slot -= &raw,
                    Sign::Plus => *slot += &raw,
                }
            }
        }

        Ok(Self {
            mint: mint.to_string(),
            deltas,
        })
    }

    /// Net change for `owner`; zero if the owner does not appear.
    #[must_use]
    pub fn delta(&self, owner: &str) -> BigInt {
        self.deltas.get(owner).cloned().unwrap_or_default()
    }

    /// Mint these deltas are restricted to.
    #[must_use]
    pub fn mint(&self) -> &str {
        &self.mint
    }

    /// Number of owners with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    /// Whether no owner appeared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Sign {
    Minus,
    Plus,
}

/// Scale an exact decimal string to raw units: `floor(amount * 10^decimals)`.
///
/// Accepts `digits` or `digits.digits`; fractional digits beyond `decimals`
/// are truncated.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidAmount`] for anything else (signs,
/// exponents, whitespace, empty parts).
pub fn to_raw_units(amount: &str, decimals: u8) -> Result<BigInt, PaymentError> {
    let invalid = || PaymentError::InvalidAmount(amount.to_string());

    let (whole, fraction) = match amount.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (amount, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty()
        || !all_digits(whole)
        || !all_digits(fraction)
        || (amount.contains('.') && fraction.is_empty())
    {
        return Err(invalid());
    }

    let scale = usize::from(decimals);
    let mut digits = String::with_capacity(whole.len() + scale);
    digits.push_str(whole);
    if fraction.len() >= scale {
        digits.push_str(&fraction[..scale]);
    } else {
        digits.push_str(fraction);
        digits.extend(std::iter::repeat('0').take(scale - fraction.len()));
    }

    digits.parse().map_err(|_| invalid())
}

/// Where the decimal scale of a mint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalsSource {
    /// A balance entry in the transaction snapshot.
    Snapshot,
    /// The mint's on-chain supply record.
    Mint,
    /// The configured default; verification confidence is degraded.
    Default,
}

/// Resolved decimal scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimals {
    /// Number of decimal places.
    pub value: u8,
    /// Where the value came from.
    pub source: DecimalsSource,
}

/// Resolve the decimals of `mint`: snapshot first, then the mint record, then `default`.
pub async fn resolve_decimals(
    ledger: &dyn LedgerRpc,
    mint: &str,
    pre: &[TokenBalance],
    post: &[TokenBalance],
    default: u8,
) -> Decimals {
    if let Some(entry) = pre.iter().chain(post).find(|e| e.mint == mint) {
        return Decimals {
            value: entry.ui_token_amount.decimals,
            source: DecimalsSource::Snapshot,
        };
    }

    match ledger.get_token_supply(mint).await {
        Ok(supply) => {
            debug!("Decimals for {} read from mint: {}", mint, supply.decimals);
            Decimals {
                value: supply.decimals,
                source: DecimalsSource::Mint,
            }
        }
        Err(e) => {
            warn!(
                "Decimals for {} unavailable ({}); assuming {} - degraded-confidence verification",
                mint, e, default
            );
            Decimals {
                value: default,
                source: DecimalsSource::Default,
            }
        }
    }
}

/// Outcome of checking a recipient's balance change against a price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountCheck {
    /// Raw units the recipient gained.
    pub received: BigInt,
    /// Raw units required.
    pub required: BigInt,
    /// Decimal scale used.
    pub decimals: Decimals,
}

impl AmountCheck {
    /// Whether the recipient received at least the required amount.
    #[must_use]
    pub fn is_sufficient(&self) -> bool {
        self.received >= self.required
    }

    /// `Ok` if sufficient, else [`PaymentError::InsufficientAmount`].
    ///
    /// # Errors
    ///
    /// See above.
    pub fn into_result(self) -> Result<Self, PaymentError> {
        if self.is_sufficient() {
            Ok(self)
        } else {
            Err(PaymentError::InsufficientAmount {
                received: self.received.to_string(),
                required: self.required.to_string(),
            })
        }
    }
}

/// Resolve decimals, scale the price and compare with the recipient's delta.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidAmount`] if the price or a snapshot amount
/// does not parse.
pub async fn check_amount(
    ledger: &dyn LedgerRpc,
    pre: &[TokenBalance],
    post: &[TokenBalance],
    mint: &str,
    recipient: &str,
    amount: &str,
    default_decimals: u8,
) -> Result<AmountCheck, PaymentError> {
    let decimals = resolve_decimals(ledger, mint, pre, post, default_decimals).await;
    let required = to_raw_units(amount, decimals.value)?;
    let deltas = BalanceDeltas::compute(pre, post, mint)?;
    Ok(AmountCheck {
        received: deltas.delta(recipient),
        required,
        decimals,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use proptest::prelude::*;

    fn bal(owner: &str, mint: &str, amount: &str) -> TokenBalance {
        TokenBalance::new(0, owner, mint, amount, 6)
    }

    #[test]
    fn test_required_raw_exact() {
        assert_eq!(to_raw_units("0.05", 6).unwrap(), BigInt::from(50_000));
        assert_eq!(to_raw_units("1", 6).unwrap(), BigInt::from(1_000_000));
        assert_eq!(to_raw_units("0.1", 9).unwrap(), BigInt::from(100_000_000));
        assert_eq!(to_raw_units("12.5", 0).unwrap(), BigInt::from(12));
        assert_eq!(to_raw_units("0.0000019", 6).unwrap(), BigInt::from(1));
    }

    #[test]
    fn test_required_raw_beyond_u128() {
        let huge = "340282366920938463463374607431768211456"; // 2^128
        let raw = to_raw_units(huge, 18).unwrap();
        assert_eq!(raw.to_string(), format!("{huge}000000000000000000"));
    }

    #[test]
    fn test_invalid_amounts() {
        for bad in ["", ".5", "5.", "-1", "1e6", " 1", "1.2.3", "0x10", "1,5"] {
            assert!(
                matches!(to_raw_units(bad, 6), Err(PaymentError::InvalidAmount(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_deltas_per_owner() {
        let pre = vec![bal("Payer", "Mint", "100000"), bal("Merchant", "Mint", "5")];
        let post = vec![bal("Payer", "Mint", "50000"), bal("Merchant", "Mint", "50005")];

        let deltas = BalanceDeltas::compute(&pre, &post, "Mint").unwrap();
        assert_eq!(deltas.delta("Merchant"), BigInt::from(50_000));
        assert_eq!(deltas.delta("Payer"), BigInt::from(-50_000));
        assert_eq!(deltas.delta("Nobody"), BigInt::from(0));
    }

    #[test]
    fn test_deltas_ignore_other_mints_and_ownerless() {
        let mut ownerless = bal("x", "Mint", "999");
        ownerless.owner = None;
        let pre = vec![ownerless];
        let post = vec![bal("Merchant", "Other", "1000000"), bal("Merchant", "Mint", "7")];

        let deltas = BalanceDeltas::compute(&pre, &post, "Mint").unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas.delta("Merchant"), BigInt::from(7));
    }

    #[test]
    fn test_new_token_account_has_no_pre_entry() {
        let post = vec![bal("Merchant", "Mint", "50000")];
        let deltas = BalanceDeltas::compute(&[], &post, "Mint").unwrap();
        assert_eq!(deltas.delta("Merchant"), BigInt::from(50_000));
    }

    #[test]
    fn test_non_integer_ledger_amount_fails_closed() {
        let post = vec![bal("Merchant", "Mint", "0.5")];
        assert!(BalanceDeltas::compute(&[], &post, "Mint").is_err());
    }

    #[tokio::test]
    async fn test_decimals_resolution_order() {
        let ledger = InMemoryLedger::new();
        let snapshot = vec![TokenBalance::new(0, "Merchant", "Mint", "1", 9)];

        let from_snapshot = resolve_decimals(&ledger, "Mint", &[], &snapshot, 6).await;
        assert_eq!(from_snapshot.value, 9);
        assert_eq!(from_snapshot.source, DecimalsSource::Snapshot);
        assert_eq!(ledger.calls("getTokenSupply"), 0);

        ledger.set_token_supply("Mint", "1000000", 2);
        let from_mint = resolve_decimals(&ledger, "Mint", &[], &[], 6).await;
        assert_eq!(from_mint.value, 2);
        assert_eq!(from_mint.source, DecimalsSource::Mint);

        let fallback = resolve_decimals(&ledger, "Unknown", &[], &[], 6).await;
        assert_eq!(fallback.value, 6);
        assert_eq!(fallback.source, DecimalsSource::Default);
    }

    #[tokio::test]
    async fn test_check_amount_boundary() {
        let ledger = InMemoryLedger::new();
        let pre = vec![bal("Merchant", "Mint", "0")];
        let exact = vec![bal("Merchant", "Mint", "50000")];
        let short = vec![bal("Merchant", "Mint", "49999")];

        let ok = check_amount(&ledger, &pre, &exact, "Mint", "Merchant", "0.05", 6)
            .await
            .unwrap();
        assert!(ok.is_sufficient());

        let err = check_amount(&ledger, &pre, &short, "Mint", "Merchant", "0.05", 6)
            .await
            .unwrap()
            .into_result()
            .unwrap_err();
        assert_eq!(
            err,
            PaymentError::InsufficientAmount {
                received: "49999".to_string(),
                required: "50000".to_string(),
            }
        );
    }

    proptest! {
        #[test]
        fn prop_scaling_matches_integer_math(whole in 0u64..1_000_000, frac in 0u32..1_000_000, decimals in 0u8..12) {
            let amount = format!("{whole}.{frac:06}");
            let raw = to_raw_units(&amount, decimals).unwrap();

            // floor((whole * 10^6 + frac) * 10^decimals / 10^6), in u128
            let micro = u128::from(whole) * 1_000_000 + u128::from(frac);
            let expected = micro * 10u128.pow(u32::from(decimals)) / 1_000_000;
            prop_assert_eq!(raw, BigInt::from(expected));
        }

        #[test]
        fn prop_delta_is_post_minus_pre(pre in 0u64..u64::MAX / 2, post in 0u64..u64::MAX / 2) {
            let deltas = BalanceDeltas::compute(
                &[bal("Owner", "Mint", &pre.to_string())],
                &[bal("Owner", "Mint", &post.to_string())],
                "Mint",
            ).unwrap();
            prop_assert_eq!(deltas.delta("Owner"), BigInt::from(post) - BigInt::from(pre));
        }
    }
}

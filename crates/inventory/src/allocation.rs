//! FIFO / FEFO allocation policy.
//!
//! Pure selection over a candidate list; the caller gathers candidates
//! (restricted to available lots) and commits the resulting plan.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, ValueObject};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Oldest receipt/manufacture date first.
    Fifo,
    /// Earliest expiry first; batches without expiry last.
    Fefo,
}

/// A consumable batch (an entry layer or a lot-level stock record).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<B> {
    pub batch: B,
    pub received_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
    /// Ledger insertion order of the batch's first entry; breaks ties.
    pub seq: u64,
    pub available: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSlice<B> {
    pub batch: B,
    pub quantity: Decimal,
}

impl<B: Clone + PartialEq + core::fmt::Debug> ValueObject for AllocationSlice<B> {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan<B> {
    pub slices: Vec<AllocationSlice<B>>,
    pub total: Decimal,
}

/// `None` sorts after every date.
fn date_key(date: Option<NaiveDate>) -> (bool, Option<NaiveDate>) {
    (date.is_none(), date)
}

/// Greedily consume ordered candidates until `demand` is met.
///
/// Fails with `InsufficientStock` (and no plan) if the eligible total is short.
pub fn allocate<B: Clone>(
    policy: AllocationPolicy,
    mut candidates: Vec<Candidate<B>>,
    demand: Decimal,
    scope: impl core::fmt::Display,
) -> DomainResult<AllocationPlan<B>> {
    if demand <= Decimal::ZERO {
        return Err(DomainError::validation("demand quantity must be positive"));
    }

    candidates.retain(|c| c.available > Decimal::ZERO);
    match policy {
        AllocationPolicy::Fifo => candidates.sort_by_key(|c| (date_key(c.received_on), c.seq)),
        AllocationPolicy::Fefo => candidates.sort_by_key(|c| (date_key(c.expires_on), c.seq)),
    }

    let eligible: Decimal = candidates.iter().map(|c| c.available).sum();
    if eligible < demand {
        return Err(DomainError::insufficient(scope, eligible, demand));
    }

    let mut remaining = demand;
    let mut slices = Vec::new();
    for c in candidates {
        if remaining.is_zero() {
            break;
        }
        let take = c.available.min(remaining);
        remaining -= take;
        slices.push(AllocationSlice {
            batch: c.batch,
            quantity: take,
        });
    }

    Ok(AllocationPlan {
        slices,
        total: demand,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn candidate(batch: &'static str, received: Option<NaiveDate>, expires: Option<NaiveDate>, seq: u64, qty: Decimal) -> Candidate<&'static str> {
        Candidate {
            batch,
            received_on: received,
            expires_on: expires,
            seq,
            available: qty,
        }
    }

    #[test]
    fn fefo_takes_earliest_expiry_first() {
        let candidates = vec![
            candidate("B", date(2024, 1, 1), date(2025, 6, 1), 1, dec!(40)),
            candidate("A", date(2024, 2, 1), date(2025, 1, 1), 2, dec!(20)),
        ];
        let plan = allocate(AllocationPolicy::Fefo, candidates, dec!(50), "X").unwrap();
        assert_eq!(
            plan.slices,
            vec![
                AllocationSlice { batch: "A", quantity: dec!(20) },
                AllocationSlice { batch: "B", quantity: dec!(30) },
            ]
        );
    }

    #[test]
    fn fefo_puts_missing_expiry_last() {
        let candidates = vec![
            candidate("none", None, None, 1, dec!(10)),
            candidate("late", None, date(2030, 1, 1), 2, dec!(10)),
        ];
        let plan = allocate(AllocationPolicy::Fefo, candidates, dec!(15), "X").unwrap();
        assert_eq!(plan.slices[0].batch, "late");
        assert_eq!(plan.slices[1], AllocationSlice { batch: "none", quantity: dec!(5) });
    }

    #[test]
    fn fifo_breaks_ties_by_ledger_order() {
        let same_day = date(2024, 5, 5);
        let candidates = vec![
            candidate("second", same_day, None, 9, dec!(5)),
            candidate("first", same_day, None, 3, dec!(5)),
        ];
        let plan = allocate(AllocationPolicy::Fifo, candidates, dec!(6), "X").unwrap();
        assert_eq!(plan.slices[0], AllocationSlice { batch: "first", quantity: dec!(5) });
        assert_eq!(plan.slices[1], AllocationSlice { batch: "second", quantity: dec!(1) });
    }

    #[test]
    fn shortfall_fails_without_a_partial_plan() {
        let candidates = vec![candidate("A", None, None, 1, dec!(20))];
        let err = allocate(AllocationPolicy::Fifo, candidates, dec!(50), "X").unwrap_err();
        match err {
            DomainError::InsufficientStock { available, requested, .. } => {
                assert_eq!(available, dec!(20));
                assert_eq!(requested, dec!(50));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// A successful plan covers exactly the demand and never over-draws a batch.
        #[test]
        fn plan_covers_demand_exactly(
            qtys in prop::collection::vec(1u32..500u32, 1..12),
            demand in 1u32..3000u32,
        ) {
            let candidates: Vec<_> = qtys
                .iter()
                .enumerate()
                .map(|(i, q)| Candidate {
                    batch: i,
                    received_on: None,
                    expires_on: None,
                    seq: i as u64,
                    available: Decimal::from(*q),
                })
                .collect();
            let total: u32 = qtys.iter().sum();
            let result = allocate(AllocationPolicy::Fifo, candidates, Decimal::from(demand), "X");

            if demand > total {
                prop_assert!(result.is_err());
            } else {
                let plan = result.unwrap();
                let sum: Decimal = plan.slices.iter().map(|s| s.quantity).sum();
                prop_assert_eq!(sum, Decimal::from(demand));
                for s in &plan.slices {
                    prop_assert!(s.quantity <= Decimal::from(qtys[s.batch]));
                }
            }
        }
    }
}

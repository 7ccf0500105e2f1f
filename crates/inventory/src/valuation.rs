//! Costing rules: weighted-average and FIFO layers.
//!
//! `ArticleCost` is the per-article cost state. It is pure: the infra
//! valuation engine owns one per article and mutates it under the article
//! lock, only after the ledger write it prices has succeeded.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, StockKey, ValueObject, checked_sum, checked_value, internal};

use crate::allocation::{AllocationPolicy, Candidate, allocate};
use crate::catalog::CostingMethod;

/// An unconsumed FIFO batch: what remains of one valued entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLayer {
    pub movement_seq: u64,
    pub received_on: NaiveDate,
    pub remaining: Decimal,
    pub unit_cost: Decimal,
}

impl ValueObject for CostLayer {}

/// One priced portion of an exit. FIFO exits may produce several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuedSlice {
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub total_value: Decimal,
    /// Layer consumed (FIFO only).
    pub layer_seq: Option<u64>,
}

impl ValuedSlice {
    pub fn new(quantity: Decimal, unit_cost: Decimal, layer_seq: Option<u64>) -> DomainResult<Self> {
        Ok(Self {
            quantity,
            unit_cost,
            total_value: checked_value(quantity, unit_cost)?,
            layer_seq,
        })
    }
}

impl ValueObject for ValuedSlice {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleCost {
    WeightedAverage { quantity: Decimal, average: Decimal },
    Fifo { layers: BTreeMap<StockKey, Vec<CostLayer>> },
}

impl ArticleCost {
    pub fn new(method: CostingMethod) -> Self {
        match method {
            CostingMethod::WeightedAverage => ArticleCost::WeightedAverage {
                quantity: Decimal::ZERO,
                average: Decimal::ZERO,
            },
            CostingMethod::Fifo => ArticleCost::Fifo {
                layers: BTreeMap::new(),
            },
        }
    }

    pub fn method(&self) -> CostingMethod {
        match self {
            ArticleCost::WeightedAverage { .. } => CostingMethod::WeightedAverage,
            ArticleCost::Fifo { .. } => CostingMethod::Fifo,
        }
    }

    /// Cost used for entries without an explicit cost and for variance valuation.
    ///
    /// Weighted-average: the running average. FIFO: the weighted cost of the
    /// remaining layers across all keys. Zero when nothing is on hand.
    pub fn current_unit_cost(&self) -> Decimal {
        match self {
            ArticleCost::WeightedAverage { average, .. } => *average,
            // Entries are only accepted while these totals stay representable.
            ArticleCost::Fifo { layers } => match fifo_totals(layers.values().flatten()) {
                Some((qty, value)) if !qty.is_zero() => value
                    .checked_div(qty)
                    .map(internal)
                    .unwrap_or(Decimal::ZERO),
                _ => Decimal::ZERO,
            },
        }
    }

    /// Price an entry and fold it into the cost state.
    pub fn on_entry(
        &mut self,
        key: StockKey,
        movement_seq: u64,
        received_on: NaiveDate,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> DomainResult<ValuedSlice> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("entry quantity must be positive"));
        }
        if unit_cost < Decimal::ZERO {
            return Err(DomainError::validation("unit cost cannot be negative"));
        }
        let unit_cost = internal(unit_cost);

        match self {
            ArticleCost::WeightedAverage { quantity: on_hand, average } => {
                let slice = ValuedSlice::new(quantity, unit_cost, None)?;
                let new_qty = checked_sum(*on_hand, quantity, "quantity on hand")?;
                let total = on_hand
                    .checked_mul(*average)
                    .zip(quantity.checked_mul(unit_cost))
                    .and_then(|(held, incoming)| held.checked_add(incoming))
                    .ok_or_else(|| DomainError::validation("stock value out of range"))?;
                *average = total
                    .checked_div(new_qty)
                    .map(internal)
                    .ok_or_else(|| DomainError::validation("average cost out of range"))?;
                *on_hand = new_qty;
                Ok(slice)
            }
            ArticleCost::Fifo { layers } => {
                let slice = ValuedSlice::new(quantity, unit_cost, Some(movement_seq))?;
                let layer = CostLayer {
                    movement_seq,
                    received_on,
                    remaining: quantity,
                    unit_cost,
                };
                if fifo_totals(layers.values().flatten().chain(std::iter::once(&layer))).is_none() {
                    return Err(DomainError::validation(format!(
                        "entry of {quantity} at {unit_cost} takes the article's stock value out of range"
                    )));
                }
                layers.entry(key).or_default().push(layer);
                Ok(slice)
            }
        }
    }

    /// Price an exit and consume it from the cost state.
    ///
    /// FIFO exits take the oldest layers at `key` first (via the FIFO
    /// allocation policy) and return one slice per layer touched.
    pub fn on_exit(&mut self, key: StockKey, quantity: Decimal) -> DomainResult<Vec<ValuedSlice>> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("exit quantity must be positive"));
        }

        match self {
            ArticleCost::WeightedAverage { quantity: on_hand, average } => {
                *on_hand = (*on_hand - quantity).max(Decimal::ZERO);
                Ok(vec![ValuedSlice::new(quantity, *average, None)?])
            }
            ArticleCost::Fifo { layers } => {
                let key_layers = layers.entry(key).or_default();
                let candidates = key_layers
                    .iter()
                    .enumerate()
                    .map(|(idx, l)| Candidate {
                        batch: idx,
                        received_on: Some(l.received_on),
                        expires_on: None,
                        seq: l.movement_seq,
                        available: l.remaining,
                    })
                    .collect();
                let plan = allocate(AllocationPolicy::Fifo, candidates, quantity, key)?;

                let mut slices = Vec::with_capacity(plan.slices.len());
                for slice in plan.slices {
                    let layer = &mut key_layers[slice.batch];
                    layer.remaining -= slice.quantity;
                    slices.push(ValuedSlice::new(slice.quantity, layer.unit_cost, Some(layer.movement_seq))?);
                }
                key_layers.retain(|l| l.remaining > Decimal::ZERO);
                Ok(slices)
            }
        }
    }

    /// Remaining layers at one key, oldest first (FIFO only).
    pub fn layers_at(&self, key: &StockKey) -> Vec<CostLayer> {
        match self {
            ArticleCost::Fifo { layers } => {
                let mut out = layers.get(key).cloned().unwrap_or_default();
                out.sort_by_key(|l| (l.received_on, l.movement_seq));
                out
            }
            ArticleCost::WeightedAverage { .. } => Vec::new(),
        }
    }
}

/// Quantity and value of a set of layers, `None` on overflow.
fn fifo_totals<'a>(mut layers: impl Iterator<Item = &'a CostLayer>) -> Option<(Decimal, Decimal)> {
    layers.try_fold((Decimal::ZERO, Decimal::ZERO), |(q, v), l| {
        Some((
            q.checked_add(l.remaining)?,
            v.checked_add(l.remaining.checked_mul(l.unit_cost)?)?,
        ))
    })
}

//! FIFO-by-expiry allocation.
//!
//! Allocation order is a hard contract: expiry ascending with undated lots
//! last, then receiving time ascending, then lot id. Given the same snapshot,
//! every caller depletes the same lots in the same order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use stockroom_core::amount::checked_sum;
use stockroom_core::{DomainError, DomainResult, LotId, ProductId};

use crate::lot::InventoryLot;

/// Sum of quantities over the product's non-expired lots. Zero when none exist.
pub fn available_quantity(
    lots: &[InventoryLot],
    product_id: ProductId,
    now: DateTime<Utc>,
) -> DomainResult<Decimal> {
    checked_sum(
        lots.iter()
            .filter(|lot| lot.product_id == product_id && lot.is_allocatable(now))
            .map(|lot| lot.quantity),
    )
}

/// Non-expired lots of the product in allocation order.
pub fn allocatable(
    lots: &[InventoryLot],
    product_id: ProductId,
    now: DateTime<Utc>,
) -> Vec<&InventoryLot> {
    let mut selected: Vec<&InventoryLot> = lots
        .iter()
        .filter(|lot| lot.product_id == product_id && lot.is_allocatable(now))
        .collect();
    selected.sort_by(|a, b| allocation_order(a, b));
    selected
}

fn allocation_order(a: &InventoryLot, b: &InventoryLot) -> Ordering {
    let by_expiry = match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_expiry
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.cmp(&b.id))
}

/// One mutation of a depletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DepletionStep {
    /// The lot is fully consumed and must be deleted.
    Remove { lot_id: LotId, quantity: Decimal },
    /// The lot keeps `remaining` units.
    Reduce { lot_id: LotId, taken: Decimal, remaining: Decimal },
}

impl DepletionStep {
    pub fn lot_id(&self) -> LotId {
        match self {
            DepletionStep::Remove { lot_id, .. } | DepletionStep::Reduce { lot_id, .. } => *lot_id,
        }
    }

    pub fn taken(&self) -> Decimal {
        match self {
            DepletionStep::Remove { quantity, .. } => *quantity,
            DepletionStep::Reduce { taken, .. } => *taken,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepletionPlan {
    pub product_id: ProductId,
    pub requested: Decimal,
    pub steps: Vec<DepletionStep>,
}

impl DepletionPlan {
    pub fn total_taken(&self) -> DomainResult<Decimal> {
        checked_sum(self.steps.iter().map(DepletionStep::taken))
    }

    /// Apply the plan to an in-memory snapshot.
    pub fn apply_to(&self, lots: &mut Vec<InventoryLot>) {
        for step in &self.steps {
            match step {
                DepletionStep::Remove { lot_id, .. } => lots.retain(|lot| lot.id != *lot_id),
                DepletionStep::Reduce { lot_id, remaining, .. } => {
                    if let Some(lot) = lots.iter_mut().find(|lot| lot.id == *lot_id) {
                        lot.quantity = *remaining;
                    }
                }
            }
        }
    }
}

/// Plan the consumption of `requested` units of a product.
///
/// Walks [`allocatable`] greedily: a lot that fits entirely in what is still
/// needed is removed, the first lot that exceeds it is reduced and the walk
/// stops. Empty lots met before the walk stops are removed too.
///
/// Nothing is mutated here. A plan is only valid against the snapshot it was
/// computed from, so callers hold locks on those lots until it is applied.
pub fn plan_depletion(
    lots: &[InventoryLot],
    product_id: ProductId,
    requested: Decimal,
    now: DateTime<Utc>,
) -> DomainResult<DepletionPlan> {
    if requested <= Decimal::ZERO {
        return Err(DomainError::validation("quantity must be greater than zero"));
    }
    if !lots.iter().any(|lot| lot.product_id == product_id) {
        return Err(DomainError::ProductHasNoInventory(product_id));
    }

    let candidates = allocatable(lots, product_id, now);
    let available = checked_sum(candidates.iter().map(|lot| lot.quantity))?;
    if available < requested {
        return Err(DomainError::InsufficientInventory {
            product_id,
            requested,
            available,
            missing: requested - available,
        });
    }

    let mut remaining = requested;
    let mut steps = Vec::new();
    for lot in candidates {
        if remaining.is_zero() {
            break;
        }
        if lot.quantity <= remaining {
            remaining -= lot.quantity;
            steps.push(DepletionStep::Remove {
                lot_id: lot.id,
                quantity: lot.quantity,
            });
        } else {
            steps.push(DepletionStep::Reduce {
                lot_id: lot.id,
                taken: remaining,
                remaining: lot.quantity - remaining,
            });
            remaining = Decimal::ZERO;
        }
    }

    Ok(DepletionPlan {
        product_id,
        requested,
        steps,
    })
}

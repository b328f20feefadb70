use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::Deserialize;

use stockroom_core::amount::{check_bound, checked_mul, checked_sub, checked_sum};
use stockroom_core::{DomainError, DomainResult, FieldError, ProductId, StoreId};

/// Largest accepted difference between the client's grand total and ours.
pub const GRAND_TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub customer_name: Option<String>,
    /// Only honored for callers allowed to act across stores.
    #[serde(default)]
    pub store_id: Option<StoreId>,
    pub grand_total: Decimal,
    pub items: Vec<CartItem>,
}

impl CheckoutRequest {
    /// Shape checks that need no storage.
    pub fn validate(&self) -> DomainResult<()> {
        let mut errors = Vec::new();
        if self.items.is_empty() {
            errors.push(FieldError::new("items", "cart must contain at least one item"));
        }
        for (idx, item) in self.items.iter().enumerate() {
            if item.quantity <= Decimal::ZERO {
                errors.push(FieldError::new(
                    format!("items[{idx}].quantity"),
                    "quantity must be greater than zero",
                ));
            }
            check_bound(&mut errors, format!("items[{idx}].quantity"), item.quantity);
        }
        if self.grand_total <= Decimal::ZERO {
            errors.push(FieldError::new("grand_total", "grand_total must be greater than zero"));
        }
        DomainError::from_field_errors(errors)
    }

    /// Distinct products in the cart, sorted. Lots are locked in this order.
    pub fn product_ids(&self) -> Vec<ProductId> {
        let mut seen = HashSet::new();
        let mut ids: Vec<ProductId> = self
            .items
            .iter()
            .map(|item| item.product_id)
            .filter(|id| seen.insert(*id))
            .collect();
        ids.sort();
        ids
    }

    pub fn customer_name(&self) -> Option<String> {
        self.customer_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

/// A cart item priced at the product's current selling price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_price: Decimal,
}

impl PricedLine {
    pub fn total(&self) -> DomainResult<Decimal> {
        checked_mul(self.quantity, self.unit_price)
    }
}

/// Check the client's grand total against the sum of line totals.
///
/// Returns the computed total, which is what gets recorded on the order.
pub fn reconcile(client: Decimal, lines: &[PricedLine]) -> DomainResult<Decimal> {
    let totals = lines.iter().map(PricedLine::total).collect::<DomainResult<Vec<_>>>()?;
    let computed = checked_sum(totals)?;
    if checked_sub(client, computed)?.abs() > GRAND_TOTAL_TOLERANCE {
        return Err(DomainError::GrandTotalMismatch { client, computed });
    }
    Ok(computed)
}

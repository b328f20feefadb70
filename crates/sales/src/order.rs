use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{DomainResult, Entity, OrderId, OrderLineId, ProductId, StoreId, UserId};

use crate::cart::{CheckoutRequest, PricedLine, reconcile};
use crate::invoice::generate_invoice_number;

/// A completed sale. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub invoice_number: String,
    pub customer_name: Option<String>,
    pub total_price: Decimal,
    pub store_id: StoreId,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLine>,
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> OrderId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: OrderLineId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    /// `quantity * selling_price` at the time of sale.
    pub total_price: Decimal,
    pub created_at: DateTime<Utc>,
}

/// An order ready to be inserted; storage assigns the ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub invoice_number: String,
    pub customer_name: Option<String>,
    pub total_price: Decimal,
    pub store_id: StoreId,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<OrderLineDraft>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLineDraft {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub total_price: Decimal,
}

impl OrderDraft {
    /// Reconcile the priced cart and stamp an invoice number.
    ///
    /// Lines keep the cart's item order, one line per cart item.
    pub fn build(
        request: &CheckoutRequest,
        lines: &[PricedLine],
        store_id: StoreId,
        store_code: &str,
        created_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let total_price = reconcile(request.grand_total, lines)?;
        let lines = lines
            .iter()
            .map(|line| {
                Ok(OrderLineDraft {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    total_price: line.total()?,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self {
            invoice_number: generate_invoice_number(store_code, now),
            customer_name: request.customer_name(),
            total_price,
            store_id,
            created_by,
            created_at: now,
            lines,
        })
    }

    /// Materialize with storage-assigned ids.
    pub fn into_order(self, id: OrderId, line_ids: impl IntoIterator<Item = OrderLineId>) -> Order {
        let created_at = self.created_at;
        let lines = self
            .lines
            .into_iter()
            .zip(line_ids)
            .map(|(line, line_id)| OrderLine {
                id: line_id,
                order_id: id,
                product_id: line.product_id,
                quantity: line.quantity,
                total_price: line.total_price,
                created_at,
            })
            .collect();
        Order {
            id,
            invoice_number: self.invoice_number,
            customer_name: self.customer_name,
            total_price: self.total_price,
            store_id: self.store_id,
            created_by: self.created_by,
            created_at,
            lines,
        }
    }
}

/// Order listing filter. `store_id` is already scoped by the caller's access.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderQuery {
    pub store_id: Option<StoreId>,
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl OrderQuery {
    pub fn matches(&self, order: &Order) -> bool {
        if self.store_id.is_some_and(|store| store != order.store_id) {
            return false;
        }
        if self.from.is_some_and(|from| order.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| order.created_at > to) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                order.invoice_number.to_lowercase().contains(&term)
                    || order
                        .customer_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(&term))
            }
        }
    }
}

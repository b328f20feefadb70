//! Checkout orchestrator.
//!
//! A checkout is one unit of work: the cart's lots are locked, every item is
//! planned against the locked snapshot, then the order, its lines and all
//! depletions are written together. A failure anywhere leaves nothing behind,
//! so a rejected checkout is never ambiguous about whether an order exists.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stockroom_auth::{Operation, Principal, authorize, read_scope, resolve_store};
use stockroom_catalog::Product;
use stockroom_core::amount::checked_sum;
use stockroom_core::{Clock, DomainError, DomainResult, OrderId, Page, PageRequest, ProductId, RequestContext};
use stockroom_inventory::{InventoryLot, available_quantity, plan_depletion};
use stockroom_sales::{CheckoutRequest, Order, OrderDraft, OrderQuery, PricedLine, reconcile};

use super::visible_to;
use crate::db::{CheckoutPlan, Database};

/// Attempts made when the commit fails for a retryable reason.
pub const MAX_CHECKOUT_ATTEMPTS: u32 = 3;

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(400);

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
    retry_backoff: Duration,
}

impl CheckoutService {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    /// Base delay between attempts; attempt `n` waits `n * backoff`.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub async fn checkout(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        request: CheckoutRequest,
    ) -> DomainResult<Order> {
        authorize(principal, Operation::Checkout)?;
        request.validate()?;

        let store_id = resolve_store(principal, request.store_id)?;
        let store = self
            .db
            .get_store(store_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("store {store_id}")))?;
        let store_code = store.require_code()?.to_string();

        let product_ids = request.product_ids();
        let products: HashMap<ProductId, Product> = self
            .db
            .get_products(&product_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = products
                .get(&item.product_id)
                .ok_or_else(|| DomainError::not_found(format!("product {}", item.product_id)))?;
            product.ensure_store(store_id)?;
            lines.push(PricedLine {
                product_id: product.id,
                quantity: item.quantity,
                unit_price: product.selling_price,
            });
        }

        // Stock is checked before prices; the locked re-check happens in the planner.
        if let Err(err) = self.precheck_stock(&request).await {
            tracing::warn!(parent: ctx.span(), store_id = %store_id, error = %err, "checkout rejected");
            return Err(err);
        }

        if let Err(err) = reconcile(request.grand_total, &lines) {
            tracing::warn!(parent: ctx.span(), store_id = %store_id, error = %err, "checkout rejected");
            return Err(err);
        }

        let mut attempt = 1;
        loop {
            let now = self.clock.now();
            let planner = |lots: &[InventoryLot]| -> DomainResult<CheckoutPlan> {
                let mut snapshot = lots.to_vec();
                let mut depletions = Vec::with_capacity(request.items.len());
                for item in &request.items {
                    let available = available_quantity(&snapshot, item.product_id, now)?;
                    if item.quantity > available {
                        return Err(DomainError::InsufficientInventory {
                            product_id: item.product_id,
                            requested: item.quantity,
                            available,
                            missing: item.quantity - available,
                        });
                    }
                    let plan = plan_depletion(&snapshot, item.product_id, item.quantity, now)?;
                    plan.apply_to(&mut snapshot);
                    depletions.push(plan);
                }
                let order = OrderDraft::build(&request, &lines, store_id, &store_code, Some(principal.user_id), now)?;
                Ok(CheckoutPlan { order, depletions })
            };

            match self.db.commit_checkout(&product_ids, &planner).await {
                Ok(order) => {
                    tracing::info!(
                        parent: ctx.span(),
                        order_id = %order.id,
                        invoice_number = %order.invoice_number,
                        total = %order.total_price,
                        lines = order.lines.len(),
                        attempt,
                        "checkout committed"
                    );
                    return Ok(order);
                }
                Err(err) if err.is_retryable() && attempt < MAX_CHECKOUT_ATTEMPTS => {
                    tracing::warn!(parent: ctx.span(), attempt, error = %err, "checkout commit failed, retrying");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => {
                    let err = DomainError::from(err);
                    tracing::warn!(parent: ctx.span(), store_id = %store_id, attempt, error = %err, "checkout rejected");
                    return Err(err);
                }
            }
        }
    }

    /// Unlocked availability check over the whole cart, with repeated lines
    /// of one product summed.
    async fn precheck_stock(&self, request: &CheckoutRequest) -> DomainResult<()> {
        let now = self.clock.now();
        for product_id in request.product_ids() {
            let requested = checked_sum(
                request
                    .items
                    .iter()
                    .filter(|item| item.product_id == product_id)
                    .map(|item| item.quantity),
            )?;
            let lots = self.db.product_lots(product_id).await?;
            let available = available_quantity(&lots, product_id, now)?;
            if requested > available {
                return Err(DomainError::InsufficientInventory {
                    product_id,
                    requested,
                    available,
                    missing: requested - available,
                });
            }
        }
        Ok(())
    }

    pub async fn get_order(&self, principal: &Principal, id: OrderId) -> DomainResult<Order> {
        authorize(principal, Operation::ViewOrders)?;
        self.db
            .get_order(id)
            .await?
            .filter(|order| visible_to(principal, order.store_id))
            .ok_or_else(|| DomainError::not_found(format!("order {id}")))
    }

    pub async fn list_orders(
        &self,
        principal: &Principal,
        mut query: OrderQuery,
        page: PageRequest,
    ) -> DomainResult<Page<Order>> {
        authorize(principal, Operation::ViewOrders)?;
        query.store_id = read_scope(principal, query.store_id)?;
        Ok(self.db.list_orders(&query, page).await?)
    }
}

//! Inventory ledger: receiving lots, availability and depletion.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use stockroom_auth::{Operation, Principal, authorize, read_scope, resolve_store};
use stockroom_catalog::Product;
use stockroom_core::{
    Clock, DomainError, DomainResult, FieldError, LotId, Page, PageRequest, ProductId, RequestContext,
    StoreId,
};
use stockroom_inventory::{DepletionPlan, InventoryLot, NewLot, allocatable, available_quantity};

use super::visible_to;
use crate::db::{Database, InventoryQuery, InventoryRecord};
use crate::import::row_errors;

/// Read-time availability of one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub product_id: ProductId,
    pub available: Decimal,
    pub allocatable_lots: usize,
    pub as_of: DateTime<Utc>,
}

/// One parsed row of an inventory import. Rows name their product by id or SKU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotImportRow {
    pub quantity: Decimal,
    pub product_id: Option<ProductId>,
    pub sku: Option<String>,
    pub location: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct LedgerService {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
}

impl LedgerService {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    async fn load_product(&self, id: ProductId) -> DomainResult<Product> {
        self.db
            .get_product(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {id}")))
    }

    async fn visible_product(&self, principal: &Principal, id: ProductId) -> DomainResult<Product> {
        let product = self.load_product(id).await?;
        if visible_to(principal, product.store_id) {
            Ok(product)
        } else {
            Err(DomainError::not_found(format!("product {id}")))
        }
    }

    /// Receive one lot into the caller's store.
    pub async fn create_lot(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        store_id: Option<StoreId>,
        input: NewLot,
    ) -> DomainResult<InventoryRecord> {
        authorize(principal, Operation::ReceiveInventory)?;
        let store_id = resolve_store(principal, store_id)?;
        let product = self.load_product(input.product_id).await?;
        product.ensure_store(store_id)?;

        let lot = InventoryLot::receive(input, Some(principal.user_id), self.clock.now())?;
        self.db.insert_lots(std::slice::from_ref(&lot)).await?;
        tracing::info!(
            parent: ctx.span(),
            lot_id = %lot.id,
            product_id = %lot.product_id,
            quantity = %lot.quantity,
            status = %lot.status,
            "lot received"
        );
        self.db
            .get_lot(lot.id)
            .await?
            .ok_or_else(|| DomainError::internal(format!("lot {} vanished after insert", lot.id)))
    }

    /// Validate every row against the caller's store, then insert all lots at once.
    pub async fn import_lots(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        rows: Vec<LotImportRow>,
    ) -> DomainResult<Vec<InventoryLot>> {
        authorize(principal, Operation::ImportInventory)?;
        if rows.is_empty() {
            return Err(DomainError::validation("import file has no rows"));
        }
        let scope = read_scope(principal, None)?;
        let now = self.clock.now();
        let mut products: HashMap<String, Option<Product>> = HashMap::new();
        let mut errors: Vec<FieldError> = Vec::new();
        let mut lots = Vec::with_capacity(rows.len());

        for (idx, row) in rows.into_iter().enumerate() {
            let result = self.resolve_import_row(&row, scope, &mut products).await.and_then(|product_id| {
                let input = NewLot {
                    product_id,
                    quantity: row.quantity,
                    location: row.location,
                    expiry_date: row.expiry_date,
                };
                InventoryLot::receive(input, Some(principal.user_id), now)
            });
            match result {
                Ok(lot) => lots.push(lot),
                Err(err) => errors.extend(row_errors(idx + 1, err)),
            }
        }
        DomainError::from_field_errors(errors)?;

        self.db.insert_lots(&lots).await?;
        tracing::info!(parent: ctx.span(), count = lots.len(), "lots imported");
        Ok(lots)
    }

    async fn resolve_import_row(
        &self,
        row: &LotImportRow,
        scope: Option<StoreId>,
        cache: &mut HashMap<String, Option<Product>>,
    ) -> DomainResult<ProductId> {
        let key = match (row.product_id, row.sku.as_deref().map(str::trim)) {
            (Some(id), _) => id.to_string(),
            (None, Some(sku)) if !sku.is_empty() => format!("sku:{sku}"),
            _ => {
                return Err(DomainError::ValidationErrors(vec![FieldError::new(
                    "product_id",
                    "either product_id or sku is required",
                )]));
            }
        };
        if !cache.contains_key(&key) {
            let found = match (row.product_id, row.sku.as_deref()) {
                (Some(id), _) => self.db.get_product(id).await?,
                (None, Some(sku)) => self.db.find_product_by_sku(sku.trim()).await?,
                (None, None) => None,
            };
            cache.insert(key.clone(), found);
        }
        let product = cache
            .get(&key)
            .and_then(Option::as_ref)
            .ok_or_else(|| DomainError::not_found(format!("product {}", key.trim_start_matches("sku:"))))?;
        if let Some(store_id) = scope {
            product.ensure_store(store_id)?;
        }
        Ok(product.id)
    }

    /// Quantity over the product's lots that are not expired right now.
    pub async fn available_quantity(&self, principal: &Principal, product_id: ProductId) -> DomainResult<Availability> {
        authorize(principal, Operation::ReadCatalog)?;
        self.visible_product(principal, product_id).await?;
        let lots = self.db.product_lots(product_id).await?;
        let now = self.clock.now();
        Ok(Availability {
            product_id,
            available: available_quantity(&lots, product_id, now)?,
            allocatable_lots: allocatable(&lots, product_id, now).len(),
            as_of: now,
        })
    }

    /// The product's lots in the order depletion consumes them.
    pub async fn list_allocatable(&self, principal: &Principal, product_id: ProductId) -> DomainResult<Vec<InventoryLot>> {
        authorize(principal, Operation::ReadCatalog)?;
        self.visible_product(principal, product_id).await?;
        let lots = self.db.product_lots(product_id).await?;
        Ok(allocatable(&lots, product_id, self.clock.now())
            .into_iter()
            .cloned()
            .collect())
    }

    /// Consume stock outside of a checkout. Not idempotent.
    pub async fn deplete(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        product_id: ProductId,
        quantity: Decimal,
    ) -> DomainResult<DepletionPlan> {
        authorize(principal, Operation::ReceiveInventory)?;
        let product = self.load_product(product_id).await?;
        if !principal.is_super_admin() {
            product.ensure_store(principal.store_id.ok_or(DomainError::UserHasNoStore)?)?;
        }
        match self.db.deplete(product_id, quantity, self.clock.now()).await {
            Ok(plan) => {
                tracing::info!(
                    parent: ctx.span(),
                    product_id = %product_id,
                    quantity = %quantity,
                    lots = plan.steps.len(),
                    "depletion applied"
                );
                Ok(plan)
            }
            Err(err) => {
                let err = DomainError::from(err);
                tracing::warn!(parent: ctx.span(), product_id = %product_id, error = %err, "depletion rejected");
                Err(err)
            }
        }
    }

    pub async fn get_lot(&self, principal: &Principal, id: LotId) -> DomainResult<InventoryRecord> {
        authorize(principal, Operation::ReadCatalog)?;
        self.db
            .get_lot(id)
            .await?
            .filter(|record| visible_to(principal, record.store_id))
            .ok_or_else(|| DomainError::not_found(format!("inventory {id}")))
    }

    pub async fn list_lots(
        &self,
        principal: &Principal,
        mut query: InventoryQuery,
        page: PageRequest,
    ) -> DomainResult<Page<InventoryRecord>> {
        authorize(principal, Operation::ReadCatalog)?;
        query.store_id = read_scope(principal, query.store_id)?;
        Ok(self.db.list_lots(&query, page).await?)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;
    use stockroom_auth::Level;
    use stockroom_catalog::{CategoryDraft, ProductDraft, StoreDraft};
    use stockroom_core::{FixedClock, UserId};
    use stockroom_inventory::{DepletionStep, LotStatus};

    use crate::services::CatalogService;

    struct Fixture {
        ledger: LedgerService,
        clock: Arc<FixedClock>,
        staff: Principal,
        product: Product,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
    }

    async fn fixture() -> Fixture {
        let db: Arc<dyn Database> = Arc::new(MemoryDatabase::new());
        let clock = Arc::new(FixedClock::new(t0()));
        let catalog = CatalogService::new(db.clone(), clock.clone());
        let ctx = RequestContext::background();
        let root = Principal::new(UserId::new(), Level::SUPER_ADMIN, None);
        let store = catalog
            .create_store(&ctx, &root, StoreDraft { name: "Main".into(), code: Some("STR".into()), ..StoreDraft::default() })
            .await
            .unwrap();
        let category = catalog
            .create_category(&ctx, &root, CategoryDraft { name: "Fresh".into(), category_code: "FRS".into() })
            .await
            .unwrap();
        let product = catalog
            .create_product(
                &ctx,
                &root,
                Some(store.id),
                ProductDraft {
                    name: "Milk".into(),
                    category_id: category.id,
                    sku: Some("MILK".into()),
                    selling_price: dec!(2),
                    purchase_price: dec!(1),
                },
            )
            .await
            .unwrap();
        Fixture {
            ledger: LedgerService::new(db, clock.clone()),
            clock,
            staff: Principal::new(UserId::new(), Level::STAFF, Some(store.id)),
            product,
        }
    }

    fn lot(product_id: ProductId, quantity: Decimal, expires_in_days: Option<i64>) -> NewLot {
        NewLot {
            product_id,
            quantity,
            location: None,
            expiry_date: expires_in_days.map(|d| t0() + Duration::days(d)),
        }
    }

    #[tokio::test]
    async fn empty_product_has_zero_available() {
        let f = fixture().await;
        let availability = f.ledger.available_quantity(&f.staff, f.product.id).await.unwrap();
        assert_eq!(availability.available, Decimal::ZERO);
        assert_eq!(availability.allocatable_lots, 0);
    }

    #[tokio::test]
    async fn lot_status_is_stamped_and_recomputed() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let record = f
            .ledger
            .create_lot(&ctx, &f.staff, None, lot(f.product.id, dec!(5), Some(3)))
            .await
            .unwrap();
        assert_eq!(record.lot.status, LotStatus::NearExpiry);
        assert_eq!(record.sku, "MILK");

        f.clock.advance(Duration::days(4));
        let availability = f.ledger.available_quantity(&f.staff, f.product.id).await.unwrap();
        assert_eq!(availability.available, Decimal::ZERO);
        // the stored status is left as it was at receiving time
        let stored = f.ledger.get_lot(&f.staff, record.lot.id).await.unwrap();
        assert_eq!(stored.lot.status, LotStatus::NearExpiry);
    }

    #[tokio::test]
    async fn receiving_into_another_store_is_refused() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let outsider = Principal::new(UserId::new(), Level::STAFF, Some(StoreId::new()));
        let err = f
            .ledger
            .create_lot(&ctx, &outsider, None, lot(f.product.id, dec!(1), None))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::ProductNotInStore(f.product.id));
    }

    #[tokio::test]
    async fn depletion_follows_expiry_order_and_is_not_idempotent() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let soon = f
            .ledger
            .create_lot(&ctx, &f.staff, None, lot(f.product.id, dec!(3), Some(2)))
            .await
            .unwrap();
        let later = f
            .ledger
            .create_lot(&ctx, &f.staff, None, lot(f.product.id, dec!(2), Some(30)))
            .await
            .unwrap();
        f.ledger
            .create_lot(&ctx, &f.staff, None, lot(f.product.id, dec!(4), None))
            .await
            .unwrap();

        let order: Vec<LotId> = f
            .ledger
            .list_allocatable(&f.staff, f.product.id)
            .await
            .unwrap()
            .iter()
            .map(|l| l.id)
            .collect();
        assert_eq!(order[..2], [soon.lot.id, later.lot.id]);

        let plan = f.ledger.deplete(&ctx, &f.staff, f.product.id, dec!(4)).await.unwrap();
        assert_eq!(
            plan.steps,
            vec![
                DepletionStep::Remove { lot_id: soon.lot.id, quantity: dec!(3) },
                DepletionStep::Reduce { lot_id: later.lot.id, taken: dec!(1), remaining: dec!(1) },
            ]
        );

        f.ledger.deplete(&ctx, &f.staff, f.product.id, dec!(5)).await.unwrap();
        let err = f.ledger.deplete(&ctx, &f.staff, f.product.id, dec!(5)).await.unwrap_err();
        assert_eq!(err, DomainError::ProductHasNoInventory(f.product.id));
    }

    #[tokio::test]
    async fn second_identical_depletion_fails_with_insufficient_inventory() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        f.ledger
            .create_lot(&ctx, &f.staff, None, lot(f.product.id, dec!(5), None))
            .await
            .unwrap();
        f.ledger
            .create_lot(&ctx, &f.staff, None, lot(f.product.id, dec!(1), Some(-1)))
            .await
            .unwrap();

        f.ledger.deplete(&ctx, &f.staff, f.product.id, dec!(5)).await.unwrap();
        let err = f.ledger.deplete(&ctx, &f.staff, f.product.id, dec!(5)).await.unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientInventory {
                product_id: f.product.id,
                requested: dec!(5),
                available: Decimal::ZERO,
                missing: dec!(5),
            }
        );
    }

    #[tokio::test]
    async fn import_reports_every_bad_row_and_writes_nothing() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let rows = vec![
            LotImportRow { quantity: dec!(2), product_id: None, sku: Some("MILK".into()), location: None, expiry_date: None },
            LotImportRow { quantity: dec!(2), product_id: None, sku: Some("NOPE".into()), location: None, expiry_date: None },
            LotImportRow { quantity: dec!(-1), product_id: Some(f.product.id), sku: None, location: None, expiry_date: None },
        ];
        match f.ledger.import_lots(&ctx, &f.staff, rows).await.unwrap_err() {
            DomainError::ValidationErrors(errors) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["row 2", "row 3.quantity"]);
            }
            other => panic!("Expected ValidationErrors, got {other:?}"),
        }
        let availability = f.ledger.available_quantity(&f.staff, f.product.id).await.unwrap();
        assert_eq!(availability.available, Decimal::ZERO);
    }
}

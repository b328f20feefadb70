//! Catalog authority: stores, categories, products and store ownership.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;

use stockroom_auth::{Operation, Principal, authorize, read_scope, resolve_store};
use stockroom_catalog::{
    Category, CategoryDraft, Product, ProductDraft, ProductPatch, Store, StoreDraft, normalize_code,
    prepare_product,
};
use stockroom_core::{
    AuditStamp, CategoryId, Clock, DomainError, DomainResult, FieldError, Page, PageRequest,
    ProductId, RequestContext, StoreId,
};

use super::visible_to;
use crate::db::{Database, ProductQuery};
use crate::import::row_errors;

/// One parsed row of a product import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductImportRow {
    pub name: String,
    pub category_code: String,
    pub selling_price: Decimal,
    pub purchase_price: Decimal,
    pub sku: Option<String>,
    pub store_id: Option<StoreId>,
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<dyn Database>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    pub fn new(db: Arc<dyn Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    // ---- stores ----

    pub async fn create_store(&self, ctx: &RequestContext, principal: &Principal, draft: StoreDraft) -> DomainResult<Store> {
        authorize(principal, Operation::ManageStores)?;
        let draft = draft.normalized()?;
        let store = Store {
            id: StoreId::new(),
            name: draft.name,
            address: draft.address,
            phone: draft.phone,
            code: draft.code,
            audit: AuditStamp::created(Some(principal.user_id), self.clock.now()),
        };
        self.db.insert_store(&store).await?;
        tracing::info!(parent: ctx.span(), store_id = %store.id, code = ?store.code, "store created");
        Ok(store)
    }

    pub async fn update_store(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        id: StoreId,
        draft: StoreDraft,
    ) -> DomainResult<Store> {
        authorize(principal, Operation::ManageStores)?;
        let draft = draft.normalized()?;
        let mut store = self.get_store(principal, id).await?;
        if store.code.is_some() && draft.code.is_none() && self.store_has_products(id).await? {
            return Err(DomainError::validation(
                "store code cannot be removed while the store has products",
            ));
        }
        store.name = draft.name;
        store.address = draft.address;
        store.phone = draft.phone;
        store.code = draft.code;
        store.audit.touch(Some(principal.user_id), self.clock.now());
        self.db.update_store(&store).await?;
        tracing::info!(parent: ctx.span(), store_id = %store.id, "store updated");
        Ok(store)
    }

    async fn store_has_products(&self, id: StoreId) -> DomainResult<bool> {
        let query = ProductQuery {
            store_id: Some(id),
            ..ProductQuery::default()
        };
        let page = self.db.list_products(&query, PageRequest::new(Some(1), None)).await?;
        Ok(page.total > 0)
    }

    pub async fn delete_store(&self, ctx: &RequestContext, principal: &Principal, id: StoreId) -> DomainResult<()> {
        authorize(principal, Operation::ManageStores)?;
        self.db.delete_store(id).await?;
        tracing::info!(parent: ctx.span(), store_id = %id, "store deleted");
        Ok(())
    }

    pub async fn get_store(&self, principal: &Principal, id: StoreId) -> DomainResult<Store> {
        authorize(principal, Operation::ReadCatalog)?;
        self.db
            .get_store(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("store {id}")))
    }

    pub async fn list_stores(&self, principal: &Principal, page: PageRequest) -> DomainResult<Page<Store>> {
        authorize(principal, Operation::ReadCatalog)?;
        Ok(self.db.list_stores(page).await?)
    }

    // ---- categories ----

    pub async fn create_category(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        draft: CategoryDraft,
    ) -> DomainResult<Category> {
        authorize(principal, Operation::ManageCategories)?;
        let draft = draft.normalized()?;
        let audit = AuditStamp::created(Some(principal.user_id), self.clock.now());
        let category = self.db.insert_category(&draft, &audit).await?;
        tracing::info!(parent: ctx.span(), category_id = %category.id, code = %category.category_code, "category created");
        Ok(category)
    }

    pub async fn update_category(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        id: CategoryId,
        draft: CategoryDraft,
    ) -> DomainResult<Category> {
        authorize(principal, Operation::ManageCategories)?;
        let draft = draft.normalized()?;
        let mut category = self.get_category(principal, id).await?;
        category.name = draft.name;
        category.category_code = draft.category_code;
        category.audit.touch(Some(principal.user_id), self.clock.now());
        self.db.update_category(&category).await?;
        tracing::info!(parent: ctx.span(), category_id = %id, "category updated");
        Ok(category)
    }

    pub async fn delete_category(&self, ctx: &RequestContext, principal: &Principal, id: CategoryId) -> DomainResult<()> {
        authorize(principal, Operation::ManageCategories)?;
        self.db.delete_category(id).await?;
        tracing::info!(parent: ctx.span(), category_id = %id, "category deleted");
        Ok(())
    }

    pub async fn get_category(&self, principal: &Principal, id: CategoryId) -> DomainResult<Category> {
        authorize(principal, Operation::ReadCatalog)?;
        self.db
            .get_category(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("category {id}")))
    }

    pub async fn list_categories(&self, principal: &Principal, page: PageRequest) -> DomainResult<Page<Category>> {
        authorize(principal, Operation::ReadCatalog)?;
        Ok(self.db.list_categories(page).await?)
    }

    // ---- products ----

    async fn load_store(&self, id: StoreId) -> DomainResult<Store> {
        self.db
            .get_store(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("store {id}")))
    }

    async fn load_category(&self, id: CategoryId) -> DomainResult<Category> {
        self.db
            .get_category(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("category {id}")))
    }

    /// Load a product the caller may mutate.
    pub(crate) async fn owned_product(&self, principal: &Principal, id: ProductId) -> DomainResult<Product> {
        let product = self
            .db
            .get_product(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {id}")))?;
        if !principal.is_super_admin() {
            let home = principal.store_id.ok_or(DomainError::UserHasNoStore)?;
            product.ensure_store(home)?;
        }
        Ok(product)
    }

    pub async fn create_product(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        store_id: Option<StoreId>,
        draft: ProductDraft,
    ) -> DomainResult<Product> {
        authorize(principal, Operation::ManageProducts)?;
        let store = self.load_store(resolve_store(principal, store_id)?).await?;
        let category = self.load_category(draft.category_id).await?;
        let product = prepare_product(draft, &store, &category, Some(principal.user_id), self.clock.now())?;

        if self.db.find_product_by_sku(&product.sku).await?.is_some() {
            tracing::warn!(parent: ctx.span(), sku = %product.sku, "duplicate sku rejected");
            return Err(DomainError::DuplicateSku(product.sku));
        }
        self.db.insert_products(std::slice::from_ref(&product)).await?;
        tracing::info!(parent: ctx.span(), product_id = %product.id, sku = %product.sku, store_id = %store.id, "product created");
        Ok(product)
    }

    /// Validate every row, then insert all of them at once (or none).
    pub async fn import_products(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        rows: Vec<ProductImportRow>,
    ) -> DomainResult<Vec<Product>> {
        authorize(principal, Operation::ImportProducts)?;
        if rows.is_empty() {
            return Err(DomainError::validation("import file has no rows"));
        }
        let now = self.clock.now();
        let mut stores: HashMap<StoreId, Store> = HashMap::new();
        let mut categories: HashMap<String, Option<Category>> = HashMap::new();
        let mut errors: Vec<FieldError> = Vec::new();
        let mut products = Vec::with_capacity(rows.len());

        for (idx, row) in rows.into_iter().enumerate() {
            let row_no = idx + 1;
            match self
                .prepare_import_row(principal, row, now, &mut stores, &mut categories)
                .await
            {
                Ok(product) => products.push(product),
                Err(err) => errors.extend(row_errors(row_no, err)),
            }
        }
        DomainError::from_field_errors(errors)?;

        let mut seen = HashSet::new();
        if let Some(dup) = products.iter().find(|p| !seen.insert(p.sku.as_str())) {
            return Err(DomainError::DuplicateSku(dup.sku.clone()));
        }
        let skus: Vec<String> = products.iter().map(|p| p.sku.clone()).collect();
        if let Some(taken) = self.db.existing_skus(&skus).await?.into_iter().next() {
            return Err(DomainError::DuplicateSku(taken));
        }

        self.db.insert_products(&products).await?;
        tracing::info!(parent: ctx.span(), count = products.len(), "products imported");
        Ok(products)
    }

    async fn prepare_import_row(
        &self,
        principal: &Principal,
        row: ProductImportRow,
        now: chrono::DateTime<chrono::Utc>,
        stores: &mut HashMap<StoreId, Store>,
        categories: &mut HashMap<String, Option<Category>>,
    ) -> DomainResult<Product> {
        let store_id = resolve_store(principal, row.store_id)?;
        if !stores.contains_key(&store_id) {
            stores.insert(store_id, self.load_store(store_id).await?);
        }
        let code = normalize_code(&row.category_code, "category_code")?;
        if !categories.contains_key(&code) {
            let found = self.db.find_category_by_code(&code).await?;
            categories.insert(code.clone(), found);
        }
        let category = categories
            .get(&code)
            .cloned()
            .flatten()
            .ok_or_else(|| DomainError::not_found(format!("category with code '{code}'")))?;
        let store = stores
            .get(&store_id)
            .ok_or_else(|| DomainError::not_found(format!("store {store_id}")))?;

        let draft = ProductDraft {
            name: row.name,
            category_id: category.id,
            sku: row.sku,
            selling_price: row.selling_price,
            purchase_price: row.purchase_price,
        };
        prepare_product(draft, store, &category, Some(principal.user_id), now)
    }

    pub async fn update_product(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        id: ProductId,
        patch: ProductPatch,
    ) -> DomainResult<Product> {
        authorize(principal, Operation::ManageProducts)?;
        let mut product = self.owned_product(principal, id).await?;
        if let Some(category_id) = patch.category_id {
            self.load_category(category_id).await?;
        }
        product.apply_patch(patch, Some(principal.user_id), self.clock.now())?;
        self.db.update_product(&product).await?;
        tracing::info!(parent: ctx.span(), product_id = %id, "product updated");
        Ok(product)
    }

    pub async fn delete_product(&self, ctx: &RequestContext, principal: &Principal, id: ProductId) -> DomainResult<()> {
        authorize(principal, Operation::ManageProducts)?;
        self.owned_product(principal, id).await?;
        self.db.delete_product(id).await?;
        tracing::info!(parent: ctx.span(), product_id = %id, "product deleted");
        Ok(())
    }

    pub async fn get_product(&self, principal: &Principal, id: ProductId) -> DomainResult<Product> {
        authorize(principal, Operation::ReadCatalog)?;
        self.db
            .get_product(id)
            .await?
            .filter(|p| visible_to(principal, p.store_id))
            .ok_or_else(|| DomainError::not_found(format!("product {id}")))
    }

    pub async fn list_products(
        &self,
        principal: &Principal,
        mut query: ProductQuery,
        page: PageRequest,
    ) -> DomainResult<Page<Product>> {
        authorize(principal, Operation::ReadCatalog)?;
        query.store_id = read_scope(principal, query.store_id)?;
        Ok(self.db.list_products(&query, page).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use stockroom_auth::Level;
    use stockroom_core::{FixedClock, UserId};

    struct Fixture {
        service: CatalogService,
        root: Principal,
        store: Store,
        category: Category,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 3, 10, 20, 30).unwrap()));
        let service = CatalogService::new(Arc::new(MemoryDatabase::new()), clock);
        let ctx = RequestContext::background();
        let root = Principal::new(UserId::new(), Level::SUPER_ADMIN, None);
        let store = service
            .create_store(&ctx, &root, StoreDraft { name: "Main".into(), code: Some("main".into()), ..StoreDraft::default() })
            .await
            .unwrap();
        let category = service
            .create_category(&ctx, &root, CategoryDraft { name: "Dairy".into(), category_code: "dry".into() })
            .await
            .unwrap();
        Fixture { service, root, store, category }
    }

    fn draft(category_id: CategoryId, sku: Option<&str>) -> ProductDraft {
        ProductDraft {
            name: "Milk".into(),
            category_id,
            sku: sku.map(str::to_string),
            selling_price: dec!(1.99),
            purchase_price: dec!(1.20),
        }
    }

    #[tokio::test]
    async fn staff_is_pinned_to_home_store() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let staff = Principal::new(UserId::new(), Level::STAFF, Some(f.store.id));

        let product = f
            .service
            .create_product(&ctx, &staff, None, draft(f.category.id, None))
            .await
            .unwrap();
        assert_eq!(product.store_id, f.store.id);
        assert_eq!(product.sku, "MAIN-DRY-202602031030");

        let err = f
            .service
            .create_product(&ctx, &staff, Some(StoreId::new()), draft(f.category.id, Some("X")))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[tokio::test]
    async fn store_code_is_kept_while_products_exist() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let renamed = |code: Option<&str>| StoreDraft {
            name: "Main Street".into(),
            code: code.map(str::to_string),
            ..StoreDraft::default()
        };

        // No products yet: the code may still be cleared and set again.
        let store = f.service.update_store(&ctx, &f.root, f.store.id, renamed(Some(" "))).await.unwrap();
        assert_eq!(store.code, None);
        f.service.update_store(&ctx, &f.root, f.store.id, renamed(Some("main"))).await.unwrap();

        f.service
            .create_product(&ctx, &f.root, Some(f.store.id), draft(f.category.id, None))
            .await
            .unwrap();
        let err = f
            .service
            .update_store(&ctx, &f.root, f.store.id, renamed(None))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let store = f.service.update_store(&ctx, &f.root, f.store.id, renamed(Some("mn2"))).await.unwrap();
        assert_eq!(store.code.as_deref(), Some("MN2"));
        assert_eq!(store.name, "Main Street");
    }

    #[tokio::test]
    async fn staff_without_store_cannot_create_products() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let drifter = Principal::new(UserId::new(), Level::STAFF, None);
        let err = f
            .service
            .create_product(&ctx, &drifter, None, draft(f.category.id, None))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::UserHasNoStore);
    }

    #[tokio::test]
    async fn duplicate_sku_is_rejected() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        f.service
            .create_product(&ctx, &f.root, Some(f.store.id), draft(f.category.id, Some("MILK-1")))
            .await
            .unwrap();
        let err = f
            .service
            .create_product(&ctx, &f.root, Some(f.store.id), draft(f.category.id, Some("MILK-1")))
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::DuplicateSku("MILK-1".into()));
    }

    #[tokio::test]
    async fn product_of_other_store_is_not_mutable() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let product = f
            .service
            .create_product(&ctx, &f.root, Some(f.store.id), draft(f.category.id, None))
            .await
            .unwrap();
        let outsider = Principal::new(UserId::new(), Level::STAFF, Some(StoreId::new()));
        let err = f
            .service
            .update_product(&ctx, &outsider, product.id, ProductPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::ProductNotInStore(product.id));
        assert!(matches!(
            f.service.get_product(&outsider, product.id).await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn import_is_all_or_nothing() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let rows = vec![
            ProductImportRow {
                name: "Butter".into(),
                category_code: "dry".into(),
                selling_price: dec!(3),
                purchase_price: dec!(2),
                sku: Some("BUT-1".into()),
                store_id: Some(f.store.id),
            },
            ProductImportRow {
                name: "Cheese".into(),
                category_code: "NOPE".into(),
                selling_price: dec!(5),
                purchase_price: dec!(4),
                sku: None,
                store_id: Some(f.store.id),
            },
        ];
        match f.service.import_products(&ctx, &f.root, rows).await.unwrap_err() {
            DomainError::ValidationErrors(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].field.starts_with("row 2"));
            }
            other => panic!("Expected ValidationErrors, got {other:?}"),
        }
        let page = f
            .service
            .list_products(&f.root, ProductQuery::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn generated_skus_colliding_within_a_batch_are_rejected() {
        let f = fixture().await;
        let ctx = RequestContext::background();
        let row = ProductImportRow {
            name: "Yogurt".into(),
            category_code: "DRY".into(),
            selling_price: dec!(1),
            purchase_price: dec!(1),
            sku: None,
            store_id: Some(f.store.id),
        };
        let err = f
            .service
            .import_products(&ctx, &f.root, vec![row.clone(), row])
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::DuplicateSku("MAIN-DRY-202602031030".into()));
    }
}

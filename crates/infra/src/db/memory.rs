//! In-memory backend.
//!
//! One mutex guards the whole state, so every call is atomic and calls are
//! serialized. Intended for tests and local runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use stockroom_auth::{Role, User};
use stockroom_catalog::{Category, CategoryDraft, Product, Store};
use stockroom_core::{
    AuditStamp, CategoryId, Entity, LotId, OrderId, OrderLineId, Page, PageRequest, ProductId,
    RoleId, StoreId, UserId,
};
use stockroom_inventory::{DepletionPlan, InventoryLot, plan_depletion};
use stockroom_sales::{Order, OrderQuery};

use super::{
    CategoryRepository, CheckoutPlanner, InventoryQuery, InventoryRecord, InventoryRepository,
    OrderRepository, ProductQuery, ProductRepository, RepoResult, RepositoryError, RoleRepository,
    StoreRepository, UserQuery, UserRepository, constraints, search_term,
};

/// Rows keyed by entity id.
#[derive(Debug)]
struct Table<E: Entity> {
    name: &'static str,
    rows: BTreeMap<E::Id, E>,
}

impl<E: Entity + Clone> Table<E> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: BTreeMap::new(),
        }
    }

    fn get(&self, id: E::Id) -> Option<E> {
        self.rows.get(&id).cloned()
    }

    fn insert(&mut self, row: E) {
        self.rows.insert(row.id(), row);
    }

    fn update(&mut self, row: E) -> RepoResult<()> {
        match self.rows.get_mut(&row.id()) {
            Some(existing) => {
                *existing = row;
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("{} {:?}", self.name, row.id()))),
        }
    }

    fn remove(&mut self, id: E::Id) -> RepoResult<E> {
        self.rows
            .remove(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("{} {id:?}", self.name)))
    }

    fn values(&self) -> impl Iterator<Item = &E> {
        self.rows.values()
    }

    fn values_mut(&mut self) -> impl Iterator<Item = &mut E> {
        self.rows.values_mut()
    }
}

#[derive(Debug)]
struct State {
    stores: Table<Store>,
    roles: Table<Role>,
    users: Table<User>,
    categories: Table<Category>,
    products: Table<Product>,
    orders: Table<Order>,
    lots: Vec<InventoryLot>,
    next_category_id: i64,
    next_order_id: i64,
    next_line_id: i64,
    failing_commits: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            stores: Table::new("store"),
            roles: Table::new("role"),
            users: Table::new("user"),
            categories: Table::new("category"),
            products: Table::new("product"),
            orders: Table::new("order"),
            lots: Vec::new(),
            next_category_id: 1,
            next_order_id: 1,
            next_line_id: 1,
            failing_commits: 0,
        }
    }
}

impl State {
    fn record(&self, lot: &InventoryLot) -> Option<InventoryRecord> {
        let product = self.products.get(lot.product_id)?;
        let category_name = self.categories.get(product.category_id).map(|c| c.name);
        Some(InventoryRecord {
            lot: lot.clone(),
            product_name: product.name,
            sku: product.sku,
            store_id: product.store_id,
            category_name,
        })
    }

    fn check_store_unique(&self, store: &Store) -> RepoResult<()> {
        if let Some(code) = store.code.as_deref() {
            let taken = self
                .stores
                .values()
                .any(|other| other.id != store.id && other.code.as_deref() == Some(code));
            if taken {
                return Err(RepositoryError::unique(
                    constraints::STORE_CODE,
                    format!("store code '{code}' already exists"),
                ));
            }
        }
        Ok(())
    }

    fn check_role_unique(&self, role: &Role) -> RepoResult<()> {
        let taken = self
            .roles
            .values()
            .any(|other| other.id != role.id && other.name.eq_ignore_ascii_case(&role.name));
        if taken {
            return Err(RepositoryError::unique(
                constraints::ROLE_NAME,
                format!("role '{}' already exists", role.name),
            ));
        }
        Ok(())
    }

    fn check_user(&self, user: &User) -> RepoResult<()> {
        for other in self.users.values().filter(|other| other.id != user.id) {
            if other.username.eq_ignore_ascii_case(&user.username) {
                return Err(RepositoryError::unique(
                    constraints::USERNAME,
                    format!("username '{}' already exists", user.username),
                ));
            }
            if other.email.eq_ignore_ascii_case(&user.email) {
                return Err(RepositoryError::unique(
                    constraints::EMAIL,
                    format!("email '{}' already exists", user.email),
                ));
            }
        }
        if let Some(role_id) = user.role_id {
            if self.roles.get(role_id).is_none() {
                return Err(RepositoryError::Reference(format!("role {role_id} does not exist")));
            }
        }
        if let Some(store_id) = user.store_id {
            if self.stores.get(store_id).is_none() {
                return Err(RepositoryError::Reference(format!("store {store_id} does not exist")));
            }
        }
        Ok(())
    }

    fn check_category_code(&self, id: Option<CategoryId>, code: &str) -> RepoResult<()> {
        let taken = self
            .categories
            .values()
            .any(|other| Some(other.id) != id && other.category_code == code);
        if taken {
            return Err(RepositoryError::unique(
                constraints::CATEGORY_CODE,
                format!("category code '{code}' already exists"),
            ));
        }
        Ok(())
    }

    fn check_product_refs(&self, product: &Product) -> RepoResult<()> {
        if self.stores.get(product.store_id).is_none() {
            return Err(RepositoryError::Reference(format!(
                "store {} does not exist",
                product.store_id
            )));
        }
        if self.categories.get(product.category_id).is_none() {
            return Err(RepositoryError::Reference(format!(
                "category {} does not exist",
                product.category_id
            )));
        }
        Ok(())
    }
}

/// Mutex-guarded in-memory database.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` checkout commits fail as serialization failures.
    pub fn fail_next_commits(&self, n: usize) -> RepoResult<()> {
        self.state()?.failing_commits = n;
        Ok(())
    }

    fn state(&self) -> RepoResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Backend("state lock poisoned".to_string()))
    }
}

#[async_trait]
impl StoreRepository for MemoryDatabase {
    async fn insert_store(&self, store: &Store) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check_store_unique(store)?;
        state.stores.insert(store.clone());
        Ok(())
    }

    async fn update_store(&self, store: &Store) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check_store_unique(store)?;
        state.stores.update(store.clone())
    }

    async fn delete_store(&self, id: StoreId) -> RepoResult<()> {
        let mut state = self.state()?;
        let referenced = state.users.values().any(|u| u.store_id == Some(id))
            || state.products.values().any(|p| p.store_id == id)
            || state.orders.values().any(|o| o.store_id == id);
        if referenced {
            return Err(RepositoryError::Reference(format!(
                "store {id} still has users, products or orders"
            )));
        }
        state.stores.remove(id).map(|_| ())
    }

    async fn get_store(&self, id: StoreId) -> RepoResult<Option<Store>> {
        Ok(self.state()?.stores.get(id))
    }

    async fn list_stores(&self, page: PageRequest) -> RepoResult<Page<Store>> {
        let state = self.state()?;
        let mut stores: Vec<Store> = state.stores.values().cloned().collect();
        stores.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(page.slice(stores))
    }
}

#[async_trait]
impl RoleRepository for MemoryDatabase {
    async fn insert_role(&self, role: &Role) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check_role_unique(role)?;
        state.roles.insert(role.clone());
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check_role_unique(role)?;
        state.roles.update(role.clone())
    }

    async fn delete_role(&self, id: RoleId) -> RepoResult<()> {
        let mut state = self.state()?;
        if state.users.values().any(|u| u.role_id == Some(id)) {
            return Err(RepositoryError::Reference(format!("role {id} is still assigned")));
        }
        state.roles.remove(id).map(|_| ())
    }

    async fn get_role(&self, id: RoleId) -> RepoResult<Option<Role>> {
        Ok(self.state()?.roles.get(id))
    }

    async fn find_role_by_name(&self, name: &str) -> RepoResult<Option<Role>> {
        Ok(self
            .state()?
            .roles
            .values()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_roles(&self, page: PageRequest) -> RepoResult<Page<Role>> {
        let state = self.state()?;
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by(|a, b| b.level.cmp(&a.level).then(a.name.cmp(&b.name)));
        Ok(page.slice(roles))
    }
}

#[async_trait]
impl UserRepository for MemoryDatabase {
    async fn insert_user(&self, user: &User) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check_user(user)?;
        state.users.insert(user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check_user(user)?;
        state.users.update(user.clone())
    }

    async fn delete_user(&self, id: UserId) -> RepoResult<()> {
        let mut state = self.state()?;
        state.users.remove(id)?;
        state.stores.values_mut().for_each(|s| s.audit.forget_user(id));
        state.roles.values_mut().for_each(|r| r.audit.forget_user(id));
        state.users.values_mut().for_each(|u| u.audit.forget_user(id));
        state.categories.values_mut().for_each(|c| c.audit.forget_user(id));
        state.products.values_mut().for_each(|p| p.audit.forget_user(id));
        for lot in state.lots.iter_mut().filter(|l| l.created_by == Some(id)) {
            lot.created_by = None;
        }
        for order in state.orders.values_mut().filter(|o| o.created_by == Some(id)) {
            order.created_by = None;
        }
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        Ok(self.state()?.users.get(id))
    }

    async fn get_users(&self, ids: &[UserId]) -> RepoResult<Vec<User>> {
        let state = self.state()?;
        Ok(ids.iter().filter_map(|id| state.users.get(*id)).collect())
    }

    async fn find_user_by_login(&self, username_or_email: &str) -> RepoResult<Option<User>> {
        Ok(self
            .state()?
            .users
            .values()
            .find(|u| u.matches_login(username_or_email))
            .cloned())
    }

    async fn list_users(&self, query: &UserQuery, page: PageRequest) -> RepoResult<Page<User>> {
        let state = self.state()?;
        let term = search_term(&query.search);
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| query.store_id.is_none() || u.store_id == query.store_id)
            .filter(|u| {
                term.as_deref().is_none_or(|t| {
                    u.username.to_lowercase().contains(t)
                        || u.email.to_lowercase().contains(t)
                        || u.name.as_deref().is_some_and(|n| n.to_lowercase().contains(t))
                })
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(page.slice(users))
    }

    async fn count_users(&self) -> RepoResult<u64> {
        Ok(self.state()?.users.rows.len() as u64)
    }
}

#[async_trait]
impl CategoryRepository for MemoryDatabase {
    async fn insert_category(&self, draft: &CategoryDraft, audit: &AuditStamp) -> RepoResult<Category> {
        let mut state = self.state()?;
        state.check_category_code(None, &draft.category_code)?;
        let category = Category {
            id: CategoryId(state.next_category_id),
            name: draft.name.clone(),
            category_code: draft.category_code.clone(),
            audit: audit.clone(),
        };
        state.next_category_id += 1;
        state.categories.insert(category.clone());
        Ok(category)
    }

    async fn update_category(&self, category: &Category) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check_category_code(Some(category.id), &category.category_code)?;
        state.categories.update(category.clone())
    }

    async fn delete_category(&self, id: CategoryId) -> RepoResult<()> {
        let mut state = self.state()?;
        if state.products.values().any(|p| p.category_id == id) {
            return Err(RepositoryError::Reference(format!("category {id} still has products")));
        }
        state.categories.remove(id).map(|_| ())
    }

    async fn get_category(&self, id: CategoryId) -> RepoResult<Option<Category>> {
        Ok(self.state()?.categories.get(id))
    }

    async fn find_category_by_code(&self, code: &str) -> RepoResult<Option<Category>> {
        Ok(self
            .state()?
            .categories
            .values()
            .find(|c| c.category_code == code)
            .cloned())
    }

    async fn list_categories(&self, page: PageRequest) -> RepoResult<Page<Category>> {
        let state = self.state()?;
        let mut categories: Vec<Category> = state.categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(page.slice(categories))
    }
}

#[async_trait]
impl ProductRepository for MemoryDatabase {
    async fn insert_products(&self, products: &[Product]) -> RepoResult<()> {
        let mut state = self.state()?;
        for (idx, product) in products.iter().enumerate() {
            state.check_product_refs(product)?;
            let taken = state.products.values().any(|p| p.sku == product.sku)
                || products[..idx].iter().any(|p| p.sku == product.sku);
            if taken {
                return Err(RepositoryError::unique(constraints::PRODUCT_SKU, product.sku.clone()));
            }
        }
        for product in products {
            state.products.insert(product.clone());
        }
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> RepoResult<()> {
        let mut state = self.state()?;
        state.check_product_refs(product)?;
        state.products.update(product.clone())
    }

    async fn delete_product(&self, id: ProductId) -> RepoResult<()> {
        let mut state = self.state()?;
        let sold = state
            .orders
            .values()
            .any(|o| o.lines.iter().any(|l| l.product_id == id));
        if sold {
            return Err(RepositoryError::Reference(format!(
                "product {id} is referenced by existing orders"
            )));
        }
        state.products.remove(id)?;
        state.lots.retain(|lot| lot.product_id != id);
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> RepoResult<Option<Product>> {
        Ok(self.state()?.products.get(id))
    }

    async fn get_products(&self, ids: &[ProductId]) -> RepoResult<Vec<Product>> {
        let state = self.state()?;
        Ok(ids.iter().filter_map(|id| state.products.get(*id)).collect())
    }

    async fn find_product_by_sku(&self, sku: &str) -> RepoResult<Option<Product>> {
        Ok(self.state()?.products.values().find(|p| p.sku == sku).cloned())
    }

    async fn existing_skus(&self, skus: &[String]) -> RepoResult<Vec<String>> {
        let state = self.state()?;
        Ok(skus
            .iter()
            .filter(|sku| state.products.values().any(|p| &p.sku == *sku))
            .cloned()
            .collect())
    }

    async fn list_products(&self, query: &ProductQuery, page: PageRequest) -> RepoResult<Page<Product>> {
        let state = self.state()?;
        let term = search_term(&query.search);
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| query.store_id.is_none_or(|s| p.store_id == s))
            .filter(|p| query.category_id.is_none_or(|c| p.category_id == c))
            .filter(|p| {
                term.as_deref().is_none_or(|t| {
                    p.name.to_lowercase().contains(t) || p.sku.to_lowercase().contains(t)
                })
            })
            .cloned()
            .collect();
        products.sort_by(|a, b| {
            b.audit
                .created_at
                .cmp(&a.audit.created_at)
                .then(b.id.cmp(&a.id))
        });
        Ok(page.slice(products))
    }
}

#[async_trait]
impl InventoryRepository for MemoryDatabase {
    async fn insert_lots(&self, lots: &[InventoryLot]) -> RepoResult<()> {
        let mut state = self.state()?;
        for lot in lots {
            if state.products.get(lot.product_id).is_none() {
                return Err(RepositoryError::Reference(format!(
                    "product {} does not exist",
                    lot.product_id
                )));
            }
        }
        state.lots.extend(lots.iter().cloned());
        Ok(())
    }

    async fn get_lot(&self, id: LotId) -> RepoResult<Option<InventoryRecord>> {
        let state = self.state()?;
        Ok(state
            .lots
            .iter()
            .find(|lot| lot.id == id)
            .and_then(|lot| state.record(lot)))
    }

    async fn list_lots(&self, query: &InventoryQuery, page: PageRequest) -> RepoResult<Page<InventoryRecord>> {
        let state = self.state()?;
        let term = search_term(&query.search);
        let mut records: Vec<InventoryRecord> = state
            .lots
            .iter()
            .filter(|lot| query.product_id.is_none_or(|p| lot.product_id == p))
            .filter(|lot| query.statuses.is_empty() || query.statuses.contains(&lot.status))
            .filter_map(|lot| state.record(lot))
            .filter(|r| query.store_id.is_none_or(|s| r.store_id == s))
            .filter(|r| {
                term.as_deref().is_none_or(|t| {
                    r.product_name.to_lowercase().contains(t)
                        || r.sku.to_lowercase().contains(t)
                        || r.category_name
                            .as_deref()
                            .is_some_and(|c| c.to_lowercase().contains(t))
                })
            })
            .collect();
        records.sort_by(|a, b| {
            b.lot
                .created_at
                .cmp(&a.lot.created_at)
                .then(b.lot.id.cmp(&a.lot.id))
        });
        Ok(page.slice(records))
    }

    async fn product_lots(&self, product_id: ProductId) -> RepoResult<Vec<InventoryLot>> {
        Ok(self
            .state()?
            .lots
            .iter()
            .filter(|lot| lot.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn deplete(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> RepoResult<DepletionPlan> {
        let mut state = self.state()?;
        let plan =
            plan_depletion(&state.lots, product_id, quantity, now).map_err(RepositoryError::Rejected)?;
        plan.apply_to(&mut state.lots);
        Ok(plan)
    }
}

#[async_trait]
impl OrderRepository for MemoryDatabase {
    async fn commit_checkout(
        &self,
        product_ids: &[ProductId],
        planner: &CheckoutPlanner<'_>,
    ) -> RepoResult<Order> {
        let mut state = self.state()?;
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(RepositoryError::Transient(
                "could not serialize access due to concurrent update".to_string(),
            ));
        }

        let snapshot: Vec<InventoryLot> = state
            .lots
            .iter()
            .filter(|lot| product_ids.contains(&lot.product_id))
            .cloned()
            .collect();
        let plan = planner(&snapshot).map_err(RepositoryError::Rejected)?;

        let invoice = &plan.order.invoice_number;
        if state.orders.values().any(|o| &o.invoice_number == invoice) {
            return Err(RepositoryError::unique(
                constraints::INVOICE_NUMBER,
                format!("invoice number '{invoice}' already exists"),
            ));
        }

        let order_id = OrderId(state.next_order_id);
        state.next_order_id += 1;
        let first_line = state.next_line_id;
        let line_count = plan.order.lines.len() as i64;
        state.next_line_id += line_count;
        let order = plan
            .order
            .into_order(order_id, (first_line..first_line + line_count).map(OrderLineId));

        for depletion in &plan.depletions {
            depletion.apply_to(&mut state.lots);
        }
        state.orders.insert(order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: OrderId) -> RepoResult<Option<Order>> {
        Ok(self.state()?.orders.get(id))
    }

    async fn list_orders(&self, query: &OrderQuery, page: PageRequest) -> RepoResult<Page<Order>> {
        let state = self.state()?;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| query.matches(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(page.slice(orders))
    }
}

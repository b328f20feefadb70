//! Storage boundary.
//!
//! Repository traits return fully hydrated value structs. Two backends
//! implement them: [`memory::MemoryDatabase`] (tests, local runs) and
//! [`postgres::PgDatabase`]. Both serialize checkout and depletion on the
//! affected lots, so the ledger never hands out the same stock twice.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use stockroom_auth::{Role, User};
use stockroom_catalog::{Category, CategoryDraft, Product, Store};
use stockroom_core::{
    AuditStamp, CategoryId, DomainError, DomainResult, LotId, OrderId, Page, PageRequest,
    ProductId, RoleId, StoreId, UserId,
};
use stockroom_inventory::{DepletionPlan, InventoryLot, LotStatus};
use stockroom_sales::{Order, OrderDraft, OrderQuery};

pub use memory::MemoryDatabase;
pub use postgres::PgDatabase;

/// Constraint names shared by both backends.
pub mod constraints {
    pub const STORE_CODE: &str = "stores_code_key";
    pub const CATEGORY_CODE: &str = "categories_category_code_key";
    pub const USERNAME: &str = "users_username_key";
    pub const EMAIL: &str = "users_email_key";
    pub const ROLE_NAME: &str = "roles_name_key";
    pub const PRODUCT_SKU: &str = "products_sku_key";
    pub const INVOICE_NUMBER: &str = "orders_invoice_number_key";
}

/// Storage failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{message}")]
    Unique { constraint: String, message: String },

    /// A row is still referenced (delete) or references something missing.
    #[error("{0}")]
    Reference(String),

    /// Serialization failure or deadlock; the whole unit of work may be retried.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// A domain rule rejected the unit of work while it held its locks.
    #[error(transparent)]
    Rejected(DomainError),

    #[error("storage error: {0}")]
    Backend(String),
}

pub type RepoResult<T> = Result<T, RepositoryError>;

impl RepositoryError {
    pub fn unique(constraint: &str, message: impl Into<String>) -> Self {
        Self::Unique {
            constraint: constraint.to_string(),
            message: message.into(),
        }
    }

    pub fn violates(&self, name: &str) -> bool {
        matches!(self, RepositoryError::Unique { constraint, .. } if constraint == name)
    }

    /// Worth running the unit of work again (with fresh inputs).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RepositoryError::Transient(_)) || self.violates(constraints::INVOICE_NUMBER)
    }
}

impl From<RepositoryError> for DomainError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound(what) => DomainError::NotFound(what),
            RepositoryError::Unique { constraint, message } => {
                if constraint == constraints::PRODUCT_SKU {
                    DomainError::DuplicateSku(message)
                } else {
                    DomainError::Conflict(message)
                }
            }
            RepositoryError::Reference(message) => DomainError::Conflict(message),
            RepositoryError::Rejected(err) => err,
            RepositoryError::Transient(message) | RepositoryError::Backend(message) => {
                DomainError::Internal(message)
            }
        }
    }
}

/// Product listing filter. `store_id` is already scoped to what the caller may see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductQuery {
    pub store_id: Option<StoreId>,
    pub category_id: Option<CategoryId>,
    pub search: Option<String>,
}

/// Inventory listing filter. `statuses` matches the stored status; empty means any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryQuery {
    pub store_id: Option<StoreId>,
    pub product_id: Option<ProductId>,
    pub statuses: Vec<LotStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    pub store_id: Option<StoreId>,
    pub search: Option<String>,
}

/// A lot joined with the product facts listings show and filter on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryRecord {
    pub lot: InventoryLot,
    pub product_name: String,
    pub sku: String,
    pub store_id: StoreId,
    pub category_name: Option<String>,
}

/// What a checkout writes once its lots are locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutPlan {
    pub order: OrderDraft,
    pub depletions: Vec<DepletionPlan>,
}

/// Builds the checkout plan from the locked lot snapshot of every cart product.
pub type CheckoutPlanner<'a> = dyn Fn(&[InventoryLot]) -> DomainResult<CheckoutPlan> + Send + Sync + 'a;

pub(crate) fn search_term(search: &Option<String>) -> Option<String> {
    search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
pub trait StoreRepository: Send + Sync {
    async fn insert_store(&self, store: &Store) -> RepoResult<()>;
    async fn update_store(&self, store: &Store) -> RepoResult<()>;
    async fn delete_store(&self, id: StoreId) -> RepoResult<()>;
    async fn get_store(&self, id: StoreId) -> RepoResult<Option<Store>>;
    async fn list_stores(&self, page: PageRequest) -> RepoResult<Page<Store>>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn insert_role(&self, role: &Role) -> RepoResult<()>;
    async fn update_role(&self, role: &Role) -> RepoResult<()>;
    async fn delete_role(&self, id: RoleId) -> RepoResult<()>;
    async fn get_role(&self, id: RoleId) -> RepoResult<Option<Role>>;
    async fn find_role_by_name(&self, name: &str) -> RepoResult<Option<Role>>;
    async fn list_roles(&self, page: PageRequest) -> RepoResult<Page<Role>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn insert_user(&self, user: &User) -> RepoResult<()>;
    async fn update_user(&self, user: &User) -> RepoResult<()>;
    /// Deletes the user and nulls every audit reference to it.
    async fn delete_user(&self, id: UserId) -> RepoResult<()>;
    async fn get_user(&self, id: UserId) -> RepoResult<Option<User>>;
    async fn get_users(&self, ids: &[UserId]) -> RepoResult<Vec<User>>;
    async fn find_user_by_login(&self, username_or_email: &str) -> RepoResult<Option<User>>;
    async fn list_users(&self, query: &UserQuery, page: PageRequest) -> RepoResult<Page<User>>;
    async fn count_users(&self) -> RepoResult<u64>;
}

#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Categories use a storage-assigned serial id.
    async fn insert_category(&self, draft: &CategoryDraft, audit: &AuditStamp) -> RepoResult<Category>;
    async fn update_category(&self, category: &Category) -> RepoResult<()>;
    async fn delete_category(&self, id: CategoryId) -> RepoResult<()>;
    async fn get_category(&self, id: CategoryId) -> RepoResult<Option<Category>>;
    async fn find_category_by_code(&self, code: &str) -> RepoResult<Option<Category>>;
    async fn list_categories(&self, page: PageRequest) -> RepoResult<Page<Category>>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// All or nothing.
    async fn insert_products(&self, products: &[Product]) -> RepoResult<()>;
    async fn update_product(&self, product: &Product) -> RepoResult<()>;
    /// Removes the product's lots with it. Refused while order lines reference it.
    async fn delete_product(&self, id: ProductId) -> RepoResult<()>;
    async fn get_product(&self, id: ProductId) -> RepoResult<Option<Product>>;
    async fn get_products(&self, ids: &[ProductId]) -> RepoResult<Vec<Product>>;
    async fn find_product_by_sku(&self, sku: &str) -> RepoResult<Option<Product>>;
    /// Which of `skus` are already taken.
    async fn existing_skus(&self, skus: &[String]) -> RepoResult<Vec<String>>;
    async fn list_products(&self, query: &ProductQuery, page: PageRequest) -> RepoResult<Page<Product>>;
}

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    /// All or nothing.
    async fn insert_lots(&self, lots: &[InventoryLot]) -> RepoResult<()>;
    async fn get_lot(&self, id: LotId) -> RepoResult<Option<InventoryRecord>>;
    async fn list_lots(&self, query: &InventoryQuery, page: PageRequest) -> RepoResult<Page<InventoryRecord>>;
    /// Every lot of the product, expired ones included.
    async fn product_lots(&self, product_id: ProductId) -> RepoResult<Vec<InventoryLot>>;
    /// Lock the product's lots, plan the depletion and apply it in one unit of work.
    async fn deplete(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> RepoResult<DepletionPlan>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Lock the lots of `product_ids` (in that order), run `planner` against
    /// the locked snapshot, then insert the order and apply every depletion.
    /// Nothing is written unless all of it is.
    async fn commit_checkout(
        &self,
        product_ids: &[ProductId],
        planner: &CheckoutPlanner<'_>,
    ) -> RepoResult<Order>;
    async fn get_order(&self, id: OrderId) -> RepoResult<Option<Order>>;
    async fn list_orders(&self, query: &OrderQuery, page: PageRequest) -> RepoResult<Page<Order>>;
}

/// Everything the services need from storage.
pub trait Database:
    StoreRepository
    + RoleRepository
    + UserRepository
    + CategoryRepository
    + ProductRepository
    + InventoryRepository
    + OrderRepository
    + Send
    + Sync
    + 'static
{
}

impl<T> Database for T where
    T: StoreRepository
        + RoleRepository
        + UserRepository
        + CategoryRepository
        + ProductRepository
        + InventoryRepository
        + OrderRepository
        + Send
        + Sync
        + 'static
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sku_conflicts_become_duplicate_sku() {
        let err: DomainError =
            RepositoryError::unique(constraints::PRODUCT_SKU, "ABC-1").into();
        assert_eq!(err, DomainError::DuplicateSku("ABC-1".into()));

        let err: DomainError =
            RepositoryError::unique(constraints::USERNAME, "username already exists").into();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn invoice_collisions_are_retryable() {
        assert!(RepositoryError::unique(constraints::INVOICE_NUMBER, "dup").is_retryable());
        assert!(RepositoryError::Transient("40001".into()).is_retryable());
        assert!(!RepositoryError::unique(constraints::EMAIL, "dup").is_retryable());
        assert!(!RepositoryError::Rejected(DomainError::UserHasNoStore).is_retryable());
    }
}

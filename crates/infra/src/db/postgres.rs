//! PostgreSQL backend (sqlx).
//!
//! ## Error mapping
//!
//! | SQLx error | Code | `RepositoryError` |
//! |---|---|---|
//! | unique violation | `23505` | `Unique` (constraint name kept) |
//! | foreign key violation | `23503` | `Reference` |
//! | serialization failure / deadlock | `40001` / `40P01` | `Transient` |
//! | `RowNotFound` | | `NotFound` |
//! | anything else | | `Backend` |
//!
//! ## Ledger locking
//!
//! Checkout and depletion lock every lot of the affected products with
//! `SELECT … FOR UPDATE`, ordered by product id, then plan and apply inside the
//! same transaction. Concurrent checkouts on the same product serialize on
//! those row locks; the consistent lock order keeps them from deadlocking.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockroom_auth::{Level, Role, User};
use stockroom_catalog::{Category, CategoryDraft, Product, Store};
use stockroom_core::{
    AuditStamp, CategoryId, LotId, OrderId, OrderLineId, Page, PageRequest, ProductId, RoleId,
    StoreId, UserId,
};
use stockroom_inventory::{DepletionPlan, DepletionStep, InventoryLot, LotStatus, plan_depletion};
use stockroom_sales::{Order, OrderLine, OrderQuery};

use super::{
    CategoryRepository, CheckoutPlanner, InventoryQuery, InventoryRecord, InventoryRepository,
    OrderRepository, ProductQuery, ProductRepository, RepoResult, RepositoryError, RoleRepository,
    StoreRepository, UserQuery, UserRepository, constraints, search_term,
};

const SCHEMA: &str = include_str!("schema.sql");

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>;

/// Postgres-backed database. Cheap to clone (shares the pool).
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> RepoResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create missing tables and indexes.
    pub async fn migrate(&self) -> RepoResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> RepoResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn count(&self, operation: &str, query: PgQuery<'_>) -> RepoResult<u64> {
        let row = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        let total: i64 = row.try_get(0).map_err(|e| map_sqlx_error(operation, e))?;
        Ok(total.max(0) as u64)
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => {
                    let constraint = db_err.constraint().unwrap_or_default().to_string();
                    let detail = db_err
                        .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                        .and_then(|pg| pg.detail())
                        .and_then(key_value);
                    RepositoryError::Unique {
                        message: unique_message(&constraint, detail),
                        constraint,
                    }
                }
                Some("23503") => RepositoryError::Reference(reference_message(operation)),
                Some("40001") | Some("40P01") => RepositoryError::Transient(msg),
                _ => RepositoryError::Backend(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            RepositoryError::NotFound(format!("row in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            RepositoryError::Backend(format!("connection pool closed in {operation}"))
        }
        other => RepositoryError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

// "Key (sku)=(ABC-1) already exists." -> "ABC-1"
fn key_value(detail: &str) -> Option<String> {
    let start = detail.find(")=(")? + 3;
    let end = detail[start..].find(')')? + start;
    Some(detail[start..end].to_string())
}

fn unique_message(constraint: &str, value: Option<String>) -> String {
    let value = value.unwrap_or_default();
    match constraint {
        constraints::PRODUCT_SKU => value,
        constraints::STORE_CODE => format!("store code '{value}' already exists"),
        constraints::CATEGORY_CODE => format!("category code '{value}' already exists"),
        constraints::USERNAME => format!("username '{value}' already exists"),
        constraints::EMAIL => format!("email '{value}' already exists"),
        constraints::ROLE_NAME => format!("role '{value}' already exists"),
        constraints::INVOICE_NUMBER => format!("invoice number '{value}' already exists"),
        _ => format!("duplicate value '{value}'"),
    }
}

fn reference_message(operation: &str) -> String {
    match operation {
        "delete_store" => "store still has users, products or orders".to_string(),
        "delete_role" => "role is still assigned".to_string(),
        "delete_category" => "category still has products".to_string(),
        "delete_product" => "product is referenced by existing orders".to_string(),
        _ => format!("referenced record does not exist ({operation})"),
    }
}

fn decode(operation: &str) -> impl Fn(sqlx::Error) -> RepositoryError + '_ {
    move |e| RepositoryError::Backend(format!("failed to decode row in {operation}: {e}"))
}

fn uuid_opt<T>(id: Option<T>, f: impl Fn(&T) -> &Uuid) -> Option<Uuid> {
    id.as_ref().map(|v| *f(v))
}

// ---- row mapping ----

fn audit_from_row(row: &PgRow) -> sqlx::Result<AuditStamp> {
    let created_by: Option<Uuid> = row.try_get("created_by")?;
    let updated_by: Option<Uuid> = row.try_get("updated_by")?;
    Ok(AuditStamp {
        created_by: created_by.map(UserId::from_uuid),
        updated_by: updated_by.map(UserId::from_uuid),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn store_from_row(row: &PgRow) -> sqlx::Result<Store> {
    Ok(Store {
        id: StoreId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        address: row.try_get("address")?,
        phone: row.try_get("phone")?,
        code: row.try_get("code")?,
        audit: audit_from_row(row)?,
    })
}

fn role_from_row(row: &PgRow) -> sqlx::Result<Role> {
    let level: i32 = row.try_get("level")?;
    Ok(Role {
        id: RoleId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        level: Level(u16::try_from(level).unwrap_or(0)),
        audit: audit_from_row(row)?,
    })
}

fn user_from_row(row: &PgRow) -> sqlx::Result<User> {
    let role_id: Option<Uuid> = row.try_get("role_id")?;
    let store_id: Option<Uuid> = row.try_get("store_id")?;
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        password_hash: row.try_get("password_hash")?,
        role_id: role_id.map(RoleId::from_uuid),
        store_id: store_id.map(StoreId::from_uuid),
        audit: audit_from_row(row)?,
    })
}

fn category_from_row(row: &PgRow) -> sqlx::Result<Category> {
    Ok(Category {
        id: CategoryId(row.try_get("id")?),
        name: row.try_get("name")?,
        category_code: row.try_get("category_code")?,
        audit: audit_from_row(row)?,
    })
}

fn product_from_row(row: &PgRow) -> sqlx::Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get("id")?),
        name: row.try_get("name")?,
        category_id: CategoryId(row.try_get("category_id")?),
        store_id: StoreId::from_uuid(row.try_get("store_id")?),
        sku: row.try_get("sku")?,
        selling_price: row.try_get("selling_price")?,
        purchase_price: row.try_get("purchase_price")?,
        audit: audit_from_row(row)?,
    })
}

fn lot_from_row(row: &PgRow) -> sqlx::Result<InventoryLot> {
    let status: String = row.try_get("status")?;
    let created_by: Option<Uuid> = row.try_get("created_by")?;
    Ok(InventoryLot {
        id: LotId::from_uuid(row.try_get("id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        quantity: row.try_get("quantity")?,
        location: row.try_get("location")?,
        expiry_date: row.try_get("expiry_date")?,
        status: LotStatus::from_str(&status)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        created_by: created_by.map(UserId::from_uuid),
        created_at: row.try_get("created_at")?,
    })
}

fn record_from_row(row: &PgRow) -> sqlx::Result<InventoryRecord> {
    Ok(InventoryRecord {
        lot: lot_from_row(row)?,
        product_name: row.try_get("product_name")?,
        sku: row.try_get("sku")?,
        store_id: StoreId::from_uuid(row.try_get("store_id")?),
        category_name: row.try_get("category_name")?,
    })
}

fn order_from_row(row: &PgRow) -> sqlx::Result<Order> {
    let created_by: Option<Uuid> = row.try_get("created_by")?;
    Ok(Order {
        id: OrderId(row.try_get("id")?),
        invoice_number: row.try_get("invoice_number")?,
        customer_name: row.try_get("customer_name")?,
        total_price: row.try_get("total_price")?,
        store_id: StoreId::from_uuid(row.try_get("store_id")?),
        created_by: created_by.map(UserId::from_uuid),
        created_at: row.try_get("created_at")?,
        lines: Vec::new(),
    })
}

fn order_line_from_row(row: &PgRow) -> sqlx::Result<OrderLine> {
    Ok(OrderLine {
        id: OrderLineId(row.try_get("id")?),
        order_id: OrderId(row.try_get("order_id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        quantity: row.try_get("quantity")?,
        total_price: row.try_get("total_price")?,
        created_at: row.try_get("created_at")?,
    })
}

fn collect<T>(
    operation: &str,
    rows: Vec<PgRow>,
    f: fn(&PgRow) -> sqlx::Result<T>,
) -> RepoResult<Vec<T>> {
    rows.iter()
        .map(|row| f(row))
        .collect::<sqlx::Result<Vec<T>>>()
        .map_err(decode(operation))
}

fn into_page<T>(page: PageRequest, total: u64, data: Vec<T>) -> Page<T> {
    Page {
        data,
        total,
        limit: page.limit,
        offset: page.offset,
    }
}

const LOT_COLUMNS: &str = "i.id, i.product_id, i.quantity, i.location, i.expiry_date, i.status, i.created_by, i.created_at";

#[async_trait]
impl StoreRepository for PgDatabase {
    async fn insert_store(&self, store: &Store) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stores (id, name, address, phone, code, created_by, updated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(store.id.as_uuid())
        .bind(&store.name)
        .bind(&store.address)
        .bind(&store.phone)
        .bind(&store.code)
        .bind(uuid_opt(store.audit.created_by, UserId::as_uuid))
        .bind(uuid_opt(store.audit.updated_by, UserId::as_uuid))
        .bind(store.audit.created_at)
        .bind(store.audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_store", e))?;
        Ok(())
    }

    async fn update_store(&self, store: &Store) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE stores
            SET name = $2, address = $3, phone = $4, code = $5, updated_by = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(store.id.as_uuid())
        .bind(&store.name)
        .bind(&store.address)
        .bind(&store.phone)
        .bind(&store.code)
        .bind(uuid_opt(store.audit.updated_by, UserId::as_uuid))
        .bind(store.audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_store", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("store {}", store.id)));
        }
        Ok(())
    }

    async fn delete_store(&self, id: StoreId) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM stores WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_store", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("store {id}")));
        }
        Ok(())
    }

    async fn get_store(&self, id: StoreId) -> RepoResult<Option<Store>> {
        let row = sqlx::query("SELECT * FROM stores WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_store", e))?;
        row.as_ref()
            .map(store_from_row)
            .transpose()
            .map_err(decode("get_store"))
    }

    async fn list_stores(&self, page: PageRequest) -> RepoResult<Page<Store>> {
        let total = self
            .count("list_stores", sqlx::query("SELECT COUNT(*) FROM stores"))
            .await?;
        let rows = sqlx::query("SELECT * FROM stores ORDER BY name, id LIMIT $1 OFFSET $2")
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_stores", e))?;
        Ok(into_page(page, total, collect("list_stores", rows, store_from_row)?))
    }
}

#[async_trait]
impl RoleRepository for PgDatabase {
    async fn insert_role(&self, role: &Role) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (id, name, level, created_by, updated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(i32::from(role.level.value()))
        .bind(uuid_opt(role.audit.created_by, UserId::as_uuid))
        .bind(uuid_opt(role.audit.updated_by, UserId::as_uuid))
        .bind(role.audit.created_at)
        .bind(role.audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
        Ok(())
    }

    async fn update_role(&self, role: &Role) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE roles SET name = $2, level = $3, updated_by = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(i32::from(role.level.value()))
        .bind(uuid_opt(role.audit.updated_by, UserId::as_uuid))
        .bind(role.audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("role {}", role.id)));
        }
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("role {id}")));
        }
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> RepoResult<Option<Role>> {
        let row = sqlx::query("SELECT * FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        row.as_ref()
            .map(role_from_row)
            .transpose()
            .map_err(decode("get_role"))
    }

    async fn find_role_by_name(&self, name: &str) -> RepoResult<Option<Role>> {
        let row = sqlx::query("SELECT * FROM roles WHERE lower(name) = lower($1)")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_name", e))?;
        row.as_ref()
            .map(role_from_row)
            .transpose()
            .map_err(decode("find_role_by_name"))
    }

    async fn list_roles(&self, page: PageRequest) -> RepoResult<Page<Role>> {
        let total = self
            .count("list_roles", sqlx::query("SELECT COUNT(*) FROM roles"))
            .await?;
        let rows = sqlx::query("SELECT * FROM roles ORDER BY level DESC, name LIMIT $1 OFFSET $2")
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;
        Ok(into_page(page, total, collect("list_roles", rows, role_from_row)?))
    }
}

#[async_trait]
impl UserRepository for PgDatabase {
    async fn insert_user(&self, user: &User) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, email, name, password_hash, role_id, store_id,
                               created_by, updated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(uuid_opt(user.role_id, RoleId::as_uuid))
        .bind(uuid_opt(user.store_id, StoreId::as_uuid))
        .bind(uuid_opt(user.audit.created_by, UserId::as_uuid))
        .bind(uuid_opt(user.audit.updated_by, UserId::as_uuid))
        .bind(user.audit.created_at)
        .bind(user.audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;
        Ok(())
    }

    async fn update_user(&self, user: &User) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET username = $2, email = $3, name = $4, password_hash = $5, role_id = $6,
                store_id = $7, updated_by = $8, updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(uuid_opt(user.role_id, RoleId::as_uuid))
        .bind(uuid_opt(user.store_id, StoreId::as_uuid))
        .bind(uuid_opt(user.audit.updated_by, UserId::as_uuid))
        .bind(user.audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> RepoResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_user", e))?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(decode("get_user"))
    }

    async fn get_users(&self, ids: &[UserId]) -> RepoResult<Vec<User>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query("SELECT * FROM users WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_users", e))?;
        collect("get_users", rows, user_from_row)
    }

    async fn find_user_by_login(&self, username_or_email: &str) -> RepoResult<Option<User>> {
        let row = sqlx::query(
            "SELECT * FROM users WHERE lower(username) = lower($1) OR lower(email) = lower($1) LIMIT 1",
        )
        .bind(username_or_email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_login", e))?;
        row.as_ref()
            .map(user_from_row)
            .transpose()
            .map_err(decode("find_user_by_login"))
    }

    async fn list_users(&self, query: &UserQuery, page: PageRequest) -> RepoResult<Page<User>> {
        const FILTER: &str = r#"
            WHERE ($1::uuid IS NULL OR store_id = $1)
              AND ($2::text IS NULL
                   OR lower(username) LIKE '%' || $2 || '%'
                   OR lower(email) LIKE '%' || $2 || '%'
                   OR lower(coalesce(name, '')) LIKE '%' || $2 || '%')
        "#;
        let store = uuid_opt(query.store_id, StoreId::as_uuid);
        let term = search_term(&query.search);

        let count_sql = format!("SELECT COUNT(*) FROM users {FILTER}");
        let total = self
            .count("list_users", sqlx::query(&count_sql).bind(store).bind(term.clone()))
            .await?;
        let list_sql = format!("SELECT * FROM users {FILTER} ORDER BY username LIMIT $3 OFFSET $4");
        let rows = sqlx::query(&list_sql)
            .bind(store)
            .bind(term)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;
        Ok(into_page(page, total, collect("list_users", rows, user_from_row)?))
    }

    async fn count_users(&self) -> RepoResult<u64> {
        self.count("count_users", sqlx::query("SELECT COUNT(*) FROM users"))
            .await
    }
}

#[async_trait]
impl CategoryRepository for PgDatabase {
    async fn insert_category(&self, draft: &CategoryDraft, audit: &AuditStamp) -> RepoResult<Category> {
        let row = sqlx::query(
            r#"
            INSERT INTO categories (name, category_code, created_by, updated_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.category_code)
        .bind(uuid_opt(audit.created_by, UserId::as_uuid))
        .bind(uuid_opt(audit.updated_by, UserId::as_uuid))
        .bind(audit.created_at)
        .bind(audit.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_category", e))?;
        category_from_row(&row).map_err(decode("insert_category"))
    }

    async fn update_category(&self, category: &Category) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE categories
            SET name = $2, category_code = $3, updated_by = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(category.id.get())
        .bind(&category.name)
        .bind(&category.category_code)
        .bind(uuid_opt(category.audit.updated_by, UserId::as_uuid))
        .bind(category.audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_category", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("category {}", category.id)));
        }
        Ok(())
    }

    async fn delete_category(&self, id: CategoryId) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_category", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("category {id}")));
        }
        Ok(())
    }

    async fn get_category(&self, id: CategoryId) -> RepoResult<Option<Category>> {
        let row = sqlx::query("SELECT * FROM categories WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_category", e))?;
        row.as_ref()
            .map(category_from_row)
            .transpose()
            .map_err(decode("get_category"))
    }

    async fn find_category_by_code(&self, code: &str) -> RepoResult<Option<Category>> {
        let row = sqlx::query("SELECT * FROM categories WHERE category_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_category_by_code", e))?;
        row.as_ref()
            .map(category_from_row)
            .transpose()
            .map_err(decode("find_category_by_code"))
    }

    async fn list_categories(&self, page: PageRequest) -> RepoResult<Page<Category>> {
        let total = self
            .count("list_categories", sqlx::query("SELECT COUNT(*) FROM categories"))
            .await?;
        let rows = sqlx::query("SELECT * FROM categories ORDER BY name, id LIMIT $1 OFFSET $2")
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_categories", e))?;
        Ok(into_page(page, total, collect("list_categories", rows, category_from_row)?))
    }
}

#[async_trait]
impl ProductRepository for PgDatabase {
    async fn insert_products(&self, products: &[Product]) -> RepoResult<()> {
        let mut tx = self.begin().await?;
        for product in products {
            sqlx::query(
                r#"
                INSERT INTO products (id, name, category_id, store_id, sku, selling_price, purchase_price,
                                      created_by, updated_by, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(product.id.as_uuid())
            .bind(&product.name)
            .bind(product.category_id.get())
            .bind(product.store_id.as_uuid())
            .bind(&product.sku)
            .bind(product.selling_price)
            .bind(product.purchase_price)
            .bind(uuid_opt(product.audit.created_by, UserId::as_uuid))
            .bind(uuid_opt(product.audit.updated_by, UserId::as_uuid))
            .bind(product.audit.created_at)
            .bind(product.audit.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_product", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn update_product(&self, product: &Product) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $2, category_id = $3, selling_price = $4, purchase_price = $5,
                updated_by = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(product.category_id.get())
        .bind(product.selling_price)
        .bind(product.purchase_price)
        .bind(uuid_opt(product.audit.updated_by, UserId::as_uuid))
        .bind(product.audit.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("product {}", product.id)));
        }
        Ok(())
    }

    async fn delete_product(&self, id: ProductId) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_product", e))?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("product {id}")));
        }
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> RepoResult<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?;
        row.as_ref()
            .map(product_from_row)
            .transpose()
            .map_err(decode("get_product"))
    }

    async fn get_products(&self, ids: &[ProductId]) -> RepoResult<Vec<Product>> {
        let ids: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query("SELECT * FROM products WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_products", e))?;
        collect("get_products", rows, product_from_row)
    }

    async fn find_product_by_sku(&self, sku: &str) -> RepoResult<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE sku = $1")
            .bind(sku)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_product_by_sku", e))?;
        row.as_ref()
            .map(product_from_row)
            .transpose()
            .map_err(decode("find_product_by_sku"))
    }

    async fn existing_skus(&self, skus: &[String]) -> RepoResult<Vec<String>> {
        let rows = sqlx::query("SELECT sku FROM products WHERE sku = ANY($1)")
            .bind(skus)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("existing_skus", e))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("sku"))
            .collect::<sqlx::Result<Vec<_>>>()
            .map_err(decode("existing_skus"))
    }

    async fn list_products(&self, query: &ProductQuery, page: PageRequest) -> RepoResult<Page<Product>> {
        const FILTER: &str = r#"
            WHERE ($1::uuid IS NULL OR store_id = $1)
              AND ($2::bigint IS NULL OR category_id = $2)
              AND ($3::text IS NULL
                   OR lower(name) LIKE '%' || $3 || '%'
                   OR lower(sku) LIKE '%' || $3 || '%')
        "#;
        let store = uuid_opt(query.store_id, StoreId::as_uuid);
        let category = query.category_id.map(CategoryId::get);
        let term = search_term(&query.search);

        let count_sql = format!("SELECT COUNT(*) FROM products {FILTER}");
        let total = self
            .count(
                "list_products",
                sqlx::query(&count_sql).bind(store).bind(category).bind(term.clone()),
            )
            .await?;
        let list_sql = format!(
            "SELECT * FROM products {FILTER} ORDER BY created_at DESC, id DESC LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&list_sql)
            .bind(store)
            .bind(category)
            .bind(term)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_products", e))?;
        Ok(into_page(page, total, collect("list_products", rows, product_from_row)?))
    }
}

async fn insert_lot(tx: &mut Transaction<'_, Postgres>, lot: &InventoryLot) -> RepoResult<()> {
    sqlx::query(
        r#"
        INSERT INTO inventory (id, product_id, quantity, location, expiry_date, status, created_by, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(lot.id.as_uuid())
    .bind(lot.product_id.as_uuid())
    .bind(lot.quantity)
    .bind(&lot.location)
    .bind(lot.expiry_date)
    .bind(lot.status.as_str())
    .bind(uuid_opt(lot.created_by, UserId::as_uuid))
    .bind(lot.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert_lot", e))?;
    Ok(())
}

/// Lock every lot of `product_ids`, in product id order.
async fn lock_lots(
    tx: &mut Transaction<'_, Postgres>,
    product_ids: &[ProductId],
) -> RepoResult<Vec<InventoryLot>> {
    let ids: Vec<Uuid> = product_ids.iter().map(|id| *id.as_uuid()).collect();
    let sql = format!(
        r#"
        SELECT {LOT_COLUMNS}
        FROM inventory i
        WHERE i.product_id = ANY($1)
        ORDER BY i.product_id, i.expiry_date NULLS LAST, i.created_at, i.id
        FOR UPDATE
        "#
    );
    let rows = sqlx::query(&sql)
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_lots", e))?;
    collect("lock_lots", rows, lot_from_row)
}

async fn apply_depletion(tx: &mut Transaction<'_, Postgres>, plan: &DepletionPlan) -> RepoResult<()> {
    for step in &plan.steps {
        match step {
            DepletionStep::Remove { lot_id, .. } => {
                sqlx::query("DELETE FROM inventory WHERE id = $1")
                    .bind(lot_id.as_uuid())
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("remove_lot", e))?;
            }
            DepletionStep::Reduce { lot_id, remaining, .. } => {
                sqlx::query("UPDATE inventory SET quantity = $2 WHERE id = $1")
                    .bind(lot_id.as_uuid())
                    .bind(*remaining)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("reduce_lot", e))?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl InventoryRepository for PgDatabase {
    async fn insert_lots(&self, lots: &[InventoryLot]) -> RepoResult<()> {
        let mut tx = self.begin().await?;
        for lot in lots {
            insert_lot(&mut tx, lot).await?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn get_lot(&self, id: LotId) -> RepoResult<Option<InventoryRecord>> {
        let sql = format!(
            r#"
            SELECT {LOT_COLUMNS}, p.name AS product_name, p.sku, p.store_id, c.name AS category_name
            FROM inventory i
            JOIN products p ON p.id = i.product_id
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE i.id = $1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_lot", e))?;
        row.as_ref()
            .map(record_from_row)
            .transpose()
            .map_err(decode("get_lot"))
    }

    async fn list_lots(&self, query: &InventoryQuery, page: PageRequest) -> RepoResult<Page<InventoryRecord>> {
        const FROM: &str = r#"
            FROM inventory i
            JOIN products p ON p.id = i.product_id
            LEFT JOIN categories c ON c.id = p.category_id
            WHERE ($1::uuid IS NULL OR p.store_id = $1)
              AND ($2::uuid IS NULL OR i.product_id = $2)
              AND (cardinality($3::text[]) = 0 OR i.status = ANY($3))
              AND ($4::text IS NULL
                   OR lower(p.name) LIKE '%' || $4 || '%'
                   OR lower(p.sku) LIKE '%' || $4 || '%'
                   OR lower(coalesce(c.name, '')) LIKE '%' || $4 || '%')
        "#;
        let store = uuid_opt(query.store_id, StoreId::as_uuid);
        let product = uuid_opt(query.product_id, ProductId::as_uuid);
        let statuses: Vec<String> = query.statuses.iter().map(|s| s.as_str().to_string()).collect();
        let term = search_term(&query.search);

        let count_sql = format!("SELECT COUNT(*) {FROM}");
        let total = self
            .count(
                "list_lots",
                sqlx::query(&count_sql)
                    .bind(store)
                    .bind(product)
                    .bind(statuses.clone())
                    .bind(term.clone()),
            )
            .await?;
        let list_sql = format!(
            r#"
            SELECT {LOT_COLUMNS}, p.name AS product_name, p.sku, p.store_id, c.name AS category_name
            {FROM}
            ORDER BY i.created_at DESC, i.id DESC
            LIMIT $5 OFFSET $6
            "#
        );
        let rows = sqlx::query(&list_sql)
            .bind(store)
            .bind(product)
            .bind(statuses)
            .bind(term)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_lots", e))?;
        Ok(into_page(page, total, collect("list_lots", rows, record_from_row)?))
    }

    async fn product_lots(&self, product_id: ProductId) -> RepoResult<Vec<InventoryLot>> {
        let sql = format!("SELECT {LOT_COLUMNS} FROM inventory i WHERE i.product_id = $1");
        let rows = sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("product_lots", e))?;
        collect("product_lots", rows, lot_from_row)
    }

    #[instrument(skip(self), fields(product_id = %product_id, steps = tracing::field::Empty), err)]
    async fn deplete(
        &self,
        product_id: ProductId,
        quantity: Decimal,
        now: DateTime<Utc>,
    ) -> RepoResult<DepletionPlan> {
        let mut tx = self.begin().await?;
        let lots = lock_lots(&mut tx, &[product_id]).await?;
        let plan =
            plan_depletion(&lots, product_id, quantity, now).map_err(RepositoryError::Rejected)?;
        apply_depletion(&mut tx, &plan).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Span::current().record("steps", plan.steps.len());
        Ok(plan)
    }
}

impl PgDatabase {
    async fn load_lines(&self, orders: &mut [Order]) -> RepoResult<()> {
        if orders.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = orders.iter().map(|o| o.id.get()).collect();
        let rows = sqlx::query("SELECT * FROM order_lines WHERE order_id = ANY($1) ORDER BY id")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_order_lines", e))?;
        let mut by_order: HashMap<OrderId, Vec<OrderLine>> = HashMap::new();
        for line in collect("load_order_lines", rows, order_line_from_row)? {
            by_order.entry(line.order_id).or_default().push(line);
        }
        for order in orders.iter_mut() {
            order.lines = by_order.remove(&order.id).unwrap_or_default();
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for PgDatabase {
    #[instrument(skip(self, planner), fields(products = product_ids.len()), err)]
    async fn commit_checkout(
        &self,
        product_ids: &[ProductId],
        planner: &CheckoutPlanner<'_>,
    ) -> RepoResult<Order> {
        let mut tx = self.begin().await?;
        let lots = lock_lots(&mut tx, product_ids).await?;
        let plan = planner(&lots).map_err(RepositoryError::Rejected)?;

        let draft = &plan.order;
        let row = sqlx::query(
            r#"
            INSERT INTO orders (invoice_number, customer_name, total_price, store_id, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&draft.invoice_number)
        .bind(&draft.customer_name)
        .bind(draft.total_price)
        .bind(draft.store_id.as_uuid())
        .bind(uuid_opt(draft.created_by, UserId::as_uuid))
        .bind(draft.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;
        let order_id = OrderId(row.try_get("id").map_err(decode("insert_order"))?);

        let mut line_ids = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            let row = sqlx::query(
                r#"
                INSERT INTO order_lines (order_id, product_id, quantity, total_price, created_at)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(order_id.get())
            .bind(line.product_id.as_uuid())
            .bind(line.quantity)
            .bind(line.total_price)
            .bind(draft.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_order_line", e))?;
            line_ids.push(OrderLineId(row.try_get("id").map_err(decode("insert_order_line"))?));
        }

        for depletion in &plan.depletions {
            apply_depletion(&mut tx, depletion).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(plan.order.into_order(order_id, line_ids))
    }

    async fn get_order(&self, id: OrderId) -> RepoResult<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_order", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut orders = vec![order_from_row(&row).map_err(decode("get_order"))?];
        self.load_lines(&mut orders).await?;
        Ok(orders.pop())
    }

    async fn list_orders(&self, query: &OrderQuery, page: PageRequest) -> RepoResult<Page<Order>> {
        const FILTER: &str = r#"
            WHERE ($1::uuid IS NULL OR store_id = $1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
              AND ($4::text IS NULL
                   OR lower(invoice_number) LIKE '%' || $4 || '%'
                   OR lower(coalesce(customer_name, '')) LIKE '%' || $4 || '%')
        "#;
        let store = uuid_opt(query.store_id, StoreId::as_uuid);
        let term = search_term(&query.search);

        let count_sql = format!("SELECT COUNT(*) FROM orders {FILTER}");
        let total = self
            .count(
                "list_orders",
                sqlx::query(&count_sql)
                    .bind(store)
                    .bind(query.from)
                    .bind(query.to)
                    .bind(term.clone()),
            )
            .await?;
        let list_sql = format!("SELECT * FROM orders {FILTER} ORDER BY id DESC LIMIT $5 OFFSET $6");
        let rows = sqlx::query(&list_sql)
            .bind(store)
            .bind(query.from)
            .bind(query.to)
            .bind(term)
            .bind(i64::from(page.limit))
            .bind(i64::from(page.offset))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_orders", e))?;
        let mut orders = collect("list_orders", rows, order_from_row)?;
        self.load_lines(&mut orders).await?;
        Ok(into_page(page, total, orders))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use rust_decimal_macros::dec;
    use stockroom_auth::Principal;
    use stockroom_catalog::{ProductDraft, StoreDraft};
    use stockroom_core::{Clock, DomainError, DomainResult, RequestContext, SystemClock};
    use stockroom_inventory::NewLot;
    use stockroom_sales::{CartItem, CheckoutRequest, OrderDraft, OrderLineDraft};

    use crate::db::CheckoutPlan;
    use crate::services::{CatalogService, CheckoutService};

    /// Set `DATABASE_URL` to run these against a live server; unset, they pass vacuously.
    async fn live_database() -> Option<Arc<PgDatabase>> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let db = PgDatabase::connect(&url, 8).await.unwrap();
        db.migrate().await.unwrap();
        Some(Arc::new(db))
    }

    struct Shop {
        db: Arc<PgDatabase>,
        clock: Arc<dyn Clock>,
        store: Store,
        product: Product,
        cashier: Principal,
    }

    /// A fresh store with one product, under codes no earlier run has used.
    async fn open_shop(db: Arc<PgDatabase>) -> Shop {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let catalog = CatalogService::new(db.clone(), clock.clone());
        let ctx = RequestContext::background();
        let root = Principal::new(UserId::new(), Level::SUPER_ADMIN, None);
        let suffix = Uuid::now_v7().simple().to_string().to_ascii_uppercase();
        let code = &suffix[suffix.len() - 8..];

        let store = catalog
            .create_store(&ctx, &root, StoreDraft { name: format!("Shop {code}"), code: Some(code.into()), ..StoreDraft::default() })
            .await
            .unwrap();
        let category = catalog
            .create_category(&ctx, &root, CategoryDraft { name: format!("Dry {code}"), category_code: code.into() })
            .await
            .unwrap();
        let product = catalog
            .create_product(
                &ctx,
                &root,
                Some(store.id),
                ProductDraft {
                    name: "Flour".into(),
                    category_id: category.id,
                    sku: None,
                    selling_price: dec!(1),
                    purchase_price: dec!(0.5),
                },
            )
            .await
            .unwrap();
        Shop {
            cashier: Principal::new(UserId::new(), Level::STAFF, Some(store.id)),
            db,
            clock,
            store,
            product,
        }
    }

    async fn receive(shop: &Shop, quantity: Decimal, expiry_date: Option<DateTime<Utc>>) -> InventoryLot {
        let lot = InventoryLot::receive(
            NewLot { product_id: shop.product.id, quantity, location: None, expiry_date },
            None,
            shop.clock.now(),
        )
        .unwrap();
        shop.db.insert_lots(std::slice::from_ref(&lot)).await.unwrap();
        lot
    }

    async fn on_hand(shop: &Shop) -> Decimal {
        let lots = shop.db.product_lots(shop.product.id).await.unwrap();
        lots.iter().map(|lot| lot.quantity).sum()
    }

    async fn order_rows(shop: &Shop) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE store_id = $1")
            .bind(shop.store.id.as_uuid())
            .fetch_one(shop.db.pool())
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_checkouts_on_postgres_never_oversell() {
        let Some(db) = live_database().await else { return };
        let shop = open_shop(db).await;
        receive(&shop, dec!(10), None).await;
        let checkout = CheckoutService::new(shop.db.clone(), shop.clock.clone());
        let ctx = RequestContext::background();
        let cart = || CheckoutRequest {
            customer_name: None,
            store_id: None,
            grand_total: dec!(6),
            items: vec![CartItem { product_id: shop.product.id, quantity: dec!(6) }],
        };

        let (a, b) = tokio::join!(
            checkout.checkout(&ctx, &shop.cashier, cart()),
            checkout.checkout(&ctx, &shop.cashier, cart()),
        );
        let committed = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(committed, 1);
        let failure = a.err().or(b.err()).unwrap();
        assert!(matches!(failure, DomainError::InsufficientInventory { .. }));

        let depleted = dec!(10) - on_hand(&shop).await;
        assert!(depleted <= dec!(10));
        assert_eq!(depleted, dec!(6));
        assert_eq!(order_rows(&shop).await, 1);
    }

    #[tokio::test]
    async fn failed_checkout_commit_leaves_no_order_and_no_depletion() {
        let Some(db) = live_database().await else { return };
        let shop = open_shop(db).await;
        receive(&shop, dec!(10), None).await;
        let now = shop.clock.now();

        let rejected = |_: &[InventoryLot]| -> DomainResult<CheckoutPlan> {
            Err(DomainError::validation("grand total does not match"))
        };
        let err = shop.db.commit_checkout(&[shop.product.id], &rejected).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Rejected(DomainError::Validation(_))));

        // The order row is written before a line that references a missing product.
        let dangling = |lots: &[InventoryLot]| -> DomainResult<CheckoutPlan> {
            let depletion = plan_depletion(lots, shop.product.id, dec!(4), now)?;
            Ok(CheckoutPlan {
                order: OrderDraft {
                    invoice_number: format!("{}X", shop.store.code.clone().unwrap_or_default()),
                    customer_name: None,
                    total_price: dec!(4),
                    store_id: shop.store.id,
                    created_by: None,
                    created_at: now,
                    lines: vec![
                        OrderLineDraft { product_id: shop.product.id, quantity: dec!(4), total_price: dec!(4) },
                        OrderLineDraft { product_id: ProductId::new(), quantity: dec!(1), total_price: dec!(0) },
                    ],
                },
                depletions: vec![depletion],
            })
        };
        let err = shop.db.commit_checkout(&[shop.product.id], &dangling).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Reference(_)));

        assert_eq!(order_rows(&shop).await, 0);
        assert_eq!(on_hand(&shop).await, dec!(10));
    }

    #[tokio::test]
    async fn postgres_depletion_takes_the_soonest_expiry_first() {
        let Some(db) = live_database().await else { return };
        let shop = open_shop(db).await;
        let now = shop.clock.now();
        let late = receive(&shop, dec!(4), Some(now + Duration::days(30))).await;
        let undated = receive(&shop, dec!(10), None).await;
        let soon = receive(&shop, dec!(3), Some(now + Duration::days(5))).await;
        let expired = receive(&shop, dec!(7), Some(now - Duration::days(1))).await;

        let plan = shop.db.deplete(shop.product.id, dec!(5), now).await.unwrap();
        assert_eq!(
            plan.steps,
            vec![
                DepletionStep::Remove { lot_id: soon.id, quantity: dec!(3) },
                DepletionStep::Reduce { lot_id: late.id, taken: dec!(2), remaining: dec!(2) },
            ]
        );

        let left: HashMap<LotId, Decimal> = shop
            .db
            .product_lots(shop.product.id)
            .await
            .unwrap()
            .into_iter()
            .map(|lot| (lot.id, lot.quantity))
            .collect();
        assert_eq!(left.get(&soon.id), None);
        assert_eq!(left.get(&late.id), Some(&dec!(2)));
        assert_eq!(left.get(&undated.id), Some(&dec!(10)));
        assert_eq!(left.get(&expired.id), Some(&dec!(7)));
    }

    #[test]
    fn key_value_extracts_the_conflicting_value() {
        assert_eq!(
            key_value("Key (sku)=(STR-CAT-202601010000) already exists."),
            Some("STR-CAT-202601010000".to_string())
        );
        assert_eq!(key_value("no detail"), None);
    }

    #[test]
    fn sku_conflicts_carry_the_bare_sku() {
        assert_eq!(
            unique_message(constraints::PRODUCT_SKU, Some("ABC".into())),
            "ABC"
        );
        assert_eq!(
            unique_message(constraints::USERNAME, Some("bob".into())),
            "username 'bob' already exists"
        );
    }

    #[test]
    fn schema_creates_every_table() {
        for table in ["stores", "roles", "users", "categories", "products", "inventory", "orders", "order_lines"] {
            assert!(
                SCHEMA.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing table {table}"
            );
        }
    }
}

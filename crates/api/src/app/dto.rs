use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};

use stockroom_auth::{Role, User, UserSummary};
use stockroom_catalog::{Category, Product, ProductDraft, Store};
use stockroom_core::{
    AuditStamp, CategoryId, DomainError, DomainResult, PageRequest, ProductId, StoreId, UserId,
};
use stockroom_infra::db::{InventoryQuery, InventoryRecord, ProductQuery};
use stockroom_infra::import::parse_date;
use stockroom_inventory::{InventoryLot, LotStatus, NewLot};
use stockroom_sales::{Order, OrderQuery};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "usernameOrEmail", alias = "username", alias = "email")]
    pub username_or_email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub category_id: CategoryId,
    #[serde(default)]
    pub sku: Option<String>,
    pub selling_price: Decimal,
    pub purchase_price: Decimal,
    #[serde(default)]
    pub store_id: Option<StoreId>,
}

impl CreateProductRequest {
    pub fn into_parts(self) -> (Option<StoreId>, ProductDraft) {
        let draft = ProductDraft {
            name: self.name,
            category_id: self.category_id,
            sku: self.sku,
            selling_price: self.selling_price,
            purchase_price: self.purchase_price,
        };
        (self.store_id, draft)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLotRequest {
    pub product_id: ProductId,
    pub quantity: Decimal,
    #[serde(default)]
    pub location: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339.
    #[serde(default)]
    pub expiry_date: Option<String>,
    #[serde(default)]
    pub store_id: Option<StoreId>,
}

impl CreateLotRequest {
    pub fn into_parts(self) -> DomainResult<(Option<StoreId>, NewLot)> {
        let expiry_date = match self.expiry_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(parse_date(raw).ok_or_else(|| {
                DomainError::validation(format!("expiry_date '{raw}' is not a YYYY-MM-DD or RFC 3339 date"))
            })?),
        };
        Ok((
            self.store_id,
            NewLot {
                product_id: self.product_id,
                quantity: self.quantity,
                location: self.location,
                expiry_date,
            },
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PageParams {
    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.limit, self.offset)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub store_id: Option<StoreId>,
    pub category_id: Option<CategoryId>,
    pub search: Option<String>,
}

impl ProductListParams {
    pub fn into_query(self) -> (ProductQuery, PageRequest) {
        (
            ProductQuery {
                store_id: self.store_id,
                category_id: self.category_id,
                search: self.search,
            },
            PageRequest::new(self.limit, self.offset),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub store_id: Option<StoreId>,
    pub product_id: Option<ProductId>,
    /// One status or a comma separated list.
    pub status: Option<String>,
    pub search: Option<String>,
}

impl InventoryListParams {
    pub fn into_query(self) -> DomainResult<(InventoryQuery, PageRequest)> {
        let statuses = self
            .status
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<LotStatus>)
            .collect::<DomainResult<Vec<_>>>()?;
        Ok((
            InventoryQuery {
                store_id: self.store_id,
                product_id: self.product_id,
                statuses,
                search: self.search,
            },
            PageRequest::new(self.limit, self.offset),
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub store_id: Option<StoreId>,
    pub search: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl OrderListParams {
    pub fn into_query(self) -> (OrderQuery, PageRequest) {
        (
            OrderQuery {
                store_id: self.store_id,
                search: self.search,
                from: self.from,
                to: self.to,
            },
            PageRequest::new(self.limit, self.offset),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub store_id: Option<StoreId>,
    pub search: Option<String>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub type Summaries = HashMap<UserId, UserSummary>;

/// User ids referenced by a set of audit stamps.
pub fn audit_ids<'a>(audits: impl IntoIterator<Item = &'a AuditStamp>) -> Vec<UserId> {
    audits.into_iter().flat_map(AuditStamp::user_ids).collect()
}

fn user_ref(id: Option<UserId>, users: &Summaries) -> Value {
    id.and_then(|id| users.get(&id))
        .map_or(Value::Null, |summary| json!(summary))
}

fn with_audit(mut body: Value, audit: &AuditStamp, users: &Summaries) -> Value {
    if let Some(map) = body.as_object_mut() {
        map.insert("created_by".into(), user_ref(audit.created_by, users));
        map.insert("updated_by".into(), user_ref(audit.updated_by, users));
        map.insert("created_at".into(), json!(audit.created_at));
        map.insert("updated_at".into(), json!(audit.updated_at));
    }
    body
}

pub fn store_to_json(store: Store, users: &Summaries) -> Value {
    with_audit(
        json!({
            "id": store.id,
            "name": store.name,
            "address": store.address,
            "phone": store.phone,
            "code": store.code,
        }),
        &store.audit,
        users,
    )
}

pub fn role_to_json(role: Role, users: &Summaries) -> Value {
    with_audit(
        json!({
            "id": role.id,
            "name": role.name,
            "level": role.level.value(),
        }),
        &role.audit,
        users,
    )
}

pub fn category_to_json(category: Category, users: &Summaries) -> Value {
    with_audit(
        json!({
            "id": category.id,
            "name": category.name,
            "category_code": category.category_code,
        }),
        &category.audit,
        users,
    )
}

/// Never exposes the password hash.
pub fn user_to_json(user: User, users: &Summaries) -> Value {
    with_audit(
        json!({
            "id": user.id,
            "username": user.username,
            "email": user.email,
            "name": user.name,
            "role_id": user.role_id,
            "store_id": user.store_id,
        }),
        &user.audit,
        users,
    )
}

pub fn product_to_json(product: Product, users: &Summaries) -> Value {
    with_audit(
        json!({
            "id": product.id,
            "name": product.name,
            "category_id": product.category_id,
            "store_id": product.store_id,
            "sku": product.sku,
            "selling_price": product.selling_price,
            "purchase_price": product.purchase_price,
        }),
        &product.audit,
        users,
    )
}

/// A bare lot, as returned by batch import.
pub fn lot_to_json(lot: InventoryLot, now: DateTime<Utc>, users: &Summaries) -> Value {
    json!({
        "id": lot.id,
        "product_id": lot.product_id,
        "quantity": lot.quantity,
        "location": lot.location,
        "expiry_date": lot.expiry_date,
        "status": lot.status,
        "effective_status": lot.effective_status(now),
        "created_by": user_ref(lot.created_by, users),
        "created_at": lot.created_at,
    })
}

/// Both the stored status and the one recomputed at `now`.
pub fn inventory_to_json(record: InventoryRecord, now: DateTime<Utc>, users: &Summaries) -> Value {
    let lot = record.lot;
    json!({
        "id": lot.id,
        "product_id": lot.product_id,
        "product_name": record.product_name,
        "sku": record.sku,
        "store_id": record.store_id,
        "category_name": record.category_name,
        "quantity": lot.quantity,
        "location": lot.location,
        "expiry_date": lot.expiry_date,
        "status": lot.status,
        "effective_status": lot.effective_status(now),
        "created_by": user_ref(lot.created_by, users),
        "created_at": lot.created_at,
    })
}

pub fn order_to_json(order: Order, users: &Summaries) -> Value {
    json!({
        "id": order.id,
        "invoice_number": order.invoice_number,
        "customer_name": order.customer_name,
        "total_price": order.total_price,
        "store_id": order.store_id,
        "created_by": user_ref(order.created_by, users),
        "created_at": order.created_at,
        "lines": order.lines.into_iter().map(|line| json!({
            "id": line.id,
            "product_id": line.product_id,
            "quantity": line.quantity,
            "total_price": line.total_price,
            "created_at": line.created_at,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn login_accepts_either_field_name() {
        let camel: LoginRequest = serde_json::from_value(json!({"usernameOrEmail": "root", "password": "x"})).unwrap();
        let snake: LoginRequest = serde_json::from_value(json!({"username_or_email": "root", "password": "x"})).unwrap();
        assert_eq!(camel.username_or_email, snake.username_or_email);
    }

    #[test]
    fn status_filter_accepts_lists() {
        let params = InventoryListParams {
            status: Some("active, near_expiry".into()),
            ..InventoryListParams::default()
        };
        let (query, _) = params.into_query().unwrap();
        assert_eq!(query.statuses, vec![LotStatus::Active, LotStatus::NearExpiry]);

        let bad = InventoryListParams {
            status: Some("stale".into()),
            ..InventoryListParams::default()
        };
        assert!(bad.into_query().is_err());
    }

    #[test]
    fn lot_expiry_accepts_plain_dates() {
        let request = CreateLotRequest {
            product_id: ProductId::new(),
            quantity: Decimal::ONE,
            location: None,
            expiry_date: Some("2026-06-01".into()),
            store_id: None,
        };
        let (_, lot) = request.into_parts().unwrap();
        assert_eq!(lot.expiry_date, Some(Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn deleted_authors_render_as_null() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let author = UserId::new();
        let users: Summaries = [(
            author,
            UserSummary { id: author, name: "Ann".into(), email: "ann@shop.test".into() },
        )]
        .into_iter()
        .collect();
        let mut audit = AuditStamp::created(Some(author), at);
        audit.updated_by = Some(UserId::new());

        let body = with_audit(json!({}), &audit, &users);
        assert_eq!(body["created_by"]["name"], "Ann");
        assert!(body["updated_by"].is_null());
    }
}

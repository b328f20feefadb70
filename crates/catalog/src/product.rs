use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::amount::check_bound;
use stockroom_core::{
    AuditStamp, CategoryId, DomainError, DomainResult, Entity, FieldError, ProductId, StoreId,
    UserId,
};

use crate::category::Category;
use crate::sku::{generate_sku, normalize_sku};
use crate::store::Store;

/// Catalog product. Belongs to exactly one store; its SKU never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub category_id: CategoryId,
    pub store_id: StoreId,
    pub sku: String,
    pub selling_price: Decimal,
    pub purchase_price: Decimal,
    pub audit: AuditStamp,
}

impl Product {
    pub fn belongs_to(&self, store_id: StoreId) -> bool {
        self.store_id == store_id
    }

    /// Fail with `ProductNotInStore` unless the product is owned by `store_id`.
    pub fn ensure_store(&self, store_id: StoreId) -> DomainResult<()> {
        if self.belongs_to(store_id) {
            Ok(())
        } else {
            Err(DomainError::ProductNotInStore(self.id))
        }
    }

    /// Apply an update. Store and SKU are immutable.
    pub fn apply_patch(
        &mut self,
        patch: ProductPatch,
        updated_by: Option<UserId>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut errors = Vec::new();
        if let Some(name) = patch.name.as_deref() {
            if name.trim().is_empty() {
                errors.push(FieldError::new("name", "name cannot be empty"));
            }
        }
        check_price(&mut errors, "selling_price", patch.selling_price);
        check_price(&mut errors, "purchase_price", patch.purchase_price);
        DomainError::from_field_errors(errors)?;

        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(category_id) = patch.category_id {
            self.category_id = category_id;
        }
        if let Some(price) = patch.selling_price {
            self.selling_price = price;
        }
        if let Some(price) = patch.purchase_price {
            self.purchase_price = price;
        }
        self.audit.touch(updated_by, now);
        Ok(())
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }
}

/// Creation input. The owning store is resolved from the caller, not taken
/// from here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductDraft {
    pub name: String,
    pub category_id: CategoryId,
    pub sku: Option<String>,
    pub selling_price: Decimal,
    pub purchase_price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub category_id: Option<CategoryId>,
    pub selling_price: Option<Decimal>,
    pub purchase_price: Option<Decimal>,
}

fn check_price(errors: &mut Vec<FieldError>, field: &str, price: Option<Decimal>) {
    if let Some(price) = price {
        if price < Decimal::ZERO {
            errors.push(FieldError::new(field, format!("{field} must be non-negative")));
        }
        check_bound(errors, field, price);
    }
}

/// Validate a draft against its store and category and build the product.
///
/// Generates the SKU when the draft has none. Uniqueness against existing
/// products is the caller's job (it needs storage).
pub fn prepare_product(
    draft: ProductDraft,
    store: &Store,
    category: &Category,
    created_by: Option<UserId>,
    now: DateTime<Utc>,
) -> DomainResult<Product> {
    if draft.category_id != category.id {
        return Err(DomainError::validation("category does not match the draft"));
    }

    let mut errors = Vec::new();
    if draft.name.trim().is_empty() {
        errors.push(FieldError::new("name", "name cannot be empty"));
    }
    check_price(&mut errors, "selling_price", Some(draft.selling_price));
    check_price(&mut errors, "purchase_price", Some(draft.purchase_price));
    DomainError::from_field_errors(errors)?;

    let store_code = store.require_code()?;
    let sku = match draft.sku.as_deref() {
        Some(raw) if !raw.trim().is_empty() => normalize_sku(raw)?,
        _ => generate_sku(store_code, &category.category_code, now),
    };

    Ok(Product {
        id: ProductId::new(),
        name: draft.name.trim().to_string(),
        category_id: category.id,
        store_id: store.id,
        sku,
        selling_price: draft.selling_price,
        purchase_price: draft.purchase_price,
        audit: AuditStamp::created(created_by, now),
    })
}

//! Centralized level policy and store scoping.
//!
//! Every route consults `required_level` through `authorize`; no level numbers
//! are scattered across handlers.

use serde::Serialize;
use thiserror::Error;

use stockroom_core::{DomainError, StoreId};

use crate::{Level, Principal};

/// Protected operations, one per policy row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// List/get of stores, roles, categories, users, products and inventory.
    ReadCatalog,
    ManageStores,
    ManageRoles,
    ManageCategories,
    ManageUsers,
    ManageProducts,
    ImportProducts,
    ReceiveInventory,
    ImportInventory,
    Checkout,
    ViewOrders,
    /// Naming an explicit `store_id` other than the caller's own.
    ActAcrossStores,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ReadCatalog => "read_catalog",
            Operation::ManageStores => "manage_stores",
            Operation::ManageRoles => "manage_roles",
            Operation::ManageCategories => "manage_categories",
            Operation::ManageUsers => "manage_users",
            Operation::ManageProducts => "manage_products",
            Operation::ImportProducts => "import_products",
            Operation::ReceiveInventory => "receive_inventory",
            Operation::ImportInventory => "import_inventory",
            Operation::Checkout => "checkout",
            Operation::ViewOrders => "view_orders",
            Operation::ActAcrossStores => "act_across_stores",
        }
    }
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The policy table: operation → minimum level.
pub fn required_level(operation: Operation) -> Level {
    match operation {
        Operation::ReadCatalog => Level::ANY,
        Operation::ManageStores
        | Operation::ManageRoles
        | Operation::ManageCategories
        | Operation::ManageUsers => Level::ADMIN,
        Operation::ManageProducts
        | Operation::ImportProducts
        | Operation::ReceiveInventory
        | Operation::ImportInventory
        | Operation::Checkout
        | Operation::ViewOrders => Level::STAFF,
        Operation::ActAcrossStores => Level::SUPER_ADMIN,
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: '{operation}' requires level {required}, caller has {actual}")]
    InsufficientLevel {
        operation: Operation,
        required: Level,
        actual: Level,
    },

    #[error("user has no store assigned")]
    UserHasNoStore,

    #[error("forbidden: only a super admin may act on another store")]
    CrossStoreDenied,

    #[error("forbidden: cannot grant level {target} (caller has {actual})")]
    PrivilegeEscalation { target: Level, actual: Level },
}

impl From<AuthzError> for DomainError {
    fn from(value: AuthzError) -> Self {
        match value {
            AuthzError::UserHasNoStore => DomainError::UserHasNoStore,
            other => DomainError::Forbidden(other.to_string()),
        }
    }
}

/// Check the caller's level against the policy table.
///
/// - No IO
/// - No panics
pub fn authorize(principal: &Principal, operation: Operation) -> Result<(), AuthzError> {
    let required = required_level(operation);
    if principal.level >= required {
        Ok(())
    } else {
        Err(AuthzError::InsufficientLevel {
            operation,
            required,
            actual: principal.level,
        })
    }
}

/// Decide which store a mutation acts on.
///
/// Super admins may name any store (falling back to their home store when they
/// don't); everyone else is pinned to their home store.
pub fn resolve_store(
    principal: &Principal,
    requested: Option<StoreId>,
) -> Result<StoreId, AuthzError> {
    if principal.is_super_admin() {
        return requested
            .or(principal.store_id)
            .ok_or(AuthzError::UserHasNoStore);
    }

    let home = principal.store_id.ok_or(AuthzError::UserHasNoStore)?;
    match requested {
        Some(store_id) if store_id != home => Err(AuthzError::CrossStoreDenied),
        _ => Ok(home),
    }
}

/// Decide which store a listing is filtered to (`None` = every store).
pub fn read_scope(
    principal: &Principal,
    requested: Option<StoreId>,
) -> Result<Option<StoreId>, AuthzError> {
    if principal.is_super_admin() {
        return Ok(requested);
    }
    resolve_store(principal, requested).map(Some)
}

/// Privilege-escalation guard for user/role management.
pub fn can_assign_level(principal: &Principal, target: Level) -> Result<(), AuthzError> {
    let escalates = target > principal.level
        || (target.is_super_admin() && !principal.is_super_admin());
    if escalates {
        Err(AuthzError::PrivilegeEscalation {
            target,
            actual: principal.level,
        })
    } else {
        Ok(())
    }
}

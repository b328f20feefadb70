//! Domain error model.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::id::{ProductId, StoreId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Domain-level error.
///
/// Business and boundary failures only. Storage errors are mapped into this
/// type at the use-case boundary (see `stockroom-infra`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Several fields failed validation at once.
    #[error("validation failed for {} field(s)", .0.len())]
    ValidationErrors(Vec<FieldError>),

    /// A requested entity does not exist (or is not visible to the caller).
    #[error("{0} not found")]
    NotFound(String),

    /// Credentials or token were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Authenticated, but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unique-constraint style conflict (username, email, codes, references).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("SKU '{0}' already exists")]
    DuplicateSku(String),

    /// Demand exceeds the allocatable stock of a product.
    #[error(
        "insufficient inventory for product {product_id}: requested {requested}, available {available}, missing {missing}"
    )]
    InsufficientInventory {
        product_id: ProductId,
        requested: Decimal,
        available: Decimal,
        missing: Decimal,
    },

    #[error("product {0} has no inventory")]
    ProductHasNoInventory(ProductId),

    #[error("user has no store assigned")]
    UserHasNoStore,

    #[error("product {0} does not belong to the acting store")]
    ProductNotInStore(ProductId),

    #[error("store {0} has no code")]
    StoreHasNoCode(StoreId),

    /// Client-supplied grand total disagrees with the server-side computation.
    #[error("grand total mismatch: client sent {client}, computed {computed}")]
    GrandTotalMismatch { client: Decimal, computed: Decimal },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Collapse collected field errors into a single error (or `Ok` when empty).
    pub fn from_field_errors(errors: Vec<FieldError>) -> DomainResult<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::ValidationErrors(errors))
        }
    }
}

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::amount::check_bound;
use stockroom_core::{DomainError, DomainResult, Entity, FieldError, LotId, ProductId, UserId};

use crate::status::{LotStatus, derive_status};

/// A received quantity of one product, with its own expiry and location.
///
/// Lots are only ever created by receiving and only ever changed by depletion
/// (reduced, or removed once fully consumed). The store is implied by the
/// product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLot {
    pub id: LotId,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub location: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
    /// Status as computed when the lot was received.
    pub status: LotStatus,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl InventoryLot {
    /// Build a lot from validated input, stamping the status at `now`.
    pub fn receive(input: NewLot, created_by: Option<UserId>, now: DateTime<Utc>) -> DomainResult<Self> {
        let input = input.validated()?;
        Ok(Self {
            id: LotId::new(),
            product_id: input.product_id,
            quantity: input.quantity,
            status: derive_status(input.expiry_date, now),
            location: input.location,
            expiry_date: input.expiry_date,
            created_by,
            created_at: now,
        })
    }

    /// Status recomputed from the expiry date.
    ///
    /// The stored `status` goes stale as time passes; availability and
    /// allocation always use this instead.
    pub fn effective_status(&self, now: DateTime<Utc>) -> LotStatus {
        derive_status(self.expiry_date, now)
    }

    pub fn is_allocatable(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now).is_allocatable()
    }
}

impl Entity for InventoryLot {
    type Id = LotId;

    fn id(&self) -> LotId {
        self.id
    }
}

/// Receiving input for a single lot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewLot {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub location: Option<String>,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl NewLot {
    /// Zero is accepted (such a lot never contributes to allocation); negative
    /// quantities are not.
    pub fn validated(self) -> DomainResult<Self> {
        let mut errors = Vec::new();
        if self.quantity < Decimal::ZERO {
            errors.push(FieldError::new("quantity", "quantity must be non-negative"));
        }
        check_bound(&mut errors, "quantity", self.quantity);
        DomainError::from_field_errors(errors)?;
        let location = self
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        Ok(Self { location, ..self })
    }
}

//! SKU generation.

use chrono::{DateTime, Utc};

use stockroom_core::{DomainError, DomainResult};

/// `yyyyMMddHHss`: hour then seconds, with no minute field.
///
/// Downstream consumers already parse this layout; keep it as is.
pub const SKU_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%S";

pub const MAX_SKU_LEN: usize = 64;

/// `{storeCode}-{categoryCode}-{yyyyMMddHHss}`.
///
/// No collision handling: two products for the same store and category in the
/// same second get the same SKU, and the uniqueness check rejects the second.
pub fn generate_sku(store_code: &str, category_code: &str, at: DateTime<Utc>) -> String {
    format!(
        "{store_code}-{category_code}-{}",
        at.format(SKU_TIMESTAMP_FORMAT)
    )
}

/// Validate a caller-supplied SKU.
pub fn normalize_sku(raw: &str) -> DomainResult<String> {
    let sku = raw.trim();
    if sku.is_empty() {
        return Err(DomainError::validation("sku cannot be empty"));
    }
    if sku.len() > MAX_SKU_LEN {
        return Err(DomainError::validation(format!(
            "sku must be at most {MAX_SKU_LEN} characters"
        )));
    }
    Ok(sku.to_string())
}

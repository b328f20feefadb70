//! Bounds and overflow-checked arithmetic for quantities and money.
//!
//! Every quantity and price entering the system is capped at [`MAX_AMOUNT`],
//! and sums/products over them go through the checked helpers here, so no
//! input can make `Decimal` arithmetic panic.

use rust_decimal::Decimal;

use crate::error::{DomainError, DomainResult, FieldError};

/// Largest quantity or unit price accepted on input: 10^12.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Record a field error when `value` is above [`MAX_AMOUNT`].
pub fn check_bound(errors: &mut Vec<FieldError>, field: impl Into<String>, value: Decimal) {
    if value > MAX_AMOUNT {
        let field = field.into();
        let message = format!("{field} must not exceed {MAX_AMOUNT}");
        errors.push(FieldError::new(field, message));
    }
}

pub fn checked_sum(values: impl IntoIterator<Item = Decimal>) -> DomainResult<Decimal> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, value| acc.checked_add(value).ok_or_else(overflow))
}

pub fn checked_mul(a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    a.checked_mul(b).ok_or_else(overflow)
}

pub fn checked_sub(a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    a.checked_sub(b).ok_or_else(overflow)
}

fn overflow() -> DomainError {
    DomainError::validation("amount is out of range")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_amount_is_one_trillion() {
        assert_eq!(MAX_AMOUNT, Decimal::from(1_000_000_000_000i64));
    }

    #[test]
    fn bound_is_inclusive() {
        let mut errors = Vec::new();
        check_bound(&mut errors, "quantity", MAX_AMOUNT);
        assert!(errors.is_empty());
        check_bound(&mut errors, "quantity", MAX_AMOUNT + Decimal::ONE);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "quantity");
    }

    #[test]
    fn overflow_is_an_error_not_a_panic() {
        let big = Decimal::MAX / Decimal::TWO + Decimal::ONE;
        assert!(matches!(checked_sum([big, big]), Err(DomainError::Validation(_))));
        assert!(matches!(checked_mul(Decimal::MAX, Decimal::TEN), Err(DomainError::Validation(_))));
        assert!(matches!(checked_sub(Decimal::MIN, Decimal::ONE), Err(DomainError::Validation(_))));
        assert_eq!(checked_sum([Decimal::ONE, Decimal::TWO]).unwrap(), Decimal::from(3));
        assert_eq!(checked_sum(std::iter::empty()).unwrap(), Decimal::ZERO);
    }
}

//! Decimal precision rules for quantities and money.
//!
//! Values are carried at 4 decimal places internally and rounded to 2 only
//! when presented.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

pub const INTERNAL_SCALE: u32 = 4;
pub const DISPLAY_SCALE: u32 = 2;

/// Round to internal precision (4 dp, half away from zero).
pub fn internal(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(INTERNAL_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round for display (2 dp, half away from zero).
pub fn display(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DISPLAY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// `quantity × unit_cost` at internal precision. Overflow is rejected.
pub fn checked_value(quantity: Decimal, unit_cost: Decimal) -> DomainResult<Decimal> {
    quantity
        .checked_mul(unit_cost)
        .map(internal)
        .ok_or_else(|| DomainError::validation(format!("value of {quantity} at {unit_cost} is out of range")))
}

/// `a + b`, rejecting overflow. `what` names the total in the error.
pub fn checked_sum(a: Decimal, b: Decimal, what: &str) -> DomainResult<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| DomainError::validation(format!("{what} out of range ({a} + {b})")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(internal(dec!(1.23455)), dec!(1.2346));
        assert_eq!(internal(dec!(-1.23455)), dec!(-1.2346));
        assert_eq!(display(dec!(10.005)), dec!(10.01));
        assert_eq!(display(dec!(3.3333)), dec!(3.33));
    }

    #[test]
    fn overflowing_arithmetic_is_a_validation_error() {
        assert_eq!(checked_value(dec!(3), dec!(1.23456)).unwrap(), dec!(3.7037));
        assert!(matches!(checked_value(Decimal::MAX, dec!(2)), Err(DomainError::Validation(_))));
        assert!(matches!(checked_sum(Decimal::MAX, dec!(1), "stock value"), Err(DomainError::Validation(_))));
        assert_eq!(checked_sum(dec!(1), dec!(2), "stock value").unwrap(), dec!(3));
    }
}

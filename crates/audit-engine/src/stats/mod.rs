//! Statistical helpers for the screening analyzers
//!
//! Quartile fences for per-category outliers, first-digit (Benford)
//! screening and a few decimal helpers shared by the consistency checks.
//!
//! # Examples
//!
//! ```
//! use audit_engine::stats::{relative_deviation, IqrFences};
//! use rust_decimal::Decimal;
//!
//! let values: Vec<Decimal> = (1..=12).map(Decimal::from).collect();
//! let fences = IqrFences::from_sorted(&values, Decimal::new(15, 1)).unwrap();
//! assert!(fences.is_outlier(Decimal::from(100)));
//!
//! assert_eq!(
//!     relative_deviation(Decimal::from(110), Decimal::from(100)),
//!     Decimal::new(1, 1)
//! );
//! ```

pub mod benford;
pub mod quartiles;

pub use benford::{first_digit, BenfordResult};
pub use quartiles::IqrFences;

use rust_decimal::Decimal;

use crate::error::AnalysisError;

/// `|value - reference| / |reference|`; a zero reference gives 0 when both
/// values are zero and 1 otherwise.
pub fn relative_deviation(value: Decimal, reference: Decimal) -> Decimal {
    if reference.is_zero() {
        return if value.is_zero() {
            Decimal::ZERO
        } else {
            Decimal::ONE
        };
    }
    match value.checked_sub(reference) {
        Some(diff) => diff
            .abs()
            .checked_div(reference.abs())
            .unwrap_or(Decimal::ONE),
        None => Decimal::ONE,
    }
}

/// Signed `(value - reference) / reference`, `None` for a zero reference
pub fn relative_change(value: Decimal, reference: Decimal) -> Option<Decimal> {
    if reference.is_zero() {
        return None;
    }
    value.checked_sub(reference)?.checked_div(reference)
}

/// Overflow-checked sum
pub fn checked_sum<I>(values: I) -> Result<Decimal, AnalysisError>
where
    I: IntoIterator<Item = Decimal>,
{
    values.into_iter().try_fold(Decimal::ZERO, |acc, v| {
        acc.checked_add(v)
            .ok_or_else(|| AnalysisError::Arithmetic(format!("sum overflow adding {}", v)))
    })
}

/// Divisible by 100 with no cents
pub fn is_round_hundred(value: Decimal) -> bool {
    value.fract().is_zero() && (value % Decimal::ONE_HUNDRED).is_zero()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_relative_deviation() {
        assert_eq!(relative_deviation(dec!(105), dec!(100)), dec!(0.05));
        assert_eq!(relative_deviation(dec!(95), dec!(100)), dec!(0.05));
        assert_eq!(relative_deviation(dec!(0), dec!(0)), dec!(0));
        assert_eq!(relative_deviation(dec!(10), dec!(0)), dec!(1));
    }

    #[test]
    fn test_relative_change() {
        assert_eq!(relative_change(dec!(70), dec!(100)), Some(dec!(-0.3)));
        assert_eq!(relative_change(dec!(150), dec!(100)), Some(dec!(0.5)));
        assert_eq!(relative_change(dec!(10), dec!(0)), None);
    }

    #[test]
    fn test_checked_sum() {
        assert_eq!(checked_sum([dec!(1.5), dec!(2.25)]).unwrap(), dec!(3.75));
        assert!(checked_sum([Decimal::MAX, Decimal::ONE]).is_err());
    }

    #[test]
    fn test_round_hundred() {
        assert!(is_round_hundred(dec!(300)));
        assert!(is_round_hundred(dec!(1200.00)));
        assert!(!is_round_hundred(dec!(300.50)));
        assert!(!is_round_hundred(dec!(250)));
    }
}

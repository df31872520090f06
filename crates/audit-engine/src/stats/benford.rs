//! First-digit (Benford) screening.
//!
//! Compares the leading-digit distribution of a sample with
//! `P(d) = log10(1 + 1/d)` using a chi-square statistic (8 degrees of
//! freedom). A high statistic only says the sample deserves a closer look.

use rust_decimal::Decimal;

/// Leading non-zero digit of `value`, ignoring sign
pub fn first_digit(value: Decimal) -> Option<u8> {
    if value.is_zero() {
        return None;
    }
    value
        .abs()
        .to_string()
        .chars()
        .find(|c| ('1'..='9').contains(c))
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
}

/// Theoretical share of leading digit `digit` (1-9)
pub fn expected_share(digit: u8) -> f64 {
    (1.0 + 1.0 / f64::from(digit)).log10()
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenfordResult {
    /// Number of values with a leading digit
    pub n: usize,
    /// Occurrences of digits 1..=9
    pub counts: [usize; 9],
    pub chi_square: f64,
}

impl BenfordResult {
    /// `None` when no value has a leading digit
    pub fn from_values<I>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = Decimal>,
    {
        let mut counts = [0usize; 9];
        for digit in values.into_iter().filter_map(first_digit) {
            counts[usize::from(digit - 1)] += 1;
        }
        let n: usize = counts.iter().sum();
        if n == 0 {
            return None;
        }

        let total = n as f64;
        let chi_square = (1..=9u8)
            .map(|d| {
                let observed = counts[usize::from(d - 1)] as f64;
                let expected = expected_share(d) * total;
                (observed - expected).powi(2) / expected
            })
            .sum();

        Some(Self {
            n,
            counts,
            chi_square,
        })
    }

    pub fn observed_share(&self, digit: u8) -> f64 {
        self.counts[usize::from(digit - 1)] as f64 / self.n as f64
    }

    pub fn exceeds(&self, critical_value: f64) -> bool {
        self.chi_square > critical_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_first_digit() {
        assert_eq!(first_digit(dec!(123.45)), Some(1));
        assert_eq!(first_digit(dec!(0.0045)), Some(4));
        assert_eq!(first_digit(dec!(-987)), Some(9));
        assert_eq!(first_digit(dec!(0)), None);
    }

    #[test]
    fn test_expected_shares_sum_to_one() {
        let total: f64 = (1..=9).map(expected_share).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((expected_share(1) - 0.30103).abs() < 1e-5);
    }

    #[test]
    fn test_benford_like_sample_passes() {
        // Geometric growth follows Benford closely
        let mut values = Vec::new();
        let mut v = 1.0f64;
        for _ in 0..500 {
            values.push(Decimal::from_f64_retain(v).unwrap_or_default().round_dp(2));
            v *= 1.07;
            if v > 1_000_000.0 {
                v /= 1_000_000.0;
            }
        }
        let result = BenfordResult::from_values(values).unwrap();
        assert!(!result.exceeds(15.51), "chi2 = {}", result.chi_square);
    }

    #[test]
    fn test_uniform_nines_fail() {
        let values = vec![dec!(950); 60];
        let result = BenfordResult::from_values(values).unwrap();
        assert_eq!(result.counts[8], 60);
        assert_eq!(result.observed_share(9), 1.0);
        assert!(result.exceeds(15.51));
    }

    #[test]
    fn test_no_digits() {
        assert!(BenfordResult::from_values(vec![Decimal::ZERO]).is_none());
    }
}

//! Index-based quartiles and IQR fences.
//!
//! Quartiles are read directly at `n / 4` and `3n / 4` of the sorted sample,
//! without interpolation.

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IqrFences {
    /// First quartile, `sorted[n / 4]`
    pub q1: Decimal,
    /// Third quartile, `sorted[3n / 4]`
    pub q3: Decimal,
    pub iqr: Decimal,
    /// `q1 - factor * iqr`
    pub lower: Decimal,
    /// `q3 + factor * iqr`
    pub upper: Decimal,
}

impl IqrFences {
    /// Compute fences from an ascending sample.
    ///
    /// # Arguments
    ///
    /// * `sorted` - Values in ascending order
    /// * `factor` - Fence width in IQR units (1.5 for the usual rule)
    ///
    /// # Returns
    ///
    /// * `None` - If the sample is empty or the fences overflow
    pub fn from_sorted(sorted: &[Decimal], factor: Decimal) -> Option<Self> {
        let n = sorted.len();
        if n == 0 {
            return None;
        }
        let q1 = sorted[n / 4];
        let q3 = sorted[(3 * n / 4).min(n - 1)];
        let iqr = q3.checked_sub(q1)?;
        let width = iqr.checked_mul(factor)?;

        Some(Self {
            q1,
            q3,
            iqr,
            lower: q1.checked_sub(width)?,
            upper: q3.checked_add(width)?,
        })
    }

    pub fn is_outlier(&self, value: Decimal) -> bool {
        value < self.lower || value > self.upper
    }
}

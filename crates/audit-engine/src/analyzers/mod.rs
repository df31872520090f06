//! The three analyzers run by [`crate::AuditEngine`].
//!
//! Each one is a stateless function of the declaration list. They never
//! mutate their input and only communicate through the findings they return.

pub mod conformance;
pub mod consistency;
pub mod patterns;

pub use conformance::ConformanceAnalyzer;
pub use consistency::ConsistencyAnalyzer;
pub use patterns::PatternAnalyzer;

use audit_types::{Declaration, Finding};
use rust_decimal::Decimal;

use crate::error::AnalysisError;

pub trait Analyzer: Send + Sync {
    /// Stable name, copied into `Finding::detected_by`
    fn name(&self) -> &'static str;

    fn analyze(&self, declarations: &[Declaration]) -> Result<Vec<Finding>, AnalysisError>;
}

/// Decimal without trailing zeros, for finding text
pub(crate) fn fmt_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Amount with two decimals
pub(crate) fn fmt_amount(value: Decimal) -> String {
    format!("{:.2}", value)
}

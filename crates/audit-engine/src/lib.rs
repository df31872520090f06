//! Payroll contribution audit.
//!
//! Three analyzers read canonical declarations and report findings:
//!
//! - [`ConformanceAnalyzer`]: each contribution line against the rate table
//!   (rates, ceilings, computed amounts, mandatory and headcount-gated
//!   categories)
//! - [`ConsistencyAnalyzer`]: totals within a document, documents of the same
//!   period against each other and consecutive periods
//! - [`PatternAnalyzer`]: corpus-wide statistical screening
//!
//! [`AuditEngine`] runs them in parallel, turns analyzer faults into degraded
//! findings, sorts the result and computes a [`Synthesis`]. The report also
//! carries a [`MultiYearOverview`] of the batch.

pub mod analyzers;
pub mod engine;
pub mod error;
pub mod history;
pub mod identifiers;
pub mod settings;
pub mod stats;
pub mod synthesis;

pub use analyzers::{Analyzer, ConformanceAnalyzer, ConsistencyAnalyzer, PatternAnalyzer};
pub use engine::{sort_findings, AuditEngine};
pub use error::{AnalysisError, SettingsError};
pub use history::MultiYearOverview;
pub use settings::AnalysisSettings;
pub use synthesis::{AuditReport, Synthesis};

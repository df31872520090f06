//! Canonical records shared by every audit component.
//!
//! Parsers (external) build [`Declaration`]s once; analyzers only read them and
//! emit [`Finding`]s. Nothing in this crate mutates a record after construction.

pub mod contribution;
pub mod declaration;
pub mod types;

pub use contribution::ContributionKind;
pub use declaration::{
    Cotisation, Declaration, DeclarationKind, DeclarationMetadata, DsnBlock, EmployeIdentity,
    Employe, Employeur, Period,
};
pub use types::{Finding, FindingCategory, Severity};

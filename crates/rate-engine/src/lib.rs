//! Regulatory rate tables and the computations derived from them.
//!
//! Tables are loaded from TOML (one per regulatory period) and never change
//! after loading. [`RateEngine`] binds a table to an entity context and
//! answers "what should this line look like" questions.

pub mod catalog;
pub mod engine;
pub mod error;
pub mod table;

pub use catalog::RateCatalog;
pub use engine::{round_cents, EntityContext, Expectation, RateEngine};
pub use error::RateTableError;
pub use table::{
    BaseRule, CategoryRule, Constants, HeadcountTier, MandatoryRule, RateSource, RateTable,
    ReducedRate,
};

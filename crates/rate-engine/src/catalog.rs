use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::RateTableError;
use crate::table::RateTable;

/// Rate tables for several regulatory periods, ordered by effective date.
///
/// Tables are immutable once loaded and handed out as `Arc` so concurrent
/// analyzers can hold them without copying.
#[derive(Debug, Clone, Default)]
pub struct RateCatalog {
    tables: Vec<Arc<RateTable>>,
}

impl RateCatalog {
    pub fn new(tables: Vec<RateTable>) -> Self {
        let mut tables: Vec<Arc<RateTable>> = tables.into_iter().map(Arc::new).collect();
        tables.sort_by_key(|t| t.effective_from);
        Self { tables }
    }

    /// Catalog holding only the compiled-in 2026 table
    pub fn embedded() -> Result<Self, RateTableError> {
        Ok(Self::new(vec![RateTable::embedded_2026()?]))
    }

    /// Load every given TOML file
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, RateTableError> {
        let tables = paths
            .iter()
            .map(RateTable::from_file)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(tables))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> &[Arc<RateTable>] {
        &self.tables
    }

    /// Table in force on `date`.
    ///
    /// Dates before the first table fall back to the earliest one; an unknown
    /// date resolves to the latest table. `None` only for an empty catalog.
    pub fn resolve(&self, date: Option<NaiveDate>) -> Option<Arc<RateTable>> {
        let table = match date {
            Some(date) => self
                .tables
                .iter()
                .rev()
                .find(|t| t.effective_from <= date)
                .or_else(|| self.tables.first()),
            None => self.tables.last(),
        };
        table.cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table(year: i32, pass: rust_decimal::Decimal) -> RateTable {
        let mut t = RateTable::embedded_2026().unwrap();
        t.year = year;
        t.effective_from = NaiveDate::from_ymd_opt(year, 1, 1).unwrap();
        t.constants.pass_monthly = pass;
        t
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_resolve_by_effective_date() {
        let catalog = RateCatalog::new(vec![table(2026, dec!(4005)), table(2025, dec!(3925))]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.resolve(date(2025, 6, 1)).unwrap().year, 2025);
        assert_eq!(catalog.resolve(date(2026, 1, 1)).unwrap().year, 2026);
        assert_eq!(catalog.resolve(date(2027, 3, 1)).unwrap().year, 2026);
    }

    #[test]
    fn test_resolve_fallbacks() {
        let catalog = RateCatalog::new(vec![table(2025, dec!(3925)), table(2026, dec!(4005))]);
        assert_eq!(catalog.resolve(date(2020, 1, 1)).unwrap().year, 2025);
        assert_eq!(catalog.resolve(None).unwrap().year, 2026);
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = RateCatalog::default();
        assert!(catalog.is_empty());
        assert!(catalog.resolve(None).is_none());
    }

    #[test]
    fn test_embedded_catalog() {
        let catalog = RateCatalog::embedded().unwrap();
        assert_eq!(catalog.resolve(date(2026, 5, 1)).unwrap().constants.pass_monthly, dec!(4005.00));
    }
}

//! Effective-dated regulatory rate tables
//!
//! A table is a plain TOML document: yearly constants, one rule per
//! contribution category and the list of categories every payroll document
//! is expected to carry. Decimal values are written as strings so that no
//! binary floating point is involved.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use audit_types::{ContributionKind, Severity};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::RateTableError;

/// Embedded 2026 general-regime table
pub const TABLE_2026: &str = include_str!("../tables/2026.toml");

/// A complete rate table for one regulatory period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateTable {
    pub year: i32,
    /// First day the table applies to
    pub effective_from: NaiveDate,
    pub constants: Constants,
    pub categories: BTreeMap<ContributionKind, CategoryRule>,
    pub mandatory: Vec<MandatoryRule>,
}

/// Yearly reference amounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constants {
    /// Monthly social security ceiling (PASS)
    pub pass_monthly: Decimal,
    pub pass_annual: Decimal,
    /// Monthly gross minimum wage (SMIC)
    pub smic_monthly: Decimal,
    /// RGDU eligibility ceiling as a multiple of the annual SMIC
    pub rgdu_smic_multiple: Decimal,
    pub rgdu_max_under_50: Decimal,
    pub rgdu_max_50_plus: Decimal,
    pub rgdu_divisor: Decimal,
    #[serde(default = "default_rgdu_headcount_threshold")]
    pub rgdu_headcount_threshold: u32,
    /// Work accident rate used when the entity rate is unknown
    pub default_incident_rate: Decimal,
}

fn default_rgdu_headcount_threshold() -> u32 {
    50
}

impl Constants {
    pub fn smic_annual(&self) -> Decimal {
        self.smic_monthly * Decimal::from(12)
    }
}

/// How the assessed base is derived from the gross base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BaseRule {
    /// Whole gross salary
    #[default]
    Total,
    /// Gross capped at `pass_multiple` times the monthly ceiling
    Capped { pass_multiple: Decimal },
    /// Fixed share of gross, rounded half-up to cents
    Percentage { ratio: Decimal },
    /// Portion of gross above `floor_multiple` and up to `ceiling_multiple`
    /// times the monthly ceiling
    Tranche {
        floor_multiple: Decimal,
        ceiling_multiple: Decimal,
    },
}

/// Where the expected employer rate comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    #[default]
    Fixed,
    /// Entity-specific work accident rate, else the table default
    EntityIncidentRate,
    /// Rate voted by the local mobility authority
    EntityTransitRate,
    /// Employee rate only applies under the Alsace-Moselle regime
    LocalRegime,
}

/// Reduced employer rate below a SMIC multiple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducedRate {
    pub rate: Decimal,
    pub smic_multiple: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadcountTier {
    pub min_headcount: u32,
    pub employer_rate: Decimal,
    /// Overrides the category base for this tier
    #[serde(default)]
    pub base: Option<BaseRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryRule {
    pub employer_rate: Option<Decimal>,
    pub employee_rate: Option<Decimal>,
    pub reduced: Option<ReducedRate>,
    /// Sorted by ascending `min_headcount`
    pub tiers: Vec<HeadcountTier>,
    /// Below this headcount the category is not due
    pub headcount_gate: Option<u32>,
    /// Absence is reportable once the gate is met
    pub required_at_gate: bool,
    pub rate_source: RateSource,
    pub base: BaseRule,
    pub legal_reference: Option<String>,
}

impl CategoryRule {
    /// Tier with the greatest `min_headcount` not above `headcount`
    pub fn tier_for(&self, headcount: u32) -> Option<&HeadcountTier> {
        self.tiers
            .iter()
            .rev()
            .find(|t| t.min_headcount <= headcount)
    }

    /// Base rule after tier overrides
    pub fn base_for(&self, headcount: u32) -> BaseRule {
        self.tier_for(headcount)
            .and_then(|t| t.base)
            .unwrap_or(self.base)
    }

    pub fn is_gated(&self) -> bool {
        self.headcount_gate.is_some()
    }
}

/// A category every payroll document should carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MandatoryRule {
    pub kind: ContributionKind,
    pub severity: Severity,
    /// Labels under which this category is commonly merged
    #[serde(default)]
    pub merged_into: Vec<ContributionKind>,
}

/// On-disk layout. Category keys stay strings so that a table written for a
/// newer release with extra categories still loads.
#[derive(Deserialize)]
struct RateTableFile {
    year: i32,
    effective_from: NaiveDate,
    constants: Constants,
    #[serde(default)]
    categories: BTreeMap<String, CategoryRule>,
    #[serde(default)]
    mandatory: Vec<MandatoryRule>,
}

impl RateTable {
    /// Load and validate a table from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RateTableError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| RateTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a table from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self, RateTableError> {
        let file: RateTableFile = toml::from_str(s)?;

        let mut categories = BTreeMap::new();
        for (name, rule) in file.categories {
            match ContributionKind::from_name(&name) {
                Some(kind) => {
                    categories.insert(kind, rule);
                }
                None => {
                    tracing::warn!(category = %name, year = file.year, "Ignoring unknown category in rate table");
                }
            }
        }

        let table = Self {
            year: file.year,
            effective_from: file.effective_from,
            constants: file.constants,
            categories,
            mandatory: file.mandatory,
        };
        table.validate()?;
        Ok(table)
    }

    /// The 2026 general-regime table compiled into the binary
    pub fn embedded_2026() -> Result<Self, RateTableError> {
        Self::from_toml_str(TABLE_2026)
    }

    pub fn rule(&self, kind: ContributionKind) -> Option<&CategoryRule> {
        self.categories.get(&kind)
    }

    /// Reject tables that would produce meaningless expectations
    pub fn validate(&self) -> Result<(), RateTableError> {
        let c = &self.constants;
        for (name, value) in [
            ("pass_monthly", c.pass_monthly),
            ("pass_annual", c.pass_annual),
            ("smic_monthly", c.smic_monthly),
            ("rgdu_smic_multiple", c.rgdu_smic_multiple),
            ("rgdu_divisor", c.rgdu_divisor),
        ] {
            if value <= Decimal::ZERO {
                return Err(RateTableError::Invalid(format!(
                    "constant {} must be positive, got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("rgdu_max_under_50", c.rgdu_max_under_50),
            ("rgdu_max_50_plus", c.rgdu_max_50_plus),
            ("default_incident_rate", c.default_incident_rate),
        ] {
            check_rate(name, value)?;
        }

        for (kind, rule) in &self.categories {
            let label = kind.as_str();
            if let Some(rate) = rule.employer_rate {
                check_rate(label, rate)?;
            }
            if let Some(rate) = rule.employee_rate {
                check_rate(label, rate)?;
            }
            if let Some(reduced) = &rule.reduced {
                check_rate(label, reduced.rate)?;
                if reduced.smic_multiple <= Decimal::ZERO {
                    return Err(RateTableError::Invalid(format!(
                        "{}: reduced-rate SMIC multiple must be positive",
                        label
                    )));
                }
            }
            for pair in rule.tiers.windows(2) {
                if pair[0].min_headcount >= pair[1].min_headcount {
                    return Err(RateTableError::Invalid(format!(
                        "{}: headcount tiers must be sorted and distinct",
                        label
                    )));
                }
            }
            for tier in &rule.tiers {
                check_rate(label, tier.employer_rate)?;
                if let Some(base) = &tier.base {
                    check_base(label, base)?;
                }
            }
            check_base(label, &rule.base)?;
        }
        Ok(())
    }
}

fn check_rate(label: &str, rate: Decimal) -> Result<(), RateTableError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE {
        return Err(RateTableError::Invalid(format!(
            "{}: rate {} outside [0, 1]",
            label, rate
        )));
    }
    Ok(())
}

fn check_base(label: &str, base: &BaseRule) -> Result<(), RateTableError> {
    match *base {
        BaseRule::Total => Ok(()),
        BaseRule::Capped { pass_multiple } if pass_multiple <= Decimal::ZERO => Err(
            RateTableError::Invalid(format!("{}: ceiling multiple must be positive", label)),
        ),
        BaseRule::Percentage { ratio } if ratio <= Decimal::ZERO || ratio > Decimal::ONE => {
            Err(RateTableError::Invalid(format!(
                "{}: base ratio {} outside (0, 1]",
                label, ratio
            )))
        }
        BaseRule::Tranche {
            floor_multiple,
            ceiling_multiple,
        } if floor_multiple < Decimal::ZERO || ceiling_multiple <= floor_multiple => {
            Err(RateTableError::Invalid(format!(
                "{}: tranche ceiling must exceed its floor",
                label
            )))
        }
        _ => Ok(()),
    }
}

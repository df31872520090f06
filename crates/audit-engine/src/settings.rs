//! Analysis thresholds
//!
//! Every tolerance and screening threshold used by the analyzers lives here so
//! that an audit team can tune them from a TOML file. Missing keys fall back
//! to the defaults below.

use std::fs;
use std::path::Path;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    // === Tolerances ===
    /// Absolute monetary tolerance
    #[serde(default = "default_amount_tolerance")]
    pub amount_tolerance: Decimal,

    /// Absolute rate tolerance. A deviation equal to it is accepted.
    #[serde(default = "default_rate_tolerance")]
    pub rate_tolerance: Decimal,

    /// Relative tolerance for totals compared across documents
    #[serde(default = "default_relative_tolerance")]
    pub relative_tolerance: Decimal,

    /// Rate mismatches with a larger impact are reported as high
    #[serde(default = "default_impact_high_threshold")]
    pub impact_high_threshold: Decimal,

    // === Per-document consistency ===
    /// Declared mass above this multiple of the largest line base is flagged
    #[serde(default = "default_mass_ratio_threshold")]
    pub mass_ratio_threshold: Decimal,

    #[serde(default = "default_headcount_gap_high")]
    pub headcount_gap_high: u32,

    /// Smallest category group checked for a line that totals the others
    #[serde(default = "default_double_count_min_lines")]
    pub double_count_min_lines: usize,

    #[serde(default = "default_max_listed_identifiers")]
    pub max_listed_identifiers: usize,

    // === Sequential periods ===
    #[serde(default = "default_mass_swing_threshold")]
    pub mass_swing_threshold: Decimal,

    #[serde(default = "default_headcount_swing_threshold")]
    pub headcount_swing_threshold: Decimal,

    #[serde(default = "default_headcount_swing_min_persons")]
    pub headcount_swing_min_persons: u32,

    // === Calendar years ===
    /// Relative mass drop between two years reported as high
    #[serde(default = "default_year_mass_drop_threshold")]
    pub year_mass_drop_threshold: Decimal,

    #[serde(default = "default_year_mass_rise_threshold")]
    pub year_mass_rise_threshold: Decimal,

    #[serde(default = "default_year_headcount_drop_threshold")]
    pub year_headcount_drop_threshold: Decimal,

    #[serde(default = "default_year_salary_drop_threshold")]
    pub year_salary_drop_threshold: Decimal,

    /// Relative gap between payslip and DSN mass of one year
    #[serde(default = "default_dsn_payslip_gap_threshold")]
    pub dsn_payslip_gap_threshold: Decimal,

    /// Above this gap the finding is medium instead of low
    #[serde(default = "default_dsn_payslip_gap_medium")]
    pub dsn_payslip_gap_medium: Decimal,

    // === Statistical screening ===
    #[serde(default = "default_round_number_ratio")]
    pub round_number_ratio: Decimal,

    #[serde(default = "default_round_number_min_samples")]
    pub round_number_min_samples: usize,

    #[serde(default = "default_benford_min_samples")]
    pub benford_min_samples: usize,

    /// Chi-square critical value, 8 degrees of freedom at 5 %
    #[serde(default = "default_benford_critical_value")]
    pub benford_critical_value: f64,

    #[serde(default = "default_iqr_factor")]
    pub iqr_factor: Decimal,

    #[serde(default = "default_iqr_min_samples")]
    pub iqr_min_samples: usize,

    #[serde(default = "default_max_outliers_per_kind")]
    pub max_outliers_per_kind: usize,
}

fn default_amount_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn default_rate_tolerance() -> Decimal {
    Decimal::new(1, 4)
}

fn default_relative_tolerance() -> Decimal {
    Decimal::new(5, 3)
}

fn default_impact_high_threshold() -> Decimal {
    Decimal::new(100, 0)
}

fn default_mass_ratio_threshold() -> Decimal {
    Decimal::new(15, 1)
}

fn default_headcount_gap_high() -> u32 {
    5
}

fn default_double_count_min_lines() -> usize {
    3
}

fn default_max_listed_identifiers() -> usize {
    10
}

fn default_mass_swing_threshold() -> Decimal {
    Decimal::new(5, 1)
}

fn default_headcount_swing_threshold() -> Decimal {
    Decimal::new(3, 1)
}

fn default_headcount_swing_min_persons() -> u32 {
    3
}

fn default_year_mass_drop_threshold() -> Decimal {
    Decimal::new(30, 2)
}

fn default_year_mass_rise_threshold() -> Decimal {
    Decimal::new(50, 2)
}

fn default_year_headcount_drop_threshold() -> Decimal {
    Decimal::new(20, 2)
}

fn default_year_salary_drop_threshold() -> Decimal {
    Decimal::new(15, 2)
}

fn default_dsn_payslip_gap_threshold() -> Decimal {
    Decimal::new(5, 2)
}

fn default_dsn_payslip_gap_medium() -> Decimal {
    Decimal::new(10, 2)
}

fn default_round_number_ratio() -> Decimal {
    Decimal::new(30, 2)
}

fn default_round_number_min_samples() -> usize {
    10
}

fn default_benford_min_samples() -> usize {
    50
}

fn default_benford_critical_value() -> f64 {
    15.51
}

fn default_iqr_factor() -> Decimal {
    Decimal::new(15, 1)
}

fn default_iqr_min_samples() -> usize {
    10
}

fn default_max_outliers_per_kind() -> usize {
    5
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            amount_tolerance: default_amount_tolerance(),
            rate_tolerance: default_rate_tolerance(),
            relative_tolerance: default_relative_tolerance(),
            impact_high_threshold: default_impact_high_threshold(),
            mass_ratio_threshold: default_mass_ratio_threshold(),
            headcount_gap_high: default_headcount_gap_high(),
            double_count_min_lines: default_double_count_min_lines(),
            max_listed_identifiers: default_max_listed_identifiers(),
            mass_swing_threshold: default_mass_swing_threshold(),
            headcount_swing_threshold: default_headcount_swing_threshold(),
            headcount_swing_min_persons: default_headcount_swing_min_persons(),
            year_mass_drop_threshold: default_year_mass_drop_threshold(),
            year_mass_rise_threshold: default_year_mass_rise_threshold(),
            year_headcount_drop_threshold: default_year_headcount_drop_threshold(),
            year_salary_drop_threshold: default_year_salary_drop_threshold(),
            dsn_payslip_gap_threshold: default_dsn_payslip_gap_threshold(),
            dsn_payslip_gap_medium: default_dsn_payslip_gap_medium(),
            round_number_ratio: default_round_number_ratio(),
            round_number_min_samples: default_round_number_min_samples(),
            benford_min_samples: default_benford_min_samples(),
            benford_critical_value: default_benford_critical_value(),
            iqr_factor: default_iqr_factor(),
            iqr_min_samples: default_iqr_min_samples(),
            max_outliers_per_kind: default_max_outliers_per_kind(),
        }
    }
}

impl AnalysisSettings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(s)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for (name, value) in [
            ("amount_tolerance", self.amount_tolerance),
            ("rate_tolerance", self.rate_tolerance),
            ("relative_tolerance", self.relative_tolerance),
            ("iqr_factor", self.iqr_factor),
            ("year_mass_drop_threshold", self.year_mass_drop_threshold),
            ("year_mass_rise_threshold", self.year_mass_rise_threshold),
            ("year_headcount_drop_threshold", self.year_headcount_drop_threshold),
            ("year_salary_drop_threshold", self.year_salary_drop_threshold),
            ("dsn_payslip_gap_threshold", self.dsn_payslip_gap_threshold),
            ("dsn_payslip_gap_medium", self.dsn_payslip_gap_medium),
        ] {
            if value < Decimal::ZERO {
                return Err(SettingsError::Invalid(format!(
                    "{} must not be negative, got {}",
                    name, value
                )));
            }
        }
        if self.double_count_min_lines < 3 {
            return Err(SettingsError::Invalid(
                "double_count_min_lines must be at least 3".to_string(),
            ));
        }
        if !self.benford_critical_value.is_finite() || self.benford_critical_value <= 0.0 {
            return Err(SettingsError::Invalid(
                "benford_critical_value must be a positive number".to_string(),
            ));
        }
        Ok(())
    }
}

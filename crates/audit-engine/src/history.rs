//! Multi-year view of a batch
//!
//! Declarations are folded into one summary per calendar year. The overview
//! built on those summaries carries the trends, the coverage of the
//! limitation windows and the headcount thresholds crossed. Year-over-year
//! anomalies are reported as findings by the consistency analyzer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use audit_types::{Declaration, DeclarationKind, EmployeIdentity, Employe};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AnalysisError;
use crate::stats::{checked_sum, relative_change};

/// Limitation windows checked for coverage: years back from the latest year
const WINDOWS: [(i32, &str); 2] = [(5, "CT art. L8224-1"), (3, "CSS art. L244-3")];

/// Headcounts that bring new obligations
const HEADCOUNT_THRESHOLDS: [(u32, &str); 4] = [
    (11, "works council (CSE)"),
    (20, "construction effort contribution (PEEC)"),
    (50, "uncapped FNAL rate"),
    (250, "additional apprenticeship contribution (CSA)"),
];

/// Aggregates of one calendar year
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: i32,
    /// Sum over periods of the mass of the document kind declaring the most
    pub payroll_mass: Decimal,
    /// Largest headcount of any period
    pub headcount: u32,
    pub employer_contributions: Decimal,
    pub employee_contributions: Decimal,
    /// Mass declared on payslips
    pub payslip_mass: Decimal,
    /// Mass declared in nominal declarations
    pub dsn_mass: Decimal,
    pub documents: Vec<String>,
}

impl YearSummary {
    pub fn average_salary(&self) -> Option<Decimal> {
        if self.headcount == 0 || self.payroll_mass <= Decimal::ZERO {
            return None;
        }
        self.payroll_mass.checked_div(Decimal::from(self.headcount))
    }

    /// Employer contributions as a percentage of the mass, two decimals
    pub fn employer_charge_rate(&self) -> Option<Decimal> {
        if self.payroll_mass <= Decimal::ZERO || self.employer_contributions <= Decimal::ZERO {
            return None;
        }
        self.employer_contributions
            .checked_div(self.payroll_mass)?
            .checked_mul(Decimal::ONE_HUNDRED)
            .map(|r| r.round_dp(2))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    PayrollMass,
    Headcount,
    EmployerChargeRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Rising,
    Stable,
    Falling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    pub indicator: Indicator,
    pub first_year: i32,
    pub last_year: i32,
    pub first_value: Decimal,
    pub last_value: Decimal,
    /// Percent for mass and headcount, percentage points for the charge rate
    pub variation: Decimal,
    pub annual_variation: Decimal,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowCoverage {
    pub years_back: i32,
    pub required: Vec<i32>,
    pub missing: Vec<i32>,
    /// Percent, one decimal
    pub coverage_pct: Decimal,
    pub legal_reference: String,
}

impl WindowCoverage {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub years: Vec<i32>,
    /// Latest year with data. Every window ends there.
    pub reference_year: i32,
    pub windows: Vec<WindowCoverage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiYearOverview {
    pub years: Vec<YearSummary>,
    pub trends: Vec<Trend>,
    pub coverage: Option<Coverage>,
    pub recommendations: Vec<String>,
}

impl MultiYearOverview {
    pub fn from_declarations(declarations: &[Declaration]) -> Result<Self, AnalysisError> {
        Ok(Self::from_years(summarize_years(declarations)?))
    }

    pub fn from_years(years: Vec<YearSummary>) -> Self {
        let trends = trends(&years);
        let coverage = coverage(&years);
        let recommendations = recommendations(coverage.as_ref(), &trends);
        Self {
            years,
            trends,
            coverage,
            recommendations,
        }
    }
}

#[derive(Debug, Default)]
struct KindTotals {
    mass: Decimal,
    employer: Decimal,
    employee: Decimal,
}

#[derive(Debug, Default)]
struct PeriodTotals<'a> {
    by_kind: HashMap<DeclarationKind, KindTotals>,
    declared_headcount: u32,
    identities: BTreeSet<EmployeIdentity>,
    documents: BTreeSet<&'a str>,
}

impl PeriodTotals<'_> {
    /// Documents of one kind add up (one payslip per employee); kinds overlap
    fn largest(&self, field: impl Fn(&KindTotals) -> Decimal) -> Decimal {
        self.by_kind
            .values()
            .map(field)
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    fn headcount(&self) -> u32 {
        let identified = u32::try_from(self.identities.len()).unwrap_or(u32::MAX);
        self.declared_headcount.max(identified)
    }
}

fn add(total: Decimal, value: Decimal, what: &str) -> Result<Decimal, AnalysisError> {
    total
        .checked_add(value)
        .ok_or_else(|| AnalysisError::Arithmetic(format!("{} sum", what)))
}

/// One summary per calendar year with dated declarations, in year order
pub fn summarize_years(declarations: &[Declaration]) -> Result<Vec<YearSummary>, AnalysisError> {
    let mut periods: BTreeMap<(NaiveDate, NaiveDate), PeriodTotals<'_>> = BTreeMap::new();
    for decl in declarations {
        let Some(period) = decl.period else {
            continue;
        };
        let totals = periods.entry(period.key()).or_default();
        let kind = totals.by_kind.entry(decl.kind).or_default();
        kind.mass = add(kind.mass, decl.declared_payroll_mass, "payroll mass")?;
        kind.employer = add(
            kind.employer,
            checked_sum(decl.cotisations.iter().map(|c| c.employer_amount))?,
            "employer contributions",
        )?;
        kind.employee = add(
            kind.employee,
            checked_sum(decl.cotisations.iter().map(|c| c.employee_amount))?,
            "employee contributions",
        )?;
        totals.declared_headcount = totals.declared_headcount.max(decl.declared_headcount);
        totals
            .identities
            .extend(decl.employes.iter().map(Employe::identity));
        totals.documents.insert(decl.source_document_id.as_str());
    }

    let mut years: BTreeMap<i32, YearSummary> = BTreeMap::new();
    for ((start, _), totals) in &periods {
        let year = years.entry(start.year()).or_insert_with(|| YearSummary {
            year: start.year(),
            ..Default::default()
        });
        year.payroll_mass = add(year.payroll_mass, totals.largest(|k| k.mass), "payroll mass")?;
        year.employer_contributions = add(
            year.employer_contributions,
            totals.largest(|k| k.employer),
            "employer contributions",
        )?;
        year.employee_contributions = add(
            year.employee_contributions,
            totals.largest(|k| k.employee),
            "employee contributions",
        )?;
        if let Some(k) = totals.by_kind.get(&DeclarationKind::Payslip) {
            year.payslip_mass = add(year.payslip_mass, k.mass, "payslip mass")?;
        }
        if let Some(k) = totals.by_kind.get(&DeclarationKind::Dsn) {
            year.dsn_mass = add(year.dsn_mass, k.mass, "DSN mass")?;
        }
        year.headcount = year.headcount.max(totals.headcount());
        year.documents
            .extend(totals.documents.iter().filter(|d| !d.is_empty()).map(|d| d.to_string()));
    }

    let summaries: Vec<YearSummary> = years
        .into_values()
        .map(|mut y| {
            y.documents.sort();
            y.documents.dedup();
            y
        })
        .collect();
    debug!(periods = periods.len(), years = summaries.len(), "Summarized years");
    Ok(summaries)
}

/// Mass, headcount and employer charge rate from the first to the last year
/// where each is known. Needs two distinct years.
pub fn trends(years: &[YearSummary]) -> Vec<Trend> {
    let masses: Vec<(i32, Decimal)> = years
        .iter()
        .filter(|y| y.payroll_mass > Decimal::ZERO)
        .map(|y| (y.year, y.payroll_mass))
        .collect();
    let headcounts: Vec<(i32, Decimal)> = years
        .iter()
        .filter(|y| y.headcount > 0)
        .map(|y| (y.year, Decimal::from(y.headcount)))
        .collect();
    let rates: Vec<(i32, Decimal)> = years
        .iter()
        .filter_map(|y| y.employer_charge_rate().map(|r| (y.year, r)))
        .collect();

    [
        (Indicator::PayrollMass, masses),
        (Indicator::Headcount, headcounts),
        (Indicator::EmployerChargeRate, rates),
    ]
    .into_iter()
    .filter_map(|(indicator, points)| trend(indicator, &points))
    .collect()
}

fn trend(indicator: Indicator, points: &[(i32, Decimal)]) -> Option<Trend> {
    let (&(first_year, first_value), &(last_year, last_value)) = (points.first()?, points.last()?);
    let span = last_year - first_year;
    if span <= 0 {
        return None;
    }

    let variation = match indicator {
        Indicator::EmployerChargeRate => last_value.checked_sub(first_value)?,
        Indicator::PayrollMass | Indicator::Headcount => {
            relative_change(last_value, first_value)?.checked_mul(Decimal::ONE_HUNDRED)?
        }
    };
    let annual_variation = variation.checked_div(Decimal::from(span))?;

    // Mass is judged per year, the others over the whole range
    let (measured, limit) = match indicator {
        Indicator::PayrollMass => (annual_variation, Decimal::TWO),
        Indicator::Headcount => (variation, Decimal::TEN),
        Indicator::EmployerChargeRate => (variation, Decimal::ONE),
    };
    let direction = if measured > limit {
        TrendDirection::Rising
    } else if measured < -limit {
        TrendDirection::Falling
    } else {
        TrendDirection::Stable
    };

    Some(Trend {
        indicator,
        first_year,
        last_year,
        first_value,
        last_value,
        variation: variation.round_dp(2),
        annual_variation: annual_variation.round_dp(2),
        direction,
    })
}

/// Years present in each limitation window ending at the latest year
pub fn coverage(years: &[YearSummary]) -> Option<Coverage> {
    let present: BTreeSet<i32> = years.iter().map(|y| y.year).collect();
    let reference_year = *present.last()?;

    let windows = WINDOWS
        .iter()
        .map(|&(years_back, legal_reference)| {
            let required: Vec<i32> = (reference_year - years_back..=reference_year).collect();
            let missing: Vec<i32> = required
                .iter()
                .copied()
                .filter(|y| !present.contains(y))
                .collect();
            let covered = Decimal::from(required.len() - missing.len());
            let coverage_pct = (covered * Decimal::ONE_HUNDRED / Decimal::from(required.len()))
                .round_dp(1);
            WindowCoverage {
                years_back,
                required,
                missing,
                coverage_pct,
                legal_reference: legal_reference.to_string(),
            }
        })
        .collect();

    Some(Coverage {
        years: present.into_iter().collect(),
        reference_year,
        windows,
    })
}

fn recommendations(coverage: Option<&Coverage>, trends: &[Trend]) -> Vec<String> {
    let mut out = Vec::new();
    for window in coverage.iter().flat_map(|c| c.windows.iter()) {
        if window.is_complete() {
            continue;
        }
        let missing: Vec<String> = window.missing.iter().map(i32::to_string).collect();
        out.push(format!(
            "Import the documents of {} to cover the {}-year limitation window ({}).",
            missing.join(", "),
            window.years_back,
            window.legal_reference
        ));
    }

    let rising_headcount = trends
        .iter()
        .find(|t| t.indicator == Indicator::Headcount && t.direction == TrendDirection::Rising);
    if let Some(t) = rising_headcount {
        for (threshold, obligation) in HEADCOUNT_THRESHOLDS {
            let threshold_value = Decimal::from(threshold);
            if t.first_value < threshold_value && threshold_value <= t.last_value {
                out.push(format!(
                    "Headcount crosses {} employees between {} and {}: check the {} obligations.",
                    threshold, t.first_year, t.last_year, obligation
                ));
            }
        }
    }
    out
}

//! Expected rates, assessed bases and the RGDU reduction
//!
//! Every lookup is a pure function of the table and the entity context.
//! Categories the table does not know return `None`: callers treat that as
//! "no assertion possible".

use audit_types::ContributionKind;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::table::{BaseRule, CategoryRule, RateSource, RateTable};

/// Round half-up (away from zero) to cents
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Entity facts that change which rate applies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityContext {
    /// Zero when unknown
    pub headcount: u32,
    /// Work accident rate. Zero when unknown.
    pub incident_rate: Decimal,
    pub transit_rate: Option<Decimal>,
    pub local_regime: bool,
}

/// Everything the table says about one category for one gross base
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expectation {
    pub employer_rate: Option<Decimal>,
    pub employee_rate: Option<Decimal>,
    pub assessed_base: Decimal,
    pub ceiling: Option<Decimal>,
}

/// Rate lookups bound to one table and one entity
#[derive(Debug, Clone, Copy)]
pub struct RateEngine<'a> {
    table: &'a RateTable,
    context: EntityContext,
}

impl<'a> RateEngine<'a> {
    pub fn new(table: &'a RateTable, context: EntityContext) -> Self {
        Self { table, context }
    }

    pub fn table(&self) -> &'a RateTable {
        self.table
    }

    pub fn context(&self) -> &EntityContext {
        &self.context
    }

    pub fn rule(&self, kind: ContributionKind) -> Option<&'a CategoryRule> {
        self.table.rule(kind)
    }

    /// Regulation employer rate for `kind` at `gross` monthly salary
    pub fn expected_employer_rate(&self, kind: ContributionKind, gross: Decimal) -> Option<Decimal> {
        let rule = self.rule(kind)?;
        let headcount = self.context.headcount;

        if let Some(gate) = rule.headcount_gate {
            // Unknown headcount: the gate cannot be evaluated
            if headcount == 0 {
                return None;
            }
            if headcount < gate {
                return Some(Decimal::ZERO);
            }
        }

        match rule.rate_source {
            RateSource::EntityIncidentRate => {
                let rate = if self.context.incident_rate > Decimal::ZERO {
                    self.context.incident_rate
                } else {
                    self.table.constants.default_incident_rate
                };
                return Some(rate);
            }
            RateSource::EntityTransitRate => return self.context.transit_rate,
            RateSource::Fixed | RateSource::LocalRegime => {}
        }

        if let Some(tier) = rule.tier_for(headcount) {
            return Some(tier.employer_rate);
        }

        if let Some(reduced) = &rule.reduced {
            let threshold = self
                .table
                .constants
                .smic_monthly
                .checked_mul(reduced.smic_multiple)?;
            if gross > Decimal::ZERO && gross <= threshold {
                return Some(reduced.rate);
            }
        }

        rule.employer_rate
    }

    pub fn expected_employee_rate(&self, kind: ContributionKind) -> Option<Decimal> {
        let rule = self.rule(kind)?;
        match rule.rate_source {
            RateSource::LocalRegime if !self.context.local_regime => Some(Decimal::ZERO),
            _ => rule.employee_rate,
        }
    }

    /// Assessed base after capping, tranche or percentage rules.
    /// `None` for unknown categories or on arithmetic overflow.
    pub fn assessed_base(&self, kind: ContributionKind, gross: Decimal) -> Option<Decimal> {
        let rule = self.rule(kind)?;
        let pass = self.table.constants.pass_monthly;

        match rule.base_for(self.context.headcount) {
            BaseRule::Total => Some(gross),
            BaseRule::Capped { pass_multiple } => {
                let ceiling = pass.checked_mul(pass_multiple)?;
                Some(gross.min(ceiling))
            }
            BaseRule::Percentage { ratio } => gross.checked_mul(ratio).map(round_cents),
            BaseRule::Tranche {
                floor_multiple,
                ceiling_multiple,
            } => {
                let floor = pass.checked_mul(floor_multiple)?;
                let ceiling = pass.checked_mul(ceiling_multiple)?;
                if gross <= floor {
                    Some(Decimal::ZERO)
                } else {
                    Some(gross.min(ceiling) - floor)
                }
            }
        }
    }

    /// Monthly ceiling of a capped category
    pub fn ceiling(&self, kind: ContributionKind) -> Option<Decimal> {
        let rule = self.rule(kind)?;
        match rule.base_for(self.context.headcount) {
            BaseRule::Capped { pass_multiple } => {
                self.table.constants.pass_monthly.checked_mul(pass_multiple)
            }
            _ => None,
        }
    }

    pub fn expectation(&self, kind: ContributionKind, gross: Decimal) -> Option<Expectation> {
        Some(Expectation {
            employer_rate: self.expected_employer_rate(kind, gross),
            employee_rate: self.expected_employee_rate(kind),
            assessed_base: self.assessed_base(kind, gross)?,
            ceiling: self.ceiling(kind),
        })
    }

    /// Assessed base times expected employer rate, half-up to cents
    pub fn expected_employer_amount(&self, kind: ContributionKind, gross: Decimal) -> Option<Decimal> {
        let base = self.assessed_base(kind, gross)?;
        let rate = self.expected_employer_rate(kind, gross)?;
        base.checked_mul(rate).map(round_cents)
    }

    pub fn expected_employee_amount(&self, kind: ContributionKind, gross: Decimal) -> Option<Decimal> {
        let base = self.assessed_base(kind, gross)?;
        let rate = self.expected_employee_rate(kind)?;
        base.checked_mul(rate).map(round_cents)
    }

    /// Annual gross at and above which no RGDU applies
    pub fn rgdu_ceiling(&self) -> Decimal {
        let c = &self.table.constants;
        c.smic_annual() * c.rgdu_smic_multiple
    }

    /// Maximum coefficient for the entity headcount
    pub fn rgdu_max_coefficient(&self) -> Decimal {
        let c = &self.table.constants;
        if self.context.headcount >= c.rgdu_headcount_threshold {
            c.rgdu_max_50_plus
        } else {
            c.rgdu_max_under_50
        }
    }

    /// RGDU coefficient for an annual gross salary:
    /// `min(T, (T / divisor) * (ceiling / gross - 1))`, zero outside `(0, ceiling)`
    pub fn rgdu_coefficient(&self, annual_gross: Decimal) -> Decimal {
        let ceiling = self.rgdu_ceiling();
        if annual_gross <= Decimal::ZERO || annual_gross >= ceiling {
            return Decimal::ZERO;
        }

        let max = self.rgdu_max_coefficient();
        let Some(slope) = max.checked_div(self.table.constants.rgdu_divisor) else {
            return Decimal::ZERO;
        };
        let Some(ratio) = ceiling.checked_div(annual_gross) else {
            return Decimal::ZERO;
        };
        slope
            .checked_mul(ratio - Decimal::ONE)
            .unwrap_or(max)
            .min(max)
    }

    /// Annual RGDU amount, half-up to cents
    pub fn rgdu_reduction(&self, annual_gross: Decimal) -> Decimal {
        let coefficient = self.rgdu_coefficient(annual_gross);
        annual_gross
            .checked_mul(coefficient)
            .map(round_cents)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn is_rgdu_eligible(&self, annual_gross: Decimal) -> bool {
        annual_gross > Decimal::ZERO && annual_gross < self.rgdu_ceiling()
    }
}

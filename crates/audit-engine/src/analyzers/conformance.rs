//! Rule conformance: each contribution line against the rate table
//!
//! Line checks run in order: negative values, employer rate, base x rate
//! arithmetic, ceiling. Declaration-level checks then look for categories a
//! payroll document should carry and for tiered categories priced at a
//! lower tier than the headcount allows.

use std::collections::BTreeSet;
use std::sync::Arc;

use audit_types::{
    ContributionKind, Cotisation, Declaration, Finding, FindingCategory, Severity,
};
use rate_engine::{round_cents, EntityContext, RateCatalog, RateEngine, RateTable};
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use super::{fmt_amount, fmt_decimal, Analyzer};
use crate::error::AnalysisError;
use crate::settings::AnalysisSettings;

const NAME: &str = "rule_conformance";

/// Lines needed before a document is checked for missing categories
const MIN_LINES_FOR_PRESENCE: usize = 3;

pub struct ConformanceAnalyzer {
    catalog: Arc<RateCatalog>,
    settings: Arc<AnalysisSettings>,
    headcount_override: Option<u32>,
}

impl ConformanceAnalyzer {
    pub fn new(catalog: Arc<RateCatalog>, settings: Arc<AnalysisSettings>) -> Self {
        Self {
            catalog,
            settings,
            headcount_override: None,
        }
    }

    /// Use `headcount` for every declaration instead of the declared figures
    pub fn with_headcount_override(mut self, headcount: Option<u32>) -> Self {
        self.headcount_override = headcount;
        self
    }

    fn entity_context(&self, decl: &Declaration) -> EntityContext {
        let headcount = self
            .headcount_override
            .unwrap_or_else(|| decl.effective_headcount());
        match &decl.employeur {
            Some(e) => EntityContext {
                headcount,
                incident_rate: e.incident_rate,
                transit_rate: e.transit_rate,
                local_regime: e.local_regime,
            },
            None => EntityContext {
                headcount,
                ..Default::default()
            },
        }
    }

    fn check_declaration(&self, decl: &Declaration, table: &RateTable) -> Vec<Finding> {
        let engine = RateEngine::new(table, self.entity_context(decl));
        let mut findings = Vec::new();

        for cotisation in &decl.cotisations {
            match self.check_line(cotisation, decl, &engine) {
                Ok(line_findings) => findings.extend(line_findings),
                Err(e) => {
                    warn!(
                        declaration = %decl.id,
                        cotisation = %cotisation.id,
                        kind = %cotisation.kind,
                        error = %e,
                        "Skipping contribution line"
                    );
                }
            }
        }

        if decl.kind.is_payroll_document() && decl.cotisations.len() >= MIN_LINES_FOR_PRESENCE {
            findings.extend(self.check_presence(decl, &engine));
            findings.extend(self.check_tier_miswiring(decl, &engine));
        } else {
            debug!(declaration = %decl.id, kind = %decl.kind, "Skipping presence checks");
        }

        findings
    }

    fn check_line(
        &self,
        c: &Cotisation,
        decl: &Declaration,
        engine: &RateEngine<'_>,
    ) -> Result<Vec<Finding>, AnalysisError> {
        let mut findings = Vec::new();
        let settings = &self.settings;
        let apprentice = decl
            .employe(&c.employe_id)
            .map(|e| e.is_apprentice())
            .unwrap_or(false);
        let legal_reference = engine
            .rule(c.kind)
            .and_then(|r| r.legal_reference.clone());

        // 1. Negative values
        if c.gross_base < Decimal::ZERO {
            findings.push(
                Finding::new(
                    FindingCategory::Anomaly,
                    Severity::High,
                    format!("Negative gross base - {}", c.kind),
                    NAME,
                )
                .with_description(format!(
                    "The gross base of the {} contribution is negative: {}.",
                    c.kind, c.gross_base
                ))
                .with_expected(">= 0")
                .with_observed(c.gross_base.to_string())
                .with_impact(c.gross_base.abs())
                .with_risk_score(80)
                .with_recommendation("Check the data entry and correct the contribution base.")
                .with_documents([c.source_document_id.clone()])
                .with_legal_reference("CSS art. L242-1"),
            );
        }

        if c.employer_amount < Decimal::ZERO {
            findings.push(
                Finding::new(
                    FindingCategory::Anomaly,
                    Severity::High,
                    format!("Negative employer amount - {}", c.kind),
                    NAME,
                )
                .with_description(format!(
                    "The employer amount of the {} contribution is negative: {}.",
                    c.kind, c.employer_amount
                ))
                .with_expected(">= 0")
                .with_observed(c.employer_amount.to_string())
                .with_impact(c.employer_amount.abs())
                .with_risk_score(80)
                .with_recommendation("Check for an overpayment adjustment or a sign error.")
                .with_documents([c.source_document_id.clone()]),
            );
        }

        // 2-3. Employer rate against the table
        if !c.employer_rate.is_zero() {
            if let Some(expected) = engine.expected_employer_rate(c.kind, c.gross_base) {
                let deviation = checked(c.employer_rate.checked_sub(expected), "rate deviation")?
                    .abs();
                if deviation > settings.rate_tolerance {
                    findings.push(self.rate_mismatch(c, expected, deviation, apprentice, engine)?);
                }
            }
        }

        // 4. base x rate = amount
        if c.employer_rate > Decimal::ZERO
            && c.assessed_base > Decimal::ZERO
            && c.employer_amount > Decimal::ZERO
        {
            let computed = round_cents(checked(
                c.assessed_base.checked_mul(c.employer_rate),
                "base x rate",
            )?);
            let gap = checked(c.employer_amount.checked_sub(computed), "amount deviation")?.abs();
            if gap > settings.amount_tolerance {
                findings.push(
                    Finding::new(
                        FindingCategory::Anomaly,
                        Severity::Medium,
                        format!("Calculation error - {}", c.kind),
                        NAME,
                    )
                    .with_description(format!(
                        "The employer amount ({}) does not match assessed base x rate ({} x {} = {}). Gap: {}.",
                        c.employer_amount,
                        c.assessed_base,
                        fmt_decimal(c.employer_rate),
                        fmt_amount(computed),
                        fmt_amount(gap)
                    ))
                    .with_expected(fmt_amount(computed))
                    .with_observed(c.employer_amount.to_string())
                    .with_impact(gap)
                    .with_risk_score(60)
                    .with_recommendation("Recompute this contribution line.")
                    .with_documents([c.source_document_id.clone()]),
                );
            }
        }

        // 5. Ceiling of capped categories
        if let Some(ceiling) = engine.ceiling(c.kind) {
            let limit = checked(ceiling.checked_add(settings.amount_tolerance), "ceiling")?;
            let smic = engine.table().constants.smic_monthly;
            let exempt = apprentice && c.gross_base < smic;
            if c.assessed_base > limit && !exempt {
                let excess = c.assessed_base - ceiling;
                let impact = if c.employer_rate > Decimal::ZERO {
                    round_cents(checked(excess.checked_mul(c.employer_rate), "excess x rate")?)
                } else {
                    excess
                };
                let mut finding = Finding::new(
                    FindingCategory::ThresholdExceeded,
                    Severity::High,
                    format!("Assessed base above ceiling - {}", c.kind),
                    NAME,
                )
                .with_description(format!(
                    "The assessed base of {} ({}) exceeds the monthly ceiling ({}). Excess: {}.",
                    c.kind,
                    c.assessed_base,
                    fmt_amount(ceiling),
                    fmt_amount(excess)
                ))
                .with_expected(format!("<= {}", fmt_amount(ceiling)))
                .with_observed(c.assessed_base.to_string())
                .with_impact(impact)
                .with_risk_score(85)
                .with_recommendation("Apply the ceiling to the assessed base of this contribution.")
                .with_documents([c.source_document_id.clone()]);
                if let Some(reference) = &legal_reference {
                    finding = finding.with_legal_reference(reference.clone());
                }
                findings.push(finding);
            }
        }

        Ok(findings)
    }

    fn rate_mismatch(
        &self,
        c: &Cotisation,
        expected: Decimal,
        deviation: Decimal,
        apprentice: bool,
        engine: &RateEngine<'_>,
    ) -> Result<Finding, AnalysisError> {
        let base = if c.assessed_base > Decimal::ZERO {
            c.assessed_base
        } else {
            engine
                .assessed_base(c.kind, c.gross_base)
                .filter(|b| *b > Decimal::ZERO)
                .unwrap_or(Decimal::ZERO)
        };
        let impact = round_cents(checked(deviation.checked_mul(base), "rate impact")?);
        let legal_reference = engine
            .rule(c.kind)
            .and_then(|r| r.legal_reference.clone())
            .unwrap_or_else(|| format!("Rate table {}", engine.table().year));

        if apprentice {
            return Ok(Finding::new(
                FindingCategory::Anomaly,
                Severity::Low,
                format!("Apprentice rate differs from general rate - {}", c.kind),
                NAME,
            )
            .with_description(format!(
                "The employer rate ({}) differs from the general rate ({}) for {}. \
                 The employee is on an apprenticeship or work-study contract, which \
                 carries statutory reductions. Informational only.",
                fmt_decimal(c.employer_rate),
                fmt_decimal(expected),
                c.kind
            ))
            .with_expected(fmt_decimal(expected))
            .with_observed(fmt_decimal(c.employer_rate))
            .with_risk_score(15)
            .with_recommendation("Confirm the apprenticeship reduction that applies to this line.")
            .with_documents([c.source_document_id.clone()])
            .with_legal_reference(legal_reference));
        }

        let severity = if impact > self.settings.impact_high_threshold {
            Severity::High
        } else {
            Severity::Medium
        };
        Ok(Finding::new(
            FindingCategory::Anomaly,
            severity,
            format!("Incorrect employer rate - {}", c.kind),
            NAME,
        )
        .with_description(format!(
            "The employer rate applied ({}) differs from the regulatory rate ({}) for {}.",
            fmt_decimal(c.employer_rate),
            fmt_decimal(expected),
            c.kind
        ))
        .with_expected(fmt_decimal(expected))
        .with_observed(fmt_decimal(c.employer_rate))
        .with_impact(impact)
        .with_risk_score(70)
        .with_recommendation(format!(
            "Check the payroll software settings and make sure the {} rates are loaded.",
            engine.table().year
        ))
        .with_documents([c.source_document_id.clone()])
        .with_legal_reference(legal_reference))
    }

    fn check_presence(&self, decl: &Declaration, engine: &RateEngine<'_>) -> Vec<Finding> {
        let present: BTreeSet<ContributionKind> = decl.cotisations.iter().map(|c| c.kind).collect();
        let table = engine.table();
        let headcount = engine.context().headcount;
        let mut findings = Vec::new();

        for rule in &table.mandatory {
            if present.contains(&rule.kind) || rule.merged_into.iter().any(|k| present.contains(k)) {
                continue;
            }
            let risk = match rule.severity {
                Severity::Critical => 90,
                Severity::High => 70,
                Severity::Medium => 50,
                Severity::Low => 30,
            };
            let mut finding = Finding::new(
                FindingCategory::MissingData,
                rule.severity,
                format!("Missing mandatory contribution - {}", rule.kind),
                NAME,
            )
            .with_description(format!(
                "The {} contribution is absent from {} although every payroll document \
                 is expected to carry it.",
                rule.kind, decl.kind
            ))
            .with_expected(rule.kind.as_str())
            .with_observed("absent")
            .with_risk_score(risk)
            .with_recommendation("Check whether the contribution is declared under another label.")
            .with_documents([decl.source_document_id.clone()]);
            if let Some(reference) = table.rule(rule.kind).and_then(|r| r.legal_reference.clone()) {
                finding = finding.with_legal_reference(reference);
            }
            findings.push(finding);
        }

        if headcount == 0 {
            return findings;
        }
        for (kind, rule) in &table.categories {
            let Some(gate) = rule.headcount_gate else {
                continue;
            };
            if !rule.required_at_gate || headcount < gate || present.contains(kind) {
                continue;
            }
            let mut finding = Finding::new(
                FindingCategory::MissingData,
                Severity::High,
                format!("Missing headcount-gated contribution - {}", kind),
                NAME,
            )
            .with_description(format!(
                "The entity has {} employees, at or above the threshold of {} for {}, \
                 but the contribution is absent.",
                headcount, gate, kind
            ))
            .with_expected(format!("{} due from {} employees", kind, gate))
            .with_observed("absent")
            .with_risk_score(75)
            .with_recommendation("Declare the contribution or document why it is not due.")
            .with_documents([decl.source_document_id.clone()]);
            if let Some(reference) = &rule.legal_reference {
                finding = finding.with_legal_reference(reference.clone());
            }
            findings.push(finding);
        }

        findings
    }

    /// Tiered categories priced at a lower tier's rate
    fn check_tier_miswiring(&self, decl: &Declaration, engine: &RateEngine<'_>) -> Vec<Finding> {
        let headcount = engine.context().headcount;
        let tolerance = self.settings.rate_tolerance;
        let mut reported = BTreeSet::new();
        let mut findings = Vec::new();

        for c in &decl.cotisations {
            if c.employer_rate.is_zero() || reported.contains(&c.kind) {
                continue;
            }
            let Some(rule) = engine.rule(c.kind) else {
                continue;
            };
            let Some(applicable) = rule.tier_for(headcount) else {
                continue;
            };
            let within = |rate: Decimal| {
                rate.checked_sub(c.employer_rate)
                    .map(|d| d.abs() <= tolerance)
                    .unwrap_or(false)
            };
            if within(applicable.employer_rate) {
                continue;
            }
            let Some(lower) = rule
                .tiers
                .iter()
                .find(|t| t.min_headcount < applicable.min_headcount && within(t.employer_rate))
            else {
                continue;
            };

            reported.insert(c.kind);
            let mut finding = Finding::new(
                FindingCategory::Anomaly,
                Severity::High,
                format!("Sub-threshold rate applied - {}", c.kind),
                NAME,
            )
            .with_description(format!(
                "{} is priced at {}, the rate for entities from {} employees, while the \
                 headcount of {} requires {}.",
                c.kind,
                fmt_decimal(c.employer_rate),
                lower.min_headcount,
                headcount,
                fmt_decimal(applicable.employer_rate)
            ))
            .with_expected(fmt_decimal(applicable.employer_rate))
            .with_observed(fmt_decimal(c.employer_rate))
            .with_risk_score(75)
            .with_recommendation("Update the headcount threshold in the payroll settings.")
            .with_documents([decl.source_document_id.clone()]);
            if let Some(reference) = &rule.legal_reference {
                finding = finding.with_legal_reference(reference.clone());
            }
            findings.push(finding);
        }

        findings
    }
}

impl Analyzer for ConformanceAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(declarations = declarations.len()))]
    fn analyze(&self, declarations: &[Declaration]) -> Result<Vec<Finding>, AnalysisError> {
        if self.catalog.is_empty() {
            return Err(AnalysisError::InvalidInput("no rate table loaded".to_string()));
        }

        let mut findings = Vec::new();
        for decl in declarations {
            let Some(table) = self.catalog.resolve(decl.period.map(|p| p.start)) else {
                continue;
            };
            findings.extend(self.check_declaration(decl, &table));
        }
        Ok(findings)
    }
}

fn checked(value: Option<Decimal>, what: &str) -> Result<Decimal, AnalysisError> {
    value.ok_or_else(|| AnalysisError::Arithmetic(what.to_string()))
}

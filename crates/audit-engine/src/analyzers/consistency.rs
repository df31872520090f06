//! Consistency checks within one document and across documents
//!
//! Per document: declared totals against the detail lines. Across documents
//! of the same period: employee reconciliation by NIR, per-employee category
//! matching and aggregate totals. Across consecutive periods: large swings.
//! Across calendar years: drops in mass, headcount or average salary, and the
//! gap between the payslip and DSN mass of a year.
//! Nominal declarations (DSN) also get identifier and structure checks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use audit_types::{
    ContributionKind, Cotisation, Declaration, DsnBlock, EmployeIdentity, Employe, Finding,
    FindingCategory, Severity,
};
use chrono::NaiveDate;
use rate_engine::round_cents;
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use super::{fmt_amount, fmt_decimal, Analyzer};
use crate::error::AnalysisError;
use crate::identifiers;
use crate::settings::AnalysisSettings;
use crate::history::{self, YearSummary};
use crate::stats::{checked_sum, relative_change, relative_deviation};

const NAME: &str = "consistency";

pub struct ConsistencyAnalyzer {
    settings: Arc<AnalysisSettings>,
}

/// Contribution lines of one employee for one category in one document
#[derive(Debug, Default)]
struct LineSummary {
    employer_amount: Decimal,
    employer_rate: Option<Decimal>,
}

type EmployeeLines = BTreeMap<EmployeIdentity, BTreeMap<ContributionKind, LineSummary>>;

impl ConsistencyAnalyzer {
    pub fn new(settings: Arc<AnalysisSettings>) -> Self {
        Self { settings }
    }

    // === Per-document ===

    fn check_internal(&self, decl: &Declaration) -> Result<Vec<Finding>, AnalysisError> {
        let mut findings = Vec::new();
        findings.extend(self.check_payroll_mass(decl)?);
        findings.extend(self.check_headcount(decl));
        findings.extend(self.check_zero_amounts(decl)?);
        findings.extend(self.check_double_counts(decl)?);
        findings.extend(self.check_declared_total(decl)?);
        Ok(findings)
    }

    /// Declared mass against the largest gross base of the lines
    fn check_payroll_mass(&self, decl: &Declaration) -> Result<Option<Finding>, AnalysisError> {
        let mass = decl.declared_payroll_mass;
        if mass <= Decimal::ZERO || decl.cotisations.is_empty() {
            return Ok(None);
        }

        let Some(max_base) = decl
            .cotisations
            .iter()
            .map(|c| c.gross_base)
            .filter(|b| *b > Decimal::ZERO)
            .max()
        else {
            return Ok(None);
        };

        let threshold = max_base
            .checked_mul(self.settings.mass_ratio_threshold)
            .ok_or_else(|| AnalysisError::Arithmetic("payroll mass threshold".to_string()))?;
        if mass <= threshold {
            return Ok(None);
        }

        let gap = mass - max_base;
        Ok(Some(
            Finding::new(
                FindingCategory::Inconsistency,
                Severity::Medium,
                "Payroll mass does not match contribution bases",
                NAME,
            )
            .with_description(format!(
                "The declared payroll mass ({}) is well above the gross bases found in the \
                 contribution lines (largest: {}). Gap: {}.",
                mass,
                max_base,
                fmt_amount(gap)
            ))
            .with_expected(format!("<= {}", fmt_amount(threshold)))
            .with_observed(mass.to_string())
            .with_impact(gap)
            .with_risk_score(55)
            .with_recommendation(
                "Check that the declared payroll mass matches the contribution lines.",
            )
            .with_documents([decl.source_document_id.clone()]),
        ))
    }

    fn check_headcount(&self, decl: &Declaration) -> Option<Finding> {
        let declared = decl.declared_headcount;
        if declared == 0 || decl.employes.is_empty() {
            return None;
        }
        let identified = decl
            .employes
            .iter()
            .map(Employe::identity)
            .collect::<BTreeSet<_>>()
            .len() as u32;
        if identified == declared {
            return None;
        }

        let gap = identified.abs_diff(declared);
        let severity = if gap > self.settings.headcount_gap_high {
            Severity::High
        } else {
            Severity::Medium
        };
        Some(
            Finding::new(
                FindingCategory::Inconsistency,
                severity,
                "Declared headcount does not match identified employees",
                NAME,
            )
            .with_description(format!(
                "The declared headcount ({}) differs from the number of identified employees \
                 ({}). Gap: {}.",
                declared, identified, gap
            ))
            .with_expected(declared.to_string())
            .with_observed(identified.to_string())
            .with_risk_score(40 + (gap.saturating_mul(5)).min(50))
            .with_recommendation(
                "Check that every individual declaration is present. A gap may reveal \
                 undeclared employees.",
            )
            .with_documents([decl.source_document_id.clone()])
            .with_legal_reference("CSS art. L242-1"),
        )
    }

    /// Positive base and rate but no amount
    fn check_zero_amounts(&self, decl: &Declaration) -> Result<Vec<Finding>, AnalysisError> {
        let mut findings = Vec::new();
        for c in &decl.cotisations {
            if c.gross_base <= Decimal::ZERO
                || c.employer_rate <= Decimal::ZERO
                || !c.employer_amount.is_zero()
            {
                continue;
            }
            let base = if c.assessed_base > Decimal::ZERO {
                c.assessed_base
            } else {
                c.gross_base
            };
            let expected = base
                .checked_mul(c.employer_rate)
                .map(round_cents)
                .ok_or_else(|| AnalysisError::Arithmetic(format!("{} base x rate", c.kind)))?;

            findings.push(
                Finding::new(
                    FindingCategory::Inconsistency,
                    Severity::Medium,
                    format!("Contribution with base but no amount - {}", c.kind),
                    NAME,
                )
                .with_description(format!(
                    "The {} line has a base of {} and a rate of {} but an employer amount of 0.",
                    c.kind,
                    base,
                    fmt_decimal(c.employer_rate)
                ))
                .with_expected(fmt_amount(expected))
                .with_observed("0")
                .with_impact(expected)
                .with_risk_score(50)
                .with_recommendation("Check whether an exemption applies, otherwise correct the line.")
                .with_documents([c.source_document_id.clone()]),
            );
        }
        Ok(findings)
    }

    /// A line roughly equal to the sum of the other lines of its category
    fn check_double_counts(&self, decl: &Declaration) -> Result<Vec<Finding>, AnalysisError> {
        let mut groups: BTreeMap<ContributionKind, Vec<&Cotisation>> = BTreeMap::new();
        for c in &decl.cotisations {
            groups.entry(c.kind).or_default().push(c);
        }

        let mut findings = Vec::new();
        for (kind, lines) in groups {
            if lines.len() < self.settings.double_count_min_lines {
                continue;
            }
            let total = checked_sum(lines.iter().map(|c| c.employer_amount))?;
            for c in lines.iter().filter(|c| c.employer_amount > Decimal::ZERO) {
                let others = total - c.employer_amount;
                if others <= Decimal::ZERO {
                    continue;
                }
                let relative = others
                    .checked_mul(self.settings.relative_tolerance)
                    .unwrap_or(Decimal::MAX);
                let tolerance = self.settings.amount_tolerance.max(relative);
                if (c.employer_amount - others).abs() > tolerance {
                    continue;
                }

                findings.push(
                    Finding::new(
                        FindingCategory::Anomaly,
                        Severity::Medium,
                        format!("Possible double count - {}", kind),
                        NAME,
                    )
                    .with_description(format!(
                        "One {} line ({}) is about the sum of the {} other lines of the same \
                         category ({}). It may be a total repeated as a detail line.",
                        kind,
                        c.employer_amount,
                        lines.len() - 1,
                        fmt_amount(others)
                    ))
                    .with_expected(fmt_amount(others))
                    .with_observed(c.employer_amount.to_string())
                    .with_impact(c.employer_amount)
                    .with_risk_score(60)
                    .with_recommendation("Check whether a subtotal was imported as a contribution line.")
                    .with_documents([c.source_document_id.clone()]),
                );
            }
        }
        Ok(findings)
    }

    /// Parser-supplied total against the lines
    fn check_declared_total(&self, decl: &Declaration) -> Result<Option<Finding>, AnalysisError> {
        let Some(declared) = decl.metadata.declared_contribution_total else {
            return Ok(None);
        };
        if decl.cotisations.is_empty() {
            return Ok(None);
        }
        let computed = checked_sum(
            decl.cotisations
                .iter()
                .flat_map(|c| [c.employer_amount, c.employee_amount]),
        )?;
        let deviation = relative_deviation(computed, declared);
        if deviation <= self.settings.relative_tolerance {
            return Ok(None);
        }

        let gap = (declared - computed).abs();
        Ok(Some(
            Finding::new(
                FindingCategory::Inconsistency,
                Severity::High,
                "Declared contribution total does not match the lines",
                NAME,
            )
            .with_description(format!(
                "The document declares a contribution total of {} but its lines add up to {} \
                 ({}% apart).",
                declared,
                fmt_amount(computed),
                fmt_decimal((deviation * Decimal::ONE_HUNDRED).round_dp(1))
            ))
            .with_expected(declared.to_string())
            .with_observed(fmt_amount(computed))
            .with_impact(gap)
            .with_risk_score(70)
            .with_recommendation("Reconcile the document total with its detail lines.")
            .with_documents([decl.source_document_id.clone()]),
        ))
    }

    // === Nominal declarations ===

    fn check_nominal(&self, decl: &Declaration) -> Vec<Finding> {
        let mut findings = Vec::new();
        let doc = [decl.source_document_id.clone()];

        if let Some(employeur) = &decl.employeur {
            let siret = employeur.siret.trim();
            if !siret.is_empty() && !identifiers::is_valid_siret(siret) {
                findings.push(
                    Finding::new(
                        FindingCategory::Inconsistency,
                        Severity::High,
                        "Invalid SIRET format",
                        NAME,
                    )
                    .with_description(format!(
                        "The establishment identifier '{}' is not made of 14 digits.",
                        siret
                    ))
                    .with_expected("14 digits")
                    .with_observed(siret)
                    .with_risk_score(70)
                    .with_recommendation("Correct the establishment identifier in the declaration.")
                    .with_documents(doc.clone()),
                );
            } else if !siret.is_empty()
                && !employeur.siren.trim().is_empty()
                && !identifiers::siret_matches_siren(siret, &employeur.siren)
            {
                findings.push(
                    Finding::new(
                        FindingCategory::Inconsistency,
                        Severity::High,
                        "SIRET does not belong to the declared SIREN",
                        NAME,
                    )
                    .with_description(format!(
                        "The first nine digits of SIRET {} do not match SIREN {}.",
                        siret,
                        employeur.siren.trim()
                    ))
                    .with_expected(identifiers::compact(&employeur.siren))
                    .with_observed(identifiers::compact(siret).chars().take(9).collect::<String>())
                    .with_risk_score(75)
                    .with_recommendation("Check that the establishment belongs to the declaring entity.")
                    .with_documents(doc.clone()),
                );
            }
        }

        let present = present_blocks(decl);
        let missing: Vec<DsnBlock> = DsnBlock::REQUIRED
            .iter()
            .copied()
            .filter(|b| !present.contains(b))
            .collect();
        if !missing.is_empty() {
            let listed: Vec<String> = missing
                .iter()
                .map(|b| format!("{} ({})", b.label(), b.code()))
                .collect();
            findings.push(
                Finding::new(
                    FindingCategory::MissingData,
                    Severity::Medium,
                    "Incomplete DSN structure",
                    NAME,
                )
                .with_description(format!(
                    "The declaration lacks {} structural block(s): {}.",
                    missing.len(),
                    listed.join(", ")
                ))
                .with_expected(format!("{} blocks", DsnBlock::REQUIRED.len()))
                .with_observed(format!("{} blocks", DsnBlock::REQUIRED.len() - missing.len()))
                .with_risk_score(50)
                .with_recommendation("Check the export of the payroll software for missing blocks.")
                .with_documents(doc.clone()),
            );
        }

        let invalid_ctp: Vec<&str> = decl
            .metadata
            .ctp_codes
            .iter()
            .map(String::as_str)
            .filter(|code| !identifiers::is_valid_ctp(code))
            .collect();
        if !invalid_ctp.is_empty() {
            findings.push(
                Finding::new(
                    FindingCategory::Inconsistency,
                    Severity::Medium,
                    "Invalid CTP codes",
                    NAME,
                )
                .with_description(format!(
                    "{} contribution type code(s) do not have the 3-digit format: {}.",
                    invalid_ctp.len(),
                    invalid_ctp.join(", ")
                ))
                .with_expected("3 digits, optionally followed by a capital letter")
                .with_observed(invalid_ctp.join(", "))
                .with_risk_score(40)
                .with_recommendation("Check the contribution type codes of the aggregate blocks.")
                .with_documents(doc.clone()),
            );
        }

        if decl.employes.is_empty() {
            findings.push(
                Finding::new(
                    FindingCategory::MissingData,
                    Severity::High,
                    "DSN without employees",
                    NAME,
                )
                .with_description("The nominal declaration contains no individual.")
                .with_risk_score(70)
                .with_recommendation("Check that the declaration is complete.")
                .with_documents(doc.clone()),
            );
        }
        if decl.cotisations.is_empty() {
            findings.push(
                Finding::new(
                    FindingCategory::MissingData,
                    Severity::High,
                    "DSN without contributions",
                    NAME,
                )
                .with_description("The nominal declaration contains no contribution line.")
                .with_risk_score(70)
                .with_recommendation("Check that the declaration is complete.")
                .with_documents(doc),
            );
        }

        findings
    }

    // === Same period, several documents ===

    fn check_cross_documents(&self, declarations: &[Declaration]) -> Result<Vec<Finding>, AnalysisError> {
        let mut by_period: BTreeMap<(NaiveDate, NaiveDate), Vec<&Declaration>> = BTreeMap::new();
        for decl in declarations {
            if let Some(period) = decl.period {
                by_period.entry(period.key()).or_default().push(decl);
            }
        }

        let mut findings = Vec::new();
        for (period, decls) in by_period {
            if decls.len() < 2 {
                continue;
            }
            debug!(start = %period.0, end = %period.1, documents = decls.len(), "Comparing documents");
            for i in 0..decls.len() {
                for j in (i + 1)..decls.len() {
                    let (a, b) = (decls[i], decls[j]);
                    findings.extend(self.reconcile_nir(a, b));
                    findings.extend(self.match_categories(a, b)?);
                    findings.extend(self.compare_aggregates(a, b));
                }
            }
        }
        Ok(findings)
    }

    fn reconcile_nir(&self, a: &Declaration, b: &Declaration) -> Vec<Finding> {
        let nirs_a = nir_index(a);
        let nirs_b = nir_index(b);
        if nirs_a.is_empty() || nirs_b.is_empty() {
            return Vec::new();
        }

        let mut findings = Vec::new();
        for (from, to, from_nirs, to_nirs) in [(a, b, &nirs_a, &nirs_b), (b, a, &nirs_b, &nirs_a)] {
            let missing: Vec<&str> = from_nirs
                .keys()
                .filter(|nir| !to_nirs.contains_key(*nir))
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                continue;
            }
            let limit = self.settings.max_listed_identifiers;
            let mut listed = missing.iter().take(limit).copied().collect::<Vec<_>>().join(", ");
            if missing.len() > limit {
                listed.push_str(&format!(" and {} more", missing.len() - limit));
            }
            findings.push(
                Finding::new(
                    FindingCategory::Inconsistency,
                    Severity::High,
                    format!("Employees missing from {}", doc_label(to)),
                    NAME,
                )
                .with_description(format!(
                    "{} employee(s) of {} are absent from {} for the same period: {}.",
                    missing.len(),
                    doc_label(from),
                    doc_label(to),
                    listed
                ))
                .with_expected(format!("{} employees", from_nirs.len()))
                .with_observed(format!("{} missing", missing.len()))
                .with_risk_score(75)
                .with_recommendation("Reconcile the employee lists of both documents.")
                .with_documents([from.source_document_id.clone(), to.source_document_id.clone()]),
            );
        }

        for (nir, emp_a) in &nirs_a {
            let Some(emp_b) = nirs_b.get(nir) else {
                continue;
            };
            if normalized_name(emp_a) == normalized_name(emp_b) {
                continue;
            }
            findings.push(
                Finding::new(
                    FindingCategory::Inconsistency,
                    Severity::Low,
                    format!("Name mismatch for NIR {}", nir),
                    NAME,
                )
                .with_description(format!(
                    "NIR {} is named '{}' in {} and '{}' in {}.",
                    nir,
                    emp_a.full_name(),
                    doc_label(a),
                    emp_b.full_name(),
                    doc_label(b)
                ))
                .with_expected(emp_a.full_name())
                .with_observed(emp_b.full_name())
                .with_risk_score(20)
                .with_recommendation("Check the spelling of the employee's name.")
                .with_documents([a.source_document_id.clone(), b.source_document_id.clone()]),
            );
        }

        findings
    }

    /// Per shared employee, the categories each document declares
    fn match_categories(&self, a: &Declaration, b: &Declaration) -> Result<Vec<Finding>, AnalysisError> {
        let lines_a = employee_lines(a)?;
        let lines_b = employee_lines(b)?;
        let settings = &self.settings;
        let docs = [a.source_document_id.clone(), b.source_document_id.clone()];
        let mut findings = Vec::new();

        // An employee listed without any line still declares no category
        let none = BTreeMap::new();
        let listed_b = identities(b, &lines_b);
        for identity in identities(a, &lines_a).intersection(&listed_b) {
            let kinds_a = lines_a.get(identity).unwrap_or(&none);
            let kinds_b = lines_b.get(identity).unwrap_or(&none);
            let who = describe_identity(identity);

            for (present, absent, kinds_present, kinds_absent) in
                [(a, b, kinds_a, kinds_b), (b, a, kinds_b, kinds_a)]
            {
                for (kind, summary) in kinds_present {
                    if kinds_absent.contains_key(kind) {
                        continue;
                    }
                    findings.push(
                        Finding::new(
                            FindingCategory::MissingData,
                            Severity::Medium,
                            format!("Contribution missing from {} - {}", doc_label(absent), kind),
                            NAME,
                        )
                        .with_description(format!(
                            "{} has a {} contribution in {} but none in {}.",
                            who,
                            kind,
                            doc_label(present),
                            doc_label(absent)
                        ))
                        .with_expected(kind.as_str())
                        .with_observed("absent")
                        .with_impact(summary.employer_amount)
                        .with_risk_score(55)
                        .with_recommendation("Check that both documents cover the same contributions.")
                        .with_documents(docs.clone()),
                    );
                }
            }

            for (kind, sa) in kinds_a {
                let Some(sb) = kinds_b.get(kind) else {
                    continue;
                };
                let amount_gap = (sa.employer_amount - sb.employer_amount).abs();

                if let (Some(ra), Some(rb)) = (sa.employer_rate, sb.employer_rate) {
                    if (ra - rb).abs() > settings.rate_tolerance {
                        let mut finding = Finding::new(
                            FindingCategory::Inconsistency,
                            Severity::Medium,
                            format!("Rate differs between documents - {}", kind),
                            NAME,
                        )
                        .with_description(format!(
                            "{}: {} is applied at {} in {} and {} in {}.",
                            who,
                            kind,
                            fmt_decimal(ra),
                            doc_label(a),
                            fmt_decimal(rb),
                            doc_label(b)
                        ))
                        .with_expected(fmt_decimal(ra))
                        .with_observed(fmt_decimal(rb))
                        .with_risk_score(50)
                        .with_recommendation("Identify which document carries the correct rate.")
                        .with_documents(docs.clone());
                        if !amount_gap.is_zero() {
                            finding = finding.with_impact(amount_gap);
                        }
                        findings.push(finding);
                    }
                }

                if amount_gap > settings.amount_tolerance
                    && relative_deviation(sb.employer_amount, sa.employer_amount)
                        > settings.relative_tolerance
                {
                    findings.push(
                        Finding::new(
                            FindingCategory::Inconsistency,
                            Severity::Medium,
                            format!("Amount differs between documents - {}", kind),
                            NAME,
                        )
                        .with_description(format!(
                            "{}: the {} amount is {} in {} and {} in {}.",
                            who,
                            kind,
                            sa.employer_amount,
                            doc_label(a),
                            sb.employer_amount,
                            doc_label(b)
                        ))
                        .with_expected(sa.employer_amount.to_string())
                        .with_observed(sb.employer_amount.to_string())
                        .with_impact(amount_gap)
                        .with_risk_score(55)
                        .with_recommendation("Reconcile the amounts of both documents.")
                        .with_documents(docs.clone()),
                    );
                }
            }
        }

        Ok(findings)
    }

    fn compare_aggregates(&self, a: &Declaration, b: &Declaration) -> Vec<Finding> {
        let mut findings = Vec::new();
        let docs = [a.source_document_id.clone(), b.source_document_id.clone()];
        let (ma, mb) = (a.declared_payroll_mass, b.declared_payroll_mass);

        if ma > Decimal::ZERO && mb > Decimal::ZERO {
            let deviation = relative_deviation(mb, ma);
            if deviation > self.settings.relative_tolerance {
                findings.push(
                    Finding::new(
                        FindingCategory::Inconsistency,
                        Severity::High,
                        "Payroll mass differs between documents",
                        NAME,
                    )
                    .with_description(format!(
                        "Documents of the same period declare different payroll masses \
                         ({}% apart): {} ({}) declares {}, {} ({}) declares {}.",
                        fmt_decimal((deviation * Decimal::ONE_HUNDRED).round_dp(1)),
                        doc_label(a),
                        a.kind,
                        ma,
                        doc_label(b),
                        b.kind,
                        mb
                    ))
                    .with_expected(ma.to_string())
                    .with_observed(mb.to_string())
                    .with_impact((ma - mb).abs())
                    .with_risk_score(75)
                    .with_recommendation("Identify the source of the gap and reconcile the declarations.")
                    .with_documents(docs.clone()),
                );
            }
        }

        let (ha, hb) = (a.declared_headcount, b.declared_headcount);
        if ha > 0 && hb > 0 && ha != hb {
            findings.push(
                Finding::new(
                    FindingCategory::Inconsistency,
                    Severity::Medium,
                    "Headcount differs between documents",
                    NAME,
                )
                .with_description(format!(
                    "{} declares {} employees and {} declares {} for the same period.",
                    doc_label(a),
                    ha,
                    doc_label(b),
                    hb
                ))
                .with_expected(ha.to_string())
                .with_observed(hb.to_string())
                .with_risk_score(50)
                .with_recommendation("Check hires and departures declared in each document.")
                .with_documents(docs),
            );
        }

        findings
    }

    // === Consecutive periods ===

    fn check_sequence(&self, declarations: &[Declaration]) -> Vec<Finding> {
        let mut dated: Vec<&Declaration> = declarations.iter().filter(|d| d.period.is_some()).collect();
        dated.sort_by_key(|d| d.period.map(|p| p.start));

        let mut findings = Vec::new();
        for pair in dated.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            let (Some(pp), Some(cp)) = (prev.period, curr.period) else {
                continue;
            };
            if pp.key() == cp.key() {
                continue;
            }
            let docs = [prev.source_document_id.clone(), curr.source_document_id.clone()];

            let (mp, mc) = (prev.declared_payroll_mass, curr.declared_payroll_mass);
            if mp > Decimal::ZERO && mc > Decimal::ZERO {
                let swing = relative_deviation(mc, mp);
                if swing > self.settings.mass_swing_threshold {
                    findings.push(
                        Finding::new(
                            FindingCategory::Anomaly,
                            Severity::Medium,
                            "Large payroll mass swing",
                            NAME,
                        )
                        .with_description(format!(
                            "The payroll mass moves by {}% between {} ({}) and {} ({}).",
                            fmt_decimal((swing * Decimal::ONE_HUNDRED).round_dp(1)),
                            pp.start,
                            mp,
                            cp.start,
                            mc
                        ))
                        .with_expected(mp.to_string())
                        .with_observed(mc.to_string())
                        .with_impact((mc - mp).abs())
                        .with_risk_score(45)
                        .with_recommendation(
                            "Check whether hires, departures or exceptional bonuses explain the change.",
                        )
                        .with_documents(docs.clone()),
                    );
                }
            }

            let (hp, hc) = (prev.declared_headcount, curr.declared_headcount);
            if hp > 0 && hc > 0 {
                let swing = relative_deviation(Decimal::from(hc), Decimal::from(hp));
                if swing > self.settings.headcount_swing_threshold
                    && hp.abs_diff(hc) > self.settings.headcount_swing_min_persons
                {
                    findings.push(
                        Finding::new(
                            FindingCategory::Anomaly,
                            Severity::Medium,
                            "Large headcount swing",
                            NAME,
                        )
                        .with_description(format!(
                            "The headcount moves from {} to {} between {} and {}.",
                            hp, hc, pp.start, cp.start
                        ))
                        .with_expected(hp.to_string())
                        .with_observed(hc.to_string())
                        .with_risk_score(45)
                        .with_recommendation("Check the hires and departures of the period.")
                        .with_documents(docs),
                    );
                }
            }
        }
        findings
    }

    // === Calendar years ===

    fn check_years(&self, declarations: &[Declaration]) -> Result<Vec<Finding>, AnalysisError> {
        let years = history::summarize_years(declarations)?;
        let mut findings = Vec::new();
        for pair in years.windows(2) {
            findings.extend(self.compare_years(&pair[0], &pair[1]));
        }
        for year in &years {
            findings.extend(self.check_dsn_payslip_gap(year));
        }
        Ok(findings)
    }

    fn compare_years(&self, prev: &YearSummary, curr: &YearSummary) -> Vec<Finding> {
        let settings = &self.settings;
        let (py, cy) = (prev.year, curr.year);
        let docs: Vec<String> = prev.documents.iter().chain(&curr.documents).cloned().collect();
        let mut findings = Vec::new();

        let (mp, mc) = (prev.payroll_mass, curr.payroll_mass);
        let mass_change = if mp > Decimal::ZERO && mc > Decimal::ZERO {
            relative_change(mc, mp)
        } else {
            None
        };
        if let Some(change) = mass_change {
            if change < -settings.year_mass_drop_threshold {
                findings.push(
                    Finding::new(
                        FindingCategory::Anomaly,
                        Severity::High,
                        format!("Payroll mass drop between {} and {}", py, cy),
                        NAME,
                    )
                    .with_description(format!(
                        "The payroll mass falls by {}% between {} ({}) and {} ({}).",
                        percent(change),
                        py,
                        mp,
                        cy,
                        mc
                    ))
                    .with_expected(mp.to_string())
                    .with_observed(mc.to_string())
                    .with_impact(mp - mc)
                    .with_risk_score(70)
                    .with_recommendation(
                        "Check for a restructuring or layoffs. An unexplained drop may reveal \
                         undeclared work.",
                    )
                    .with_documents(docs.clone())
                    .with_legal_reference("CT art. L8224-1"),
                );
            } else if change > settings.year_mass_rise_threshold {
                findings.push(
                    Finding::new(
                        FindingCategory::Anomaly,
                        Severity::Low,
                        format!("Payroll mass rise between {} and {}", py, cy),
                        NAME,
                    )
                    .with_description(format!(
                        "The payroll mass rises by {}% between {} ({}) and {} ({}).",
                        percent(change),
                        py,
                        mp,
                        cy,
                        mc
                    ))
                    .with_expected(mp.to_string())
                    .with_observed(mc.to_string())
                    .with_risk_score(25)
                    .with_recommendation(
                        "Check for fast growth, a merged subsidiary or a regularization.",
                    )
                    .with_documents(docs.clone()),
                );
            }
        }

        let (hp, hc) = (prev.headcount, curr.headcount);
        if hp > 0 && hc > 0 {
            let change = relative_change(Decimal::from(hc), Decimal::from(hp));
            if change.is_some_and(|c| c < -settings.year_headcount_drop_threshold) {
                findings.push(
                    Finding::new(
                        FindingCategory::Anomaly,
                        Severity::Medium,
                        format!("Headcount drop between {} and {}", py, cy),
                        NAME,
                    )
                    .with_description(format!(
                        "The headcount falls from {} in {} to {} in {}.",
                        hp, py, hc, cy
                    ))
                    .with_expected(hp.to_string())
                    .with_observed(hc.to_string())
                    .with_risk_score(50)
                    .with_recommendation("Check for layoffs, a job protection plan or outsourcing.")
                    .with_documents(docs.clone()),
                );
            }
        }

        if let (Some(sp), Some(sc)) = (prev.average_salary(), curr.average_salary()) {
            let change = relative_change(sc, sp);
            if change.is_some_and(|c| c < -settings.year_salary_drop_threshold) {
                findings.push(
                    Finding::new(
                        FindingCategory::Anomaly,
                        Severity::Low,
                        format!("Average salary drop between {} and {}", py, cy),
                        NAME,
                    )
                    .with_description(format!(
                        "The average salary goes from {} in {} to {} in {}.",
                        sp.round_dp(0),
                        py,
                        sc.round_dp(0),
                        cy
                    ))
                    .with_expected(sp.round_dp(0).to_string())
                    .with_observed(sc.round_dp(0).to_string())
                    .with_risk_score(30)
                    .with_recommendation(
                        "Check for part-time contracts, a new salary structure or \
                         under-declaration.",
                    )
                    .with_documents(docs),
                );
            }
        }

        findings
    }

    /// Payslips and DSN of one year should declare the same mass
    fn check_dsn_payslip_gap(&self, year: &YearSummary) -> Option<Finding> {
        let (slips, dsn) = (year.payslip_mass, year.dsn_mass);
        if slips <= Decimal::ZERO || dsn <= Decimal::ZERO {
            return None;
        }
        let diff = (slips - dsn).abs();
        let gap = diff.checked_div(slips.max(dsn))?;
        if gap <= self.settings.dsn_payslip_gap_threshold {
            return None;
        }

        let (severity, risk) = if gap > self.settings.dsn_payslip_gap_medium {
            (Severity::Medium, 55)
        } else {
            (Severity::Low, 35)
        };
        Some(
            Finding::new(
                FindingCategory::Inconsistency,
                severity,
                format!("Payslip and DSN payroll mass differ - {}", year.year),
                NAME,
            )
            .with_description(format!(
                "In {} the payslips declare a payroll mass of {} and the DSN {} ({}% apart).",
                year.year,
                slips,
                dsn,
                percent(gap)
            ))
            .with_expected(dsn.to_string())
            .with_observed(slips.to_string())
            .with_impact(diff)
            .with_risk_score(risk)
            .with_recommendation(
                "Look for missing payslips, DSN entry errors or pending regularizations.",
            )
            .with_documents(year.documents.clone()),
        )
    }
}

impl Analyzer for ConsistencyAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(declarations = declarations.len()))]
    fn analyze(&self, declarations: &[Declaration]) -> Result<Vec<Finding>, AnalysisError> {
        let mut findings = Vec::new();
        for decl in declarations {
            findings.extend(self.check_internal(decl)?);
            if decl.kind.is_nominal_declaration() {
                findings.extend(self.check_nominal(decl));
            }
        }

        if declarations.len() > 1 {
            findings.extend(self.check_cross_documents(declarations)?);
            findings.extend(self.check_sequence(declarations));
            findings.extend(self.check_years(declarations)?);
        }
        Ok(findings)
    }
}

/// Absolute share as a percentage with one decimal
fn percent(share: Decimal) -> String {
    fmt_decimal((share.abs() * Decimal::ONE_HUNDRED).round_dp(1))
}

fn doc_label(decl: &Declaration) -> &str {
    [&decl.reference, &decl.source_document_id, &decl.id]
        .into_iter()
        .map(|s| s.as_str())
        .find(|s| !s.trim().is_empty())
        .unwrap_or("unnamed document")
}

fn describe_identity(identity: &EmployeIdentity) -> String {
    match identity {
        EmployeIdentity::Nir(nir) => format!("NIR {}", nir),
        other => format!("Employee {}", other),
    }
}

fn normalized_name(e: &Employe) -> (String, String) {
    (
        e.last_name.trim().to_lowercase(),
        e.first_name.trim().to_lowercase(),
    )
}

/// Employees carrying a NIR, keyed by the compacted NIR
fn nir_index(decl: &Declaration) -> BTreeMap<String, &Employe> {
    decl.employes
        .iter()
        .filter(|e| e.has_nir())
        .map(|e| (identifiers::compact(&e.nir), e))
        .collect()
}

fn employee_lines(decl: &Declaration) -> Result<EmployeeLines, AnalysisError> {
    let mut lines: EmployeeLines = BTreeMap::new();
    for c in &decl.cotisations {
        let Some(employe) = decl.employe(&c.employe_id) else {
            continue;
        };
        let summary = lines
            .entry(employe.identity())
            .or_default()
            .entry(c.kind)
            .or_default();
        summary.employer_amount = summary
            .employer_amount
            .checked_add(c.employer_amount)
            .ok_or_else(|| AnalysisError::Arithmetic(format!("{} amount sum", c.kind)))?;
        if summary.employer_rate.is_none() && !c.employer_rate.is_zero() {
            summary.employer_rate = Some(c.employer_rate);
        }
    }
    Ok(lines)
}

/// Employees listed in the document or carrying at least one line
fn identities(decl: &Declaration, lines: &EmployeeLines) -> BTreeSet<EmployeIdentity> {
    decl.employes
        .iter()
        .map(Employe::identity)
        .chain(lines.keys().cloned())
        .collect()
}

/// Blocks the parser declared plus those the data implies
fn present_blocks(decl: &Declaration) -> BTreeSet<DsnBlock> {
    let mut blocks = decl.metadata.structural_blocks.clone();

    if let Some(e) = &decl.employeur {
        if !e.siren.trim().is_empty() || !e.name.trim().is_empty() {
            blocks.insert(DsnBlock::EmployerIdentity);
        }
        if !e.siret.trim().is_empty() {
            blocks.insert(DsnBlock::Establishment);
        }
    }
    if !decl.employes.is_empty() {
        blocks.insert(DsnBlock::Individual);
    }
    if decl
        .employes
        .iter()
        .any(|e| e.hired_on.is_some() || !e.status.trim().is_empty())
    {
        blocks.insert(DsnBlock::Contract);
    }
    if decl.declared_payroll_mass > Decimal::ZERO
        || decl.cotisations.iter().any(|c| c.gross_base > Decimal::ZERO)
    {
        blocks.insert(DsnBlock::Remuneration);
    }
    if decl.cotisations.iter().any(|c| c.assessed_base > Decimal::ZERO) {
        blocks.insert(DsnBlock::AssessedBase);
    }
    if decl.cotisations.iter().any(|c| {
        !c.employe_id.is_empty() && (!c.employer_amount.is_zero() || !c.employee_amount.is_zero())
    }) {
        blocks.insert(DsnBlock::IndividualContribution);
    }
    if !decl.metadata.ctp_codes.is_empty() {
        blocks.insert(DsnBlock::AggregateContribution);
    }
    if decl.metadata.declared_contribution_total.is_some() {
        blocks.insert(DsnBlock::Bordereau);
    }
    blocks
}

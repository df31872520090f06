//! Corpus-wide screening, independent of any regulation
//!
//! Works over every contribution line of every declaration. None of these
//! checks proves an error; they point at data worth a second look.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use audit_types::{ContributionKind, Cotisation, Declaration, Finding, FindingCategory, Severity};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, instrument};

use super::{fmt_amount, Analyzer};
use crate::error::AnalysisError;
use crate::settings::AnalysisSettings;
use crate::stats::benford::{expected_share, BenfordResult};
use crate::stats::{is_round_hundred, IqrFences};

const NAME: &str = "patterns";

pub struct PatternAnalyzer {
    settings: Arc<AnalysisSettings>,
}

type DuplicateKey = (
    ContributionKind,
    String,
    Decimal,
    Decimal,
    Option<(NaiveDate, NaiveDate)>,
);

impl PatternAnalyzer {
    pub fn new(settings: Arc<AnalysisSettings>) -> Self {
        Self { settings }
    }

    fn check_round_numbers(&self, lines: &[&Cotisation]) -> Option<Finding> {
        let amounts = positive_amounts(lines);
        if amounts.len() < self.settings.round_number_min_samples {
            return None;
        }
        let round = amounts.iter().filter(|a| is_round_hundred(**a)).count();
        let ratio = Decimal::from(round) / Decimal::from(amounts.len());
        if ratio <= self.settings.round_number_ratio {
            return None;
        }

        Some(
            Finding::new(
                FindingCategory::SuspiciousPattern,
                Severity::Medium,
                "High share of round amounts",
                NAME,
            )
            .with_description(format!(
                "{}/{} amounts ({}%) are multiples of 100. This may indicate estimated rather \
                 than computed contributions.",
                round,
                amounts.len(),
                (ratio * Decimal::ONE_HUNDRED).round_dp(0)
            ))
            .with_expected(format!(
                "<= {}%",
                (self.settings.round_number_ratio * Decimal::ONE_HUNDRED).normalize()
            ))
            .with_observed(format!("{}%", (ratio * Decimal::ONE_HUNDRED).round_dp(0)))
            .with_risk_score(55)
            .with_recommendation(
                "Check that contribution amounts are actually computed and not estimated or \
                 flat-rated.",
            ),
        )
    }

    fn check_duplicates(&self, declarations: &[Declaration]) -> Vec<Finding> {
        let mut seen: HashMap<DuplicateKey, &str> = HashMap::new();
        let mut findings = Vec::new();

        for decl in declarations {
            for c in &decl.cotisations {
                let key = (
                    c.kind,
                    c.employe_id.clone(),
                    c.gross_base.normalize(),
                    c.employer_amount.normalize(),
                    c.period.or(decl.period).map(|p| p.key()),
                );
                let Some(first) = seen.get(&key).copied() else {
                    seen.insert(key, c.source_document_id.as_str());
                    continue;
                };

                findings.push(
                    Finding::new(
                        FindingCategory::SuspiciousPattern,
                        Severity::High,
                        format!("Duplicate contribution line - {}", c.kind),
                        NAME,
                    )
                    .with_description(format!(
                        "An identical contribution line appears more than once: {}, base {}, \
                         amount {}.",
                        c.kind, c.gross_base, c.employer_amount
                    ))
                    .with_impact(c.employer_amount)
                    .with_risk_score(75)
                    .with_recommendation(
                        "Check whether this is an accidental double submission or two distinct \
                         declarations.",
                    )
                    .with_documents([c.source_document_id.clone(), first.to_string()]),
                );
            }
        }
        findings
    }

    fn check_missing_months(&self, declarations: &[Declaration]) -> Option<Finding> {
        let mut months: BTreeSet<(i32, u32)> = declarations
            .iter()
            .filter_map(|d| d.period)
            .map(|p| p.month())
            .collect();
        if months.is_empty() {
            months = declarations
                .iter()
                .flat_map(|d| d.cotisations.iter())
                .filter_map(|c| c.period)
                .map(|p| p.month())
                .collect();
        }
        if months.len() < 3 {
            return None;
        }

        let (first, last) = (*months.first()?, *months.last()?);
        let mut missing = Vec::new();
        let mut cursor = first;
        while cursor <= last {
            if !months.contains(&cursor) {
                missing.push(cursor);
            }
            cursor = next_month(cursor);
        }
        if missing.is_empty() {
            return None;
        }

        let listed: Vec<String> = missing
            .iter()
            .map(|(year, month)| format!("{:02}/{}", month, year))
            .collect();
        Some(
            Finding::new(
                FindingCategory::MissingData,
                Severity::High,
                "Missing declaration months",
                NAME,
            )
            .with_description(format!(
                "The following months have no declaration between {:02}/{} and {:02}/{}: {}. \
                 Declarations may not have been filed.",
                first.1,
                first.0,
                last.1,
                last.0,
                listed.join(", ")
            ))
            .with_expected(format!("{} months", months.len() + missing.len()))
            .with_observed(format!("{} months", months.len()))
            .with_risk_score(80)
            .with_recommendation("Check that every monthly declaration was filed for these months.")
            .with_legal_reference("CSS art. R243-14"),
        )
    }

    fn check_benford(&self, lines: &[&Cotisation]) -> Option<Finding> {
        let amounts = positive_amounts(lines);
        if amounts.len() < self.settings.benford_min_samples {
            return None;
        }
        let result = BenfordResult::from_values(amounts)?;
        if result.n < self.settings.benford_min_samples {
            return None;
        }
        let critical = self.settings.benford_critical_value;
        if !result.exceeds(critical) {
            debug!(chi_square = result.chi_square, n = result.n, "First-digit screening passed");
            return None;
        }

        let table: Vec<String> = (1..=9u8)
            .map(|d| {
                format!(
                    "  digit {}: observed {:.1}%, expected {:.1}%",
                    d,
                    result.observed_share(d) * 100.0,
                    expected_share(d) * 100.0
                )
            })
            .collect();
        Some(
            Finding::new(
                FindingCategory::SuspiciousPattern,
                Severity::Medium,
                "First-digit distribution departs from Benford's law",
                NAME,
            )
            .with_description(format!(
                "The leading digits of {} contribution amounts do not follow Benford's law \
                 (chi2 = {:.2}, critical value = {}). This is a screening heuristic, not proof \
                 of manipulation.\n{}",
                result.n,
                result.chi_square,
                critical,
                table.join("\n")
            ))
            .with_expected(format!("chi2 <= {}", critical))
            .with_observed(format!("chi2 = {:.2}", result.chi_square))
            .with_risk_score(60)
            .with_recommendation(
                "Look into where the amounts come from. A departure from Benford's law is not \
                 evidence of fraud but warrants a review.",
            ),
        )
    }

    fn check_outliers(&self, lines: &[&Cotisation]) -> Vec<Finding> {
        let mut by_kind: BTreeMap<ContributionKind, Vec<&Cotisation>> = BTreeMap::new();
        for c in lines.iter().filter(|c| c.employer_amount > Decimal::ZERO) {
            by_kind.entry(c.kind).or_default().push(c);
        }

        let mut findings = Vec::new();
        for (kind, group) in by_kind {
            if group.len() < self.settings.iqr_min_samples {
                continue;
            }
            let mut sorted: Vec<Decimal> = group.iter().map(|c| c.employer_amount).collect();
            sorted.sort();
            let Some(fences) = IqrFences::from_sorted(&sorted, self.settings.iqr_factor) else {
                continue;
            };
            if fences.iqr.is_zero() {
                continue;
            }

            for c in group
                .iter()
                .filter(|c| fences.is_outlier(c.employer_amount))
                .take(self.settings.max_outliers_per_kind)
            {
                findings.push(
                    Finding::new(
                        FindingCategory::SuspiciousPattern,
                        Severity::Low,
                        format!("Outlier amount - {}", kind),
                        NAME,
                    )
                    .with_description(format!(
                        "The amount {} lies outside the usual range for {} [{} ; {}].",
                        c.employer_amount,
                        kind,
                        fmt_amount(fences.lower),
                        fmt_amount(fences.upper)
                    ))
                    .with_expected(format!(
                        "[{} ; {}]",
                        fmt_amount(fences.lower),
                        fmt_amount(fences.upper)
                    ))
                    .with_observed(c.employer_amount.to_string())
                    .with_impact(c.employer_amount)
                    .with_risk_score(30)
                    .with_recommendation("Check this amount against the employee's payslip.")
                    .with_documents([c.source_document_id.clone()]),
                );
            }
        }
        findings
    }
}

impl Analyzer for PatternAnalyzer {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(declarations = declarations.len()))]
    fn analyze(&self, declarations: &[Declaration]) -> Result<Vec<Finding>, AnalysisError> {
        let lines: Vec<&Cotisation> = declarations
            .iter()
            .flat_map(|d| d.cotisations.iter())
            .collect();

        let mut findings = Vec::new();
        findings.extend(self.check_round_numbers(&lines));
        findings.extend(self.check_duplicates(declarations));
        findings.extend(self.check_missing_months(declarations));
        findings.extend(self.check_benford(&lines));
        findings.extend(self.check_outliers(&lines));
        Ok(findings)
    }
}

fn positive_amounts(lines: &[&Cotisation]) -> Vec<Decimal> {
    lines
        .iter()
        .map(|c| c.employer_amount)
        .filter(|a| *a > Decimal::ZERO)
        .collect()
}

fn next_month((year, month): (i32, u32)) -> (i32, u32) {
    if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_types::{DeclarationKind, Period};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn analyzer() -> PatternAnalyzer {
        PatternAnalyzer::new(Arc::new(AnalysisSettings::default()))
    }

    fn month(year: i32, month: u32) -> Period {
        let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        let end = start
            .checked_add_months(chrono::Months::new(1))
            .and_then(|d| d.pred_opt())
            .unwrap();
        Period::new(start, end)
    }

    /// One declaration with one line per amount, each for a distinct employee
    fn declaration_with(amounts: &[Decimal]) -> Declaration {
        let mut d = Declaration::new("doc", DeclarationKind::PayrollLedger);
        for (i, amount) in amounts.iter().enumerate() {
            let mut c = Cotisation::new(ContributionKind::Maladie);
            c.employe_id = format!("e{}", i);
            c.source_document_id = "doc".to_string();
            c.employer_amount = *amount;
            d.cotisations.push(c);
        }
        d
    }

    fn with_title<'a>(findings: &'a [Finding], title: &str) -> Vec<&'a Finding> {
        findings.iter().filter(|f| f.title == title).collect()
    }

    /// `round` multiples of 100 padded with non-round amounts
    fn mixed_amounts(total: usize, round: usize) -> Vec<Decimal> {
        (0..total)
            .map(|i| {
                if i < round {
                    Decimal::from(100 * (i as i64 % 9 + 1))
                } else {
                    Decimal::new(10_000 + 1_737 * i as i64, 2)
                }
            })
            .collect()
    }

    #[test]
    fn test_round_numbers_above_threshold() {
        let d = declaration_with(&mixed_amounts(60, 20));
        let findings = analyzer().analyze(&[d]).unwrap();
        let round = with_title(&findings, "High share of round amounts");
        assert_eq!(round.len(), 1);
        assert_eq!(round[0].severity, Severity::Medium);
        assert!(round[0].description.starts_with("20/60 amounts (33%)"));
    }

    #[test]
    fn test_round_numbers_below_threshold() {
        let d = declaration_with(&mixed_amounts(100, 25));
        let findings = analyzer().analyze(&[d]).unwrap();
        assert!(with_title(&findings, "High share of round amounts").is_empty());
    }

    #[test]
    fn test_round_numbers_need_samples() {
        let d = declaration_with(&[dec!(100); 9]);
        assert!(analyzer().check_round_numbers(&d.cotisations.iter().collect::<Vec<_>>()).is_none());
    }

    #[test]
    fn test_duplicates_reference_both_documents() {
        let mut a = Declaration::new("a", DeclarationKind::Dsn);
        let mut b = Declaration::new("b", DeclarationKind::Ducs);
        a.period = Some(month(2026, 1));
        b.period = Some(month(2026, 1));
        let mut line = Cotisation::new(ContributionKind::Fnal);
        line.employe_id = "e1".to_string();
        line.gross_base = dec!(3000);
        line.employer_amount = dec!(3.00);
        line.source_document_id = "a".to_string();
        a.cotisations.push(line.clone());
        line.source_document_id = "b".to_string();
        line.employer_amount = dec!(3);
        b.cotisations.push(line);

        let findings = analyzer().check_duplicates(&[a, b]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].documents, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(findings[0].monetary_impact, Some(dec!(3)));
    }

    #[test]
    fn test_same_line_in_other_period_is_not_duplicate() {
        let mut a = Declaration::new("a", DeclarationKind::Dsn);
        let mut b = Declaration::new("b", DeclarationKind::Dsn);
        a.period = Some(month(2026, 1));
        b.period = Some(month(2026, 2));
        let line = Cotisation::new(ContributionKind::Fnal);
        a.cotisations.push(line.clone());
        b.cotisations.push(line);
        assert!(analyzer().check_duplicates(&[a, b]).is_empty());
    }

    #[test]
    fn test_missing_months_across_year_end() {
        let decls: Vec<Declaration> = [(2025, 11), (2026, 1), (2026, 4)]
            .iter()
            .enumerate()
            .map(|(i, (y, m))| {
                let mut d = Declaration::new(format!("d{}", i), DeclarationKind::Dsn);
                d.period = Some(month(*y, *m));
                d
            })
            .collect();
        let finding = analyzer().check_missing_months(&decls).unwrap();
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.category, FindingCategory::MissingData);
        assert!(finding.description.contains("12/2025, 02/2026, 03/2026."));
    }

    #[test]
    fn test_missing_months_needs_three_months() {
        let decls: Vec<Declaration> = [1, 5]
            .iter()
            .map(|m| {
                let mut d = Declaration::new("d", DeclarationKind::Dsn);
                d.period = Some(month(2026, *m));
                d
            })
            .collect();
        assert!(analyzer().check_missing_months(&decls).is_none());
    }

    #[test]
    fn test_contiguous_months() {
        let decls: Vec<Declaration> = (1..=4)
            .map(|m| {
                let mut d = Declaration::new("d", DeclarationKind::Dsn);
                d.period = Some(month(2026, m));
                d
            })
            .collect();
        assert!(analyzer().check_missing_months(&decls).is_none());
    }

    #[test]
    fn test_benford_flags_skewed_sample() {
        let amounts: Vec<Decimal> = (0..60).map(|i| Decimal::new(90_000 + i * 13, 2)).collect();
        let d = declaration_with(&amounts);
        let lines: Vec<&Cotisation> = d.cotisations.iter().collect();
        let finding = analyzer().check_benford(&lines).unwrap();
        assert_eq!(finding.severity, Severity::Medium);
        assert!(finding.description.contains("not proof of manipulation"));
        assert!(finding.description.contains("digit 9: observed 100.0%, expected 4.6%"));
    }

    #[test]
    fn test_benford_needs_fifty_amounts() {
        let d = declaration_with(&[dec!(950); 49]);
        let lines: Vec<&Cotisation> = d.cotisations.iter().collect();
        assert!(analyzer().check_benford(&lines).is_none());
    }

    #[test]
    fn test_outliers_capped_per_kind() {
        let mut amounts: Vec<Decimal> = (0..40).map(|i| Decimal::from(100 + i)).collect();
        amounts.extend((0..7).map(|i| Decimal::from(10_000 + i)));
        let d = declaration_with(&amounts);
        let lines: Vec<&Cotisation> = d.cotisations.iter().collect();
        let findings = analyzer().check_outliers(&lines);
        assert_eq!(findings.len(), 5);
        assert!(findings
            .iter()
            .all(|f| f.severity == Severity::Low && f.category == FindingCategory::SuspiciousPattern));
        assert_eq!(findings[0].monetary_impact, Some(dec!(10000)));
    }

    #[test]
    fn test_no_outliers_when_spread_is_zero() {
        let mut amounts = vec![dec!(50); 12];
        amounts.push(dec!(5000));
        let d = declaration_with(&amounts);
        let lines: Vec<&Cotisation> = d.cotisations.iter().collect();
        assert!(analyzer().check_outliers(&lines).is_empty());
    }
}

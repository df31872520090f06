use std::sync::Arc;

use audit_engine::{
    sort_findings, AnalysisError, AnalysisSettings, Analyzer, AuditEngine, AuditReport,
};
use audit_types::{
    ContributionKind, Cotisation, Declaration, DeclarationKind, Employe, Finding, FindingCategory,
    Period, Severity,
};
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use rate_engine::RateCatalog;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn engine() -> AuditEngine {
    AuditEngine::new(
        Arc::new(RateCatalog::embedded().unwrap()),
        Arc::new(AnalysisSettings::default()),
    )
}

fn january() -> Period {
    Period::new(
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
    )
}

fn line(kind: ContributionKind, doc: &str) -> Cotisation {
    let mut c = Cotisation::new(kind);
    c.source_document_id = doc.to_string();
    c
}

fn payslip(id: &str, lines: Vec<Cotisation>) -> Declaration {
    let mut d = Declaration::new(id, DeclarationKind::Payslip);
    d.period = Some(january());
    d.cotisations = lines;
    d
}

fn employe(id: &str, nir: &str) -> Employe {
    Employe {
        id: id.to_string(),
        nir: nir.to_string(),
        last_name: "Martin".to_string(),
        first_name: "Claire".to_string(),
        ..Default::default()
    }
}

/// A batch that triggers all three analyzers
fn mixed_batch() -> Vec<Declaration> {
    let mut negative = line(ContributionKind::Maladie, "slip");
    negative.gross_base = dec!(-1000);

    let mut wrong_rate = line(ContributionKind::VieillessePlafonnee, "slip");
    wrong_rate.gross_base = dec!(3000);
    wrong_rate.assessed_base = dec!(3000);
    wrong_rate.employer_rate = dec!(0.10);
    wrong_rate.employer_amount = dec!(300);

    let mut over_ceiling = line(ContributionKind::VieillessePlafonnee, "slip");
    over_ceiling.employe_id = "e2".to_string();
    over_ceiling.gross_base = dec!(5000);
    over_ceiling.assessed_base = dec!(5000);

    let mut ledger = Declaration::new("ledger", DeclarationKind::PayrollLedger);
    ledger.period = Some(january());
    ledger.declared_payroll_mass = dec!(100000);
    ledger.declared_headcount = 12;

    let mut ducs = Declaration::new("ducs", DeclarationKind::Ducs);
    ducs.period = Some(january());
    ducs.declared_payroll_mass = dec!(90000);
    ducs.declared_headcount = 11;

    vec![
        payslip("slip", vec![negative, wrong_rate, over_ceiling]),
        ledger,
        ducs,
    ]
}

#[test]
fn test_runs_are_identical() {
    let batch = mixed_batch();
    let engine = engine();
    let first = engine.run(&batch);
    let second = engine.run(&batch);
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
fn test_findings_are_sorted() {
    let findings = engine().run(&mixed_batch());
    let mut resorted = findings.clone();
    sort_findings(&mut resorted);
    assert_eq!(findings, resorted);
    for pair in findings.windows(2) {
        assert!(pair[0].severity <= pair[1].severity);
        if pair[0].severity == pair[1].severity {
            assert!(pair[0].risk_score >= pair[1].risk_score);
        }
    }
}

#[test]
fn test_negative_base_scenario() {
    let mut c = line(ContributionKind::Maladie, "slip");
    c.gross_base = dec!(-1000);
    let findings = engine().run(&[payslip("slip", vec![c])]);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].severity, Severity::High);
    assert!(findings[0].title.to_lowercase().contains("negative gross base"));
    assert_eq!(findings[0].monetary_impact, Some(dec!(1000)));
}

#[test]
fn test_rate_mismatch_scenario() {
    let mut c = line(ContributionKind::VieillessePlafonnee, "slip");
    c.gross_base = dec!(3000);
    c.assessed_base = dec!(3000);
    c.employer_rate = dec!(0.10);
    c.employer_amount = dec!(300);
    let findings = engine().run(&[payslip("slip", vec![c])]);
    let mismatch: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.title.starts_with("Incorrect employer rate"))
        .collect();
    assert_eq!(mismatch.len(), 1);
    assert_eq!(mismatch[0].expected.as_deref(), Some("0.0855"));
}

#[test]
fn test_ceiling_scenario() {
    let mut c = line(ContributionKind::VieillessePlafonnee, "slip");
    c.gross_base = dec!(5000);
    c.assessed_base = dec!(5000);
    let findings = engine().run(&[payslip("slip", vec![c])]);
    let ceiling: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.category == FindingCategory::ThresholdExceeded)
        .collect();
    assert_eq!(ceiling.len(), 1);
    assert_eq!(ceiling[0].monetary_impact, Some(dec!(995)));
    assert!(ceiling[0].description.contains("995.00"));
}

#[test]
fn test_missing_category_scenario() {
    let mut dsn = payslip("first", Vec::new());
    dsn.employes.push(employe("a1", "A"));
    let mut maladie = line(ContributionKind::Maladie, "first");
    maladie.employe_id = "a1".to_string();
    maladie.employer_amount = dec!(210);
    let mut vieillesse = line(ContributionKind::VieillessePlafonnee, "first");
    vieillesse.employe_id = "a1".to_string();
    vieillesse.employer_amount = dec!(256.50);
    dsn.cotisations = vec![maladie, vieillesse.clone()];

    let mut other = Declaration::new("second", DeclarationKind::PayrollLedger);
    other.period = Some(january());
    other.employes.push(employe("b1", "A"));
    vieillesse.employe_id = "b1".to_string();
    vieillesse.source_document_id = "second".to_string();
    other.cotisations = vec![vieillesse];

    let findings = engine().run(&[dsn, other]);
    let missing: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.category == FindingCategory::MissingData)
        .collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Medium);
    assert!(missing[0].title.ends_with("maladie"));
    assert!(missing[0].description.contains("NIR A"));
}

#[test]
fn test_missing_category_for_employee_listed_without_lines() {
    let mut first = payslip("first", Vec::new());
    first.employes.push(employe("a1", "A"));
    let mut maladie = line(ContributionKind::Maladie, "first");
    maladie.employe_id = "a1".to_string();
    maladie.employer_amount = dec!(210);
    first.cotisations = vec![maladie];

    let mut second = Declaration::new("second", DeclarationKind::PayrollLedger);
    second.period = Some(january());
    second.employes.push(employe("b1", "A"));

    let findings = engine().run(&[first, second]);
    let missing: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.category == FindingCategory::MissingData)
        .collect();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].severity, Severity::Medium);
    assert_eq!(missing[0].title, "Contribution missing from second - maladie");
    assert!(missing[0].description.contains("NIR A"));
    assert_eq!(missing[0].monetary_impact, Some(dec!(210)));
}

#[test]
fn test_payroll_mass_against_largest_base() {
    let mut ledger = Declaration::new("ledger", DeclarationKind::PayrollLedger);
    ledger.period = Some(january());
    ledger.declared_payroll_mass = dec!(10000);
    ledger.cotisations = [("e1", dec!(3000)), ("e2", dec!(3000)), ("e3", dec!(4000))]
        .into_iter()
        .map(|(employe_id, base)| {
            let mut c = line(ContributionKind::Autre, "ledger");
            c.employe_id = employe_id.to_string();
            c.gross_base = base;
            c
        })
        .collect();

    let findings = engine().run(&[ledger]);
    let mass: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.title == "Payroll mass does not match contribution bases")
        .collect();
    assert_eq!(mass.len(), 1);
    assert_eq!(mass[0].severity, Severity::Medium);
    assert_eq!(mass[0].monetary_impact, Some(dec!(6000)));
}

fn yearly_ducs(year: i32, mass: Decimal, headcount: u32) -> Declaration {
    let mut d = Declaration::new(&format!("ducs-{}", year), DeclarationKind::Ducs);
    d.period = Some(Period::new(
        NaiveDate::from_ymd_opt(year, 12, 1).unwrap(),
        NaiveDate::from_ymd_opt(year, 12, 31).unwrap(),
    ));
    d.declared_payroll_mass = mass;
    d.declared_headcount = headcount;
    d
}

#[test]
fn test_multi_year_report() {
    let batch: Vec<Declaration> = [(2022, dec!(400000), 9), (2023, dec!(420000), 10), (2024, dec!(250000), 12)]
        .into_iter()
        .map(|(year, mass, headcount)| yearly_ducs(year, mass, headcount))
        .collect();
    let report = engine().audit(&batch);

    assert!(report
        .findings
        .iter()
        .any(|f| f.title == "Payroll mass drop between 2023 and 2024" && f.severity == Severity::High));

    let history = &report.history;
    assert_eq!(
        history.years.iter().map(|y| y.year).collect::<Vec<_>>(),
        vec![2022, 2023, 2024]
    );
    let coverage = history.coverage.as_ref().unwrap();
    assert_eq!(coverage.reference_year, 2024);
    assert_eq!(coverage.windows[0].missing, vec![2019, 2020, 2021]);
    assert!(coverage.windows[1].missing.contains(&2021));
    assert!(history
        .recommendations
        .iter()
        .any(|r| r.starts_with("Headcount crosses 11 employees between 2022 and 2024")));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["history"]["years"][2]["headcount"], 12);
}

fn amounts_batch(total: usize, round: usize) -> Declaration {
    let lines = (0..total)
        .map(|i| {
            let mut c = line(ContributionKind::Autre, "ledger");
            c.employe_id = format!("e{}", i);
            c.employer_amount = if i < round {
                Decimal::from(100 * (i as i64 % 7 + 1))
            } else {
                Decimal::new(12_345 + 911 * i as i64, 2)
            };
            c
        })
        .collect();
    let mut d = Declaration::new("ledger", DeclarationKind::PayrollLedger);
    d.cotisations = lines;
    d
}

#[test]
fn test_round_number_scenario() {
    let title = "High share of round amounts";
    let flagged = engine().run(&[amounts_batch(60, 20)]);
    assert_eq!(flagged.iter().filter(|f| f.title == title).count(), 1);

    let clean = engine().run(&[amounts_batch(100, 25)]);
    assert_eq!(clean.iter().filter(|f| f.title == title).count(), 0);
}

struct Exploding;

impl Analyzer for Exploding {
    fn name(&self) -> &'static str {
        "exploding"
    }

    fn analyze(&self, _: &[Declaration]) -> Result<Vec<Finding>, AnalysisError> {
        panic!("unexpected data shape")
    }
}

#[test]
fn test_panicking_analyzer_is_contained() {
    let settings = Arc::new(AnalysisSettings::default());
    let engine = AuditEngine::with_analyzers(vec![
        Box::new(Exploding),
        Box::new(audit_engine::PatternAnalyzer::new(Arc::clone(&settings))),
    ]);
    let findings = engine.run(&[amounts_batch(60, 20)]);

    let degraded: Vec<&Finding> = findings
        .iter()
        .filter(|f| f.detected_by == "audit_engine")
        .collect();
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].title, "Analysis error - exploding");
    assert_eq!(degraded[0].severity, Severity::Low);
    assert!(degraded[0].description.contains("unexpected data shape"));
    assert!(findings.iter().any(|f| f.detected_by == "patterns"));
}

#[test]
fn test_empty_catalog_degrades_conformance_only() {
    let engine = AuditEngine::new(
        Arc::new(RateCatalog::new(Vec::new())),
        Arc::new(AnalysisSettings::default()),
    );
    let findings = engine.run(&[amounts_batch(60, 20)]);
    assert!(findings
        .iter()
        .any(|f| f.title == "Analysis error - rule_conformance"));
    assert!(findings.iter().any(|f| f.detected_by == "patterns"));
}

#[test]
fn test_headcount_override_reaches_conformance() {
    let kinds = [
        ContributionKind::Maladie,
        ContributionKind::VieillessePlafonnee,
        ContributionKind::VieillesseDeplafonnee,
    ];
    let slip = payslip("slip", kinds.iter().map(|k| line(*k, "slip")).collect());
    let engine = AuditEngine::with_headcount_override(
        Arc::new(RateCatalog::embedded().unwrap()),
        Arc::new(AnalysisSettings::default()),
        Some(30),
    );
    let titles: Vec<String> = engine.run(&[slip]).into_iter().map(|f| f.title).collect();
    assert!(titles.contains(&"Missing headcount-gated contribution - versement_mobilite".to_string()));
    assert!(titles.contains(&"Missing headcount-gated contribution - peec".to_string()));
}

#[test]
fn test_report_synthesis() {
    let report: AuditReport = engine().audit(&mixed_batch());
    let s = &report.synthesis;
    assert_eq!(s.total_findings, report.findings.len());
    assert_eq!(s.by_severity.values().sum::<usize>(), report.findings.len());
    assert_eq!(s.by_category.values().sum::<usize>(), report.findings.len());

    let impact: Decimal = report.findings.iter().filter_map(|f| f.monetary_impact).sum();
    assert_eq!(s.total_monetary_impact, impact);
    assert!(s.global_risk_score <= 100);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["synthesis"]["total_findings"], report.findings.len());
    assert!(json["findings"].is_array());
}

//! Orchestration: run every analyzer, contain their faults, merge and sort.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use audit_types::{Declaration, Finding, FindingCategory, Severity};
use rate_engine::RateCatalog;
use rayon::prelude::*;
use tracing::{error, info, instrument, warn};

use crate::analyzers::{Analyzer, ConformanceAnalyzer, ConsistencyAnalyzer, PatternAnalyzer};
use crate::error::AnalysisError;
use crate::history::MultiYearOverview;
use crate::settings::AnalysisSettings;
use crate::synthesis::AuditReport;

const DETECTED_BY: &str = "audit_engine";

pub struct AuditEngine {
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl AuditEngine {
    /// Engine with the conformance, consistency and pattern analyzers
    pub fn new(catalog: Arc<RateCatalog>, settings: Arc<AnalysisSettings>) -> Self {
        Self::with_headcount_override(catalog, settings, None)
    }

    /// Same as [`AuditEngine::new`], with an entity-wide headcount that
    /// replaces the one found in the declarations
    pub fn with_headcount_override(
        catalog: Arc<RateCatalog>,
        settings: Arc<AnalysisSettings>,
        headcount: Option<u32>,
    ) -> Self {
        Self::with_analyzers(vec![
            Box::new(
                ConformanceAnalyzer::new(catalog, Arc::clone(&settings))
                    .with_headcount_override(headcount),
            ),
            Box::new(ConsistencyAnalyzer::new(Arc::clone(&settings))),
            Box::new(PatternAnalyzer::new(settings)),
        ])
    }

    pub fn with_analyzers(analyzers: Vec<Box<dyn Analyzer>>) -> Self {
        Self { analyzers }
    }

    pub fn analyzer_names(&self) -> Vec<&'static str> {
        self.analyzers.iter().map(|a| a.name()).collect()
    }

    /// Run all analyzers over `declarations` and return the sorted findings.
    ///
    /// Analyzers run in parallel and only meet again at the merge. A failing
    /// or panicking analyzer yields one low-severity finding naming it; the
    /// others are unaffected.
    #[instrument(skip_all, fields(declarations = declarations.len(), analyzers = self.analyzers.len()))]
    pub fn run(&self, declarations: &[Declaration]) -> Vec<Finding> {
        let per_analyzer: Vec<Vec<Finding>> = self
            .analyzers
            .par_iter()
            .map(|analyzer| run_contained(analyzer.as_ref(), declarations))
            .collect();

        let mut findings: Vec<Finding> = per_analyzer.into_iter().flatten().collect();
        sort_findings(&mut findings);
        findings
    }

    /// [`AuditEngine::run`] plus the synthesis and the multi-year overview
    pub fn audit(&self, declarations: &[Declaration]) -> AuditReport {
        let history = MultiYearOverview::from_declarations(declarations).unwrap_or_else(|e| {
            warn!(error = %e, "Multi-year overview unavailable");
            MultiYearOverview::default()
        });
        let report = AuditReport::new(self.run(declarations)).with_history(history);
        info!(
            findings = report.synthesis.total_findings,
            global_risk_score = report.synthesis.global_risk_score,
            years = report.history.years.len(),
            "Audit complete"
        );
        report
    }
}

fn run_contained(analyzer: &dyn Analyzer, declarations: &[Declaration]) -> Vec<Finding> {
    let name = analyzer.name();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(declarations)))
        .unwrap_or_else(|payload| Err(AnalysisError::Panicked(panic_message(payload.as_ref()))));

    match outcome {
        Ok(findings) => {
            info!(analyzer = name, findings = findings.len(), "Analyzer finished");
            findings
        }
        Err(e) => {
            error!(analyzer = name, error = %e, "Analyzer degraded");
            vec![degraded_finding(name, &e)]
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn degraded_finding(name: &str, error: &AnalysisError) -> Finding {
    Finding::new(
        FindingCategory::Anomaly,
        Severity::Low,
        format!("Analysis error - {}", name),
        DETECTED_BY,
    )
    .with_description(format!(
        "The {} analyzer stopped early: {}. Its checks are missing from this report.",
        name, error
    ))
    .with_risk_score(10)
    .with_recommendation("Check the input data and run the analysis again.")
}

/// Severity first (critical to low), then descending risk. Stable, so equal
/// findings keep the analyzer order.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        a.severity
            .cmp(&b.severity)
            .then_with(|| b.risk_score.cmp(&a.risk_score))
    });
}

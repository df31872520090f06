//! Aggregate view of a finding list

use std::collections::BTreeMap;

use audit_types::{Finding, FindingCategory, Severity};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::history::MultiYearOverview;

const SEVERITIES: [Severity; 4] = [
    Severity::Critical,
    Severity::High,
    Severity::Medium,
    Severity::Low,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub total_findings: usize,
    /// Every severity is present, with 0 when unused
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_category: BTreeMap<FindingCategory, usize>,
    pub total_monetary_impact: Decimal,
    /// Mean risk score, two decimals
    pub average_risk_score: Decimal,
    /// Severity-weighted risk on a 0-100 scale
    pub global_risk_score: u8,
}

impl Synthesis {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut by_severity: BTreeMap<Severity, usize> =
            SEVERITIES.iter().map(|s| (*s, 0)).collect();
        let mut by_category: BTreeMap<FindingCategory, usize> = BTreeMap::new();
        let mut total_monetary_impact = Decimal::ZERO;
        let mut score_sum: u64 = 0;
        let mut weighted_sum: u64 = 0;

        for f in findings {
            *by_severity.entry(f.severity).or_insert(0) += 1;
            *by_category.entry(f.category).or_insert(0) += 1;
            if let Some(impact) = f.monetary_impact {
                total_monetary_impact = total_monetary_impact.saturating_add(impact);
            }
            score_sum += u64::from(f.risk_score);
            weighted_sum += u64::from(f.severity.weight()) * u64::from(f.risk_score);
        }

        let n = findings.len() as u64;
        let (average_risk_score, global_risk_score) = if n == 0 {
            (Decimal::ZERO, 0)
        } else {
            let average = (Decimal::from(score_sum) / Decimal::from(n)).round_dp(2);
            // weighted_sum / (n * 4 * 100) * 100
            let global = (weighted_sum / (n * 4)).min(100) as u8;
            (average, global)
        };

        Self {
            total_findings: findings.len(),
            by_severity,
            by_category,
            total_monetary_impact,
            average_risk_score,
            global_risk_score,
        }
    }
}

/// What one audit run hands to the reporting layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Sorted by severity, then descending risk score
    pub findings: Vec<Finding>,
    pub synthesis: Synthesis,
    #[serde(default)]
    pub history: MultiYearOverview,
}

impl AuditReport {
    pub fn new(findings: Vec<Finding>) -> Self {
        let synthesis = Synthesis::from_findings(&findings);
        Self {
            findings,
            synthesis,
            history: MultiYearOverview::default(),
        }
    }

    pub fn with_history(mut self, history: MultiYearOverview) -> Self {
        self.history = history;
        self
    }
}

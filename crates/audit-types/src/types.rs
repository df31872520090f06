use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Finding severity. Declaration order is the report order: critical first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Weight used by the global risk score (critical=4 .. low=1)
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Critical => 4,
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Anomaly,
    Inconsistency,
    MissingData,
    ThresholdExceeded,
    SuspiciousPattern,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Anomaly => "anomaly",
            FindingCategory::Inconsistency => "inconsistency",
            FindingCategory::MissingData => "missing_data",
            FindingCategory::ThresholdExceeded => "threshold_exceeded",
            FindingCategory::SuspiciousPattern => "suspicious_pattern",
        }
    }
}

impl std::fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected issue. Built once through the consuming `with_*` methods and
/// never modified after it leaves the analyzer that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub expected: Option<String>,
    pub observed: Option<String>,
    pub monetary_impact: Option<Decimal>,
    /// 0-100
    pub risk_score: u8,
    pub recommendation: String,
    /// Name of the analyzer that emitted the finding
    pub detected_by: String,
    /// Source document identifiers
    pub documents: Vec<String>,
    pub legal_reference: Option<String>,
}

impl Finding {
    pub fn new(
        category: FindingCategory,
        severity: Severity,
        title: impl Into<String>,
        detected_by: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            title: title.into(),
            description: String::new(),
            expected: None,
            observed: None,
            monetary_impact: None,
            risk_score: 0,
            recommendation: String::new(),
            detected_by: detected_by.into(),
            documents: Vec::new(),
            legal_reference: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_observed(mut self, observed: impl Into<String>) -> Self {
        self.observed = Some(observed.into());
        self
    }

    pub fn with_impact(mut self, impact: Decimal) -> Self {
        self.monetary_impact = Some(impact);
        self
    }

    /// Scores above 100 are clamped
    pub fn with_risk_score(mut self, score: u32) -> Self {
        self.risk_score = score.min(100) as u8;
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    /// Empty identifiers are dropped so that records without a source
    /// document do not produce blank references.
    pub fn with_documents<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.documents = documents
            .into_iter()
            .map(Into::into)
            .filter(|d: &String| !d.is_empty())
            .collect();
        self
    }

    pub fn with_legal_reference(mut self, reference: impl Into<String>) -> Self {
        self.legal_reference = Some(reference.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_severity_orders_critical_first() {
        let mut severities = vec![Severity::Low, Severity::Critical, Severity::Medium, Severity::High];
        severities.sort();
        assert_eq!(
            severities,
            vec![Severity::Critical, Severity::High, Severity::Medium, Severity::Low]
        );
    }

    #[test]
    fn test_severity_weights() {
        assert_eq!(Severity::Critical.weight(), 4);
        assert_eq!(Severity::High.weight(), 3);
        assert_eq!(Severity::Medium.weight(), 2);
        assert_eq!(Severity::Low.weight(), 1);
    }

    #[test]
    fn test_risk_score_is_clamped() {
        let finding = Finding::new(FindingCategory::Anomaly, Severity::High, "t", "a")
            .with_risk_score(250);
        assert_eq!(finding.risk_score, 100);
    }

    #[test]
    fn test_blank_documents_are_dropped() {
        let finding = Finding::new(FindingCategory::Anomaly, Severity::Low, "t", "a")
            .with_documents(["doc-1", "", "doc-2"]);
        assert_eq!(finding.documents, vec!["doc-1".to_string(), "doc-2".to_string()]);
    }

    #[test]
    fn test_finding_serializes_snake_case() {
        let finding = Finding::new(
            FindingCategory::ThresholdExceeded,
            Severity::High,
            "Capped base above ceiling",
            "conformance",
        )
        .with_impact(dec!(995));
        let json = serde_json::to_string(&finding).unwrap();
        assert!(json.contains("\"threshold_exceeded\""));
        assert!(json.contains("\"high\""));
        assert!(json.contains("\"995\""));
    }
}

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::contribution::ContributionKind;

/// Status keywords that mark an apprenticeship or work-study contract.
///
/// Substring match on a free-text field: a best-effort classifier that misses
/// any phrasing not listed here.
pub const APPRENTICE_KEYWORDS: &[&str] = &[
    "apprenti",
    "apprentissage",
    "alternance",
    "alternant",
    "contrat de professionnalisation",
    "apprentice",
];

/// Declared period, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Key used to group declarations covering the same period
    pub fn key(&self) -> (NaiveDate, NaiveDate) {
        (self.start, self.end)
    }

    /// (year, month) of the period start
    pub fn month(&self) -> (i32, u32) {
        (self.start.year(), self.start.month())
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// Legal entity behind a declaration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Employeur {
    pub id: String,
    /// 9-digit registry root
    pub siren: String,
    /// 14-digit establishment identifier
    pub siret: String,
    pub name: String,
    pub headcount: u32,
    pub naf_code: String,
    /// Entity-specific work accident rate (AT/MP). Zero when unknown.
    pub incident_rate: Decimal,
    /// Regional transit contribution rate set by the local mobility authority
    pub transit_rate: Option<Decimal>,
    /// Alsace-Moselle local regime
    pub local_regime: bool,
    pub source_document_id: String,
}

/// Identity used to reconcile the same person across documents
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeIdentity {
    Nir(String),
    Name { last_name: String, first_name: String },
}

impl std::fmt::Display for EmployeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmployeIdentity::Nir(nir) => f.write_str(nir),
            EmployeIdentity::Name {
                last_name,
                first_name,
            } => write!(f, "{} {}", last_name, first_name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Employe {
    pub id: String,
    pub nir: String,
    pub last_name: String,
    pub first_name: String,
    pub status: String,
    pub hired_on: Option<NaiveDate>,
    pub left_on: Option<NaiveDate>,
    pub source_document_id: String,
}

impl Employe {
    /// NIR when present, otherwise the normalized name tuple
    pub fn identity(&self) -> EmployeIdentity {
        let nir = self.nir.trim();
        if !nir.is_empty() {
            return EmployeIdentity::Nir(nir.replace(' ', ""));
        }
        EmployeIdentity::Name {
            last_name: self.last_name.trim().to_lowercase(),
            first_name: self.first_name.trim().to_lowercase(),
        }
    }

    pub fn has_nir(&self) -> bool {
        !self.nir.trim().is_empty()
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.last_name.trim(), self.first_name.trim())
            .trim()
            .to_string()
    }

    /// Best-effort apprenticeship detection from the status text
    pub fn is_apprentice(&self) -> bool {
        let status = self.status.to_lowercase();
        APPRENTICE_KEYWORDS.iter().any(|k| status.contains(k))
    }
}

/// One contribution line. Zero amounts and rates mean "not supplied".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cotisation {
    pub id: String,
    pub kind: ContributionKind,
    pub gross_base: Decimal,
    pub assessed_base: Decimal,
    pub employer_rate: Decimal,
    pub employee_rate: Decimal,
    pub employer_amount: Decimal,
    pub employee_amount: Decimal,
    pub period: Option<Period>,
    pub employe_id: String,
    pub employeur_id: String,
    pub source_document_id: String,
}

impl Default for Cotisation {
    fn default() -> Self {
        Self::new(ContributionKind::Autre)
    }
}

impl Cotisation {
    pub fn new(kind: ContributionKind) -> Self {
        Self {
            id: String::new(),
            kind,
            gross_base: Decimal::ZERO,
            assessed_base: Decimal::ZERO,
            employer_rate: Decimal::ZERO,
            employee_rate: Decimal::ZERO,
            employer_amount: Decimal::ZERO,
            employee_amount: Decimal::ZERO,
            period: None,
            employe_id: String::new(),
            employeur_id: String::new(),
            source_document_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclarationKind {
    Dsn,
    Ducs,
    Payslip,
    PayrollLedger,
    ContributionSlip,
    Invoice,
    Contract,
    Accounting,
    #[default]
    Other,
}

impl DeclarationKind {
    /// Documents that carry payroll contribution lines
    pub fn is_payroll_document(&self) -> bool {
        matches!(
            self,
            DeclarationKind::Dsn
                | DeclarationKind::Ducs
                | DeclarationKind::Payslip
                | DeclarationKind::PayrollLedger
                | DeclarationKind::ContributionSlip
        )
    }

    /// Nominal monthly wage declaration subject to structural checks
    pub fn is_nominal_declaration(&self) -> bool {
        matches!(self, DeclarationKind::Dsn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeclarationKind::Dsn => "dsn",
            DeclarationKind::Ducs => "ducs",
            DeclarationKind::Payslip => "payslip",
            DeclarationKind::PayrollLedger => "payroll_ledger",
            DeclarationKind::ContributionSlip => "contribution_slip",
            DeclarationKind::Invoice => "invoice",
            DeclarationKind::Contract => "contract",
            DeclarationKind::Accounting => "accounting",
            DeclarationKind::Other => "other",
        }
    }
}

impl std::fmt::Display for DeclarationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural blocks of a nominal wage declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DsnBlock {
    EmployerIdentity,
    Establishment,
    Individual,
    Contract,
    Remuneration,
    AssessedBase,
    IndividualContribution,
    AggregateContribution,
    Bordereau,
}

impl DsnBlock {
    pub const REQUIRED: [DsnBlock; 9] = [
        DsnBlock::EmployerIdentity,
        DsnBlock::Establishment,
        DsnBlock::Individual,
        DsnBlock::Contract,
        DsnBlock::Remuneration,
        DsnBlock::AssessedBase,
        DsnBlock::IndividualContribution,
        DsnBlock::AggregateContribution,
        DsnBlock::Bordereau,
    ];

    /// Block identifier in the DSN norm
    pub fn code(&self) -> &'static str {
        match self {
            DsnBlock::EmployerIdentity => "S21.G00.06",
            DsnBlock::Establishment => "S21.G00.11",
            DsnBlock::Individual => "S21.G00.30",
            DsnBlock::Contract => "S21.G00.40",
            DsnBlock::Remuneration => "S21.G00.51",
            DsnBlock::AssessedBase => "S21.G00.78",
            DsnBlock::IndividualContribution => "S21.G00.81",
            DsnBlock::AggregateContribution => "S21.G00.23",
            DsnBlock::Bordereau => "S21.G00.22",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DsnBlock::EmployerIdentity => "employer identity",
            DsnBlock::Establishment => "establishment",
            DsnBlock::Individual => "individual",
            DsnBlock::Contract => "contract",
            DsnBlock::Remuneration => "remuneration",
            DsnBlock::AssessedBase => "assessed base",
            DsnBlock::IndividualContribution => "individual contribution",
            DsnBlock::AggregateContribution => "aggregate contribution",
            DsnBlock::Bordereau => "bordereau",
        }
    }
}

/// Parser-supplied side data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclarationMetadata {
    /// Contribution total printed on the document itself
    pub declared_contribution_total: Option<Decimal>,
    /// Blocks the parser saw explicitly
    pub structural_blocks: BTreeSet<DsnBlock>,
    /// Contribution type codes (CTP) found in aggregate blocks
    pub ctp_codes: Vec<String>,
    pub source_format: Option<String>,
}

/// One parsed document for one period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Declaration {
    pub id: String,
    pub kind: DeclarationKind,
    pub reference: String,
    pub period: Option<Period>,
    pub employeur: Option<Employeur>,
    pub employes: Vec<Employe>,
    pub cotisations: Vec<Cotisation>,
    /// Declared gross payroll mass. Zero when not supplied.
    pub declared_payroll_mass: Decimal,
    /// Declared headcount. Zero when not supplied.
    pub declared_headcount: u32,
    pub source_document_id: String,
    pub metadata: DeclarationMetadata,
}

impl Declaration {
    pub fn new(id: impl Into<String>, kind: DeclarationKind) -> Self {
        let id = id.into();
        Self {
            source_document_id: id.clone(),
            id,
            kind,
            ..Default::default()
        }
    }

    pub fn employe(&self, employe_id: &str) -> Option<&Employe> {
        self.employes.iter().find(|e| e.id == employe_id)
    }

    /// Sum of employer amounts over all lines
    pub fn total_employer_amount(&self) -> Decimal {
        self.cotisations.iter().map(|c| c.employer_amount).sum()
    }

    /// Headcount from the employer record, else the declared headcount
    pub fn effective_headcount(&self) -> u32 {
        match &self.employeur {
            Some(e) if e.headcount > 0 => e.headcount,
            _ => self.declared_headcount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn employe(nir: &str, last: &str, first: &str, status: &str) -> Employe {
        Employe {
            id: "e1".to_string(),
            nir: nir.to_string(),
            last_name: last.to_string(),
            first_name: first.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identity_prefers_nir() {
        let e = employe("1 85 05 75 123 456", "Martin", "Paul", "");
        assert_eq!(e.identity(), EmployeIdentity::Nir("1850575123456".to_string()));
    }

    #[test]
    fn test_identity_falls_back_to_normalized_name() {
        let a = employe("", " Martin ", "Paul", "");
        let b = employe("  ", "MARTIN", "paul", "");
        assert_eq!(a.identity(), b.identity());
        assert_eq!(
            a.identity(),
            EmployeIdentity::Name {
                last_name: "martin".to_string(),
                first_name: "paul".to_string(),
            }
        );
    }

    #[test]
    fn test_apprentice_keywords() {
        assert!(employe("", "", "", "Apprenti 1ere annee").is_apprentice());
        assert!(employe("", "", "", "Contrat de professionnalisation").is_apprentice());
        assert!(employe("", "", "", "ALTERNANT").is_apprentice());
        assert!(!employe("", "", "", "CDI cadre").is_apprentice());
        assert!(!employe("", "", "", "").is_apprentice());
    }

    #[test]
    fn test_declaration_kind_families() {
        assert!(DeclarationKind::Dsn.is_payroll_document());
        assert!(DeclarationKind::Payslip.is_payroll_document());
        assert!(!DeclarationKind::Invoice.is_payroll_document());
        assert!(!DeclarationKind::Contract.is_payroll_document());
        assert!(DeclarationKind::Dsn.is_nominal_declaration());
        assert!(!DeclarationKind::Ducs.is_nominal_declaration());
    }

    #[test]
    fn test_period_month() {
        let p = Period::new(
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        );
        assert_eq!(p.month(), (2026, 3));
    }

    #[test]
    fn test_effective_headcount_precedence() {
        let mut decl = Declaration::new("d1", DeclarationKind::Dsn);
        decl.declared_headcount = 12;
        assert_eq!(decl.effective_headcount(), 12);

        decl.employeur = Some(Employeur {
            headcount: 30,
            ..Default::default()
        });
        assert_eq!(decl.effective_headcount(), 30);
    }

    #[test]
    fn test_cotisation_deserializes_with_defaults() {
        let json = r#"{"kind":"maladie","gross_base":"3000.00","employer_amount":"210.00"}"#;
        let c: Cotisation = serde_json::from_str(json).unwrap();
        assert_eq!(c.kind, ContributionKind::Maladie);
        assert_eq!(c.gross_base, dec!(3000.00));
        assert_eq!(c.employer_rate, Decimal::ZERO);
        assert!(c.period.is_none());
    }

    #[test]
    fn test_total_employer_amount() {
        let mut decl = Declaration::new("d1", DeclarationKind::Ducs);
        for amount in [dec!(10.50), dec!(20.25)] {
            let mut c = Cotisation::new(ContributionKind::Maladie);
            c.employer_amount = amount;
            decl.cotisations.push(c);
        }
        assert_eq!(decl.total_employer_amount(), dec!(30.75));
    }
}

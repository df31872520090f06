use serde::{Deserialize, Serialize};

/// Contribution categories recognised by the rate tables.
///
/// The wire form is the snake_case name, which is also the key used in the
/// `[categories]` section of a rate table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionKind {
    // Social security
    Maladie,
    MaladieAlsaceMoselle,
    VieillessePlafonnee,
    VieillesseDeplafonnee,
    AllocationsFamiliales,
    AccidentTravail,

    // CSG / CRDS
    CsgDeductible,
    CsgNonDeductible,
    Crds,

    // Other URSSAF contributions
    Fnal,
    VersementMobilite,
    Csa,
    DialogueSocial,

    // Unemployment and wage guarantee
    AssuranceChomage,
    Ags,

    // Training and apprenticeship
    FormationProfessionnelle,
    TaxeApprentissage,
    CpfCdd,
    CsaApprentissage,

    // Construction effort
    Peec,

    // Complementary pension
    RetraiteComplementaireT1,
    RetraiteComplementaireT2,
    CegT1,
    CegT2,
    Cet,
    Apec,

    // Provident schemes
    PrevoyanceCadre,
    PrevoyanceNonCadre,
    MutuelleObligatoire,

    ForfaitSocial,
    ForfaitSocialReduit,
    TaxeSurSalaires,

    // Reductions and exemptions
    Rgdu,
    Acre,
    ExonerationZrr,
    ExonerationZfu,
    LoiFillon,

    AvantageNature,
    Autre,
}

impl ContributionKind {
    pub const ALL: [ContributionKind; 39] = [
        ContributionKind::Maladie,
        ContributionKind::MaladieAlsaceMoselle,
        ContributionKind::VieillessePlafonnee,
        ContributionKind::VieillesseDeplafonnee,
        ContributionKind::AllocationsFamiliales,
        ContributionKind::AccidentTravail,
        ContributionKind::CsgDeductible,
        ContributionKind::CsgNonDeductible,
        ContributionKind::Crds,
        ContributionKind::Fnal,
        ContributionKind::VersementMobilite,
        ContributionKind::Csa,
        ContributionKind::DialogueSocial,
        ContributionKind::AssuranceChomage,
        ContributionKind::Ags,
        ContributionKind::FormationProfessionnelle,
        ContributionKind::TaxeApprentissage,
        ContributionKind::CpfCdd,
        ContributionKind::CsaApprentissage,
        ContributionKind::Peec,
        ContributionKind::RetraiteComplementaireT1,
        ContributionKind::RetraiteComplementaireT2,
        ContributionKind::CegT1,
        ContributionKind::CegT2,
        ContributionKind::Cet,
        ContributionKind::Apec,
        ContributionKind::PrevoyanceCadre,
        ContributionKind::PrevoyanceNonCadre,
        ContributionKind::MutuelleObligatoire,
        ContributionKind::ForfaitSocial,
        ContributionKind::ForfaitSocialReduit,
        ContributionKind::TaxeSurSalaires,
        ContributionKind::Rgdu,
        ContributionKind::Acre,
        ContributionKind::ExonerationZrr,
        ContributionKind::ExonerationZfu,
        ContributionKind::LoiFillon,
        ContributionKind::AvantageNature,
        ContributionKind::Autre,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionKind::Maladie => "maladie",
            ContributionKind::MaladieAlsaceMoselle => "maladie_alsace_moselle",
            ContributionKind::VieillessePlafonnee => "vieillesse_plafonnee",
            ContributionKind::VieillesseDeplafonnee => "vieillesse_deplafonnee",
            ContributionKind::AllocationsFamiliales => "allocations_familiales",
            ContributionKind::AccidentTravail => "accident_travail",
            ContributionKind::CsgDeductible => "csg_deductible",
            ContributionKind::CsgNonDeductible => "csg_non_deductible",
            ContributionKind::Crds => "crds",
            ContributionKind::Fnal => "fnal",
            ContributionKind::VersementMobilite => "versement_mobilite",
            ContributionKind::Csa => "csa",
            ContributionKind::DialogueSocial => "dialogue_social",
            ContributionKind::AssuranceChomage => "assurance_chomage",
            ContributionKind::Ags => "ags",
            ContributionKind::FormationProfessionnelle => "formation_professionnelle",
            ContributionKind::TaxeApprentissage => "taxe_apprentissage",
            ContributionKind::CpfCdd => "cpf_cdd",
            ContributionKind::CsaApprentissage => "csa_apprentissage",
            ContributionKind::Peec => "peec",
            ContributionKind::RetraiteComplementaireT1 => "retraite_complementaire_t1",
            ContributionKind::RetraiteComplementaireT2 => "retraite_complementaire_t2",
            ContributionKind::CegT1 => "ceg_t1",
            ContributionKind::CegT2 => "ceg_t2",
            ContributionKind::Cet => "cet",
            ContributionKind::Apec => "apec",
            ContributionKind::PrevoyanceCadre => "prevoyance_cadre",
            ContributionKind::PrevoyanceNonCadre => "prevoyance_non_cadre",
            ContributionKind::MutuelleObligatoire => "mutuelle_obligatoire",
            ContributionKind::ForfaitSocial => "forfait_social",
            ContributionKind::ForfaitSocialReduit => "forfait_social_reduit",
            ContributionKind::TaxeSurSalaires => "taxe_sur_salaires",
            ContributionKind::Rgdu => "rgdu",
            ContributionKind::Acre => "acre",
            ContributionKind::ExonerationZrr => "exoneration_zrr",
            ContributionKind::ExonerationZfu => "exoneration_zfu",
            ContributionKind::LoiFillon => "loi_fillon",
            ContributionKind::AvantageNature => "avantage_nature",
            ContributionKind::Autre => "autre",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for ContributionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

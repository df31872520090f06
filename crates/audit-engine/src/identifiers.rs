//! Formats of the registry and declaration codes checked on nominal
//! declarations

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Establishment identifier: 14 digits
    static ref SIRET_PATTERN: Regex = Regex::new(r"^\d{14}$").unwrap();

    /// Registry root: 9 digits
    static ref SIREN_PATTERN: Regex = Regex::new(r"^\d{9}$").unwrap();

    /// Contribution type code: 3 digits with an optional capital letter
    static ref CTP_PATTERN: Regex = Regex::new(r"^\d{3}[A-Z]?$").unwrap();
}

/// Strip the spaces parsers keep from printed forms
pub fn compact(identifier: &str) -> String {
    identifier.chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn is_valid_siret(siret: &str) -> bool {
    SIRET_PATTERN.is_match(&compact(siret))
}

pub fn is_valid_siren(siren: &str) -> bool {
    SIREN_PATTERN.is_match(&compact(siren))
}

/// The first nine digits of a SIRET are the SIREN of its entity
pub fn siret_matches_siren(siret: &str, siren: &str) -> bool {
    let siret = compact(siret);
    let siren = compact(siren);
    siret.len() == 14 && siret.get(..9) == Some(siren.as_str())
}

pub fn is_valid_ctp(code: &str) -> bool {
    CTP_PATTERN.is_match(code.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_siret_format() {
        assert!(is_valid_siret("73282932000074"));
        assert!(is_valid_siret("732 829 320 00074"));
        assert!(!is_valid_siret("7328293200007"));
        assert!(!is_valid_siret("7328293200007A"));
        assert!(!is_valid_siret(""));
    }

    #[test]
    fn test_siren_format() {
        assert!(is_valid_siren("732829320"));
        assert!(!is_valid_siren("73282932"));
    }

    #[test]
    fn test_siret_prefix() {
        assert!(siret_matches_siren("73282932000074", "732829320"));
        assert!(siret_matches_siren("732 829 320 00074", "732 829 320"));
        assert!(!siret_matches_siren("73282932000074", "552100554"));
    }

    #[test]
    fn test_ctp_codes() {
        assert!(is_valid_ctp("100"));
        assert!(is_valid_ctp("668"));
        assert!(is_valid_ctp("027A"));
        assert!(!is_valid_ctp("10"));
        assert!(!is_valid_ctp("1000"));
        assert!(!is_valid_ctp("100a"));
        assert!(!is_valid_ctp("ABC"));
    }
}

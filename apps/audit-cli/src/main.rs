//! Payroll audit binary
//!
//! Reads canonical declarations (JSON, as produced by the document parsers),
//! runs the audit pipeline and prints the findings and synthesis as JSON on
//! stdout. Logs go to stderr.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use audit_engine::{AnalysisSettings, AuditEngine};
use audit_types::Declaration;
use clap::Parser;
use rate_engine::RateCatalog;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "payroll-audit")]
#[command(
    version,
    about = "Audit payroll contribution declarations against the regulatory rate table"
)]
struct Args {
    /// JSON array of declarations, or "-" for stdin
    #[arg(short, long)]
    declarations: PathBuf,

    /// Rate table (TOML). Repeat for several regulatory periods.
    /// The embedded 2026 table is used when none is given.
    #[arg(short, long = "rate-table")]
    rate_tables: Vec<PathBuf>,

    /// Analysis thresholds (TOML)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Entity-wide headcount, overrides the declared ones
    #[arg(long)]
    headcount: Option<u32>,

    /// Pretty-print the report
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries the report
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let catalog = load_catalog(&args.rate_tables)?;
    let settings = match &args.settings {
        Some(path) => AnalysisSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => AnalysisSettings::default(),
    };
    let declarations = load_declarations(&args.declarations)?;
    tracing::info!(
        declarations = declarations.len(),
        rate_tables = catalog.len(),
        "Starting audit"
    );

    let engine =
        AuditEngine::with_headcount_override(Arc::new(catalog), Arc::new(settings), args.headcount);
    let report = engine.audit(&declarations);

    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", json).context("Failed to write report")?;
    Ok(())
}

fn load_catalog(paths: &[PathBuf]) -> Result<RateCatalog> {
    if paths.is_empty() {
        return RateCatalog::embedded().context("Embedded rate table is invalid");
    }
    let catalog = RateCatalog::from_files(paths).context("Failed to load rate tables")?;
    if catalog.is_empty() {
        bail!("No rate table loaded");
    }
    Ok(catalog)
}

fn load_declarations(path: &Path) -> Result<Vec<Declaration>> {
    let raw = if path.as_os_str() == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read declarations from stdin")?;
        buf
    } else {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read declarations from {}", path.display()))?
    };
    parse_declarations(&raw)
}

fn parse_declarations(raw: &str) -> Result<Vec<Declaration>> {
    serde_json::from_str(raw).context("Declarations must be a JSON array of declaration records")
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_types::{ContributionKind, DeclarationKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_minimal_declarations() {
        let raw = r#"[
            {
                "id": "slip-1",
                "kind": "payslip",
                "period": { "start": "2026-01-01", "end": "2026-01-31" },
                "cotisations": [
                    { "kind": "maladie", "gross_base": "-1000" }
                ]
            }
        ]"#;
        let declarations = parse_declarations(raw).unwrap();
        assert_eq!(declarations.len(), 1);
        assert_eq!(declarations[0].kind, DeclarationKind::Payslip);
        assert_eq!(declarations[0].cotisations[0].kind, ContributionKind::Maladie);
    }

    #[test]
    fn test_rejects_non_array() {
        assert!(parse_declarations(r#"{ "id": "x" }"#).is_err());
    }

    #[test]
    fn test_default_catalog_is_embedded() {
        let catalog = load_catalog(&[]).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "payroll-audit",
            "--declarations",
            "in.json",
            "--rate-table",
            "2025.toml",
            "--rate-table",
            "2026.toml",
            "--headcount",
            "42",
        ]);
        assert_eq!(args.rate_tables.len(), 2);
        assert_eq!(args.headcount, Some(42));
        assert!(!args.pretty);
    }
}

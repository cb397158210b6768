#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the incident report store.
//!
//! Reads report forms as JSON, prints stored reports as JSON, and exposes
//! the moderation and verification actions.

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use street_watch_database::reports::{self, SubmitError};
use street_watch_database::{Connection, open, open_default, paths};
use street_watch_report_models::{Report, ReportForm, ReportScope, ReportSettings};

#[derive(Parser)]
#[command(name = "street_watch", about = "Incident report store")]
struct Cli {
    /// Reports `DuckDB` file (defaults to `STREET_WATCH_DB`, then
    /// `data/street_watch.duckdb`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Settings TOML file (defaults to `data/street_watch.toml` if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and store a report form read from a JSON file
    Submit {
        /// Path to the JSON form
        file: PathBuf,
    },
    /// Approve a report for public display
    Approve {
        /// Report ID
        id: i64,
    },
    /// Withdraw a report from public display
    Unapprove {
        /// Report ID
        id: i64,
    },
    /// Confirm the report holding a verification code
    Verify {
        /// Verification code from the confirmation e-mail
        code: String,
    },
    /// List reports in a scope
    List {
        /// One of `all`, `approved`, `latest`, `latest_for_map`
        #[arg(long, default_value = "all", value_parser = parse_scope)]
        scope: ReportScope,
    },
    /// Show a single report
    Show {
        /// Report ID
        id: i64,
    },
}

/// A report as printed, with its derived sort timestamp.
#[derive(Serialize)]
struct ReportView<'a> {
    #[serde(flatten)]
    report: &'a Report,
    created_at_or_verified_at: i64,
    is_from_isw: bool,
}

impl<'a> ReportView<'a> {
    fn new(report: &'a Report, settings: &ReportSettings) -> Self {
        Self {
            report,
            created_at_or_verified_at: report.created_at_or_verified_at(),
            is_from_isw: report.is_from_isw(settings),
        }
    }
}

fn parse_scope(s: &str) -> Result<ReportScope, String> {
    s.parse().map_err(|_| {
        let names: Vec<&str> = ReportScope::all().iter().map(|scope| scope.as_ref()).collect();
        format!("unknown scope {s:?}, expected one of: {}", names.join(", "))
    })
}

fn load_settings(config: Option<&Path>) -> Result<ReportSettings, Box<dyn std::error::Error>> {
    let default_path = paths::settings_path();
    let path = match config {
        Some(path) => Some(path),
        None if default_path.exists() => Some(default_path.as_path()),
        None => None,
    };

    let settings = match path {
        Some(path) => {
            log::debug!("Loading settings from {}", path.display());
            ReportSettings::from_toml_str(&std::fs::read_to_string(path)?)?
        }
        None => ReportSettings::default(),
    };

    Ok(settings.with_env(|key| std::env::var(key).ok())?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn find_or_fail(conn: &Connection, id: i64) -> Result<Report, Box<dyn std::error::Error>> {
    reports::find(conn, id)?.ok_or_else(|| format!("No report with id {id}").into())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let settings = load_settings(cli.config.as_deref())?;
    let conn = match &cli.db {
        Some(path) => open(path)?,
        None => open_default()?,
    };
    let now = Utc::now();

    match cli.command {
        Commands::Submit { file } => {
            let form: ReportForm = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            match reports::submit(&conn, &form, now, &settings, &mut rand::thread_rng()) {
                Ok(report) => print_json(&ReportView::new(&report, &settings))?,
                Err(SubmitError::Invalid(errors)) => {
                    for message in errors.full_messages() {
                        eprintln!("{message}");
                    }
                    std::process::exit(1);
                }
                Err(SubmitError::Db(e)) => return Err(e.into()),
            }
        }
        Commands::Approve { id } => {
            let mut report = find_or_fail(&conn, id)?;
            reports::set_approved(&conn, &mut report, true, now)?;
            print_json(&ReportView::new(&report, &settings))?;
        }
        Commands::Unapprove { id } => {
            let mut report = find_or_fail(&conn, id)?;
            reports::set_approved(&conn, &mut report, false, now)?;
            print_json(&ReportView::new(&report, &settings))?;
        }
        Commands::Verify { code } => {
            let report = reports::verify_by_code(&conn, &code, now)?
                .ok_or("No report holds that verification code")?;
            print_json(&ReportView::new(&report, &settings))?;
        }
        Commands::List { scope } => {
            let rows = reports::query(&conn, scope)?;
            let mappable = rows.iter().filter(|r| r.has_coordinates()).count();
            log::info!("{} report(s) in scope {scope}, {mappable} with coordinates", rows.len());
            let views: Vec<ReportView<'_>> = rows
                .iter()
                .map(|report| ReportView::new(report, &settings))
                .collect();
            print_json(&views)?;
        }
        Commands::Show { id } => {
            let report = find_or_fail(&conn, id)?;
            print_json(&ReportView::new(&report, &settings))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_scope_name() {
        for scope in ReportScope::all() {
            assert_eq!(parse_scope(scope.as_ref()).unwrap(), *scope);
        }
    }

    #[test]
    fn unknown_scope_lists_choices() {
        let err = parse_scope("newest").unwrap_err();
        assert!(err.contains("latest_for_map"), "{err}");
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory as _;
        Cli::command().debug_assert();
    }

    #[test]
    fn list_defaults_to_all_scope() {
        let cli = Cli::try_parse_from(["street_watch", "list"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::List {
                scope: ReportScope::All
            }
        ));
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! `DuckDB` storage for incident reports.
//!
//! Reports live in a single `DuckDB` file (see [`paths::report_db_path`]).
//! Creating a report runs the lifecycle [`hooks`] before the row is
//! written; [`reports`] holds the scopes and the moderation and
//! verification updates.

pub mod hooks;
pub mod paths;
pub mod reports;

use std::path::Path;

pub use duckdb::Connection;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error while preparing the data directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode or decode a JSON column.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hook settings are unusable.
    #[error(transparent)]
    Settings(#[from] street_watch_report_models::SettingsError),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// Every jittered location near the requested one was already taken.
    #[error("No free location near ({lat}, {lng}) after {attempts} attempts")]
    CoordinatesExhausted {
        /// Requested latitude.
        lat: f64,
        /// Requested longitude.
        lng: f64,
        /// Number of offsets tried.
        attempts: u32,
    },

    /// Every drawn verification code was already in use.
    #[error("No unused verification code after {attempts} attempts")]
    VerificationCodeExhausted {
        /// Number of codes drawn.
        attempts: u32,
    },
}

/// Opens (or creates) the reports `DuckDB` and ensures the schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;
    create_schema(&conn)?;
    log::debug!("Opened report database at {}", path.display());
    Ok(conn)
}

/// Opens the reports DB at the default path.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_default() -> Result<Connection, DbError> {
    open(&paths::report_db_path())
}

/// Opens a throwaway in-memory reports DB.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open_in_memory() -> Result<Connection, DbError> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Timestamps are stored as microseconds since the Unix epoch and the
/// incident date as `YYYY-MM-DD` text. `type_incident` is a JSON array.
fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE SEQUENCE IF NOT EXISTS reports_id_seq START 1;

        CREATE TABLE IF NOT EXISTS reports (
            id BIGINT PRIMARY KEY,
            informant_name TEXT NOT NULL,
            informant_email TEXT NOT NULL,
            informant_role TEXT NOT NULL,
            type_incident TEXT NOT NULL,
            type_incident_other TEXT,
            description TEXT NOT NULL,
            support BOOLEAN NOT NULL,
            date TEXT NOT NULL,
            town TEXT NOT NULL,
            type_location TEXT NOT NULL,
            type_location_other TEXT,
            lat DOUBLE,
            lng DOUBLE,
            reported_to_police BOOLEAN NOT NULL,
            approved BOOLEAN NOT NULL DEFAULT FALSE,
            approved_at BIGINT,
            verification_code TEXT,
            verified_at BIGINT,
            created_at BIGINT NOT NULL
        );",
    )?;
    Ok(())
}

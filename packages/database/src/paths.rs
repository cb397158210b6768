//! Canonical file paths for the report data directory.
//!
//! All defaults are relative to the project root's `data/` directory.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
///
/// # Panics
///
/// Panics if the project root cannot be resolved.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("Failed to find project root from CARGO_MANIFEST_DIR")
        .to_path_buf()
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the reports `DuckDB` path.
///
/// `STREET_WATCH_DB` overrides the default `data/street_watch.duckdb`.
#[must_use]
pub fn report_db_path() -> PathBuf {
    std::env::var_os("STREET_WATCH_DB")
        .map_or_else(|| data_dir().join("street_watch.duckdb"), PathBuf::from)
}

/// Returns the default settings file path, `data/street_watch.toml`.
#[must_use]
pub fn settings_path() -> PathBuf {
    data_dir().join("street_watch.toml")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

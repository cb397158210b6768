//! Report persistence, scopes, moderation, and verification.
//!
//! [`create_report`] runs the [`crate::hooks`] in order (location jitter,
//! approval timestamp, verification code) before inserting the row.

use chrono::{DateTime, NaiveDate, Utc};
use duckdb::{Connection, params};
use rand::Rng;
use street_watch_report_models::{
    DATE_FORMAT, NewReport, Report, ReportForm, ReportScope, ReportSettings,
};

use crate::{DbError, hooks};

const REPORT_COLUMNS: &str = "id, informant_name, informant_email, informant_role,
    type_incident, type_incident_other, description, support, date, town,
    type_location, type_location_other, lat, lng, reported_to_police,
    approved, approved_at, verification_code, verified_at, created_at";

/// Errors from submitting a report form.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The form failed validation.
    #[error("Report is invalid: {0}")]
    Invalid(#[from] street_watch_report_models::ValidationErrors),

    /// The report could not be stored.
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Validates a submitted form against `now` and stores it.
///
/// Reports from the trusted sender skip e-mail confirmation: their
/// verification code is removed and they are verified immediately.
///
/// # Errors
///
/// Returns [`SubmitError::Invalid`] with every failed rule, or
/// [`SubmitError::Db`] if storage fails.
pub fn submit<R: Rng>(
    conn: &Connection,
    form: &ReportForm,
    now: DateTime<Utc>,
    settings: &ReportSettings,
    rng: &mut R,
) -> Result<Report, SubmitError> {
    let new_report = form.validate(now.date_naive())?;
    let mut report = create_report(conn, &new_report, now, settings, rng)?;

    if report.is_from_isw(settings) {
        log::info!("Report {} is from the trusted sender, verifying", report.id);
        verify_without_code(conn, &mut report, now)?;
    }

    Ok(report)
}

/// Runs the creation hooks and inserts a report created at `now`.
///
/// # Errors
///
/// Returns [`DbError`] if a hook gives up or the insert fails.
pub fn create_report<R: Rng>(
    conn: &Connection,
    new_report: &NewReport,
    now: DateTime<Utc>,
    settings: &ReportSettings,
    rng: &mut R,
) -> Result<Report, DbError> {
    let (lat, lng) = match new_report.coordinates() {
        Some((lat, lng)) => {
            let (lat, lng) =
                hooks::check_lat_lng(lat, lng, settings, rng, |lat, lng| {
                    coordinates_taken(conn, lat, lng)
                })?;
            (Some(lat), Some(lng))
        }
        None => (new_report.lat, new_report.lng),
    };

    let approved_at = hooks::set_approved_at(new_report.approved, None, now);

    let verification_code =
        hooks::set_verification_code(settings, rng, |code| verification_code_taken(conn, code))?;

    let id: i64 = conn.query_row("SELECT nextval('reports_id_seq')", [], |row| row.get(0))?;

    let report = Report {
        id,
        informant_name: new_report.informant_name.clone(),
        informant_email: new_report.informant_email.clone(),
        informant_role: new_report.informant_role.clone(),
        type_incident: new_report.type_incident.clone(),
        type_incident_other: new_report.type_incident_other.clone(),
        description: new_report.description.clone(),
        support: new_report.support,
        date: new_report.date,
        town: new_report.town.clone(),
        type_location: new_report.type_location.clone(),
        type_location_other: new_report.type_location_other.clone(),
        lat,
        lng,
        reported_to_police: new_report.reported_to_police,
        approved: new_report.approved,
        approved_at,
        verification_code: Some(verification_code),
        verified_at: None,
        created_at: now,
    };

    insert(conn, &report)?;
    log::info!("Created report {} in {}", report.id, report.town);

    Ok(report)
}

fn insert(conn: &Connection, report: &Report) -> Result<(), DbError> {
    let type_incident = serde_json::to_string(&report.type_incident)?;
    let date = report.date.format(DATE_FORMAT).to_string();

    conn.execute(
        "INSERT INTO reports (
            id, informant_name, informant_email, informant_role,
            type_incident, type_incident_other, description, support, date, town,
            type_location, type_location_other, lat, lng, reported_to_police,
            approved, approved_at, verification_code, verified_at, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            report.id,
            report.informant_name,
            report.informant_email,
            report.informant_role,
            type_incident,
            report.type_incident_other,
            report.description,
            report.support,
            date,
            report.town,
            report.type_location,
            report.type_location_other,
            report.lat,
            report.lng,
            report.reported_to_police,
            report.approved,
            report.approved_at.map(|dt| dt.timestamp_micros()),
            report.verification_code,
            report.verified_at.map(|dt| dt.timestamp_micros()),
            report.created_at.timestamp_micros(),
        ],
    )?;

    Ok(())
}

fn coordinates_taken(conn: &Connection, lat: f64, lng: f64) -> Result<bool, DbError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reports WHERE lat = ? AND lng = ?",
        params![lat, lng],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn verification_code_taken(conn: &Connection, code: &str) -> Result<bool, DbError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reports WHERE verification_code = ?",
        params![code],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// A report row with storage encodings not yet decoded.
struct ReportRow {
    id: i64,
    informant_name: String,
    informant_email: String,
    informant_role: String,
    type_incident: String,
    type_incident_other: Option<String>,
    description: String,
    support: bool,
    date: String,
    town: String,
    type_location: String,
    type_location_other: Option<String>,
    lat: Option<f64>,
    lng: Option<f64>,
    reported_to_police: bool,
    approved: bool,
    approved_at: Option<i64>,
    verification_code: Option<String>,
    verified_at: Option<i64>,
    created_at: i64,
}

impl ReportRow {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            informant_name: row.get(1)?,
            informant_email: row.get(2)?,
            informant_role: row.get(3)?,
            type_incident: row.get(4)?,
            type_incident_other: row.get(5)?,
            description: row.get(6)?,
            support: row.get(7)?,
            date: row.get(8)?,
            town: row.get(9)?,
            type_location: row.get(10)?,
            type_location_other: row.get(11)?,
            lat: row.get(12)?,
            lng: row.get(13)?,
            reported_to_police: row.get(14)?,
            approved: row.get(15)?,
            approved_at: row.get(16)?,
            verification_code: row.get(17)?,
            verified_at: row.get(18)?,
            created_at: row.get(19)?,
        })
    }

    fn into_report(self) -> Result<Report, DbError> {
        let date =
            NaiveDate::parse_from_str(&self.date, DATE_FORMAT).map_err(|e| DbError::Conversion {
                message: format!("Invalid date {:?} on report {}: {e}", self.date, self.id),
            })?;

        Ok(Report {
            id: self.id,
            informant_name: self.informant_name,
            informant_email: self.informant_email,
            informant_role: self.informant_role,
            type_incident: serde_json::from_str(&self.type_incident)?,
            type_incident_other: self.type_incident_other,
            description: self.description,
            support: self.support,
            date,
            town: self.town,
            type_location: self.type_location,
            type_location_other: self.type_location_other,
            lat: self.lat,
            lng: self.lng,
            reported_to_police: self.reported_to_police,
            approved: self.approved,
            approved_at: self.approved_at.map(from_micros).transpose()?,
            verification_code: self.verification_code,
            verified_at: self.verified_at.map(from_micros).transpose()?,
            created_at: from_micros(self.created_at)?,
        })
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| DbError::Conversion {
        message: format!("Timestamp out of range: {micros}"),
    })
}

fn select_reports(
    conn: &Connection,
    filter: &str,
    params: &[&dyn duckdb::ToSql],
) -> Result<Vec<Report>, DbError> {
    let sql = format!("SELECT {REPORT_COLUMNS} FROM reports {filter}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, ReportRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(ReportRow::into_report).collect()
}

/// Looks up a report by id.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn find(conn: &Connection, id: i64) -> Result<Option<Report>, DbError> {
    Ok(select_reports(conn, "WHERE id = ?", params![id])?
        .into_iter()
        .next())
}

/// Looks up a report by its verification code.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn find_by_verification_code(
    conn: &Connection,
    code: &str,
) -> Result<Option<Report>, DbError> {
    Ok(
        select_reports(conn, "WHERE verification_code = ?", params![code])?
            .into_iter()
            .next(),
    )
}

/// Total number of stored reports.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn count(conn: &Connection) -> Result<u64, DbError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))?;
    u64::try_from(count).map_err(|e| DbError::Conversion {
        message: format!("Negative report count {count}: {e}"),
    })
}

/// Every report, oldest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn all(conn: &Connection) -> Result<Vec<Report>, DbError> {
    select_reports(conn, "ORDER BY id", params![])
}

/// Approved reports, oldest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn approved(conn: &Connection) -> Result<Vec<Report>, DbError> {
    select_reports(conn, "WHERE approved ORDER BY id", params![])
}

/// Approved reports, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn latest(conn: &Connection) -> Result<Vec<Report>, DbError> {
    select_reports(
        conn,
        "WHERE approved ORDER BY created_at DESC, id DESC",
        params![],
    )
}

/// Approved reports that can be placed on the map, newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn latest_for_map(conn: &Connection) -> Result<Vec<Report>, DbError> {
    select_reports(
        conn,
        "WHERE approved AND lat IS NOT NULL AND lng IS NOT NULL
         ORDER BY created_at DESC, id DESC",
        params![],
    )
}

/// Runs the named scope.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn query(conn: &Connection, scope: ReportScope) -> Result<Vec<Report>, DbError> {
    match scope {
        ReportScope::All => all(conn),
        ReportScope::Approved => approved(conn),
        ReportScope::Latest => latest(conn),
        ReportScope::LatestForMap => latest_for_map(conn),
    }
}

/// Sets the moderation flag, stamping `approved_at` on first approval.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn set_approved(
    conn: &Connection,
    report: &mut Report,
    approved: bool,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    report.approved = approved;
    report.approved_at = hooks::set_approved_at(approved, report.approved_at, now);

    conn.execute(
        "UPDATE reports SET approved = ?, approved_at = ? WHERE id = ?",
        params![
            report.approved,
            report.approved_at.map(|dt| dt.timestamp_micros()),
            report.id,
        ],
    )?;

    log::info!(
        "Report {} {}",
        report.id,
        if approved { "approved" } else { "unapproved" }
    );
    Ok(())
}

/// Marks the report verified at `now` unless it already is.
///
/// Returns `true` if this call set the timestamp.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn set_verified_at(
    conn: &Connection,
    report: &mut Report,
    now: DateTime<Utc>,
) -> Result<bool, DbError> {
    if report.verified_at.is_some() {
        return Ok(false);
    }

    let updated = conn.execute(
        "UPDATE reports SET verified_at = ? WHERE id = ? AND verified_at IS NULL",
        params![now.timestamp_micros(), report.id],
    )?;

    if updated == 0 {
        // Verified elsewhere since this copy was loaded; keep the stored time.
        if let Some(stored) = find(conn, report.id)? {
            report.verified_at = stored.verified_at;
        }
        return Ok(false);
    }

    report.set_verified_at(now);
    Ok(true)
}

/// Clears the code and verifies at `now` in one statement, so a failed
/// write leaves the stored row untouched.
fn verify_without_code(
    conn: &Connection,
    report: &mut Report,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    conn.execute(
        "UPDATE reports
         SET verification_code = NULL, verified_at = COALESCE(verified_at, ?)
         WHERE id = ?",
        params![now.timestamp_micros(), report.id],
    )?;

    report.remove_verification_code();
    report.set_verified_at(now);
    Ok(())
}

/// Verifies the report holding `code`.
///
/// Returns `None` when no report holds the code.
///
/// # Errors
///
/// Returns [`DbError`] if a query or update fails.
pub fn verify_by_code(
    conn: &Connection,
    code: &str,
    now: DateTime<Utc>,
) -> Result<Option<Report>, DbError> {
    let Some(mut report) = find_by_verification_code(conn, code)? else {
        log::warn!("No report holds verification code {code}");
        return Ok(None);
    };

    set_verified_at(conn, &mut report, now)?;
    Ok(Some(report))
}

/// Clears the report's verification code, returning the old value.
///
/// # Errors
///
/// Returns [`DbError`] if the update fails.
pub fn remove_verification_code(
    conn: &Connection,
    report: &mut Report,
) -> Result<Option<String>, DbError> {
    conn.execute(
        "UPDATE reports SET verification_code = NULL WHERE id = ?",
        params![report.id],
    )?;
    Ok(report.remove_verification_code())
}

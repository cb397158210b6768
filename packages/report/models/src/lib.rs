#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Incident report types, form validation, and report settings.
//!
//! A report starts life as a [`ReportForm`] (every field optional, exactly
//! as a browser posts it). [`ReportForm::validate`] turns it into a
//! [`NewReport`] or a set of field-level [`ValidationErrors`]. Storage
//! assigns the id and timestamps and hands back a [`Report`].

pub mod settings;
pub mod validation;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use settings::{ReportSettings, SettingsError};
pub use validation::{DATE_FORMAT, ReportField, ReportForm, ValidationErrors, ValidationMessage};

/// Form value meaning "none of the listed options" for both the incident
/// type and the location type.
pub const OTHER: &str = "other";

/// Length of a generated verification code.
pub const VERIFICATION_CODE_LENGTH: usize = 24;

/// Returns whether a form choice is the [`OTHER`] option. The form posts
/// the option value verbatim, so the match is exact.
#[must_use]
pub fn is_other(value: &str) -> bool {
    value == OTHER
}

/// A validated report that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReport {
    pub informant_name: String,
    pub informant_email: String,
    pub informant_role: String,
    pub type_incident: Vec<String>,
    pub type_incident_other: Option<String>,
    pub description: String,
    pub support: bool,
    pub date: NaiveDate,
    pub town: String,
    pub type_location: String,
    pub type_location_other: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub reported_to_police: bool,
    /// Moderation flag. Public submissions always start unapproved.
    pub approved: bool,
}

impl NewReport {
    /// Returns the coordinate pair when both halves are present.
    #[must_use]
    pub const fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}

/// A stored incident report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Primary key.
    pub id: i64,
    /// Name of the person submitting the report.
    pub informant_name: String,
    /// Contact address, also used to recognise the trusted sender.
    pub informant_email: String,
    /// How the informant relates to the incident (victim, witness, ...).
    pub informant_role: String,
    /// Selected incident classifications.
    pub type_incident: Vec<String>,
    /// Free-text classification when [`OTHER`] was selected.
    pub type_incident_other: Option<String>,
    pub description: String,
    /// Whether the informant asked for support.
    pub support: bool,
    /// Day the incident happened.
    pub date: NaiveDate,
    pub town: String,
    pub type_location: String,
    /// Free-text location type when [`OTHER`] was selected.
    pub type_location_other: Option<String>,
    /// Latitude (WGS84), possibly jittered away from a collision.
    pub lat: Option<f64>,
    /// Longitude (WGS84), possibly jittered away from a collision.
    pub lng: Option<f64>,
    pub reported_to_police: bool,
    /// Whether a moderator made the report public.
    pub approved: bool,
    /// When the report was first approved.
    pub approved_at: Option<DateTime<Utc>>,
    /// Token mailed to the informant to confirm the submission.
    pub verification_code: Option<String>,
    /// When the informant confirmed the submission.
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Unix timestamp (seconds) of the most recent relevant event: the
    /// verification time once verified, otherwise the creation time.
    #[must_use]
    pub fn created_at_or_verified_at(&self) -> i64 {
        self.verified_at.unwrap_or(self.created_at).timestamp()
    }

    /// Whether both coordinates are present.
    #[must_use]
    pub const fn has_coordinates(&self) -> bool {
        self.lat.is_some() && self.lng.is_some()
    }

    /// Whether the report was submitted from `sender`'s address.
    #[must_use]
    pub fn is_from(&self, sender: &str) -> bool {
        self.informant_email
            .trim()
            .eq_ignore_ascii_case(sender.trim())
    }

    /// Whether the report came from the trusted iStreetWatch sender.
    #[must_use]
    pub fn is_from_isw(&self, settings: &ReportSettings) -> bool {
        self.is_from(&settings.trusted_sender)
    }

    /// Sets `verified_at` to `now` unless the report is already verified.
    ///
    /// Returns `true` if the timestamp was set by this call.
    pub fn set_verified_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.verified_at.is_some() {
            return false;
        }
        self.verified_at = Some(now);
        true
    }

    /// Clears the verification code, returning the previous value.
    pub fn remove_verification_code(&mut self) -> Option<String> {
        self.verification_code.take()
    }
}

/// Named report queries.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportScope {
    /// Every report, oldest first.
    #[default]
    All,
    /// Approved reports, oldest first.
    Approved,
    /// Approved reports, newest first.
    Latest,
    /// Approved reports with both coordinates, newest first.
    LatestForMap,
}

impl ReportScope {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::All, Self::Approved, Self::Latest, Self::LatestForMap]
    }
}

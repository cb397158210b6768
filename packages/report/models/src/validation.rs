//! Form-level validation for incident reports.
//!
//! Every rule runs on every call. Failures are collected per field so a
//! form can be re-rendered with all of its problems at once.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::{NewReport, is_other};

/// A report form field that can carry validation messages.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportField {
    InformantName,
    InformantEmail,
    InformantRole,
    TypeIncident,
    TypeIncidentOther,
    Description,
    Support,
    Date,
    Town,
    TypeLocation,
    TypeLocationOther,
    ReportedToPolice,
}

impl ReportField {
    /// Human-readable label used to prefix full error messages.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InformantName => "Informant name",
            Self::InformantEmail => "Informant email",
            Self::InformantRole => "Informant role",
            Self::TypeIncident => "Type incident",
            Self::TypeIncidentOther => "Type incident other",
            Self::Description => "Description",
            Self::Support => "Support",
            Self::Date => "Date",
            Self::Town => "Town",
            Self::TypeLocation => "Type location",
            Self::TypeLocationOther => "Type location other",
            Self::ReportedToPolice => "Reported to police",
        }
    }
}

/// A single validation failure on a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ValidationMessage {
    #[serde(rename = "can't be blank")]
    #[strum(to_string = "can't be blank")]
    Blank,
    #[serde(rename = "is invalid")]
    #[strum(to_string = "is invalid")]
    Invalid,
    #[serde(rename = "can't be in the future")]
    #[strum(to_string = "can't be in the future")]
    InFuture,
}

/// Field-level validation failures, in form order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<ReportField, Vec<ValidationMessage>>,
}

impl ValidationErrors {
    /// Records `message` against `field`.
    pub fn add(&mut self, field: ReportField, message: ValidationMessage) {
        self.fields.entry(field).or_default().push(message);
    }

    /// Messages recorded against `field` (empty when the field is valid).
    #[must_use]
    pub fn get(&self, field: ReportField) -> &[ValidationMessage] {
        self.fields.get(&field).map_or(&[], Vec::as_slice)
    }

    /// Whether `field` failed with `message`.
    #[must_use]
    pub fn contains(&self, field: ReportField, message: ValidationMessage) -> bool {
        self.get(field).contains(&message)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Total number of messages across all fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.values().map(Vec::len).sum()
    }

    /// Iterates fields that failed, with their messages.
    pub fn iter(&self) -> impl Iterator<Item = (ReportField, &[ValidationMessage])> {
        self.fields
            .iter()
            .map(|(field, messages)| (*field, messages.as_slice()))
    }

    /// Messages prefixed with their field label, e.g.
    /// `"Informant name can't be blank"`.
    #[must_use]
    pub fn full_messages(&self) -> Vec<String> {
        self.iter()
            .flat_map(|(field, messages)| {
                messages
                    .iter()
                    .map(move |message| format!("{} {message}", field.label()))
            })
            .collect()
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_messages().join(", "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Format of the incident date as posted by the form.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// An incident report as submitted through the public form.
///
/// Every field is optional so that a partially filled form still
/// deserializes and can be validated field by field. The date and the
/// yes/no answers are kept as raw text; a malformed value becomes an
/// `is invalid` message on that field rather than a parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportForm {
    pub informant_name: Option<String>,
    pub informant_email: Option<String>,
    pub informant_role: Option<String>,
    /// Checkbox selections; may contain [`crate::OTHER`].
    pub type_incident: Vec<String>,
    pub type_incident_other: Option<String>,
    pub description: Option<String>,
    /// `true`/`false`, `yes`/`no`, `1`/`0`, `on`/`off`.
    #[serde(deserialize_with = "scalar_text")]
    pub support: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(deserialize_with = "scalar_text")]
    pub date: Option<String>,
    pub town: Option<String>,
    pub type_location: Option<String>,
    pub type_location_other: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    #[serde(deserialize_with = "scalar_text")]
    pub reported_to_police: Option<String>,
}

impl ReportForm {
    /// Incident types with blank checkbox values dropped.
    fn selected_incident_types(&self) -> Vec<String> {
        self.type_incident
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect()
    }

    /// Whether [`crate::OTHER`] is among the selected incident types.
    #[must_use]
    pub fn incident_is_other(&self) -> bool {
        self.type_incident.iter().any(|t| is_other(t))
    }

    /// Whether the location type is [`crate::OTHER`].
    #[must_use]
    pub fn location_is_other(&self) -> bool {
        self.type_location.as_deref().is_some_and(is_other)
    }

    /// Checks the form without consuming it.
    ///
    /// `today` is the latest acceptable incident date.
    #[must_use]
    pub fn errors(&self, today: NaiveDate) -> ValidationErrors {
        let mut errors = ValidationErrors::default();

        let required_text = [
            (ReportField::InformantName, &self.informant_name),
            (ReportField::InformantEmail, &self.informant_email),
            (ReportField::InformantRole, &self.informant_role),
        ];
        for (field, value) in required_text {
            if blank(value.as_ref()) {
                errors.add(field, ValidationMessage::Blank);
            }
        }

        if self.selected_incident_types().is_empty() {
            errors.add(ReportField::TypeIncident, ValidationMessage::Blank);
        }
        if self.incident_is_other() && blank(self.type_incident_other.as_ref()) {
            errors.add(ReportField::TypeIncidentOther, ValidationMessage::Blank);
        }

        if blank(self.description.as_ref()) {
            errors.add(ReportField::Description, ValidationMessage::Blank);
        }
        check_flag(&mut errors, ReportField::Support, self.support.as_ref());

        if blank(self.date.as_ref()) {
            errors.add(ReportField::Date, ValidationMessage::Blank);
        } else {
            match parse_date(self.date.as_ref()) {
                None => errors.add(ReportField::Date, ValidationMessage::Invalid),
                Some(date) if date > today => {
                    errors.add(ReportField::Date, ValidationMessage::InFuture);
                }
                Some(_) => {}
            }
        }

        if blank(self.town.as_ref()) {
            errors.add(ReportField::Town, ValidationMessage::Blank);
        }
        if blank(self.type_location.as_ref()) {
            errors.add(ReportField::TypeLocation, ValidationMessage::Blank);
        }
        if self.location_is_other() && blank(self.type_location_other.as_ref()) {
            errors.add(ReportField::TypeLocationOther, ValidationMessage::Blank);
        }

        check_flag(
            &mut errors,
            ReportField::ReportedToPolice,
            self.reported_to_police.as_ref(),
        );

        errors
    }

    /// Validates the form and converts it into an unapproved [`NewReport`].
    ///
    /// # Errors
    ///
    /// Returns every failed rule as [`ValidationErrors`].
    pub fn validate(&self, today: NaiveDate) -> Result<NewReport, ValidationErrors> {
        let errors = self.errors(today);
        if !errors.is_empty() {
            log::debug!("Report form rejected: {errors}");
            return Err(errors);
        }

        // Every required value was checked above.
        let (
            Some(informant_name),
            Some(informant_email),
            Some(informant_role),
            Some(description),
            Some(support),
            Some(date),
            Some(town),
            Some(type_location),
            Some(reported_to_police),
        ) = (
            self.informant_name.clone(),
            self.informant_email.clone(),
            self.informant_role.clone(),
            self.description.clone(),
            parse_flag(self.support.as_ref()),
            parse_date(self.date.as_ref()),
            self.town.clone(),
            self.type_location.clone(),
            parse_flag(self.reported_to_police.as_ref()),
        )
        else {
            return Err(errors);
        };

        Ok(NewReport {
            informant_name,
            informant_email,
            informant_role,
            type_incident: self.selected_incident_types(),
            type_incident_other: present(self.type_incident_other.as_ref()),
            description,
            support,
            date,
            town,
            type_location,
            type_location_other: present(self.type_location_other.as_ref()),
            lat: self.lat,
            lng: self.lng,
            reported_to_police,
            approved: false,
        })
    }
}

fn blank(value: Option<&String>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

fn present(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

fn parse_date(value: Option<&String>) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value?.trim(), DATE_FORMAT).ok()
}

fn parse_flag(value: Option<&String>) -> Option<bool> {
    match value?.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn check_flag(errors: &mut ValidationErrors, field: ReportField, value: Option<&String>) {
    if blank(value) {
        errors.add(field, ValidationMessage::Blank);
    } else if parse_flag(value).is_none() {
        errors.add(field, ValidationMessage::Invalid);
    }
}

/// Accepts a string, boolean, or number and keeps it as text.
fn scalar_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Bool(bool),
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(
        Option::<Scalar>::deserialize(deserializer)?.map(|value| match value {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(x) => x.to_string(),
            Scalar::Text(text) => text,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    fn complete_form() -> ReportForm {
        ReportForm {
            informant_name: Some("Jo Bloggs".to_string()),
            informant_email: Some("jo@example.org".to_string()),
            informant_role: Some("victim".to_string()),
            type_incident: vec!["verbal abuse".to_string()],
            type_incident_other: None,
            description: Some("Shouted at outside the library".to_string()),
            support: Some("true".to_string()),
            date: Some(today().to_string()),
            town: Some("Bristol".to_string()),
            type_location: Some("street".to_string()),
            type_location_other: None,
            lat: Some(51.45),
            lng: Some(-2.58),
            reported_to_police: Some("false".to_string()),
        }
    }

    #[test]
    fn empty_form_reports_every_required_field() {
        let errors = ReportForm::default().errors(today());
        for field in [
            ReportField::InformantName,
            ReportField::InformantEmail,
            ReportField::InformantRole,
            ReportField::TypeIncident,
            ReportField::Description,
            ReportField::Support,
            ReportField::Date,
            ReportField::Town,
            ReportField::TypeLocation,
            ReportField::ReportedToPolice,
        ] {
            assert!(
                errors.contains(field, ValidationMessage::Blank),
                "{field} should be required"
            );
        }
        assert!(errors.get(ReportField::TypeIncidentOther).is_empty());
        assert!(errors.get(ReportField::TypeLocationOther).is_empty());
    }

    #[test]
    fn whitespace_only_text_is_blank() {
        let mut form = complete_form();
        form.informant_name = Some("   ".to_string());
        let errors = form.errors(today());
        assert!(errors.contains(ReportField::InformantName, ValidationMessage::Blank));
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn incident_other_text_not_required_for_listed_type() {
        let form = ReportForm {
            type_incident: vec!["not other".to_string()],
            ..ReportForm::default()
        };
        let errors = form.errors(today());
        assert!(!errors.is_empty());
        assert!(!errors.contains(ReportField::TypeIncidentOther, ValidationMessage::Blank));
    }

    #[test]
    fn incident_other_text_required_for_other_type() {
        let form = ReportForm {
            type_incident: vec!["other".to_string()],
            ..ReportForm::default()
        };
        let errors = form.errors(today());
        assert!(errors.contains(ReportField::TypeIncidentOther, ValidationMessage::Blank));
    }

    #[test]
    fn location_other_text_not_required_for_listed_type() {
        let form = ReportForm {
            type_location: Some("not other".to_string()),
            ..ReportForm::default()
        };
        let errors = form.errors(today());
        assert!(!errors.contains(ReportField::TypeLocationOther, ValidationMessage::Blank));
    }

    #[test]
    fn location_other_text_required_for_other_type() {
        let form = ReportForm {
            type_location: Some("other".to_string()),
            ..ReportForm::default()
        };
        let errors = form.errors(today());
        assert!(errors.contains(ReportField::TypeLocationOther, ValidationMessage::Blank));
    }

    #[test]
    fn blank_checkbox_values_do_not_count_as_a_selection() {
        let mut form = complete_form();
        form.type_incident = vec![String::new(), " ".to_string()];
        let errors = form.errors(today());
        assert!(errors.contains(ReportField::TypeIncident, ValidationMessage::Blank));
    }

    #[test]
    fn rejects_future_dates_but_accepts_today() {
        let mut form = complete_form();
        form.date = today().succ_opt().map(|date| date.to_string());
        let errors = form.errors(today());
        assert!(errors.contains(ReportField::Date, ValidationMessage::InFuture));

        form.date = Some(today().to_string());
        let errors = form.errors(today());
        assert!(!errors.contains(ReportField::Date, ValidationMessage::InFuture));
    }

    #[test]
    fn valid_form_converts_to_unapproved_new_report() {
        let mut form = complete_form();
        form.type_incident = vec![String::new(), "other".to_string()];
        form.type_incident_other = Some("Graffiti".to_string());
        form.type_location_other = Some("   ".to_string());

        let report = form.validate(today()).unwrap();
        assert_eq!(report.type_incident, vec!["other".to_string()]);
        assert_eq!(report.type_incident_other.as_deref(), Some("Graffiti"));
        assert_eq!(report.type_location_other, None);
        assert_eq!(report.coordinates(), Some((51.45, -2.58)));
        assert_eq!(report.date, today());
        assert!(report.support);
        assert!(!report.reported_to_police);
        assert!(!report.approved);
    }

    #[test]
    fn malformed_date_and_answers_are_field_errors() {
        let form: ReportForm = serde_json::from_str(
            r#"{
                "informant_name": "Jo Bloggs",
                "date": "2024-13-40",
                "support": "maybe",
                "reported_to_police": 2
            }"#,
        )
        .unwrap();

        let errors = form.errors(today());
        assert!(errors.contains(ReportField::Date, ValidationMessage::Invalid));
        assert!(errors.contains(ReportField::Support, ValidationMessage::Invalid));
        assert!(errors.contains(ReportField::ReportedToPolice, ValidationMessage::Invalid));
        assert!(errors.contains(ReportField::Town, ValidationMessage::Blank));
        assert!(
            errors
                .full_messages()
                .contains(&"Date is invalid".to_string())
        );
    }

    #[test]
    fn json_booleans_and_numbers_are_accepted_as_answers() {
        let form: ReportForm = serde_json::from_str(
            r#"{"date": "2024-06-01", "support": true, "reported_to_police": 0}"#,
        )
        .unwrap();

        assert_eq!(form.support.as_deref(), Some("true"));
        assert_eq!(form.reported_to_police.as_deref(), Some("0"));
        let errors = form.errors(today());
        assert!(errors.get(ReportField::Date).is_empty());
        assert!(errors.get(ReportField::Support).is_empty());
        assert!(errors.get(ReportField::ReportedToPolice).is_empty());
    }

    #[test]
    fn other_must_be_selected_exactly() {
        let form = ReportForm {
            type_incident: vec!["Other".to_string()],
            type_location: Some(" other".to_string()),
            ..ReportForm::default()
        };
        let errors = form.errors(today());
        assert!(!errors.contains(ReportField::TypeIncidentOther, ValidationMessage::Blank));
        assert!(!errors.contains(ReportField::TypeLocationOther, ValidationMessage::Blank));
    }

    #[test]
    fn validate_returns_all_errors() {
        let errors = ReportForm::default().validate(today()).unwrap_err();
        assert_eq!(errors.len(), 10);
        assert!(
            errors
                .full_messages()
                .contains(&"Informant name can't be blank".to_string())
        );
    }

    #[test]
    fn full_messages_follow_form_order() {
        let mut errors = ValidationErrors::default();
        errors.add(ReportField::Town, ValidationMessage::Blank);
        errors.add(ReportField::Date, ValidationMessage::InFuture);
        assert_eq!(
            errors.to_string(),
            "Date can't be in the future, Town can't be blank"
        );
    }

    #[test]
    fn field_names_match_form_parameters() {
        assert_eq!(ReportField::TypeLocationOther.as_ref(), "type_location_other");
        assert_eq!(
            "reported_to_police".parse::<ReportField>().unwrap(),
            ReportField::ReportedToPolice
        );
        assert_eq!(ValidationMessage::Blank.to_string(), "can't be blank");
    }
}

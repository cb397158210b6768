//! Lifecycle hooks run when a report is created.
//!
//! The hooks only decide values. Lookups against existing rows are passed
//! in as closures so the same logic runs against `DuckDB` in production and
//! against plain collections in tests.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use street_watch_report_models::{ReportSettings, VERIFICATION_CODE_LENGTH};

use crate::DbError;

/// Moves a coordinate pair off any location already in use.
///
/// Returns the pair unchanged when it is free. Otherwise both coordinates
/// are offset from the original pair by a random signed amount in
/// `[jitter_min, jitter_max]` until `taken` reports a free pair.
///
/// # Errors
///
/// Returns [`DbError::Settings`] if the jitter range or retry budget is
/// unusable, [`DbError::CoordinatesExhausted`] when `max_attempts` offsets
/// are all taken, or any error produced by `taken`.
pub fn check_lat_lng<R, F>(
    lat: f64,
    lng: f64,
    settings: &ReportSettings,
    rng: &mut R,
    mut taken: F,
) -> Result<(f64, f64), DbError>
where
    R: Rng,
    F: FnMut(f64, f64) -> Result<bool, DbError>,
{
    settings.check()?;

    if !taken(lat, lng)? {
        return Ok((lat, lng));
    }

    for attempt in 1..=settings.max_attempts {
        let candidate = (
            lat + jitter_offset(settings, rng),
            lng + jitter_offset(settings, rng),
        );
        if !taken(candidate.0, candidate.1)? {
            log::debug!(
                "Location ({lat}, {lng}) taken, moved to ({}, {}) after {attempt} attempt(s)",
                candidate.0,
                candidate.1
            );
            return Ok(candidate);
        }
    }

    Err(DbError::CoordinatesExhausted {
        lat,
        lng,
        attempts: settings.max_attempts,
    })
}

/// A non-zero offset with magnitude in the configured jitter range.
fn jitter_offset<R: Rng>(settings: &ReportSettings, rng: &mut R) -> f64 {
    let low = settings.jitter_min.min(settings.jitter_max);
    let high = settings.jitter_min.max(settings.jitter_max);
    let magnitude = rng.gen_range(low..=high);
    if rng.gen_bool(0.5) { magnitude } else { -magnitude }
}

/// Approval timestamp after a report's `approved` flag is set.
///
/// The first approval is stamped with `now`; later approvals keep the
/// original time. Unapproved reports keep whatever they had.
#[must_use]
pub fn set_approved_at(
    approved: bool,
    approved_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match approved_at {
        Some(at) => Some(at),
        None if approved => Some(now),
        None => None,
    }
}

/// Draws a random alphanumeric verification code.
#[must_use]
pub fn generate_verification_code<R: Rng>(rng: &mut R) -> String {
    (0..VERIFICATION_CODE_LENGTH)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// Draws verification codes until one is not `taken`.
///
/// # Errors
///
/// Returns [`DbError::Settings`] if the retry budget is unusable,
/// [`DbError::VerificationCodeExhausted`] when `max_attempts` codes are all
/// taken, or any error produced by `taken`.
pub fn set_verification_code<R, F>(
    settings: &ReportSettings,
    rng: &mut R,
    mut taken: F,
) -> Result<String, DbError>
where
    R: Rng,
    F: FnMut(&str) -> Result<bool, DbError>,
{
    settings.check()?;

    for _ in 0..settings.max_attempts {
        let code = generate_verification_code(rng);
        if !taken(&code)? {
            return Ok(code);
        }
        log::warn!("Verification code collision, drawing another");
    }

    Err(DbError::VerificationCodeExhausted {
        attempts: settings.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::TimeZone as _;
    use rand::SeedableRng as _;
    use rand::rngs::StdRng;

    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn free_location_is_kept() {
        let settings = ReportSettings::default();
        let (lat, lng) = check_lat_lng(1.0, 1.0, &settings, &mut rng(), |_, _| Ok(false)).unwrap();
        assert!((lat - 1.0).abs() < f64::EPSILON);
        assert!((lng - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn taken_location_moves_both_coordinates_within_range() {
        let settings = ReportSettings::default();
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let (lat, lng) = check_lat_lng(1.0, 1.0, &settings, &mut rng, |lat, lng| {
                Ok(lat == 1.0 && lng == 1.0)
            })
            .unwrap();

            assert_ne!(lat, 1.0);
            assert_ne!(lng, 1.0);
            assert!((lat - 1.0).abs() <= settings.jitter_max + f64::EPSILON);
            assert!((lng - 1.0).abs() <= settings.jitter_max + f64::EPSILON);
            assert!((lat - 1.0).abs() >= settings.jitter_min - f64::EPSILON);
        }
    }

    #[test]
    fn gives_up_when_every_location_is_taken() {
        let settings = ReportSettings {
            max_attempts: 3,
            ..ReportSettings::default()
        };
        let mut calls = 0;
        let result = check_lat_lng(1.0, 1.0, &settings, &mut rng(), |_, _| {
            calls += 1;
            Ok(true)
        });

        assert!(matches!(
            result,
            Err(DbError::CoordinatesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls, 4);
    }

    #[test]
    fn unbounded_jitter_is_an_error_not_a_panic() {
        let settings = ReportSettings {
            jitter_max: f64::INFINITY,
            ..ReportSettings::default()
        };
        let result = check_lat_lng(1.0, 1.0, &settings, &mut rng(), |_, _| Ok(true));
        assert!(matches!(result, Err(DbError::Settings(_))));
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        let settings = ReportSettings {
            max_attempts: 0,
            ..ReportSettings::default()
        };
        let result = set_verification_code(&settings, &mut rng(), |_| Ok(false));
        assert!(matches!(result, Err(DbError::Settings(_))));
    }

    #[test]
    fn approved_at_only_set_for_approved_reports() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(set_approved_at(false, None, now), None);
        assert_eq!(set_approved_at(true, None, now), Some(now));
    }

    #[test]
    fn approved_at_keeps_first_approval() {
        let first = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap();
        assert_eq!(set_approved_at(true, Some(first), later), Some(first));
        assert_eq!(set_approved_at(false, Some(first), later), Some(first));
    }

    #[test]
    fn verification_codes_are_alphanumeric_and_24_chars() {
        let mut rng = rng();
        let code = generate_verification_code(&mut rng);
        assert_eq!(code.len(), 24);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(code, generate_verification_code(&mut rng));
    }

    #[test]
    fn verification_code_skips_codes_in_use() {
        let settings = ReportSettings::default();
        let first = generate_verification_code(&mut rng());
        let used: BTreeSet<String> = std::iter::once(first.clone()).collect();

        let code =
            set_verification_code(&settings, &mut rng(), |code| Ok(used.contains(code))).unwrap();

        assert_ne!(code, first);
        assert_eq!(code.len(), 24);
    }

    #[test]
    fn verification_code_gives_up_after_max_attempts() {
        let settings = ReportSettings {
            max_attempts: 2,
            ..ReportSettings::default()
        };
        let result = set_verification_code(&settings, &mut rng(), |_| Ok(true));
        assert!(matches!(
            result,
            Err(DbError::VerificationCodeExhausted { attempts: 2 })
        ));
    }
}

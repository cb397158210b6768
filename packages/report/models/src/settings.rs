//! Tunables for report lifecycle hooks.
//!
//! Settings come from built-in defaults, optionally overlaid by a TOML
//! document, then by `STREET_WATCH_*` environment variables.

use serde::{Deserialize, Serialize};

/// Address whose submissions are trusted without e-mail verification.
pub const DEFAULT_TRUSTED_SENDER: &str = "istreetwatch@migrantsrights.org.uk";

/// Smallest coordinate offset (degrees) applied on a location collision.
pub const DEFAULT_JITTER_MIN: f64 = 0.000_05;

/// Largest coordinate offset (degrees) applied on a location collision.
/// Roughly 50 metres of latitude.
pub const DEFAULT_JITTER_MAX: f64 = 0.000_5;

/// Upper bound accepted for `jitter_max`, in degrees.
pub const MAX_JITTER: f64 = 1.0;

/// Retry budget for coordinate jitter and verification code draws.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Errors that can occur while loading [`ReportSettings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The TOML document could not be parsed.
    #[error("Invalid settings TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// An environment variable held a value of the wrong type.
    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv {
        /// Variable name.
        key: &'static str,
        /// Raw value found.
        value: String,
    },

    /// The settings are internally inconsistent.
    #[error("Invalid settings: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Report hook configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// E-mail address of the trusted sender (iStreetWatch).
    pub trusted_sender: String,
    /// Minimum magnitude of a collision offset, in degrees.
    pub jitter_min: f64,
    /// Maximum magnitude of a collision offset, in degrees.
    pub jitter_max: f64,
    /// How many times a hook may redraw a random value before giving up.
    pub max_attempts: u32,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            trusted_sender: DEFAULT_TRUSTED_SENDER.to_string(),
            jitter_min: DEFAULT_JITTER_MIN,
            jitter_max: DEFAULT_JITTER_MAX,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReportSettings {
    /// Parses settings from a TOML document. Missing keys keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if the document is malformed or the
    /// resulting settings are inconsistent.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::de::from_str(toml_str)?;
        settings.check()?;
        Ok(settings)
    }

    /// Overlays `STREET_WATCH_*` variables read through `lookup`.
    ///
    /// Taking a lookup function keeps this testable without touching the
    /// process environment. Pass `|key| std::env::var(key).ok()` in
    /// production.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if a variable cannot be parsed or the
    /// resulting settings are inconsistent.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(sender) = lookup("STREET_WATCH_TRUSTED_SENDER") {
            self.trusted_sender = sender;
        }
        if let Some(value) = lookup("STREET_WATCH_JITTER_MIN") {
            self.jitter_min = parse_env("STREET_WATCH_JITTER_MIN", value)?;
        }
        if let Some(value) = lookup("STREET_WATCH_JITTER_MAX") {
            self.jitter_max = parse_env("STREET_WATCH_JITTER_MAX", value)?;
        }
        if let Some(value) = lookup("STREET_WATCH_MAX_ATTEMPTS") {
            self.max_attempts = parse_env("STREET_WATCH_MAX_ATTEMPTS", value)?;
        }

        self.check()?;
        Ok(self)
    }

    /// Loads defaults overlaid by the process environment.
    ///
    /// # Errors
    ///
    /// See [`ReportSettings::with_env`].
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Checks that the settings are usable by the report hooks.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for an empty trusted sender, a
    /// jitter range outside `0 < min <= max <= MAX_JITTER`, or a zero
    /// retry budget.
    pub fn check(&self) -> Result<(), SettingsError> {
        if self.trusted_sender.trim().is_empty() {
            return Err(SettingsError::Invalid {
                message: "trusted_sender must not be empty".to_string(),
            });
        }
        if !(self.jitter_min > 0.0
            && self.jitter_min <= self.jitter_max
            && self.jitter_max <= MAX_JITTER)
        {
            return Err(SettingsError::Invalid {
                message: format!(
                    "jitter range must satisfy 0 < min <= max <= {MAX_JITTER}, got {}..={}",
                    self.jitter_min, self.jitter_max
                ),
            });
        }
        if self.max_attempts == 0 {
            return Err(SettingsError::Invalid {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidEnv { key, value })
}

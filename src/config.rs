use std::{path::PathBuf, time::Duration};

use crate::error::ConfigError;

/// Process configuration for the filament sensor daemon, loaded from
/// environment variables.
///
/// This only covers how the daemon reaches the printer host and where the
/// settings record lives. The sensor and notification options themselves are
/// part of the settings record (see [`crate::settings::Settings`]).
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the OctoPrint instance (e.g. "http://octopi.local").
    ///
    /// Environment variable: `OCTOPRINT_URL`
    pub octoprint_url: String,

    /// Application key used for the `X-Api-Key` header.
    ///
    /// Environment variable: `OCTOPRINT_API_KEY`
    pub octoprint_api_key: String,

    /// Path of the JSON settings file.
    ///
    /// Environment variable: `SETTINGS_FILE`
    pub settings_file: PathBuf,

    /// How often the printer job state is polled for lifecycle changes.
    ///
    /// Environment variable: `POLL_INTERVAL_SECONDS`
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are not set or cannot be parsed:
    /// - `OCTOPRINT_URL`: OctoPrint base URL (required)
    /// - `OCTOPRINT_API_KEY`: OctoPrint API key (required)
    /// - `SETTINGS_FILE`: Settings file path (default: "./filamentsensor.json")
    /// - `POLL_INTERVAL_SECONDS`: Job state poll interval (default: "2")
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var_name: &str| {
            lookup(var_name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar {
                    var_name: var_name.to_string(),
                })
        };

        let octoprint_url = required("OCTOPRINT_URL")?
            .trim_end_matches('/')
            .to_string();
        let octoprint_api_key = required("OCTOPRINT_API_KEY")?;

        let settings_file = PathBuf::from(
            lookup("SETTINGS_FILE").unwrap_or_else(|| "./filamentsensor.json".to_string()),
        );

        let raw_interval = lookup("POLL_INTERVAL_SECONDS")
            .unwrap_or_else(|| constants::DEFAULT_POLL_INTERVAL_SECONDS.to_string());
        let poll_seconds = raw_interval
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidValue {
                field: "POLL_INTERVAL_SECONDS".to_string(),
                value: raw_interval.clone(),
                reason: e.to_string(),
            })?;
        if poll_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "POLL_INTERVAL_SECONDS".to_string(),
                value: raw_interval,
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Config {
            octoprint_url,
            octoprint_api_key,
            settings_file,
            poll_interval: Duration::from_secs(poll_seconds),
        })
    }
}

/// Application constants used throughout the system.
pub mod constants {
    /// Number of sensor pulses absorbed before the next one reports runout.
    pub const RUNOUT_PULSE_THRESHOLD: u32 = 10;

    /// Hardware bounce time applied to every edge interrupt, in milliseconds.
    pub const BOUNCE_TIME_MS: u64 = 500;

    /// Highest BCM pin number exposed on the 40-pin header.
    pub const MAX_BCM_PIN: u8 = 27;

    /// SMTP port used when the settings leave it empty (implicit TLS).
    pub const DEFAULT_SMTP_PORT: u16 = 465;

    /// Default job state poll interval in seconds.
    pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 2;

    /// Delay after a failed printer poll before trying again, in seconds.
    pub const RETRY_DELAY_SECONDS: u64 = 5;
}

use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    io::{self, Write},
    path::Path,
    sync::mpsc::{self, Receiver},
};

use log::{debug, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::constants;
use crate::error::SettingsError;

/// Which signal edge on the sensor pin counts as a pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EdgeMode {
    #[default]
    #[serde(rename = "rising", alias = "GPIO.RISING")]
    Rising,
    #[serde(rename = "falling", alias = "GPIO.FALLING")]
    Falling,
    #[serde(rename = "both", alias = "GPIO.BOTH")]
    Both,
}

/// Internal pull resistor applied to the sensor pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PullMode {
    #[serde(rename = "up", alias = "GPIO.PUD_UP")]
    Up,
    #[default]
    #[serde(rename = "down", alias = "GPIO.PUD_DOWN")]
    Down,
    #[serde(rename = "off", alias = "GPIO.PUD_OFF")]
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookMethod {
    Get,
    #[default]
    Post,
}

/// Webhook payload: either named fields (form body / query parameters) or a
/// raw string passed through untouched.
///
/// Field values may be any JSON scalar; they are stringified when sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WebhookPayload {
    Fields(BTreeMap<String, serde_json::Value>),
    Raw(String),
}

impl Default for WebhookPayload {
    fn default() -> Self {
        WebhookPayload::Fields(BTreeMap::new())
    }
}

/// One user-configured webhook called when filament runs out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(default)]
    pub enabled: bool,
    #[serde(rename = "type", alias = "method", default)]
    pub method: WebhookMethod,
    pub url: String,
    #[serde(default)]
    pub data: WebhookPayload,
}

/// The persisted settings record.
///
/// Field names match the keys stored in the settings file. Missing keys fall
/// back to [`Settings::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// BCM number of the pin the runout switch is wired to.
    pub gpio_pin: u8,
    pub mode: EdgeMode,
    pub pull_up_down: PullMode,
    pub send_mail: bool,
    pub mail_subject: String,
    pub mail_html_part: String,
    pub mail_text_part: String,
    pub mail_server: String,
    /// Stored as `""` when unset; [`constants::DEFAULT_SMTP_PORT`] applies then.
    #[serde(deserialize_with = "deserialize_port")]
    pub mail_port: Option<u16>,
    /// SMTP login, also used as the sender address.
    pub mail_user: String,
    pub mail_password: String,
    pub mail_receiver: Vec<String>,
    pub webhooks: Vec<Webhook>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            gpio_pin: 8,
            mode: EdgeMode::Rising,
            pull_up_down: PullMode::Down,
            send_mail: false,
            mail_subject: "Filament runout detected".to_string(),
            mail_html_part: String::new(),
            mail_text_part: String::new(),
            mail_server: String::new(),
            mail_port: None,
            mail_user: String::new(),
            mail_password: String::new(),
            mail_receiver: Vec::new(),
            webhooks: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file.
    ///
    /// A missing file is not an error: the defaults are returned so a fresh
    /// install starts with the stock configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid settings
    /// JSON, or fails [`Settings::validate`].
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(
                    "Settings file {} not found, using defaults",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(SettingsError::ReadFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let settings: Settings =
            serde_json::from_str(&raw).map_err(|e| SettingsError::ParseFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings to a JSON file.
    ///
    /// The record is written to a temporary file in the same directory and
    /// persisted over `path`, so readers never observe a half-written file.
    /// The temporary file is removed if anything fails.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let write_failed = |e: &dyn std::fmt::Display| SettingsError::WriteFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let json = serde_json::to_string_pretty(self).map_err(|e| write_failed(&e))?;
        let mut file =
            tempfile::NamedTempFile::new_in(parent_dir(path)).map_err(|e| write_failed(&e))?;
        file.write_all(json.as_bytes()).map_err(|e| write_failed(&e))?;
        file.persist(path).map_err(|e| write_failed(&e.error))?;
        debug!("Settings written to {}", path.display());
        Ok(())
    }

    /// Check the values that would otherwise only fail deep inside the GPIO
    /// or HTTP layers.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.gpio_pin > constants::MAX_BCM_PIN {
            return Err(SettingsError::InvalidValue {
                field: "gpio_pin".to_string(),
                value: self.gpio_pin.to_string(),
                reason: format!("BCM pin must be between 0 and {}", constants::MAX_BCM_PIN),
            });
        }

        for webhook in self.webhooks.iter().filter(|w| w.enabled) {
            let valid = reqwest::Url::parse(&webhook.url)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !valid {
                return Err(SettingsError::InvalidValue {
                    field: "webhooks.url".to_string(),
                    value: webhook.url.clone(),
                    reason: "enabled webhooks need an absolute http(s) URL".to_string(),
                });
            }
        }

        Ok(())
    }

    /// SMTP port to connect to.
    pub fn smtp_port(&self) -> u16 {
        self.mail_port.unwrap_or(constants::DEFAULT_SMTP_PORT)
    }
}

/// Accepts a port stored as a number, a numeric string, or an empty string.
fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match Option::<PortRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PortRepr::Number(port)) => Ok(Some(port)),
        Some(PortRepr::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(PortRepr::Text(text)) => text
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("invalid mail_port '{}': {}", text, e))),
    }
}

/// Directory holding `path`, `.` for a bare file name.
fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Reports changes to the settings file.
///
/// The containing directory is watched rather than the file itself, since
/// saves replace the file through a rename.
pub struct SettingsWatcher {
    _watcher: RecommendedWatcher,
    changes: Receiver<()>,
}

impl SettingsWatcher {
    /// Start watching `path`. The file does not need to exist yet.
    pub fn new(path: &Path) -> Result<Self, SettingsError> {
        let watch_failed = |e: notify::Error| SettingsError::WatchFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let file_name: OsString = path
            .file_name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| SettingsError::WatchFailed {
                path: path.display().to_string(),
                reason: "path has no file name".to_string(),
            })?;

        let (tx, changes) = mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()));
                    if ours {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!("Settings watch error: {}", e),
            }
        })
        .map_err(watch_failed)?;

        watcher
            .watch(parent_dir(path), RecursiveMode::NonRecursive)
            .map_err(watch_failed)?;

        Ok(Self {
            _watcher: watcher,
            changes,
        })
    }

    /// Returns true if the file changed since the last call. Bursts of
    /// events from a single save collapse into one change.
    pub fn changed(&mut self) -> bool {
        self.changes.try_iter().count() > 0
    }
}

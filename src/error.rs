use std::fmt;

/// Custom error types for the filament sensor.
///
/// Each subsystem gets its own error enum so callers can tell a GPIO
/// problem from an unreachable printer without string matching.

/// Main error type for filament sensor operations.
#[derive(Debug)]
pub enum FilamentSensorError {
    /// Errors related to the persisted settings record.
    SettingsError(SettingsError),

    /// Errors related to GPIO pin setup and interrupts.
    GpioError(GpioError),

    /// Errors related to printer control operations.
    PrinterError(PrinterError),
}

/// Errors related to configuration loaded from the environment.
#[derive(Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    MissingEnvVar { var_name: String },

    /// Invalid configuration values provided.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors specific to the settings file.
#[derive(Debug)]
pub enum SettingsError {
    /// Settings file exists but could not be read.
    ReadFailed { path: String, reason: String },

    /// Settings file could not be written.
    WriteFailed { path: String, reason: String },

    /// Settings file is not valid JSON for the settings record.
    ParseFailed { path: String, reason: String },

    /// A settings field holds a value that cannot be used.
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Change notifications for the settings file could not be set up.
    WatchFailed { path: String, reason: String },
}

/// Errors specific to GPIO access.
#[derive(Debug)]
pub enum GpioError {
    /// The GPIO peripheral could not be opened.
    Unavailable { reason: String },

    /// Pin could not be configured as an input.
    PinSetupFailed { pin: u8, reason: String },

    /// Edge interrupt could not be attached or removed.
    InterruptFailed { pin: u8, reason: String },

    /// Pin was used before being set up as an input.
    PinNotConfigured { pin: u8 },
}

/// Errors specific to printer control operations.
#[derive(Debug)]
pub enum PrinterError {
    /// Failed to connect to printer API.
    ConnectionFailed { api_url: String, reason: String },

    /// Printer API returned an error response.
    ApiError {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// Printer API answered with a body we could not understand.
    InvalidResponse { endpoint: String, reason: String },
}

/// Errors specific to mail and webhook notifications.
#[derive(Debug)]
pub enum NotificationError {
    /// A required mail setting is empty.
    MailNotConfigured { field: String },

    /// A mail address could not be parsed.
    InvalidAddress { address: String, reason: String },

    /// Sending mail failed.
    MailFailed { receiver: String, reason: String },

    /// Webhook request failed or returned a non-success status.
    WebhookFailed { url: String, reason: String },
}

impl fmt::Display for FilamentSensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilamentSensorError::SettingsError(e) => write!(f, "Settings error: {}", e),
            FilamentSensorError::GpioError(e) => write!(f, "GPIO error: {}", e),
            FilamentSensorError::PrinterError(e) => write!(f, "Printer error: {}", e),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingEnvVar { var_name } => {
                write!(f, "Required environment variable '{}' is not set", var_name)
            }
            ConfigError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, reason
                )
            }
        }
    }
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::ReadFailed { path, reason } => {
                write!(f, "Failed to read settings file '{}': {}", path, reason)
            }
            SettingsError::WriteFailed { path, reason } => {
                write!(f, "Failed to write settings file '{}': {}", path, reason)
            }
            SettingsError::ParseFailed { path, reason } => {
                write!(f, "Failed to parse settings file '{}': {}", path, reason)
            }
            SettingsError::InvalidValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for setting '{}': {}",
                    value, field, reason
                )
            }
            SettingsError::WatchFailed { path, reason } => {
                write!(f, "Failed to watch settings file '{}': {}", path, reason)
            }
        }
    }
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpioError::Unavailable { reason } => {
                write!(f, "GPIO peripheral unavailable: {}", reason)
            }
            GpioError::PinSetupFailed { pin, reason } => {
                write!(f, "Failed to set up GPIO pin {} as input: {}", pin, reason)
            }
            GpioError::InterruptFailed { pin, reason } => {
                write!(f, "Failed to change interrupt on GPIO pin {}: {}", pin, reason)
            }
            GpioError::PinNotConfigured { pin } => {
                write!(f, "GPIO pin {} has not been set up as an input", pin)
            }
        }
    }
}

impl fmt::Display for PrinterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrinterError::ConnectionFailed { api_url, reason } => {
                write!(
                    f,
                    "Failed to connect to printer at '{}': {}",
                    api_url, reason
                )
            }
            PrinterError::ApiError {
                endpoint,
                status,
                message,
            } => {
                write!(
                    f,
                    "Printer API error at '{}' (HTTP {}): {}",
                    endpoint, status, message
                )
            }
            PrinterError::InvalidResponse { endpoint, reason } => {
                write!(f, "Unexpected response from '{}': {}", endpoint, reason)
            }
        }
    }
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationError::MailNotConfigured { field } => {
                write!(f, "Mail is enabled but '{}' is empty", field)
            }
            NotificationError::InvalidAddress { address, reason } => {
                write!(f, "Invalid mail address '{}': {}", address, reason)
            }
            NotificationError::MailFailed { receiver, reason } => {
                write!(f, "Failed to send mail to '{}': {}", receiver, reason)
            }
            NotificationError::WebhookFailed { url, reason } => {
                write!(f, "Webhook '{}' failed: {}", url, reason)
            }
        }
    }
}

impl std::error::Error for FilamentSensorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FilamentSensorError::SettingsError(e) => Some(e),
            FilamentSensorError::GpioError(e) => Some(e),
            FilamentSensorError::PrinterError(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for SettingsError {}
impl std::error::Error for GpioError {}
impl std::error::Error for PrinterError {}
impl std::error::Error for NotificationError {}

// Conversion traits for easy error propagation
impl From<SettingsError> for FilamentSensorError {
    fn from(err: SettingsError) -> Self {
        FilamentSensorError::SettingsError(err)
    }
}

impl From<GpioError> for FilamentSensorError {
    fn from(err: GpioError) -> Self {
        FilamentSensorError::GpioError(err)
    }
}

impl From<PrinterError> for FilamentSensorError {
    fn from(err: PrinterError) -> Self {
        FilamentSensorError::PrinterError(err)
    }
}

//! Filament Sensor - filament runout monitoring for OctoPrint printers.
//!
//! Watches a filament-runout switch wired to a Raspberry Pi GPIO pin while a
//! print is running and pauses the print once filament runs out, optionally
//! notifying the operator by mail and webhooks.
//!
//! # Core Components
//!
//! * [`config`] - Process configuration from environment variables
//! * [`settings`] - The persisted sensor and notification settings
//! * [`sensor`] - GPIO backends and the runout pulse debouncer
//! * [`events`] - Print lifecycle events derived from the job state
//! * [`printer`] - OctoPrint API integration for printer control
//! * [`alerts`] - Runout mail and webhook notifications
//! * [`plugin`] - The event handlers tying it all together
//! * [`error`] - Error types
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::{path::PathBuf, sync::Arc, time::Duration};
//! use filament_sensor::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let path = PathBuf::from("filamentsensor.json");
//! let settings = Settings::load(&path)?;
//! let printer = PrinterService::new("http://octopi.local".into(), "API_KEY".into());
//! let mut sensor = FilamentSensor::new(
//!     settings,
//!     path,
//!     Arc::new(MockGpioBackend::new()),
//!     printer,
//!     AlertService::new(),
//! );
//! sensor.on_startup()?;
//!
//! loop {
//!     if sensor.wait_for_runout(Duration::from_secs(2)).is_some() {
//!         sensor.filament_run_out()?;
//!     }
//!     sensor.poll()?;
//! }
//! # }
//! ```

pub mod alerts;
pub mod config;
pub mod error;
pub mod events;
pub mod plugin;
pub mod printer;
pub mod sensor;
pub mod settings;

// Re-export commonly used types for convenience
pub use alerts::{AlertService, NotificationReport};
pub use config::Config;
pub use error::FilamentSensorError;
pub use events::{JobState, PrintEvent, PrintEventTracker};
pub use plugin::{FilamentSensor, RunoutOutcome};
pub use printer::{PrintControl, PrinterService};
#[cfg(feature = "rpi")]
pub use sensor::RppalBackend;
pub use sensor::{GpioBackend, MockGpioBackend, RunoutDebouncer};
pub use settings::{
    EdgeMode, PullMode, Settings, SettingsWatcher, Webhook, WebhookMethod, WebhookPayload,
};

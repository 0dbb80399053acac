use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::{sync::Arc, thread, time::Duration};

use filament_sensor::config::{Config, constants};
use filament_sensor::{
    AlertService, FilamentSensor, FilamentSensorError, GpioBackend, PrinterService,
    RunoutOutcome, Settings, SettingsWatcher,
};

/// Filament Sensor - pause OctoPrint prints when filament runs out.
///
/// This daemon watches a filament-runout switch on a Raspberry Pi GPIO pin.
/// While a print is running, sensor pulses are counted; once the runout
/// threshold is reached the print is paused through the OctoPrint API and
/// the configured mail receivers and webhooks are notified.
///
/// # Environment Variables
///
/// Required:
/// * `OCTOPRINT_URL` - OctoPrint base URL
/// * `OCTOPRINT_API_KEY` - OctoPrint application key
///
/// Optional (with defaults):
/// * `SETTINGS_FILE` - Settings JSON file (default: "./filamentsensor.json")
/// * `POLL_INTERVAL_SECONDS` - Job state poll interval (default: "2")
///
/// # Usage
///
/// ```bash
/// export OCTOPRINT_URL="http://octopi.local"
/// export OCTOPRINT_API_KEY="..."
/// ./filament-sensor
/// ```
fn main() -> Result<()> {
    // Initialize logger to output to stdout, using RUST_LOG env var or info level by default
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(
            std::env::var("RUST_LOG")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(log::LevelFilter::Info),
        )
        .init();

    let config = Config::load().context(
        "Failed to load configuration. Please ensure all required environment variables are set.",
    )?;

    info!("Filament Sensor {} starting...", env!("CARGO_PKG_VERSION"));
    info!("Using OctoPrint API URL: {}", config.octoprint_url);

    let settings = Settings::load(&config.settings_file)?;
    info!("Settings loaded from {}", config.settings_file.display());

    let gpio = open_gpio()?;
    let printer = PrinterService::new(
        config.octoprint_url.clone(),
        config.octoprint_api_key.clone(),
    );

    let mut sensor = FilamentSensor::new(
        settings,
        config.settings_file.clone(),
        gpio,
        printer,
        AlertService::new(),
    );
    sensor.on_startup()?;

    let mut watcher = SettingsWatcher::new(&config.settings_file)?;

    info!("Filament Sensor initialized successfully. Starting monitoring loop...");

    loop {
        let reported = sensor.wait_for_runout(config.poll_interval);
        if let Some(pin) = reported {
            debug!("Runout reported on GPIO {}", pin);
        }
        if reported.is_some() || sensor.runout_pending() {
            match sensor.filament_run_out() {
                Ok(RunoutOutcome::Paused(report)) => info!(
                    "Runout handled: {} mail(s) sent, {} webhook(s) called, {} failure(s)",
                    report.mails_sent,
                    report.webhooks_called,
                    report.failures.len()
                ),
                Ok(RunoutOutcome::NotPrinting) => {}
                Err(e) => error!("Failed to handle filament runout, will retry: {}", e),
            }
        }

        if watcher.changed() {
            match Settings::load(&config.settings_file) {
                Ok(settings) => {
                    if let Err(e) = sensor.apply_settings(settings) {
                        error!("Failed to apply changed settings: {}", e);
                    }
                }
                Err(e) => warn!("Ignoring changed settings file: {}", e),
            }
        }

        match sensor.poll() {
            Ok(_) => {}
            Err(FilamentSensorError::GpioError(e)) => {
                error!("Failed to switch filament sensor, will retry: {}", e);
            }
            Err(e) => {
                warn!("Failed to get printer status: {}", e);
                thread::sleep(Duration::from_secs(constants::RETRY_DELAY_SECONDS));
            }
        }
    }
}

#[cfg(feature = "rpi")]
fn open_gpio() -> Result<Arc<dyn GpioBackend>> {
    let backend = filament_sensor::RppalBackend::new()?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "rpi"))]
fn open_gpio() -> Result<Arc<dyn GpioBackend>> {
    warn!("Built without the 'rpi' feature: using the mock GPIO backend, no pulses will arrive");
    Ok(Arc::new(filament_sensor::MockGpioBackend::new()))
}

use std::{
    path::PathBuf,
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    time::Duration,
};

use log::{debug, error, info, warn};

use crate::alerts::{AlertService, NotificationReport};
use crate::config::constants;
use crate::error::{FilamentSensorError, GpioError};
use crate::events::{PrintEvent, PrintEventTracker};
use crate::printer::PrintControl;
use crate::sensor::{GpioBackend, RunoutDebouncer};
use crate::settings::Settings;

/// What happened when a runout was handled.
#[derive(Debug)]
pub enum RunoutOutcome {
    /// The print was paused; notifications were attempted.
    Paused(NotificationReport),
    /// The sensor fired while nothing was printing.
    NotPrinting,
}

/// The filament sensor: reacts to print lifecycle events, counts sensor
/// pulses while a print runs and pauses the print once filament runs out.
///
/// Interrupt callbacks only touch the shared [`RunoutDebouncer`] and a
/// channel; pausing and notifying happen on the thread that calls
/// [`wait_for_runout`](Self::wait_for_runout) and
/// [`filament_run_out`](Self::filament_run_out).
///
/// A runout stays pending until the print is paused, the printer reports it
/// is not printing, or the job ends. The interrupt is detached on the first
/// report, so a failed pause is retried from [`runout_pending`](Self::runout_pending)
/// rather than from new sensor pulses.
pub struct FilamentSensor<P: PrintControl> {
    settings: Settings,
    settings_path: PathBuf,
    gpio: Arc<dyn GpioBackend>,
    printer: P,
    alerts: AlertService,
    debouncer: Arc<RunoutDebouncer>,
    tracker: PrintEventTracker,
    armed_pin: Option<u8>,
    runout_pending: bool,
    runout_tx: Sender<u8>,
    runout_rx: Receiver<u8>,
}

impl<P: PrintControl> FilamentSensor<P> {
    pub fn new(
        settings: Settings,
        settings_path: PathBuf,
        gpio: Arc<dyn GpioBackend>,
        printer: P,
        alerts: AlertService,
    ) -> Self {
        let (runout_tx, runout_rx) = mpsc::channel();
        Self {
            settings,
            settings_path,
            gpio,
            printer,
            alerts,
            debouncer: Arc::new(RunoutDebouncer::new(constants::RUNOUT_PULSE_THRESHOLD)),
            tracker: PrintEventTracker::new(),
            armed_pin: None,
            runout_pending: false,
            runout_tx,
            runout_rx,
        }
    }

    /// Set the configured pin up as an input.
    pub fn on_startup(&mut self) -> Result<(), FilamentSensorError> {
        self.gpio
            .setup_input(self.settings.gpio_pin, self.settings.pull_up_down)?;
        info!(
            "Filament sensor on GPIO {} ({:?} edge, pull {:?})",
            self.settings.gpio_pin, self.settings.mode, self.settings.pull_up_down
        );
        Ok(())
    }

    /// Validate, persist and apply new settings.
    pub fn on_settings_save(&mut self, settings: Settings) -> Result<(), FilamentSensorError> {
        settings.validate()?;
        settings.save(&self.settings_path)?;
        self.apply_settings(settings)
    }

    /// Switch to new settings without persisting them.
    ///
    /// The old pin is released and the new one set up. If the sensor is
    /// armed it is re-armed on the new pin; the pulse count carries over.
    pub fn apply_settings(&mut self, settings: Settings) -> Result<(), FilamentSensorError> {
        if settings == self.settings {
            debug!("Settings unchanged");
            return Ok(());
        }

        let was_armed = self.armed_pin.is_some();
        self.disarm();
        self.gpio.cleanup(self.settings.gpio_pin);

        self.settings = settings;
        self.gpio
            .setup_input(self.settings.gpio_pin, self.settings.pull_up_down)?;
        info!("Settings applied, sensor on GPIO {}", self.settings.gpio_pin);

        if was_armed {
            self.arm()?;
        }
        Ok(())
    }

    /// React to a print lifecycle event.
    pub fn on_event(&mut self, event: PrintEvent) -> Result<(), FilamentSensorError> {
        match event {
            PrintEvent::Started => {
                self.debouncer.reset();
                self.runout_pending = false;
                info!("Printing started. Filament sensor enabled.");
                self.arm()?;
            }
            PrintEvent::Done | PrintEvent::Failed | PrintEvent::Cancelled => {
                info!("Printing stopped ({:?}). Filament sensor disabled.", event);
                self.runout_pending = false;
                self.disarm();
            }
        }
        Ok(())
    }

    /// Query the printer's job state and dispatch the event it implies.
    ///
    /// The observed state is only committed once the event was handled, so
    /// an event whose handler failed (e.g. arming the interrupt) is
    /// delivered again on the next poll.
    pub fn poll(&mut self) -> Result<Option<PrintEvent>, FilamentSensorError> {
        let state = self.printer.job_state()?;
        let mut tracker = self.tracker.clone();
        let event = tracker.observe(state);
        if let Some(event) = event {
            self.on_event(event)?;
        }
        self.tracker = tracker;
        Ok(event)
    }

    /// Block until the sensor reports runout or `timeout` elapses.
    ///
    /// Returns the pin that reported runout.
    pub fn wait_for_runout(&self, timeout: Duration) -> Option<u8> {
        // We hold a sender ourselves, so the channel never disconnects.
        self.runout_rx.recv_timeout(timeout).ok()
    }

    /// True while a reported runout has not been resolved by a pause.
    pub fn runout_pending(&self) -> bool {
        self.runout_pending
    }

    /// Handle a reported runout: stop listening to the sensor and, if the
    /// printer is printing, pause it and notify.
    ///
    /// If querying or pausing the printer fails the runout stays pending and
    /// the call should be repeated.
    pub fn filament_run_out(&mut self) -> Result<RunoutOutcome, FilamentSensorError> {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        if self.runout_pending {
            info!("{}: Retrying pause for pending filament runout", timestamp);
        } else {
            info!("{}: Filament sensor triggered", timestamp);
        }
        self.runout_pending = true;
        self.disarm();

        if !self.printer.is_printing()? {
            info!("Printer is not printing, nothing to pause");
            self.runout_pending = false;
            return Ok(RunoutOutcome::NotPrinting);
        }

        self.printer.pause_print()?;
        self.runout_pending = false;
        warn!("{}: Print paused because filament ran out", timestamp);

        let report = self.alerts.notify_runout(&self.settings);
        for failure in &report.failures {
            error!("Runout notification failed: {}", failure);
        }
        Ok(RunoutOutcome::Paused(report))
    }

    fn arm(&mut self) -> Result<(), GpioError> {
        let pin = self.settings.gpio_pin;
        if let Err(e) = self.gpio.remove_event_detect(pin) {
            debug!("No interrupt to remove before arming: {}", e);
        }

        let debouncer = Arc::clone(&self.debouncer);
        let runout_tx = self.runout_tx.clone();
        self.gpio.add_event_detect(
            pin,
            self.settings.mode,
            Duration::from_millis(constants::BOUNCE_TIME_MS),
            Box::new(move || {
                if debouncer.register_pulse() {
                    // Receiver lives as long as the sensor; a send error only
                    // means we are shutting down.
                    let _ = runout_tx.send(pin);
                }
            }),
        )?;
        self.armed_pin = Some(pin);
        Ok(())
    }

    fn disarm(&mut self) {
        let pin = self.armed_pin.take().unwrap_or(self.settings.gpio_pin);
        if let Err(e) = self.gpio.remove_event_detect(pin) {
            debug!("Ignoring failure to remove interrupt: {}", e);
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn printer(&self) -> &P {
        &self.printer
    }

    pub fn is_armed(&self) -> bool {
        self.armed_pin.is_some()
    }

    /// Pulses counted since the current print started.
    pub fn pulse_count(&self) -> u32 {
        self.debouncer.count()
    }
}

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use log::debug;

use crate::error::GpioError;
use crate::settings::{EdgeMode, PullMode};

/// Callback invoked from the GPIO interrupt thread for every detected edge.
pub type PulseCallback = Box<dyn FnMut() + Send + 'static>;

/// Minimal GPIO surface the sensor needs: input setup and edge interrupts.
///
/// Pins are identified by their BCM number.
pub trait GpioBackend {
    /// Configure `pin` as an input with the given pull resistor.
    ///
    /// Re-running setup on a pin replaces its previous configuration and
    /// drops any interrupt attached to it.
    fn setup_input(&self, pin: u8, pull: PullMode) -> Result<(), GpioError>;

    /// Attach an edge interrupt to a pin previously set up as input.
    fn add_event_detect(
        &self,
        pin: u8,
        edge: EdgeMode,
        bounce: Duration,
        callback: PulseCallback,
    ) -> Result<(), GpioError>;

    /// Detach the edge interrupt from `pin`.
    fn remove_event_detect(&self, pin: u8) -> Result<(), GpioError>;

    /// Release `pin` entirely.
    fn cleanup(&self, pin: u8);
}

/// Pulse counter shared between the interrupt callback and the main loop.
///
/// The first `threshold` pulses after a [`reset`](Self::reset) are absorbed;
/// the next one reports runout, exactly once until the next reset.
#[derive(Debug)]
pub struct RunoutDebouncer {
    count: AtomicU32,
    threshold: u32,
    tripped: AtomicBool,
}

impl RunoutDebouncer {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            threshold,
            tripped: AtomicBool::new(false),
        }
    }

    /// Zero the counter and allow runout to be reported again.
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.tripped.store(false, Ordering::SeqCst);
    }

    /// Count one sensor pulse. Returns true when this pulse signals runout.
    pub fn register_pulse(&self) -> bool {
        let below_threshold = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < self.threshold).then_some(count + 1)
            })
            .is_ok();

        if below_threshold {
            false
        } else {
            !self.tripped.swap(true, Ordering::SeqCst)
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[derive(Default)]
struct MockPin {
    pull: Option<PullMode>,
    edge: Option<EdgeMode>,
    callback: Option<PulseCallback>,
}

/// In-memory GPIO backend.
///
/// Used on machines without GPIO hardware and in tests: pulses are injected
/// with [`MockGpioBackend::pulse`] instead of coming from an interrupt.
#[derive(Default)]
pub struct MockGpioBackend {
    pins: Mutex<HashMap<u8, MockPin>>,
    fail_next_arm: AtomicBool,
}

impl MockGpioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate one edge on `pin`. Returns false if no interrupt is attached.
    ///
    /// The callback runs while the pin table is locked, so it must not call
    /// back into the backend.
    pub fn pulse(&self, pin: u8) -> bool {
        let mut pins = self.lock();
        match pins.get_mut(&pin).and_then(|p| p.callback.as_mut()) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, pin: u8) -> bool {
        self.lock()
            .get(&pin)
            .is_some_and(|p| p.callback.is_some())
    }

    /// Pull mode of a configured pin, `None` if the pin is not set up.
    pub fn pull_mode(&self, pin: u8) -> Option<PullMode> {
        self.lock().get(&pin).and_then(|p| p.pull)
    }

    /// Make the next [`GpioBackend::add_event_detect`] call fail, as a
    /// kernel refusing the interrupt would.
    pub fn fail_next_arm(&self) {
        self.fail_next_arm.store(true, Ordering::SeqCst);
    }

    /// Edge the attached interrupt listens for.
    pub fn edge_mode(&self, pin: u8) -> Option<EdgeMode> {
        self.lock().get(&pin).and_then(|p| p.edge)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u8, MockPin>> {
        // A panicking test callback must not wedge every later assertion.
        self.pins.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl GpioBackend for MockGpioBackend {
    fn setup_input(&self, pin: u8, pull: PullMode) -> Result<(), GpioError> {
        self.lock().insert(
            pin,
            MockPin {
                pull: Some(pull),
                ..MockPin::default()
            },
        );
        Ok(())
    }

    fn add_event_detect(
        &self,
        pin: u8,
        edge: EdgeMode,
        bounce: Duration,
        callback: PulseCallback,
    ) -> Result<(), GpioError> {
        if self.fail_next_arm.swap(false, Ordering::SeqCst) {
            return Err(GpioError::InterruptFailed {
                pin,
                reason: "interrupt rejected".to_string(),
            });
        }

        let mut pins = self.lock();
        let entry = pins
            .get_mut(&pin)
            .ok_or(GpioError::PinNotConfigured { pin })?;
        if entry.callback.is_some() {
            return Err(GpioError::InterruptFailed {
                pin,
                reason: "an interrupt is already attached".to_string(),
            });
        }
        debug!(
            "mock: armed pin {} on {:?} edge ({} ms bounce)",
            pin,
            edge,
            bounce.as_millis()
        );
        entry.edge = Some(edge);
        entry.callback = Some(callback);
        Ok(())
    }

    fn remove_event_detect(&self, pin: u8) -> Result<(), GpioError> {
        let mut pins = self.lock();
        let entry = pins
            .get_mut(&pin)
            .ok_or(GpioError::PinNotConfigured { pin })?;
        entry.edge = None;
        entry
            .callback
            .take()
            .map(|_| ())
            .ok_or_else(|| GpioError::InterruptFailed {
                pin,
                reason: "no interrupt attached".to_string(),
            })
    }

    fn cleanup(&self, pin: u8) {
        self.lock().remove(&pin);
    }
}

#[cfg(feature = "rpi")]
pub use self::rpi::RppalBackend;

#[cfg(feature = "rpi")]
mod rpi {
    use std::{collections::HashMap, sync::Mutex, time::Duration};

    use rppal::gpio::{Gpio, InputPin, Trigger};

    use super::{GpioBackend, PulseCallback};
    use crate::error::GpioError;
    use crate::settings::{EdgeMode, PullMode};

    /// Raspberry Pi GPIO through `rppal`, BCM numbering.
    pub struct RppalBackend {
        gpio: Gpio,
        pins: Mutex<HashMap<u8, InputPin>>,
    }

    impl RppalBackend {
        pub fn new() -> Result<Self, GpioError> {
            let gpio = Gpio::new().map_err(|e| GpioError::Unavailable {
                reason: e.to_string(),
            })?;
            Ok(Self {
                gpio,
                pins: Mutex::new(HashMap::new()),
            })
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u8, InputPin>> {
            self.pins.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }
    }

    impl GpioBackend for RppalBackend {
        fn setup_input(&self, pin: u8, pull: PullMode) -> Result<(), GpioError> {
            let mut pins = self.lock();
            // Dropping the old handle resets the pin before it is claimed again.
            pins.remove(&pin);

            let raw = self.gpio.get(pin).map_err(|e| GpioError::PinSetupFailed {
                pin,
                reason: e.to_string(),
            })?;
            let input = match pull {
                PullMode::Up => raw.into_input_pullup(),
                PullMode::Down => raw.into_input_pulldown(),
                PullMode::Off => raw.into_input(),
            };
            pins.insert(pin, input);
            Ok(())
        }

        fn add_event_detect(
            &self,
            pin: u8,
            edge: EdgeMode,
            bounce: Duration,
            mut callback: PulseCallback,
        ) -> Result<(), GpioError> {
            let trigger = match edge {
                EdgeMode::Rising => Trigger::RisingEdge,
                EdgeMode::Falling => Trigger::FallingEdge,
                EdgeMode::Both => Trigger::Both,
            };

            let mut pins = self.lock();
            let input = pins
                .get_mut(&pin)
                .ok_or(GpioError::PinNotConfigured { pin })?;
            input
                .set_async_interrupt(trigger, Some(bounce), move |_event| callback())
                .map_err(|e| GpioError::InterruptFailed {
                    pin,
                    reason: e.to_string(),
                })
        }

        fn remove_event_detect(&self, pin: u8) -> Result<(), GpioError> {
            let mut pins = self.lock();
            let input = pins
                .get_mut(&pin)
                .ok_or(GpioError::PinNotConfigured { pin })?;
            input
                .clear_async_interrupt()
                .map_err(|e| GpioError::InterruptFailed {
                    pin,
                    reason: e.to_string(),
                })
        }

        fn cleanup(&self, pin: u8) {
            self.lock().remove(&pin);
        }
    }
}

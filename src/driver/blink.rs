use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{configure_failed, lock, log_close_failure};
use crate::device::{Direction, Gpio, PeripheralManager};
use crate::timer::{CancelToken, Timer};
use crate::PioResult;

struct Blink<G> {
    pin: Option<G>,
    on: bool,
    ticks: u64,
}

impl<G: Gpio> Blink<G> {
    fn tick(&mut self) {
        let pin = match self.pin.as_mut() {
            Some(pin) => pin,
            None => {
                warn!("blink tick after the pin was closed");
                return;
            }
        };

        self.ticks += 1;
        let next = !self.on;
        match pin.set_value(next) {
            Ok(()) => {
                self.on = next;
                debug!("{} set to {}", pin.name(), next);
            }
            Err(err) => error!("failed to toggle {}: {}", pin.name(), err),
        }
    }
}

/// Toggles an output pin on every timer tick.
///
/// # Example
/// ```no_run
/// use pio_drivers::device::sysfs::SysfsManager;
/// use pio_drivers::{BlinkDriver, ThreadTimer};
/// use std::time::Duration;
///
/// fn main() -> pio_drivers::PioResult<()> {
///     let manager = SysfsManager::new();
///     let mut led = BlinkDriver::start(&manager, &ThreadTimer::new(), "BCM6", Duration::from_millis(500))?;
///     std::thread::sleep(Duration::from_secs(5));
///     led.stop()
/// }
/// ```
pub struct BlinkDriver<G: Gpio + 'static> {
    name: String,
    state: Arc<Mutex<Blink<G>>>,
    token: Option<CancelToken>,
}

impl<G: Gpio + 'static> BlinkDriver<G> {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

    /// Opens `pin` as an output driven low and starts toggling it every `interval`.
    ///
    /// Fails with `ResourceUnavailable` if the pin cannot be opened or configured; nothing stays open in that case.
    pub fn start<M, T>(manager: &M, timer: &T, pin: &str, interval: Duration) -> PioResult<Self>
    where
        M: PeripheralManager<Gpio = G>,
        T: Timer,
    {
        info!("starting to blink {} every {:?}", pin, interval);
        let mut gpio = manager.open_gpio(pin)?;
        if let Err(err) = gpio.set_direction(Direction::OutInitiallyLow) {
            log_close_failure(pin, gpio.close());
            return Err(configure_failed(pin, err));
        }

        let mut driver = Self {
            name: pin.to_string(),
            state: Arc::new(Mutex::new(Blink {
                pin: Some(gpio),
                on: false,
                ticks: 0,
            })),
            token: None,
        };

        let state = Arc::clone(&driver.state);
        // On failure `driver` is dropped, which closes the pin.
        let token = timer
            .schedule_repeating(interval, Box::new(move || lock(&state).tick()))
            .map_err(|err| configure_failed(pin, err))?;
        driver.token = Some(token);

        Ok(driver)
    }

    /// Cancels the ticks, then closes the pin. Calling it again does nothing.
    pub fn stop(&mut self) -> PioResult<()> {
        if let Some(mut token) = self.token.take() {
            token.cancel();
        }

        let pin = lock(&self.state).pin.take();
        match pin {
            Some(pin) => {
                info!("closing {}", self.name);
                pin.close()
            }
            None => Ok(()),
        }
    }

    pub fn pin_name(&self) -> &str {
        &self.name
    }

    /// Level of the pin after the last successful tick.
    pub fn is_on(&self) -> bool {
        lock(&self.state).on
    }

    pub fn ticks(&self) -> u64 {
        lock(&self.state).ticks
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).pin.is_some()
    }
}

impl<G: Gpio + 'static> Drop for BlinkDriver<G> {
    fn drop(&mut self) {
        let result = self.stop();
        log_close_failure(&self.name, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockManager;
    use crate::timer::ManualTimer;

    #[test]
    fn state_after_n_ticks_is_n_odd() {
        let manager = MockManager::new(&["BCM6"], &[]);
        let timer = ManualTimer::new();
        let driver = BlinkDriver::start(&manager, &timer, "BCM6", Duration::from_millis(10)).unwrap();

        for n in 0..7u64 {
            assert_eq!(driver.ticks(), n);
            assert_eq!(driver.is_on(), n % 2 == 1);
            assert_eq!(manager.level("BCM6"), Some(n % 2 == 1));
            timer.fire();
        }
    }

    #[test]
    fn tick_after_close_does_nothing() {
        let manager = MockManager::new(&["BCM6"], &[]);
        let mut blink = Blink {
            pin: Some(manager.open_gpio("BCM6").unwrap()),
            on: false,
            ticks: 0,
        };
        blink.pin.as_mut().unwrap().set_direction(Direction::OutInitiallyLow).unwrap();
        blink.tick();
        blink.pin.take().unwrap().close().unwrap();
        blink.tick();

        assert_eq!(blink.ticks, 1);
        assert_eq!(manager.writes("BCM6"), vec![true]);
    }

    #[test]
    fn failed_write_keeps_state_and_ticking() {
        let manager = MockManager::new(&["BCM6"], &[]);
        let mut blink = Blink {
            pin: Some(manager.open_gpio("BCM6").unwrap()),
            on: false,
            ticks: 0,
        };
        // Still an input, so writes are rejected.
        blink.tick();
        blink.tick();

        assert_eq!(blink.ticks, 2);
        assert!(!blink.on);
        assert!(manager.writes("BCM6").is_empty());
    }
}

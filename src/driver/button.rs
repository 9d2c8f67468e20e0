use log::info;

use super::{configure_failed, log_close_failure};
use crate::device::{Direction, Edge, EdgeEvent, Gpio, GpioCallback, PeripheralManager};
use crate::PioResult;

/// Callback of the button sample: logs every press and keeps listening.
#[derive(Debug, Default)]
pub struct LogPress {
    presses: u64,
}

impl GpioCallback for LogPress {
    fn on_gpio_edge(&mut self, event: &EdgeEvent) -> bool {
        self.presses += 1;
        info!("{} changed, button pressed ({} so far)", event.pin, self.presses);
        true
    }
}

/// Watches an input pin for falling edges, which is what a push button wired to ground produces.
///
/// The callback runs on the edge-detection context of the backend. It decides after every edge whether to keep
/// listening; once it returns `false` it is never called again.
pub struct InputWatcher<G: Gpio> {
    name: String,
    pin: Option<G>,
}

impl<G: Gpio> InputWatcher<G> {
    /// Opens `pin` as an input, triggers on falling edges and registers `callback`.
    ///
    /// Fails with `ResourceUnavailable` if the pin cannot be opened or configured; nothing stays open in that case.
    pub fn start<M, C>(manager: &M, pin: &str, callback: C) -> PioResult<Self>
    where
        M: PeripheralManager<Gpio = G>,
        C: GpioCallback + 'static,
    {
        info!("watching {} for falling edges", pin);
        let mut gpio = manager.open_gpio(pin)?;

        let configured = gpio
            .set_direction(Direction::In)
            .and_then(|_| gpio.set_edge_trigger(Edge::Falling))
            .and_then(|_| gpio.register_callback(Box::new(callback)));
        if let Err(err) = configured {
            log_close_failure(pin, gpio.close());
            return Err(configure_failed(pin, err));
        }

        Ok(Self {
            name: pin.to_string(),
            pin: Some(gpio),
        })
    }

    /// Closes the pin, which deregisters the callback. Calling it again does nothing.
    pub fn stop(&mut self) -> PioResult<()> {
        match self.pin.take() {
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

    pub fn is_running(&self) -> bool {
        self.pin.is_some()
    }
}

impl<G: Gpio> Drop for InputWatcher<G> {
    fn drop(&mut self) {
        let result = self.stop();
        log_close_failure(&self.name, result);
    }
}

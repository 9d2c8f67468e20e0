use embedded_hal::digital::v2 as eh;

use super::Gpio;
use crate::PioError;

/// Adapter exposing a `Gpio` through [`embedded_hal`](https://crates.io/crates/embedded-hal) digital traits.
///
/// The wrapped pin keeps its own direction rules: calling `set_high` on an input line fails with `IoFailure`.
#[derive(Debug)]
pub struct HalPin<G: Gpio>(pub G);

impl<G: Gpio> HalPin<G> {
    pub fn into_inner(self) -> G {
        self.0
    }
}

impl<G: Gpio> eh::OutputPin for HalPin<G> {
    type Error = PioError;

    fn set_low(&mut self) -> Result<(), PioError> {
        self.0.set_value(false)
    }

    fn set_high(&mut self) -> Result<(), PioError> {
        self.0.set_value(true)
    }
}

impl<G: Gpio> eh::StatefulOutputPin for HalPin<G> {
    fn is_set_high(&self) -> Result<bool, PioError> {
        self.0.value()
    }

    fn is_set_low(&self) -> Result<bool, PioError> {
        self.0.value().map(|v| !v)
    }
}

impl<G: Gpio> eh::ToggleableOutputPin for HalPin<G> {
    type Error = PioError;

    fn toggle(&mut self) -> Result<(), PioError> {
        let current = self.0.value()?;
        self.0.set_value(!current)
    }
}

impl<G: Gpio> eh::InputPin for HalPin<G> {
    type Error = PioError;

    fn is_high(&self) -> Result<bool, PioError> {
        self.0.value()
    }

    fn is_low(&self) -> Result<bool, PioError> {
        self.is_high().map(|v| !v)
    }
}

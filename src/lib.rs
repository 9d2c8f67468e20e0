//! Small peripheral drivers for Linux single-board computers: a blinking LED, a button watcher, a PWM servo sweep
//! and a BMP280 temperature reader.
//!
//! Every driver follows the same shape: it opens one peripheral through a `PeripheralManager`, configures it,
//! runs a small state transition on a `Timer` tick (or on an edge event coming from the pin) and releases the
//! peripheral when `stop` is called or the driver is dropped.
//!
//! Three backends implement `PeripheralManager`:
//!
//! * `device::sysfs` - the generic Linux `/sys/class/gpio` and `/sys/class/pwm` interfaces, plus `/dev/i2c-N`.
//! * `device::odroid` - memory-mapped GPIO registers of [ODROID-C2](https://www.hardkernel.com/shop/odroid-c2/) rev2.
//! * `device::mock` - an in-memory board, useful for tests and for trying drivers out without hardware.
//!
//! Pins obtained from any backend can be wrapped in `HalPin` to be used with [`embedded_hal`](https://crates.io/crates/embedded-hal)
//! driver implementations.

use thiserror::Error;

pub mod board;
pub mod device;
pub mod driver;
mod pin_map;
pub mod timer;

pub use board::{Board, Role};
pub use device::error::{IoError, ResourceError};
pub use device::{Direction, Edge, EdgeEvent, Gpio, GpioCallback, HalPin, I2c, PeripheralManager, Pwm};
pub use driver::{
    BlinkDriver, Bmp280Calibration, InputWatcher, LogPress, PwmRamp, RampConfig, RampDirection, RampState,
    TemperatureConfig, TemperatureSensor,
};
pub use pin_map::PinId;
pub use timer::{CancelToken, ManualTimer, ThreadTimer, Timer};

/// Main error type for this crate.
///
/// `ResourceUnavailable` is fatal to a driver: it is returned from `start` and nothing stays open.
/// `IoFailure` covers a single failed operation on an already opened peripheral. Drivers log it and keep ticking.
#[derive(Error, Debug)]
pub enum PioError {
    #[error("peripheral unavailable")]
    ResourceUnavailable(#[source] device::error::ResourceError),
    #[error("peripheral i/o failed")]
    IoFailure(#[source] device::error::IoError),
}

impl From<ResourceError> for PioError {
    fn from(err: ResourceError) -> Self {
        PioError::ResourceUnavailable(err)
    }
}

impl From<IoError> for PioError {
    fn from(err: IoError) -> Self {
        PioError::IoFailure(err)
    }
}

impl PioError {
    pub fn is_resource_unavailable(&self) -> bool {
        matches!(self, PioError::ResourceUnavailable(_))
    }

    pub fn is_io_failure(&self) -> bool {
        matches!(self, PioError::IoFailure(_))
    }
}

pub type PioResult<T> = Result<T, PioError>;

//! The four sample drivers.
//!
//! Each driver owns exactly one peripheral from `start` until `stop`. `stop` cancels pending ticks before the
//! peripheral is closed, may be called any number of times, and runs on drop if it was not called before.
use log::error;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::device::error::ResourceError;
use crate::PioError;

mod blink;
mod button;
mod ramp;
mod temperature;

pub use blink::BlinkDriver;
pub use button::{InputWatcher, LogPress};
pub use ramp::{PwmRamp, RampConfig, RampDirection, RampState};
pub use temperature::{
    compensate_temperature, raw_temperature, Bmp280Calibration, TemperatureConfig, TemperatureSensor, BMP280_ADDRESS,
};

/// Locks driver state shared with a tick. A tick that panicked must not keep `stop` from releasing the peripheral.
fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wraps a failure to set up an opened peripheral. The caller closes the peripheral before returning it.
fn configure_failed(name: &str, err: PioError) -> PioError {
    ResourceError::ConfigureFailed {
        name: name.to_string(),
        source: Box::new(err),
    }
    .into()
}

fn log_close_failure(name: &str, result: crate::PioResult<()>) {
    if let Err(err) = result {
        error!("failed to close {}: {}", name, err);
    }
}

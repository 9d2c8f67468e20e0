//! Peripheral access layer.
//!
//! A `PeripheralManager` hands out exclusively owned `Gpio`, `Pwm` and `I2c` handles by name. A handle is released by
//! `close`, which consumes it, or by dropping it. Opening a peripheral that is already held fails with
//! `PioError::ResourceUnavailable`.
use log::warn;

use crate::{PioError, PioResult};

mod edge;
pub mod error;
mod hal;
pub mod mock;
pub mod odroid;
pub mod sysfs;

pub use hal::HalPin;

/// Direction of a digital line.
///
/// Output directions carry the level the line is driven to right after the direction is switched,
/// so there is no window where the pin drives an undefined value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    OutInitiallyLow,
    OutInitiallyHigh,
}

impl Direction {
    pub fn is_output(self) -> bool {
        !matches!(self, Direction::In)
    }
}

/// Which transitions of an input line produce edge events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Transition between two sampled levels, if there was one.
    pub fn between(previous: bool, current: bool) -> Option<Edge> {
        match (previous, current) {
            (false, true) => Some(Edge::Rising),
            (true, false) => Some(Edge::Falling),
            _ => None,
        }
    }

    /// Whether a line configured with this trigger reports `transition`.
    pub fn accepts(self, transition: Edge) -> bool {
        match self {
            Edge::None => false,
            Edge::Both => matches!(transition, Edge::Rising | Edge::Falling),
            trigger => trigger == transition,
        }
    }

    /// Edge to report for an interrupt on a line triggered by `self`, given the level read after it.
    ///
    /// A single-edge trigger is reported as configured, the line may already have bounced back when it is read.
    pub(crate) fn reported(self, level: bool) -> Edge {
        match self {
            Edge::Rising | Edge::Falling => self,
            _ if level => Edge::Rising,
            _ => Edge::Falling,
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Edge::None => 0,
            Edge::Rising => 1,
            Edge::Falling => 2,
            Edge::Both => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Edge {
        match code {
            1 => Edge::Rising,
            2 => Edge::Falling,
            3 => Edge::Both,
            _ => Edge::None,
        }
    }
}

/// An edge observed on an input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeEvent {
    pub pin: String,
    pub edge: Edge,
}

/// Receiver of edge events registered on an input `Gpio`.
///
/// Callbacks run on the edge-detection context of the backend, never concurrently with each other.
/// Returning `false` from either method deregisters the callback for good.
///
/// Any `FnMut(&EdgeEvent) -> bool` closure is a callback.
pub trait GpioCallback: Send {
    fn on_gpio_edge(&mut self, event: &EdgeEvent) -> bool;

    /// Called when the edge-detection mechanism fails to observe the line.
    fn on_gpio_error(&mut self, pin: &str, error: &PioError) -> bool {
        warn!("edge detection on {} failed: {}", pin, error);
        true
    }
}

impl<F> GpioCallback for F
where
    F: FnMut(&EdgeEvent) -> bool + Send,
{
    fn on_gpio_edge(&mut self, event: &EdgeEvent) -> bool {
        self(event)
    }
}

/// One exclusively owned digital line.
pub trait Gpio: Send {
    fn name(&self) -> &str;

    fn set_direction(&mut self, direction: Direction) -> PioResult<()>;

    /// Selects the transitions reported to a registered callback. Only valid for input lines.
    fn set_edge_trigger(&mut self, edge: Edge) -> PioResult<()>;

    fn value(&self) -> PioResult<bool>;

    /// Drives the line. Only valid for output lines.
    fn set_value(&mut self, value: bool) -> PioResult<()>;

    /// Replaces the edge callback of this line. Only valid for input lines.
    fn register_callback(&mut self, callback: Box<dyn GpioCallback>) -> PioResult<()>;

    fn unregister_callback(&mut self) -> PioResult<()>;

    /// Releases the line. Any registered callback is deregistered first.
    fn close(self) -> PioResult<()>
    where
        Self: Sized;
}

/// One exclusively owned PWM output.
pub trait Pwm: Send {
    fn name(&self) -> &str;

    fn set_frequency_hz(&mut self, frequency: f64) -> PioResult<()>;

    /// Sets the active fraction of each period, in percent (`0.0..=100.0`).
    fn set_duty_cycle(&mut self, percent: f64) -> PioResult<()>;

    fn set_enabled(&mut self, enabled: bool) -> PioResult<()>;

    fn close(self) -> PioResult<()>
    where
        Self: Sized;
}

/// One exclusively owned device on an I2C bus, addressed by register.
pub trait I2c: Send {
    /// Bus name and device address, e.g. `I2C1@0x77`.
    fn name(&self) -> &str;

    fn address(&self) -> u8;

    /// Reads `buffer.len()` consecutive registers, starting at `register`.
    fn read_reg_buffer(&mut self, register: u8, buffer: &mut [u8]) -> PioResult<()>;

    fn read_reg_byte(&mut self, register: u8) -> PioResult<u8> {
        let mut value = [0u8; 1];
        self.read_reg_buffer(register, &mut value)?;
        Ok(value[0])
    }

    fn write_reg_byte(&mut self, register: u8, value: u8) -> PioResult<()>;

    fn close(self) -> PioResult<()>
    where
        Self: Sized;
}

/// Source of peripheral handles.
pub trait PeripheralManager {
    type Gpio: Gpio + 'static;
    type Pwm: Pwm + 'static;
    type I2c: I2c + 'static;

    fn gpio_list(&self) -> Vec<String>;

    fn pwm_list(&self) -> Vec<String>;

    /// Whether two names open the same line on this backend, e.g. a listed name and a board pin name.
    fn same_gpio(&self, a: &str, b: &str) -> bool {
        a == b
    }

    fn open_gpio(&self, name: &str) -> PioResult<Self::Gpio>;

    fn open_pwm(&self, name: &str) -> PioResult<Self::Pwm>;

    fn i2c_list(&self) -> Vec<String>;

    /// Opens the device at 7-bit `address` on bus `bus`. Each bus and address pair can be held once.
    fn open_i2c(&self, bus: &str, address: u8) -> PioResult<Self::I2c>;
}

pub(crate) fn i2c_name(bus: &str, address: u8) -> String {
    format!("{}@{:#04x}", bus, address)
}

pub(crate) fn check_i2c_address(address: u8) -> PioResult<()> {
    if address > 0x7F {
        return Err(error::ResourceError::InvalidConfig(format!("I2C address {:#04x} is not 7-bit", address)).into());
    }
    Ok(())
}

pub(crate) fn check_duty_cycle(percent: f64) -> PioResult<()> {
    if (0.0..=100.0).contains(&percent) {
        Ok(())
    } else {
        Err(error::IoError::InvalidDutyCycle(percent).into())
    }
}

pub(crate) fn check_frequency(frequency: f64) -> PioResult<()> {
    if frequency.is_finite() && frequency > 0.0 {
        Ok(())
    } else {
        Err(error::IoError::InvalidFrequency(frequency).into())
    }
}

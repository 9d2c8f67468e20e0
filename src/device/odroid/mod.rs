//! Memory-mapped GPIO of the ODROID-C2.
//!
//! **Only revision 2 of the board is supported.** The register block is mapped from `/dev/mem` when running as root
//! and from `/dev/gpiomem` otherwise. Follow [rootless GPIO access](https://wiki.odroid.com/troubleshooting/gpiomem)
//! article on ODroid wiki if you want to drive pins without being a superuser.
//!
//! The board's PWM outputs are not reachable through the GPIO block, so `open_pwm` always fails.
use memmap::{MmapMut, MmapOptions};
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use std::convert::AsRef;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

mod memory;
mod pin;

use crate::device::error::ResourceError;
use crate::device::{I2c, PeripheralManager, Pwm};
use crate::{pin_map::PinId, PioResult};
use memory::Memory;

pub use pin::OdroidGpio;

/// Peripheral manager owning the memory mapping needed to access GPIO-related registers.
///
/// Handles keep the mapping alive, so the manager can be dropped while pins are still in use.
#[derive(Debug)]
pub struct OdroidC2 {
    memory: Arc<Memory>,
}

impl OdroidC2 {
    const GPIO_BASE_ADDR: u64 = 0xC8834000;
    const BLOCK_SIZE: usize = 4096;

    /// Opens and memory-maps the appropriate device file.
    ///
    /// Fails with `ResourceUnavailable` if there is no access to the device file or memory mapping fails.
    pub fn new() -> PioResult<Self> {
        use nix::unistd::Uid;

        let is_root = Uid::current().is_root();

        let (file_handle, map) = if is_root {
            Self::load_device_file("/dev/mem")
        } else {
            Self::load_device_file("/dev/gpiomem")
        }?;

        Ok(Self {
            memory: Arc::new(Memory::new(Some(file_handle), map)),
        })
    }

    fn load_device_file<T: AsRef<Path>>(device_path: T) -> PioResult<(File, MmapMut)> {
        use std::os::unix::io::FromRawFd;
        use ResourceError::*;

        let mut open_flags = OFlag::empty();
        open_flags.insert(OFlag::O_RDWR);
        open_flags.insert(OFlag::O_SYNC);
        open_flags.insert(OFlag::O_CLOEXEC);

        let file_fd = open(device_path.as_ref(), open_flags, Mode::empty()).map_err(DeviceAccessFailed)?;

        // SAFETY: Validity of file_fd is checked by Nix.
        let handle = unsafe { File::from_raw_fd(file_fd) };

        let mut map_opts = MmapOptions::new();
        map_opts.offset(Self::GPIO_BASE_ADDR);
        map_opts.len(Self::BLOCK_SIZE);

        // SAFETY: File handle is valid at this point.
        let map = unsafe { map_opts.map_mut(&handle).map_err(MemoryMapFailed)? };

        Ok((handle, map))
    }
}

impl PeripheralManager for OdroidC2 {
    type Gpio = OdroidGpio;
    type Pwm = NoPwm;
    type I2c = NoI2c;

    fn gpio_list(&self) -> Vec<String> {
        PinId::ALL.iter().map(|pin| pin.to_string()).collect()
    }

    fn pwm_list(&self) -> Vec<String> {
        Vec::new()
    }

    /// `Phy7` and `249` name the same header pin.
    fn same_gpio(&self, a: &str, b: &str) -> bool {
        match (a.parse::<PinId>(), b.parse::<PinId>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        }
    }

    /// Leases a header pin by name (`Phy7`) or internal id (`249`). The pin starts as an input.
    fn open_gpio(&self, name: &str) -> PioResult<OdroidGpio> {
        let pin_id: PinId = name
            .parse()
            .map_err(|_| ResourceError::NoSuchPeripheral(name.to_string()))?;
        OdroidGpio::new(name, pin_id, Arc::clone(&self.memory))
    }

    fn open_pwm(&self, _name: &str) -> PioResult<NoPwm> {
        Err(ResourceError::UnsupportedPeripheral("PWM").into())
    }

    fn i2c_list(&self) -> Vec<String> {
        Vec::new()
    }

    fn open_i2c(&self, _bus: &str, _address: u8) -> PioResult<NoI2c> {
        Err(ResourceError::UnsupportedPeripheral("I2C").into())
    }
}

/// PWM handle of backends without PWM support. It cannot be constructed.
#[derive(Debug)]
pub enum NoPwm {}

impl Pwm for NoPwm {
    fn name(&self) -> &str {
        match *self {}
    }

    fn set_frequency_hz(&mut self, _frequency: f64) -> PioResult<()> {
        match *self {}
    }

    fn set_duty_cycle(&mut self, _percent: f64) -> PioResult<()> {
        match *self {}
    }

    fn set_enabled(&mut self, _enabled: bool) -> PioResult<()> {
        match *self {}
    }

    fn close(self) -> PioResult<()> {
        match self {}
    }
}

/// I2C handle of backends without I2C support. It cannot be constructed.
#[derive(Debug)]
pub enum NoI2c {}

impl I2c for NoI2c {
    fn name(&self) -> &str {
        match *self {}
    }

    fn address(&self) -> u8 {
        match *self {}
    }

    fn read_reg_buffer(&mut self, _register: u8, _buffer: &mut [u8]) -> PioResult<()> {
        match *self {}
    }

    fn write_reg_byte(&mut self, _register: u8, _value: u8) -> PioResult<()> {
        match *self {}
    }

    fn close(self) -> PioResult<()> {
        match self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_name_and_line_id_are_the_same_pin() {
        let odroid = OdroidC2 {
            memory: Arc::new(Memory::new(None, MmapMut::map_anon(OdroidC2::BLOCK_SIZE).unwrap())),
        };
        assert!(odroid.same_gpio("Phy7", "249"));
        assert!(!odroid.same_gpio("Phy7", "Phy8"));
        assert_eq!(odroid.gpio_list().len(), PinId::ALL.len());
        assert!(odroid.open_pwm("PWM0").err().unwrap().is_resource_unavailable());
        assert!(odroid.i2c_list().is_empty());
        assert!(odroid.open_i2c("I2C1", 0x77).err().unwrap().is_resource_unavailable());
    }
}

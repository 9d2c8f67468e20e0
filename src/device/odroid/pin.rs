use log::debug;
use std::mem::size_of;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::memory::Memory;
use crate::device::edge::EdgeWorker;
use crate::device::error::{IoError, ResourceError};
use crate::device::{Direction, Edge, EdgeEvent, Gpio, GpioCallback};
use crate::{pin_map::PinId, PioError, PioResult};

/// Interval between two samples of an input line watched for edges.
const EDGE_SAMPLE_PERIOD: Duration = Duration::from_millis(1);

#[derive(Copy, Clone, Debug)]
enum Bank {
    DV,
    Y,
    X,
}

#[derive(Copy, Clone, Debug)]
enum Register {
    /// Input level, one bit per pin.
    Level,
    /// Output level, one bit per pin.
    Output,
    /// Function select: bit set means input, cleared means output.
    Select,
    PullEnable,
}

/// Location of one pin's bits in the mapped register block.
#[derive(Copy, Clone, Debug)]
pub struct Registers {
    pin_id: PinId,
    bank: Bank,
}

impl Registers {
    /* In ODROID-C2 GPIO registers are mapped in three different parts of the contigous memory (DV / Y / X banks).
     * There is a direct mapping between GPIO internal identifiers and these banks.
     */
    const PIN_BASE: u8 = 136;
    const DV_PINS: RangeInclusive<u8> = (Self::PIN_BASE + 45)..=(Self::PIN_BASE + 74);
    const Y_PINS: RangeInclusive<u8> = (Self::PIN_BASE + 75)..=(Self::PIN_BASE + 91);
    const X_PINS: RangeInclusive<u8> = (Self::PIN_BASE + 92)..=(Self::PIN_BASE + 114);

    pub fn new(pin_id: PinId) -> Option<Self> {
        let raw = pin_id as u8;
        let bank = if Self::DV_PINS.contains(&raw) {
            Bank::DV
        } else if Self::Y_PINS.contains(&raw) {
            Bank::Y
        } else if Self::X_PINS.contains(&raw) {
            Bank::X
        } else {
            return None;
        };

        Some(Self { pin_id, bank })
    }

    pub fn id(&self) -> PinId {
        self.pin_id
    }

    /// Byte offset of `register` for this pin's bank.
    fn offset(&self, register: Register) -> usize {
        use Bank::*;
        use Register::*;

        let word = match (self.bank, register) {
            (DV, Select) => 0x10C,
            (DV, Output) => 0x10D,
            (DV, Level) => 0x10E,
            (DV, PullEnable) => 0x13A,
            (Y, Select) => 0x10F,
            (Y, Output) => 0x110,
            (Y, Level) => 0x111,
            (Y, PullEnable) => 0x149,
            (X, Select) => 0x118,
            (X, Output) => 0x119,
            (X, Level) => 0x11A,
            (X, PullEnable) => 0x14C,
        };
        word * size_of::<u32>()
    }

    fn bit(&self) -> u8 {
        let start = match self.bank {
            Bank::DV => Self::DV_PINS.start(),
            Bank::Y => Self::Y_PINS.start(),
            Bank::X => Self::X_PINS.start(),
        };
        self.pin_id as u8 - start
    }

    fn read_level(&self, memory: &Memory) -> PioResult<bool> {
        let word = memory.read_word(self.offset(Register::Level))?;
        Ok(word & (1 << self.bit()) != 0)
    }
}

/// Line handle of the memory-mapped backend.
///
/// The pin stays claimed in the shared `Memory` until the handle is closed or dropped. Edge callbacks are served by a
/// thread sampling the level register every millisecond, so pulses shorter than that can be missed.
#[derive(Debug)]
pub struct OdroidGpio {
    name: String,
    registers: Registers,
    memory: Arc<Memory>,
    direction: Direction,
    edge: Arc<AtomicU8>,
    sampler: Option<EdgeWorker>,
    released: bool,
}

impl OdroidGpio {
    pub(super) fn new(name: &str, pin_id: PinId, memory: Arc<Memory>) -> PioResult<Self> {
        let registers = Registers::new(pin_id).ok_or_else(|| ResourceError::NoSuchPeripheral(name.to_string()))?;
        memory.claim(pin_id)?;

        Ok(Self {
            name: name.to_string(),
            registers,
            memory,
            direction: Direction::In,
            edge: Arc::new(AtomicU8::new(Edge::None.code())),
            sampler: None,
            released: false,
        })
    }

    fn wrong_direction(&self) -> PioError {
        IoError::WrongDirection {
            name: self.name.clone(),
        }
        .into()
    }

    fn write_output(&self, value: bool) -> PioResult<()> {
        self.memory
            .write_bit(self.registers.offset(Register::Output), self.registers.bit(), value)
    }

    fn release(&mut self) -> PioResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        if let Some(mut sampler) = self.sampler.take() {
            sampler.stop();
        }
        debug!("releasing {}", self.name);
        self.memory.release(self.registers.id())
    }
}

impl Gpio for OdroidGpio {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_direction(&mut self, direction: Direction) -> PioResult<()> {
        let select = self.registers.offset(Register::Select);
        let bit = self.registers.bit();

        match direction {
            Direction::In => {
                // Input mode also disables the pull up/down resistor.
                self.memory.write_bit(select, bit, true)?;
                self.memory
                    .write_bit(self.registers.offset(Register::PullEnable), bit, false)?;
            }
            Direction::OutInitiallyLow | Direction::OutInitiallyHigh => {
                if self.sampler.is_some() {
                    self.unregister_callback()?;
                }
                self.write_output(direction == Direction::OutInitiallyHigh)?;
                self.memory.write_bit(select, bit, false)?;
            }
        }
        self.direction = direction;
        Ok(())
    }

    fn set_edge_trigger(&mut self, edge: Edge) -> PioResult<()> {
        if self.direction.is_output() {
            return Err(self.wrong_direction());
        }
        self.edge.store(edge.code(), Ordering::SeqCst);
        Ok(())
    }

    fn value(&self) -> PioResult<bool> {
        if self.direction.is_output() {
            let word = self.memory.read_word(self.registers.offset(Register::Output))?;
            Ok(word & (1 << self.registers.bit()) != 0)
        } else {
            self.registers.read_level(&self.memory)
        }
    }

    fn set_value(&mut self, value: bool) -> PioResult<()> {
        if !self.direction.is_output() {
            return Err(self.wrong_direction());
        }
        self.write_output(value)
    }

    fn register_callback(&mut self, mut callback: Box<dyn GpioCallback>) -> PioResult<()> {
        if self.direction.is_output() {
            return Err(self.wrong_direction());
        }
        self.unregister_callback()?;

        let name = self.name.clone();
        let registers = self.registers;
        let memory = Arc::clone(&self.memory);
        let edge = Arc::clone(&self.edge);
        let mut previous = registers.read_level(&memory)?;

        let sampler = EdgeWorker::spawn(&self.name, move |stop| {
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(EDGE_SAMPLE_PERIOD);
                let keep = match registers.read_level(&memory) {
                    Ok(current) => {
                        let transition = Edge::between(previous, current);
                        previous = current;
                        match transition {
                            Some(transition) if Edge::from_code(edge.load(Ordering::SeqCst)).accepts(transition) => {
                                callback.on_gpio_edge(&EdgeEvent {
                                    pin: name.clone(),
                                    edge: transition,
                                })
                            }
                            _ => true,
                        }
                    }
                    Err(err) => callback.on_gpio_error(&name, &err),
                };
                if !keep {
                    debug!("edge callback on {} finished", name);
                    break;
                }
            }
        })
        .map_err(|source| ResourceError::EdgeDetectionFailed {
            name: self.name.clone(),
            source,
        })?;

        self.sampler = Some(sampler);
        Ok(())
    }

    fn unregister_callback(&mut self) -> PioResult<()> {
        if let Some(mut sampler) = self.sampler.take() {
            sampler.stop();
        }
        Ok(())
    }

    fn close(mut self) -> PioResult<()> {
        self.release()
    }
}

impl Drop for OdroidGpio {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::error!("failed to release {}: {}", self.name, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memmap::MmapMut;
    use std::sync::Mutex;
    use std::time::Instant;

    fn memory() -> Arc<Memory> {
        Arc::new(Memory::new(None, MmapMut::map_anon(4096).unwrap()))
    }

    #[test]
    fn pin_offsets_follow_banks() {
        let phy7 = Registers::new(PinId::Phy7).unwrap();
        assert_eq!(phy7.offset(Register::Output), 0x119 * 4);
        assert_eq!(phy7.bit(), 249 - 228);

        let phy27 = Registers::new(PinId::Phy27).unwrap();
        assert_eq!(phy27.offset(Register::Select), 0x10C * 4);
        assert_eq!(phy27.bit(), 207 - 181);

        let phy35 = Registers::new(PinId::Phy35).unwrap();
        assert_eq!(phy35.offset(Register::PullEnable), 0x149 * 4);
        assert_eq!(phy35.bit(), 214 - 211);
    }

    #[test]
    fn output_sets_select_and_output_bits() {
        let memory = memory();
        let mut gpio = OdroidGpio::new("Phy7", PinId::Phy7, Arc::clone(&memory)).unwrap();
        let registers = Registers::new(PinId::Phy7).unwrap();
        let bit = 1 << registers.bit();

        gpio.set_direction(Direction::In).unwrap();
        assert_eq!(memory.read_word(registers.offset(Register::Select)).unwrap() & bit, bit);

        gpio.set_direction(Direction::OutInitiallyHigh).unwrap();
        assert_eq!(memory.read_word(registers.offset(Register::Select)).unwrap() & bit, 0);
        assert!(gpio.value().unwrap());

        gpio.set_value(false).unwrap();
        assert_eq!(memory.read_word(registers.offset(Register::Output)).unwrap() & bit, 0);
        assert!(gpio.set_edge_trigger(Edge::Falling).is_err());
    }

    #[test]
    fn close_releases_claim() {
        let memory = memory();
        let gpio = OdroidGpio::new("Phy7", PinId::Phy7, Arc::clone(&memory)).unwrap();
        assert!(OdroidGpio::new("Phy7", PinId::Phy7, Arc::clone(&memory)).is_err());

        gpio.close().unwrap();
        assert!(!memory.is_claimed(PinId::Phy7));
    }

    #[test]
    fn sampler_reports_falling_edges() {
        let memory = memory();
        let registers = Registers::new(PinId::Phy11).unwrap();
        let level = registers.offset(Register::Level);
        memory.write_bit(level, registers.bit(), true).unwrap();

        let mut gpio = OdroidGpio::new("Phy11", PinId::Phy11, Arc::clone(&memory)).unwrap();
        gpio.set_direction(Direction::In).unwrap();
        gpio.set_edge_trigger(Edge::Falling).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        gpio.register_callback(Box::new(move |event: &EdgeEvent| {
            log.lock().unwrap().push(event.edge);
            false
        }))
        .unwrap();

        memory.write_bit(level, registers.bit(), false).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        // The callback returned false, so the rising edge and the next falling one go unnoticed.
        memory.write_bit(level, registers.bit(), true).unwrap();
        thread::sleep(Duration::from_millis(10));
        memory.write_bit(level, registers.bit(), false).unwrap();
        thread::sleep(Duration::from_millis(10));

        assert_eq!(*seen.lock().unwrap(), vec![Edge::Falling]);
        gpio.close().unwrap();
    }
}

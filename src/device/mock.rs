//! In-memory board for tests and dry runs.
//!
//! `MockManager` owns a fixed set of named lines, PWM channels and I2C devices. Handles opened from it write into shared state
//! which the manager (or any clone of it) can inspect afterwards: levels and written values, duty cycles, how many
//! times a peripheral was opened and closed. Edges are injected with `fire_edge` and delivered synchronously on the
//! calling thread.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::{IoError, ResourceError};
use super::{
    check_duty_cycle, check_frequency, check_i2c_address, i2c_name, Direction, Edge, EdgeEvent, Gpio, GpioCallback, I2c,
    PeripheralManager, Pwm,
};
use crate::{PioError, PioResult};

struct MockLine {
    claimed: bool,
    opens: usize,
    closes: usize,
    direction: Direction,
    edge: Edge,
    level: bool,
    writes: Vec<bool>,
    callback: Option<Box<dyn GpioCallback>>,
    reject_configuration: bool,
}

impl Default for MockLine {
    fn default() -> Self {
        Self {
            claimed: false,
            opens: 0,
            closes: 0,
            direction: Direction::In,
            edge: Edge::None,
            level: false,
            writes: Vec::new(),
            callback: None,
            reject_configuration: false,
        }
    }
}

#[derive(Default)]
struct MockChannel {
    claimed: bool,
    opens: usize,
    closes: usize,
    frequency: Option<f64>,
    duty_cycles: Vec<f64>,
    enabled: bool,
    reject_duty_cycles: bool,
}

struct MockDevice {
    bus: String,
    claimed: bool,
    opens: usize,
    closes: usize,
    registers: Vec<u8>,
    writes: Vec<(u8, u8)>,
    reject: bool,
}

impl MockDevice {
    fn new(bus: &str) -> Self {
        Self {
            bus: bus.to_string(),
            claimed: false,
            opens: 0,
            closes: 0,
            registers: vec![0; 256],
            writes: Vec::new(),
            reject: false,
        }
    }
}

#[derive(Default)]
struct MockBoard {
    lines: HashMap<String, MockLine>,
    channels: HashMap<String, MockChannel>,
    devices: HashMap<String, MockDevice>,
}

/// Peripheral manager backed by memory.
#[derive(Clone, Default)]
pub struct MockManager {
    board: Arc<Mutex<MockBoard>>,
}

fn lock(board: &Mutex<MockBoard>) -> MutexGuard<'_, MockBoard> {
    // A panicking test callback must not hide the recorded state from the assertions that follow.
    board.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockManager {
    pub fn new(gpios: &[&str], pwms: &[&str]) -> Self {
        let mut board = MockBoard::default();
        for name in gpios {
            board.lines.insert(name.to_string(), MockLine::default());
        }
        for name in pwms {
            board.channels.insert(name.to_string(), MockChannel::default());
        }

        Self {
            board: Arc::new(Mutex::new(board)),
        }
    }

    fn board(&self) -> MutexGuard<'_, MockBoard> {
        lock(&self.board)
    }

    fn line<T>(&self, name: &str, f: impl FnOnce(&MockLine) -> T) -> Option<T> {
        self.board().lines.get(name).map(f)
    }

    fn channel<T>(&self, name: &str, f: impl FnOnce(&MockChannel) -> T) -> Option<T> {
        self.board().channels.get(name).map(f)
    }

    fn device<T>(&self, name: &str, f: impl FnOnce(&MockDevice) -> T) -> Option<T> {
        self.board().devices.get(name).map(f)
    }

    /// Adds a device at `address` on `bus`, named like its handles (`I2C1@0x77`). Its 256 registers start zeroed.
    pub fn add_i2c_device(&self, bus: &str, address: u8) -> String {
        let name = i2c_name(bus, address);
        self.board().devices.insert(name.clone(), MockDevice::new(bus));
        name
    }

    /// Presets consecutive registers of an I2C device, starting at `register`.
    pub fn set_registers(&self, device: &str, register: u8, values: &[u8]) {
        if let Some(device) = self.board().devices.get_mut(device) {
            for (slot, value) in device.registers.iter_mut().skip(register as usize).zip(values) {
                *slot = *value;
            }
        }
    }

    /// `(register, value)` pairs written to an I2C device, oldest first.
    pub fn register_writes(&self, device: &str) -> Vec<(u8, u8)> {
        self.device(device, |d| d.writes.clone()).unwrap_or_default()
    }

    /// Makes every following register access on the I2C device fail as if the device did not acknowledge.
    pub fn reject_i2c(&self, device: &str, reject: bool) {
        if let Some(device) = self.board().devices.get_mut(device) {
            device.reject = reject;
        }
    }

    /// Whether a handle to the named peripheral is currently open.
    pub fn is_claimed(&self, name: &str) -> bool {
        self.line(name, |l| l.claimed)
            .or_else(|| self.channel(name, |c| c.claimed))
            .or_else(|| self.device(name, |d| d.claimed))
            .unwrap_or(false)
    }

    pub fn open_count(&self, name: &str) -> usize {
        self.line(name, |l| l.opens)
            .or_else(|| self.channel(name, |c| c.opens))
            .or_else(|| self.device(name, |d| d.opens))
            .unwrap_or(0)
    }

    pub fn close_count(&self, name: &str) -> usize {
        self.line(name, |l| l.closes)
            .or_else(|| self.channel(name, |c| c.closes))
            .or_else(|| self.device(name, |d| d.closes))
            .unwrap_or(0)
    }

    pub fn level(&self, name: &str) -> Option<bool> {
        self.line(name, |l| l.level)
    }

    pub fn direction(&self, name: &str) -> Option<Direction> {
        self.line(name, |l| l.direction)
    }

    pub fn edge_trigger(&self, name: &str) -> Option<Edge> {
        self.line(name, |l| l.edge)
    }

    /// Values written with `set_value`, oldest first. Levels set by a direction change are not included.
    pub fn writes(&self, name: &str) -> Vec<bool> {
        self.line(name, |l| l.writes.clone()).unwrap_or_default()
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.line(name, |l| l.callback.is_some()).unwrap_or(false)
    }

    /// Changes the level seen by `value` without producing an edge.
    pub fn set_input_level(&self, name: &str, level: bool) {
        if let Some(line) = self.board().lines.get_mut(name) {
            line.level = level;
        }
    }

    pub fn frequency(&self, name: &str) -> Option<f64> {
        self.channel(name, |c| c.frequency).flatten()
    }

    /// Duty cycles accepted by the channel, oldest first.
    pub fn duty_cycles(&self, name: &str) -> Vec<f64> {
        self.channel(name, |c| c.duty_cycles.clone()).unwrap_or_default()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.channel(name, |c| c.enabled).unwrap_or(false)
    }

    /// Makes every following `set_direction`, `set_edge_trigger` and `register_callback` on the line fail as if the
    /// hardware rejected it.
    pub fn reject_configuration(&self, name: &str, reject: bool) {
        if let Some(line) = self.board().lines.get_mut(name) {
            line.reject_configuration = reject;
        }
    }

    /// Makes every following `set_duty_cycle` on the channel fail as if the hardware rejected it.
    pub fn reject_duty_cycles(&self, name: &str, reject: bool) {
        if let Some(channel) = self.board().channels.get_mut(name) {
            channel.reject_duty_cycles = reject;
        }
    }

    /// Simulates a transition on an input line.
    ///
    /// The line level follows the edge. The registered callback is invoked when the line is open as an input and
    /// its trigger accepts the edge. Returns whether a callback ran.
    pub fn fire_edge(&self, name: &str, edge: Edge) -> bool {
        let mut callback = {
            let mut board = self.board();
            let line = match board.lines.get_mut(name) {
                Some(line) => line,
                None => return false,
            };
            match edge {
                Edge::Rising => line.level = true,
                Edge::Falling => line.level = false,
                _ => {}
            }
            if !line.claimed || line.direction != Direction::In || !line.edge.accepts(edge) {
                return false;
            }
            match line.callback.take() {
                Some(callback) => callback,
                None => return false,
            }
        };

        let event = EdgeEvent {
            pin: name.to_string(),
            edge,
        };
        if callback.on_gpio_edge(&event) {
            self.restore_callback(name, callback);
        }
        true
    }

    /// Reports a failure of the edge-detection mechanism to the registered callback. Returns whether a callback ran.
    pub fn fail_edge_detection(&self, name: &str) -> bool {
        let mut callback = match self.board().lines.get_mut(name).and_then(|l| l.callback.take()) {
            Some(callback) => callback,
            None => return false,
        };

        let error = PioError::from(IoError::Rejected(name.to_string()));
        if callback.on_gpio_error(name, &error) {
            self.restore_callback(name, callback);
        }
        true
    }

    fn restore_callback(&self, name: &str, callback: Box<dyn GpioCallback>) {
        if let Some(line) = self.board().lines.get_mut(name) {
            // Closed or re-registered while the callback ran.
            if line.claimed && line.callback.is_none() {
                line.callback = Some(callback);
            }
        }
    }
}

impl PeripheralManager for MockManager {
    type Gpio = MockGpio;
    type Pwm = MockPwm;
    type I2c = MockI2c;

    fn gpio_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.board().lines.keys().cloned().collect();
        names.sort();
        names
    }

    fn pwm_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.board().channels.keys().cloned().collect();
        names.sort();
        names
    }

    fn open_gpio(&self, name: &str) -> PioResult<MockGpio> {
        let mut board = self.board();
        let line = board
            .lines
            .get_mut(name)
            .ok_or_else(|| ResourceError::NoSuchPeripheral(name.to_string()))?;
        if line.claimed {
            return Err(ResourceError::AlreadyClaimed(name.to_string()).into());
        }
        line.claimed = true;
        line.opens += 1;
        line.direction = Direction::In;
        line.edge = Edge::None;

        Ok(MockGpio {
            name: name.to_string(),
            board: Arc::clone(&self.board),
            released: false,
        })
    }

    fn i2c_list(&self) -> Vec<String> {
        let mut buses: Vec<String> = self.board().devices.values().map(|d| d.bus.clone()).collect();
        buses.sort();
        buses.dedup();
        buses
    }

    fn open_i2c(&self, bus: &str, address: u8) -> PioResult<MockI2c> {
        check_i2c_address(address)?;
        let name = i2c_name(bus, address);
        let mut board = self.board();
        let device = board
            .devices
            .get_mut(&name)
            .ok_or_else(|| ResourceError::NoSuchPeripheral(name.clone()))?;
        if device.claimed {
            return Err(ResourceError::AlreadyClaimed(name).into());
        }
        device.claimed = true;
        device.opens += 1;

        Ok(MockI2c {
            name,
            address,
            board: Arc::clone(&self.board),
            released: false,
        })
    }

    fn open_pwm(&self, name: &str) -> PioResult<MockPwm> {
        let mut board = self.board();
        let channel = board
            .channels
            .get_mut(name)
            .ok_or_else(|| ResourceError::NoSuchPeripheral(name.to_string()))?;
        if channel.claimed {
            return Err(ResourceError::AlreadyClaimed(name.to_string()).into());
        }
        channel.claimed = true;
        channel.opens += 1;

        Ok(MockPwm {
            name: name.to_string(),
            board: Arc::clone(&self.board),
            released: false,
        })
    }
}

/// Line handle of `MockManager`.
pub struct MockGpio {
    name: String,
    board: Arc<Mutex<MockBoard>>,
    released: bool,
}

impl MockGpio {
    fn with_line<T>(&self, f: impl FnOnce(&mut MockLine) -> PioResult<T>) -> PioResult<T> {
        let mut board = lock(&self.board);
        let line = board
            .lines
            .get_mut(&self.name)
            .ok_or_else(|| ResourceError::NoSuchPeripheral(self.name.clone()))?;
        f(line)
    }

    fn wrong_direction(&self) -> PioError {
        IoError::WrongDirection {
            name: self.name.clone(),
        }
        .into()
    }

    fn configure(&self, f: impl FnOnce(&mut MockLine) -> PioResult<()>) -> PioResult<()> {
        let name = self.name.clone();
        self.with_line(|line| {
            if line.reject_configuration {
                return Err(IoError::Rejected(name).into());
            }
            f(line)
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let callback = {
            let mut board = lock(&self.board);
            board.lines.get_mut(&self.name).and_then(|line| {
                line.claimed = false;
                line.closes += 1;
                line.callback.take()
            })
        };
        drop(callback);
    }
}

impl Gpio for MockGpio {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_direction(&mut self, direction: Direction) -> PioResult<()> {
        self.configure(|line| {
            line.direction = direction;
            match direction {
                Direction::OutInitiallyLow => line.level = false,
                Direction::OutInitiallyHigh => line.level = true,
                Direction::In => {}
            }
            Ok(())
        })
    }

    fn set_edge_trigger(&mut self, edge: Edge) -> PioResult<()> {
        let wrong_direction = self.wrong_direction();
        self.configure(|line| {
            if line.direction.is_output() {
                return Err(wrong_direction);
            }
            line.edge = edge;
            Ok(())
        })
    }

    fn value(&self) -> PioResult<bool> {
        self.with_line(|line| Ok(line.level))
    }

    fn set_value(&mut self, value: bool) -> PioResult<()> {
        let wrong_direction = self.wrong_direction();
        self.with_line(|line| {
            if !line.direction.is_output() {
                return Err(wrong_direction);
            }
            line.level = value;
            line.writes.push(value);
            Ok(())
        })
    }

    fn register_callback(&mut self, callback: Box<dyn GpioCallback>) -> PioResult<()> {
        let wrong_direction = self.wrong_direction();
        self.configure(|line| {
            if line.direction.is_output() {
                return Err(wrong_direction);
            }
            line.callback = Some(callback);
            Ok(())
        })
    }

    fn unregister_callback(&mut self) -> PioResult<()> {
        let callback = self.with_line(|line| Ok(line.callback.take()))?;
        drop(callback);
        Ok(())
    }

    fn close(mut self) -> PioResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MockGpio {
    fn drop(&mut self) {
        self.release();
    }
}

/// PWM handle of `MockManager`.
pub struct MockPwm {
    name: String,
    board: Arc<Mutex<MockBoard>>,
    released: bool,
}

impl MockPwm {
    fn with_channel<T>(&self, f: impl FnOnce(&mut MockChannel) -> PioResult<T>) -> PioResult<T> {
        let mut board = lock(&self.board);
        let channel = board
            .channels
            .get_mut(&self.name)
            .ok_or_else(|| ResourceError::NoSuchPeripheral(self.name.clone()))?;
        f(channel)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let mut board = lock(&self.board);
        if let Some(channel) = board.channels.get_mut(&self.name) {
            channel.claimed = false;
            channel.closes += 1;
        }
    }
}

impl Pwm for MockPwm {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_frequency_hz(&mut self, frequency: f64) -> PioResult<()> {
        check_frequency(frequency)?;
        self.with_channel(|channel| {
            channel.frequency = Some(frequency);
            Ok(())
        })
    }

    fn set_duty_cycle(&mut self, percent: f64) -> PioResult<()> {
        check_duty_cycle(percent)?;
        let name = self.name.clone();
        self.with_channel(|channel| {
            if channel.reject_duty_cycles {
                return Err(IoError::Rejected(name).into());
            }
            channel.duty_cycles.push(percent);
            Ok(())
        })
    }

    fn set_enabled(&mut self, enabled: bool) -> PioResult<()> {
        self.with_channel(|channel| {
            channel.enabled = enabled;
            Ok(())
        })
    }

    fn close(mut self) -> PioResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MockPwm {
    fn drop(&mut self) {
        self.release();
    }
}

/// I2C handle of `MockManager`.
pub struct MockI2c {
    name: String,
    address: u8,
    board: Arc<Mutex<MockBoard>>,
    released: bool,
}

impl MockI2c {
    fn with_device<T>(&self, f: impl FnOnce(&mut MockDevice) -> PioResult<T>) -> PioResult<T> {
        let mut board = lock(&self.board);
        let device = board
            .devices
            .get_mut(&self.name)
            .ok_or_else(|| ResourceError::NoSuchPeripheral(self.name.clone()))?;
        if device.reject {
            return Err(IoError::Rejected(self.name.clone()).into());
        }
        f(device)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(device) = lock(&self.board).devices.get_mut(&self.name) {
            device.claimed = false;
            device.closes += 1;
        }
    }
}

impl I2c for MockI2c {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn read_reg_buffer(&mut self, register: u8, buffer: &mut [u8]) -> PioResult<()> {
        let name = self.name.clone();
        self.with_device(|device| {
            let start = register as usize;
            let registers = device
                .registers
                .get(start..start + buffer.len())
                .ok_or(IoError::Rejected(name))?;
            buffer.copy_from_slice(registers);
            Ok(())
        })
    }

    fn write_reg_byte(&mut self, register: u8, value: u8) -> PioResult<()> {
        self.with_device(|device| {
            device.registers[register as usize] = value;
            device.writes.push((register, value));
            Ok(())
        })
    }

    fn close(mut self) -> PioResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MockI2c {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_gpio_claims() {
        let manager = MockManager::new(&["BCM6"], &[]);
        let gpio = manager.open_gpio("BCM6").unwrap();
        assert!(manager.is_claimed("BCM6"));

        let err = manager.open_gpio("BCM6").err().unwrap();
        assert!(err.is_resource_unavailable());

        gpio.close().unwrap();
        assert!(!manager.is_claimed("BCM6"));
        assert_eq!(manager.close_count("BCM6"), 1);
        assert!(manager.open_gpio("BCM6").is_ok());
    }

    #[test]
    fn test_mock_gpio_unknown_name() {
        let manager = MockManager::new(&["BCM6"], &["PWM0"]);
        assert!(manager.open_gpio("BCM7").err().unwrap().is_resource_unavailable());
        assert!(manager.open_pwm("PWM1").err().unwrap().is_resource_unavailable());
        assert_eq!(manager.gpio_list(), vec!["BCM6".to_string()]);
        assert_eq!(manager.pwm_list(), vec!["PWM0".to_string()]);
    }

    #[test]
    fn test_mock_gpio_drop_releases_once() {
        let manager = MockManager::new(&["BCM6"], &[]);
        {
            let _gpio = manager.open_gpio("BCM6").unwrap();
        }
        assert!(!manager.is_claimed("BCM6"));
        assert_eq!(manager.close_count("BCM6"), 1);
    }

    #[test]
    fn test_mock_gpio_output() {
        let manager = MockManager::new(&["BCM6"], &[]);
        let mut gpio = manager.open_gpio("BCM6").unwrap();
        gpio.set_direction(Direction::OutInitiallyHigh).unwrap();
        assert!(gpio.value().unwrap());

        gpio.set_value(false).unwrap();
        assert_eq!(manager.level("BCM6"), Some(false));
        assert_eq!(manager.writes("BCM6"), vec![false]);

        // Output lines have no edge trigger.
        assert!(gpio.set_edge_trigger(Edge::Falling).is_err());
    }

    #[test]
    fn test_mock_gpio_edges() {
        let manager = MockManager::new(&["BCM21"], &[]);
        let mut gpio = manager.open_gpio("BCM21").unwrap();
        gpio.set_direction(Direction::In).unwrap();
        gpio.set_edge_trigger(Edge::Falling).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        gpio.register_callback(Box::new(move |event: &EdgeEvent| {
            log.lock().unwrap().push(event.edge);
            true
        }))
        .unwrap();

        assert!(!manager.fire_edge("BCM21", Edge::Rising));
        assert!(manager.fire_edge("BCM21", Edge::Falling));
        assert_eq!(*seen.lock().unwrap(), vec![Edge::Falling]);

        gpio.close().unwrap();
        assert!(!manager.has_callback("BCM21"));
        assert!(!manager.fire_edge("BCM21", Edge::Falling));
    }

    #[test]
    fn test_mock_i2c_registers() {
        let manager = MockManager::new(&[], &[]);
        let name = manager.add_i2c_device("I2C1", 0x77);
        manager.set_registers(&name, 0xFA, &[0x7E, 0xED, 0x00]);
        assert_eq!(manager.i2c_list(), vec!["I2C1".to_string()]);

        let mut device = manager.open_i2c("I2C1", 0x77).unwrap();
        assert_eq!(device.name(), "I2C1@0x77");
        let mut raw = [0u8; 3];
        device.read_reg_buffer(0xFA, &mut raw).unwrap();
        assert_eq!(raw, [0x7E, 0xED, 0x00]);
        assert!(device.read_reg_buffer(0xFE, &mut raw).unwrap_err().is_io_failure());

        device.write_reg_byte(0xF4, 0x23).unwrap();
        assert_eq!(device.read_reg_byte(0xF4).unwrap(), 0x23);
        assert_eq!(manager.register_writes(&name), vec![(0xF4, 0x23)]);

        assert!(manager.open_i2c("I2C1", 0x77).err().unwrap().is_resource_unavailable());
        assert!(manager.open_i2c("I2C1", 0x76).err().unwrap().is_resource_unavailable());
        manager.reject_i2c(&name, true);
        assert!(device.read_reg_byte(0xD0).unwrap_err().is_io_failure());

        device.close().unwrap();
        assert!(!manager.is_claimed(&name));
        assert_eq!(manager.close_count(&name), 1);
    }

    #[test]
    fn test_mock_pwm() {
        let manager = MockManager::new(&[], &["PWM0"]);
        let mut pwm = manager.open_pwm("PWM0").unwrap();
        pwm.set_frequency_hz(50.0).unwrap();
        pwm.set_duty_cycle(5.0).unwrap();
        pwm.set_enabled(true).unwrap();
        assert_eq!(manager.frequency("PWM0"), Some(50.0));
        assert_eq!(manager.duty_cycles("PWM0"), vec![5.0]);
        assert!(manager.is_enabled("PWM0"));

        assert!(pwm.set_duty_cycle(120.0).is_err());
        manager.reject_duty_cycles("PWM0", true);
        assert!(pwm.set_duty_cycle(6.0).unwrap_err().is_io_failure());
        assert_eq!(manager.duty_cycles("PWM0"), vec![5.0]);
    }
}

//! Linux sysfs GPIO and PWM.
//!
//! Peripheral names resolve to the number at their end, so board names like `BCM6`, `IO13` or `26` open
//! `/sys/class/gpio/gpio6`, `gpio13` and `gpio26`, and `PWM0` opens channel 0 of the configured PWM chip.
//! A line that is not exported yet is exported on open and unexported again on close.
//!
//! Edge callbacks run on a thread blocked in `poll(2)` on the line's `value` attribute.
//!
//! I2C devices are opened through the character devices `/dev/i2c-N`, bus `I2C1` being `/dev/i2c-1`.
use log::{debug, error};
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::stat::Mode;
use std::collections::HashSet;
use std::env;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use super::edge::EdgeWorker;
use super::error::{IoError, ResourceError};
use super::{
    check_duty_cycle, check_frequency, check_i2c_address, i2c_name, Direction, Edge, EdgeEvent, Gpio, GpioCallback, I2c,
    PeripheralManager, Pwm,
};
use crate::{PioError, PioResult};

/// How long the edge thread blocks in `poll` before checking whether it should stop.
const POLL_TIMEOUT_MS: i32 = 100;

const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

// I2C_SLAVE from linux/i2c-dev.h
nix::ioctl_write_int_bad!(set_slave_address, 0x0703);

fn write_attr(path: &Path, value: &str) -> PioResult<()> {
    fs::write(path, value).map_err(|source| {
        IoError::Write {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

fn read_attr(path: &Path) -> PioResult<String> {
    fs::read_to_string(path)
        .map(|value| value.trim().to_string())
        .map_err(|source| {
            IoError::Read {
                path: path.to_path_buf(),
                source,
            }
            .into()
        })
}

/// Number at the end of a peripheral name.
fn trailing_number(name: &str) -> Option<u32> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    name[name.len() - digits..].parse().ok()
}

type Claims = Arc<Mutex<HashSet<String>>>;

fn claim(claims: &Claims, key: &str) -> PioResult<()> {
    let mut claims = claims.lock().map_err(|_| ResourceError::ClaimsPoisoned)?;
    if claims.insert(key.to_string()) {
        Ok(())
    } else {
        Err(ResourceError::AlreadyClaimed(key.to_string()).into())
    }
}

fn unclaim(claims: &Claims, key: &str) {
    match claims.lock() {
        Ok(mut claims) => {
            claims.remove(key);
        }
        Err(_) => error!("claim map poisoned while releasing {}", key),
    }
}

/// Claim that is given back when dropped.
#[derive(Debug)]
struct ClaimGuard {
    claims: Claims,
    key: String,
}

impl ClaimGuard {
    fn acquire(claims: &Claims, key: String) -> PioResult<Self> {
        claim(claims, &key)?;
        Ok(Self {
            claims: Arc::clone(claims),
            key,
        })
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        unclaim(&self.claims, &self.key);
    }
}

/// Peripheral manager for `/sys/class/gpio` and `/sys/class/pwm`.
#[derive(Debug, Clone)]
pub struct SysfsManager {
    root: PathBuf,
    dev_root: PathBuf,
    pwm_chip: u32,
    claims: Claims,
}

impl SysfsManager {
    pub const DEFAULT_ROOT: &'static str = "/sys/class";
    pub const DEFAULT_DEV_ROOT: &'static str = "/dev";

    pub fn new() -> Self {
        Self::with_root(Self::DEFAULT_ROOT, 0)
    }

    /// Manager rooted somewhere else than `/sys/class`, using PWM chip `pwm_chip`.
    pub fn with_root<P: AsRef<Path>>(root: P, pwm_chip: u32) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            dev_root: PathBuf::from(Self::DEFAULT_DEV_ROOT),
            pwm_chip,
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Looks for `i2c-N` device files in `dev_root` instead of `/dev`.
    pub fn with_dev_root<P: AsRef<Path>>(mut self, dev_root: P) -> Self {
        self.dev_root = dev_root.as_ref().to_path_buf();
        self
    }

    /// Reads `PIO_SYSFS_ROOT`, `PIO_DEV_ROOT` and `PIO_PWM_CHIP`, falling back to `/sys/class`, `/dev` and chip 0.
    pub fn from_env() -> Self {
        let root = env::var("PIO_SYSFS_ROOT").unwrap_or_else(|_| Self::DEFAULT_ROOT.to_string());
        let dev_root = env::var("PIO_DEV_ROOT").unwrap_or_else(|_| Self::DEFAULT_DEV_ROOT.to_string());
        let pwm_chip = env::var("PIO_PWM_CHIP")
            .ok()
            .and_then(|chip| chip.parse().ok())
            .unwrap_or(0);
        Self::with_root(root, pwm_chip).with_dev_root(dev_root)
    }

    fn gpio_class(&self) -> PathBuf {
        self.root.join("gpio")
    }

    fn pwm_chip_dir(&self) -> PathBuf {
        self.root.join("pwm").join(format!("pwmchip{}", self.pwm_chip))
    }

    fn list(dir: &Path, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.starts_with(prefix) && trailing_number(name).is_some())
                    .filter(|name| !name.starts_with("gpiochip"))
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Default for SysfsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PeripheralManager for SysfsManager {
    type Gpio = SysfsGpio;
    type Pwm = SysfsPwm;
    type I2c = LinuxI2c;

    /// Lines already exported to user space.
    fn gpio_list(&self) -> Vec<String> {
        Self::list(&self.gpio_class(), "gpio")
    }

    /// Channels of the configured chip already exported to user space.
    fn pwm_list(&self) -> Vec<String> {
        Self::list(&self.pwm_chip_dir(), "pwm")
    }

    /// Names are equal when they end in the same line number, so `gpio6` and `BCM6` are one line.
    fn same_gpio(&self, a: &str, b: &str) -> bool {
        match (trailing_number(a), trailing_number(b)) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        }
    }

    fn open_gpio(&self, name: &str) -> PioResult<SysfsGpio> {
        let number = trailing_number(name).ok_or_else(|| ResourceError::NoSuchPeripheral(name.to_string()))?;
        let key = format!("gpio{}", number);
        claim(&self.claims, &key)?;

        let class = self.gpio_class();
        // From here on dropping the handle undoes the claim and a possible export.
        let mut gpio = SysfsGpio {
            name: name.to_string(),
            line: Line {
                key: key.clone(),
                dir: class.join(&key),
                unexport: class.join("unexport"),
                number,
                exported_by_us: false,
                claims: Arc::clone(&self.claims),
                released: false,
            },
            direction: Direction::In,
            edge: Arc::new(AtomicU8::new(Edge::None.code())),
            watcher: None,
        };

        if !gpio.line.dir.exists() {
            let export = class.join("export");
            fs::write(&export, number.to_string())
                .map_err(|source| ResourceError::ExportFailed { path: export, source })?;
            gpio.line.exported_by_us = true;
            if !gpio.line.dir.exists() {
                return Err(ResourceError::NoSuchPeripheral(name.to_string()).into());
            }
        }

        debug!("opened {} as {}", name, gpio.line.dir.display());
        Ok(gpio)
    }

    fn open_pwm(&self, name: &str) -> PioResult<SysfsPwm> {
        let channel = trailing_number(name).ok_or_else(|| ResourceError::NoSuchPeripheral(name.to_string()))?;
        let chip = self.pwm_chip_dir();
        if !chip.exists() {
            return Err(ResourceError::NoSuchPeripheral(name.to_string()).into());
        }
        let key = format!("pwmchip{}/pwm{}", self.pwm_chip, channel);
        claim(&self.claims, &key)?;

        let mut pwm = SysfsPwm {
            name: name.to_string(),
            line: Line {
                key,
                dir: chip.join(format!("pwm{}", channel)),
                unexport: chip.join("unexport"),
                number: channel,
                exported_by_us: false,
                claims: Arc::clone(&self.claims),
                released: false,
            },
            period_ns: 0,
            duty_percent: 0.0,
        };

        if !pwm.line.dir.exists() {
            let export = chip.join("export");
            fs::write(&export, channel.to_string())
                .map_err(|source| ResourceError::ExportFailed { path: export, source })?;
            pwm.line.exported_by_us = true;
            if !pwm.line.dir.exists() {
                return Err(ResourceError::NoSuchPeripheral(name.to_string()).into());
            }
        }

        debug!("opened {} as {}", name, pwm.line.dir.display());
        Ok(pwm)
    }

    /// Buses with a device file, as `I2C1` for `/dev/i2c-1`.
    fn i2c_list(&self) -> Vec<String> {
        let mut buses: Vec<u32> = fs::read_dir(&self.dev_root)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.starts_with("i2c-"))
                    .filter_map(|name| trailing_number(&name))
                    .collect()
            })
            .unwrap_or_default();
        buses.sort_unstable();
        buses.into_iter().map(|bus| format!("I2C{}", bus)).collect()
    }

    fn open_i2c(&self, bus: &str, address: u8) -> PioResult<LinuxI2c> {
        check_i2c_address(address)?;
        let number = trailing_number(bus).ok_or_else(|| ResourceError::NoSuchPeripheral(bus.to_string()))?;
        let path = self.dev_root.join(format!("i2c-{}", number));
        if !path.exists() {
            return Err(ResourceError::NoSuchPeripheral(bus.to_string()).into());
        }
        let claim = ClaimGuard::acquire(&self.claims, format!("i2c-{}@{:#04x}", number, address))?;

        let fd = open(path.as_path(), OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty())
            .map_err(ResourceError::DeviceAccessFailed)?;
        // SAFETY: Validity of fd is checked by Nix.
        let file = unsafe { File::from_raw_fd(fd) };
        // SAFETY: The descriptor is open and owned by `file`.
        unsafe { set_slave_address(file.as_raw_fd(), address.into()) }.map_err(ResourceError::DeviceAccessFailed)?;

        debug!("opened {}@{:#04x} as {}", bus, address, path.display());
        Ok(LinuxI2c {
            name: i2c_name(bus, address),
            address,
            path,
            file,
            _claim: claim,
        })
    }
}

/// I2C handle of `SysfsManager`, one `/dev/i2c-N` descriptor bound to a device address.
#[derive(Debug)]
pub struct LinuxI2c {
    name: String,
    address: u8,
    path: PathBuf,
    file: File,
    _claim: ClaimGuard,
}

impl LinuxI2c {
    fn write_bytes(&mut self, bytes: &[u8]) -> PioResult<()> {
        self.file.write_all(bytes).map_err(|source| {
            IoError::Write {
                path: self.path.clone(),
                source,
            }
            .into()
        })
    }
}

impl I2c for LinuxI2c {
    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn read_reg_buffer(&mut self, register: u8, buffer: &mut [u8]) -> PioResult<()> {
        self.write_bytes(&[register])?;
        self.file.read_exact(buffer).map_err(|source| {
            IoError::Read {
                path: self.path.clone(),
                source,
            }
            .into()
        })
    }

    fn write_reg_byte(&mut self, register: u8, value: u8) -> PioResult<()> {
        self.write_bytes(&[register, value])
    }

    fn close(self) -> PioResult<()> {
        debug!("closing {}", self.name);
        Ok(())
    }
}

/// Exported sysfs node plus its claim.
#[derive(Debug)]
struct Line {
    key: String,
    dir: PathBuf,
    unexport: PathBuf,
    number: u32,
    exported_by_us: bool,
    claims: Claims,
    released: bool,
}

impl Line {
    fn attr(&self, attribute: &str) -> PathBuf {
        self.dir.join(attribute)
    }

    fn release(&mut self) -> PioResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let result = if self.exported_by_us {
            write_attr(&self.unexport, &self.number.to_string())
        } else {
            Ok(())
        };
        unclaim(&self.claims, &self.key);
        result
    }
}

impl Drop for Line {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            error!("failed to release {}: {}", self.key, err);
        }
    }
}

/// Line handle of `SysfsManager`.
#[derive(Debug)]
pub struct SysfsGpio {
    name: String,
    line: Line,
    direction: Direction,
    edge: Arc<AtomicU8>,
    watcher: Option<EdgeWorker>,
}

impl SysfsGpio {
    fn wrong_direction(&self) -> PioError {
        IoError::WrongDirection {
            name: self.name.clone(),
        }
        .into()
    }

    fn stop_watcher(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
    }
}

fn read_level(file: &mut File, path: &Path) -> PioResult<bool> {
    let mut raw = String::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut raw))
        .map_err(|source| IoError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(raw.trim() == "1")
}

struct EdgeWatch {
    name: String,
    path: PathBuf,
    file: File,
    trigger: Arc<AtomicU8>,
}

fn watch_edges(watch: EdgeWatch, mut callback: Box<dyn GpioCallback>, stop: &AtomicBool) {
    let EdgeWatch {
        name,
        path,
        mut file,
        trigger,
    } = watch;

    // Reading once clears the change notification raised when the edge attribute was written.
    if let Err(err) = read_level(&mut file, &path) {
        if !callback.on_gpio_error(&name, &err) {
            return;
        }
    }

    while !stop.load(Ordering::SeqCst) {
        let mut fds = [PollFd::new(file.as_raw_fd(), PollFlags::POLLPRI | PollFlags::POLLERR)];
        let keep = match poll(&mut fds, POLL_TIMEOUT_MS) {
            Ok(0) => true,
            Ok(_) => match read_level(&mut file, &path) {
                Ok(level) => callback.on_gpio_edge(&EdgeEvent {
                    pin: name.clone(),
                    edge: Edge::from_code(trigger.load(Ordering::SeqCst)).reported(level),
                }),
                Err(err) => callback.on_gpio_error(&name, &err),
            },
            Err(nix::Error::Sys(Errno::EINTR)) => true,
            Err(source) => {
                let err = PioError::from(IoError::Poll {
                    name: name.clone(),
                    source,
                });
                callback.on_gpio_error(&name, &err)
            }
        };
        if !keep {
            debug!("edge callback on {} finished", name);
            break;
        }
    }
}

impl Gpio for SysfsGpio {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_direction(&mut self, direction: Direction) -> PioResult<()> {
        let value = match direction {
            Direction::In => "in",
            Direction::OutInitiallyLow => "low",
            Direction::OutInitiallyHigh => "high",
        };
        if direction.is_output() {
            self.stop_watcher();
        }
        write_attr(&self.line.attr("direction"), value)?;
        self.direction = direction;
        Ok(())
    }

    fn set_edge_trigger(&mut self, edge: Edge) -> PioResult<()> {
        if self.direction.is_output() {
            return Err(self.wrong_direction());
        }
        let value = match edge {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        };
        write_attr(&self.line.attr("edge"), value)?;
        self.edge.store(edge.code(), Ordering::SeqCst);
        Ok(())
    }

    fn value(&self) -> PioResult<bool> {
        Ok(read_attr(&self.line.attr("value"))? == "1")
    }

    fn set_value(&mut self, value: bool) -> PioResult<()> {
        if !self.direction.is_output() {
            return Err(self.wrong_direction());
        }
        write_attr(&self.line.attr("value"), if value { "1" } else { "0" })
    }

    fn register_callback(&mut self, callback: Box<dyn GpioCallback>) -> PioResult<()> {
        if self.direction.is_output() {
            return Err(self.wrong_direction());
        }
        self.stop_watcher();

        let path = self.line.attr("value");
        let file = File::open(&path).map_err(|source| IoError::Read {
            path: path.clone(),
            source,
        })?;
        let watch = EdgeWatch {
            name: self.name.clone(),
            path,
            file,
            trigger: Arc::clone(&self.edge),
        };
        let watcher = EdgeWorker::spawn(&self.name, move |stop| watch_edges(watch, callback, stop))
            .map_err(|source| ResourceError::EdgeDetectionFailed {
                name: self.name.clone(),
                source,
            })?;

        self.watcher = Some(watcher);
        Ok(())
    }

    fn unregister_callback(&mut self) -> PioResult<()> {
        self.stop_watcher();
        Ok(())
    }

    fn close(mut self) -> PioResult<()> {
        self.stop_watcher();
        self.line.release()
    }
}

impl Drop for SysfsGpio {
    fn drop(&mut self) {
        // The watcher holds the value file open; stop it before the line is unexported.
        self.stop_watcher();
    }
}

/// PWM handle of `SysfsManager`.
///
/// sysfs takes period and duty cycle in nanoseconds, so the duty cycle percentage is kept and re-applied whenever the
/// frequency changes.
#[derive(Debug)]
pub struct SysfsPwm {
    name: String,
    line: Line,
    period_ns: u64,
    duty_percent: f64,
}

impl SysfsPwm {
    fn duty_ns(&self, period_ns: u64, percent: f64) -> u64 {
        (period_ns as f64 * percent / 100.0).round() as u64
    }

    fn write_duty(&self, duty_ns: u64) -> PioResult<()> {
        write_attr(&self.line.attr("duty_cycle"), &duty_ns.to_string())
    }
}

impl Pwm for SysfsPwm {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_frequency_hz(&mut self, frequency: f64) -> PioResult<()> {
        check_frequency(frequency)?;
        let period_ns = (NANOS_PER_SECOND / frequency).round() as u64;
        if period_ns == 0 {
            return Err(IoError::InvalidFrequency(frequency).into());
        }

        // The kernel rejects a duty cycle longer than the period, so shrink whichever comes first.
        let duty_ns = self.duty_ns(period_ns, self.duty_percent);
        let current_duty_ns = self.duty_ns(self.period_ns, self.duty_percent);
        if period_ns < current_duty_ns {
            self.write_duty(duty_ns)?;
            write_attr(&self.line.attr("period"), &period_ns.to_string())?;
        } else {
            write_attr(&self.line.attr("period"), &period_ns.to_string())?;
            self.write_duty(duty_ns)?;
        }
        self.period_ns = period_ns;
        Ok(())
    }

    fn set_duty_cycle(&mut self, percent: f64) -> PioResult<()> {
        check_duty_cycle(percent)?;
        if self.period_ns > 0 {
            self.write_duty(self.duty_ns(self.period_ns, percent))?;
        }
        self.duty_percent = percent;
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) -> PioResult<()> {
        write_attr(&self.line.attr("enable"), if enabled { "1" } else { "0" })
    }

    fn close(mut self) -> PioResult<()> {
        self.line.release()
    }
}

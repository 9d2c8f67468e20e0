use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Enum representing reasons a peripheral could not be acquired or configured.
///
/// - NoSuchPeripheral - The name is not known by the backend.
/// - AlreadyClaimed - Someone else holds the peripheral. Peripherals are single-user resources.
/// - DeviceAccessFailed - There is no access to the device file, either because of insufficient permissions or operating system misconfiguration.
/// - MemoryMapFailed - There is an error when trying to create a mmaped piece of memory to represent device file.
/// - ConfigureFailed - The peripheral was opened, but setting it up for a driver failed. It was closed again.
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("no peripheral named {0}")]
    NoSuchPeripheral(String),
    #[error("peripheral {0} is already claimed")]
    AlreadyClaimed(String),
    #[error("failed to open device file")]
    DeviceAccessFailed(#[source] nix::Error),
    #[error("failed to map device memory")]
    MemoryMapFailed(#[source] io::Error),
    #[error("failed to export {path}")]
    ExportFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to configure peripheral {name}")]
    ConfigureFailed {
        name: String,
        #[source]
        source: Box<crate::PioError>,
    },
    #[error("failed to start scheduler thread")]
    SchedulerFailed(#[source] io::Error),
    #[error("failed to start edge detection for {name}")]
    EdgeDetectionFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),
    #[error("backend has no {0} peripherals")]
    UnsupportedPeripheral(&'static str),
    #[error("unknown board: {0}")]
    UnknownBoard(String),
    #[error("board {board} has no pin for {role}")]
    NoPinForRole { board: String, role: String },
    #[error("claim map lock poisoned")]
    ClaimsPoisoned,
}

/// Enum representing failures of a single operation on an opened peripheral.
///
/// - Write / Read - An attribute or register access failed.
/// - InvalidDutyCycle / InvalidFrequency - The value was rejected before it reached the hardware.
/// - WrongDirection - The operation does not make sense for the current pin direction (e.g. edge trigger on an output).
#[derive(Error, Debug)]
pub enum IoError {
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for an edge on {name}")]
    Poll {
        name: String,
        #[source]
        source: nix::Error,
    },
    #[error("duty cycle {0}% outside of 0..=100")]
    InvalidDutyCycle(f64),
    #[error("frequency {0} Hz is not positive")]
    InvalidFrequency(f64),
    #[error("operation not supported by pin {name} in its current direction")]
    WrongDirection { name: String },
    #[error("hardware rejected the value written to {0}")]
    Rejected(String),
    #[error("driver state lock poisoned")]
    StatePoisoned,
}

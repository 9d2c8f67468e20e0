//! Default peripheral names per board.
//!
//! The same sample wiring (an LED, a push button, a servo on a PWM output and a BMP280 on I2C) lands on differently named
//! peripherals on every board. `Board::pin` looks the name up for a `Role`.
use log::info;
use std::env;
use std::fmt;
use std::fs;
use std::str::FromStr;

use crate::device::error::ResourceError;
use crate::device::PeripheralManager;
use crate::PioResult;

/// Device-tree model file consulted by `Board::detect` when `PIO_BOARD` is not set.
const MODEL_PATH: &str = "/proc/device-tree/model";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Board {
    Edison,
    Rpi3,
    Imx6ul,
    OdroidC2,
}

/// What the sample wiring connects to a peripheral.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Led,
    Button,
    PwmPort,
    I2cPort,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Led => "LED",
            Role::Button => "BUTTON",
            Role::PwmPort => "PWM_PORT",
            Role::I2cPort => "I2C_PORT",
        })
    }
}

impl Board {
    /// Device identifier, as accepted by `FromStr`.
    pub fn device(self) -> &'static str {
        match self {
            Board::Edison => "edison",
            Board::Rpi3 => "rpi3",
            Board::Imx6ul => "imx6ul",
            Board::OdroidC2 => "odroidc2",
        }
    }

    /// Peripheral name wired to `role` on this board.
    pub fn pin(self, role: Role) -> PioResult<&'static str> {
        use Board::*;
        use Role::*;

        let name = match (self, role) {
            (Edison, Led) => Some("IO13"),
            (Edison, Button) => Some("IO12"),
            (Edison, PwmPort) => Some("IO6"),
            (Edison, I2cPort) => Some("I2C6"),
            (Rpi3, Led) => Some("BCM6"),
            (Rpi3, Button) => Some("BCM21"),
            (Rpi3, PwmPort) => Some("PWM0"),
            (Rpi3, I2cPort) => Some("I2C1"),
            (Imx6ul, Led) => Some("26"),
            (Imx6ul, Button) => Some("GPIO_25"),
            (Imx6ul, PwmPort) => Some("26"),
            (Imx6ul, I2cPort) => None,
            (OdroidC2, Led) => Some("Phy7"),
            (OdroidC2, Button) => Some("Phy11"),
            (OdroidC2, PwmPort) | (OdroidC2, I2cPort) => None,
        };

        name.ok_or_else(|| {
            ResourceError::NoPinForRole {
                board: self.device().to_string(),
                role: role.to_string(),
            }
            .into()
        })
    }

    /// Board selected by the `PIO_BOARD` environment variable, or else recognized from the device-tree model.
    pub fn detect() -> PioResult<Board> {
        let board = match env::var("PIO_BOARD") {
            Ok(device) => device.parse::<Board>()?,
            Err(_) => {
                let model = fs::read_to_string(MODEL_PATH)
                    .map_err(|_| ResourceError::UnknownBoard("no PIO_BOARD and no device-tree model".to_string()))?;
                Board::from_model(&model)?
            }
        };
        info!("running on {}", board.device());
        Ok(board)
    }

    /// Recognizes a board from its device-tree model string.
    pub fn from_model(model: &str) -> PioResult<Board> {
        let model = model.trim_end_matches('\0').trim();
        let lower = model.to_ascii_lowercase();

        if lower.contains("odroid-c2") {
            Ok(Board::OdroidC2)
        } else if lower.contains("raspberry pi 3") {
            Ok(Board::Rpi3)
        } else if lower.contains("i.mx6ul") || lower.contains("imx6ul") {
            Ok(Board::Imx6ul)
        } else if lower.contains("edison") {
            Ok(Board::Edison)
        } else {
            Err(ResourceError::UnknownBoard(model.to_string()).into())
        }
    }
}

impl FromStr for Board {
    type Err = ResourceError;

    fn from_str(device: &str) -> Result<Self, Self::Err> {
        match device.trim().to_ascii_lowercase().as_str() {
            "edison" => Ok(Board::Edison),
            "rpi3" => Ok(Board::Rpi3),
            "imx6ul" => Ok(Board::Imx6ul),
            "odroidc2" | "odroid-c2" => Ok(Board::OdroidC2),
            _ => Err(ResourceError::UnknownBoard(device.to_string())),
        }
    }
}

/// Picks `preferred` if the manager lists it under any name, otherwise the first listed line.
///
/// The returned name is one `open_gpio` accepts. `None` means the manager lists no lines at all.
pub fn preferred_or_first<M: PeripheralManager>(manager: &M, preferred: &str) -> Option<String> {
    let available = manager.gpio_list();
    if available.iter().any(|name| manager.same_gpio(name, preferred)) {
        return Some(preferred.to_string());
    }
    available.into_iter().next()
}

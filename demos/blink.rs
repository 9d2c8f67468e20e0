//! Blinks the LED of the sample wiring once a second until Enter is pressed.
//!
//! The board comes from `PIO_BOARD` or the device-tree model. ODROID-C2 pins are driven through the memory-mapped
//! registers (run as root), every other board goes through sysfs.
//!
//! Connect the LED anode to the board's LED pin (`Phy7` on ODROID-C2, `BCM6` on Raspberry Pi 3) through a resistor.

use pio_drivers::board::preferred_or_first;
use pio_drivers::device::odroid::OdroidC2;
use pio_drivers::device::sysfs::SysfsManager;
use pio_drivers::{BlinkDriver, Board, PeripheralManager, Role, ThreadTimer};
use std::error::Error;
use std::io::{self, BufRead};

fn blink<M: PeripheralManager>(manager: &M, board: Board) -> Result<(), Box<dyn Error>> {
    let preferred = board.pin(Role::Led)?;
    let pin = preferred_or_first(manager, preferred).unwrap_or_else(|| preferred.to_string());

    let mut led = BlinkDriver::start(
        manager,
        &ThreadTimer::new(),
        &pin,
        BlinkDriver::<M::Gpio>::DEFAULT_INTERVAL,
    )?;
    println!("blinking {}, press Enter to stop", led.pin_name());

    io::stdin().lock().lines().next().transpose()?;
    led.stop()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let board = Board::detect()?;
    match board {
        Board::OdroidC2 => blink(&OdroidC2::new()?, board),
        _ => blink(&SysfsManager::from_env(), board),
    }
}

//! Logs every press of the sample push button until Enter is pressed.
//!
//! Wire the button between the board's button pin (`Phy11` on ODROID-C2, `BCM21` on Raspberry Pi 3) and ground,
//! with a pull-up resistor, so a press produces a falling edge.

use pio_drivers::device::odroid::OdroidC2;
use pio_drivers::device::sysfs::SysfsManager;
use pio_drivers::{Board, InputWatcher, LogPress, PeripheralManager, Role};
use std::error::Error;
use std::io::{self, BufRead};

fn watch<M: PeripheralManager>(manager: &M, board: Board) -> Result<(), Box<dyn Error>> {
    let mut button = InputWatcher::start(manager, board.pin(Role::Button)?, LogPress::default())?;
    println!("watching {}, press Enter to stop", button.pin_name());

    io::stdin().lock().lines().next().transpose()?;
    button.stop()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let board = Board::detect()?;
    match board {
        Board::OdroidC2 => watch(&OdroidC2::new()?, board),
        _ => watch(&SysfsManager::from_env(), board),
    }
}

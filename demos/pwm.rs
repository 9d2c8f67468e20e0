//! Sweeps a servo on the sample PWM port between its end positions until Enter is pressed.
//!
//! Uses the sysfs PWM interface; the chip is picked with `PIO_PWM_CHIP` (default 0). ODROID-C2 has no PWM support
//! in this crate, so the board lookup fails there.

use pio_drivers::device::sysfs::SysfsManager;
use pio_drivers::{Board, PwmRamp, RampConfig, Role, ThreadTimer};
use std::error::Error;
use std::io::{self, BufRead};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let board = Board::detect()?;
    let manager = SysfsManager::from_env();
    let mut servo = PwmRamp::start(
        &manager,
        &ThreadTimer::new(),
        board.pin(Role::PwmPort)?,
        RampConfig::default(),
    )?;
    println!("sweeping {}, press Enter to stop", servo.channel_name());

    io::stdin().lock().lines().next().transpose()?;
    servo.stop()?;
    Ok(())
}

//! Logs the temperature of a BMP280 on the sample I2C port every second until Enter is pressed.
//!
//! Uses `/dev/i2c-N`; point `PIO_DEV_ROOT` elsewhere to use another device directory. Run with `RUST_LOG=debug`
//! to see every reading.

use pio_drivers::device::sysfs::SysfsManager;
use pio_drivers::{Board, Role, TemperatureConfig, TemperatureSensor, ThreadTimer};
use std::error::Error;
use std::io::{self, BufRead};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let board = Board::detect()?;
    let manager = SysfsManager::from_env();
    let mut sensor = TemperatureSensor::start(
        &manager,
        &ThreadTimer::new(),
        board.pin(Role::I2cPort)?,
        TemperatureConfig::default(),
    )?;
    println!("reading {} (chip id {:#04x}), press Enter to stop", sensor.device_name(), sensor.chip_id());

    io::stdin().lock().lines().next().transpose()?;
    if let Some(celsius) = sensor.last_celsius() {
        println!("last reading: {:.2} C", celsius);
    }
    sensor.stop()?;
    Ok(())
}

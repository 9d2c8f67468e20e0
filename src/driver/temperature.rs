use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{configure_failed, lock, log_close_failure};
use crate::device::{I2c, PeripheralManager};
use crate::timer::{CancelToken, Timer};
use crate::PioResult;

/// Default I2C address of a BMP280 with SDO pulled high.
pub const BMP280_ADDRESS: u8 = 0x77;

const REG_CALIBRATION: u8 = 0x88;
const REG_ID: u8 = 0xD0;
const REG_CTRL: u8 = 0xF4;
const REG_TEMP: u8 = 0xFA;

const POWER_MODE_NORMAL: u8 = 0b0000_0011;
const OVERSAMPLING_TEMP_1X: u8 = 0b0010_0000;

/// Temperature trimming parameters burned into every BMP280 (`dig_T1`..`dig_T3`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bmp280Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
}

impl Bmp280Calibration {
    /// Decodes registers `0x88..=0x8D`, three little-endian words.
    pub fn from_registers(registers: &[u8; 6]) -> Self {
        Self {
            t1: LittleEndian::read_u16(&registers[0..2]),
            t2: LittleEndian::read_i16(&registers[2..4]),
            t3: LittleEndian::read_i16(&registers[4..6]),
        }
    }
}

/// 20-bit temperature sample from registers `msb`, `lsb` and `xlsb[7:4]`.
pub fn raw_temperature(registers: &[u8; 3]) -> i32 {
    let msb = i32::from(registers[0]);
    let lsb = i32::from(registers[1]);
    let xlsb = i32::from(registers[2] & 0xF0);
    (msb << 16 | lsb << 8 | xlsb) >> 4
}

/// Degrees Celsius for a raw sample, using the floating point formula of the BMP280 datasheet.
pub fn compensate_temperature(raw: i32, calibration: &Bmp280Calibration) -> f64 {
    let adc = f64::from(raw);
    let t1 = f64::from(calibration.t1);
    let t2 = f64::from(calibration.t2);
    let t3 = f64::from(calibration.t3);

    let var1 = (adc / 16384.0 - t1 / 1024.0) * t2;
    let var2 = (adc / 131_072.0 - t1 / 8192.0).powi(2) * t3;
    (var1 + var2) / 5120.0
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TemperatureConfig {
    pub address: u8,
    pub interval: Duration,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            address: BMP280_ADDRESS,
            interval: Duration::from_millis(1000),
        }
    }
}

struct Sensor<I> {
    device: Option<I>,
    calibration: Bmp280Calibration,
    last_celsius: Option<f64>,
    ticks: u64,
    failed_reads: u64,
}

impl<I: I2c> Sensor<I> {
    fn tick(&mut self) {
        let device = match self.device.as_mut() {
            Some(device) => device,
            None => {
                warn!("temperature tick after the device was closed");
                return;
            }
        };

        self.ticks += 1;
        let mut registers = [0u8; 3];
        match device.read_reg_buffer(REG_TEMP, &mut registers) {
            Ok(()) => {
                let celsius = compensate_temperature(raw_temperature(&registers), &self.calibration);
                debug!("{} temperature: {:.2} C", device.name(), celsius);
                self.last_celsius = Some(celsius);
            }
            Err(err) => {
                self.failed_reads += 1;
                error!("failed to read temperature from {}: {}", device.name(), err);
            }
        }
    }
}

/// Reads chip id and calibration, then switches the sensor to normal mode with 1x temperature oversampling.
fn setup<I: I2c>(device: &mut I) -> PioResult<(u8, Bmp280Calibration)> {
    let chip_id = device.read_reg_byte(REG_ID)?;
    debug!("{} chip id: {:#04x}", device.name(), chip_id);

    let mut registers = [0u8; 6];
    device.read_reg_buffer(REG_CALIBRATION, &mut registers)?;
    let calibration = Bmp280Calibration::from_registers(&registers);

    device.write_reg_byte(REG_CTRL, POWER_MODE_NORMAL | OVERSAMPLING_TEMP_1X)?;
    Ok((chip_id, calibration))
}

/// Samples a BMP280 temperature sensor on every timer tick.
pub struct TemperatureSensor<I: I2c + 'static> {
    name: String,
    chip_id: u8,
    state: Arc<Mutex<Sensor<I>>>,
    token: Option<CancelToken>,
}

impl<I: I2c + 'static> TemperatureSensor<I> {
    /// Opens the sensor at `config.address` on `bus`, configures it and starts reading every `config.interval`.
    ///
    /// Fails with `ResourceUnavailable` if the device cannot be opened or configured; nothing stays open in that case.
    pub fn start<M, T>(manager: &M, timer: &T, bus: &str, config: TemperatureConfig) -> PioResult<Self>
    where
        M: PeripheralManager<I2c = I>,
        T: Timer,
    {
        info!("opening temperature sensor {:#04x} on {}", config.address, bus);
        let mut device = manager.open_i2c(bus, config.address)?;
        let name = device.name().to_string();
        let (chip_id, calibration) = match setup(&mut device) {
            Ok(setup) => setup,
            Err(err) => {
                log_close_failure(&name, device.close());
                return Err(configure_failed(&name, err));
            }
        };

        let mut sensor = Self {
            name,
            chip_id,
            state: Arc::new(Mutex::new(Sensor {
                device: Some(device),
                calibration,
                last_celsius: None,
                ticks: 0,
                failed_reads: 0,
            })),
            token: None,
        };

        let state = Arc::clone(&sensor.state);
        let token = timer
            .schedule_repeating(config.interval, Box::new(move || lock(&state).tick()))
            .map_err(|err| configure_failed(&sensor.name, err))?;
        sensor.token = Some(token);

        Ok(sensor)
    }

    /// Cancels the readings, then closes the device. Calling it again does nothing.
    pub fn stop(&mut self) -> PioResult<()> {
        if let Some(mut token) = self.token.take() {
            token.cancel();
        }

        let device = lock(&self.state).device.take();
        match device {
            Some(device) => {
                info!("closing {}", self.name);
                device.close()
            }
            None => Ok(()),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.name
    }

    pub fn chip_id(&self) -> u8 {
        self.chip_id
    }

    pub fn calibration(&self) -> Bmp280Calibration {
        lock(&self.state).calibration
    }

    /// Temperature from the last successful reading.
    pub fn last_celsius(&self) -> Option<f64> {
        lock(&self.state).last_celsius
    }

    pub fn ticks(&self) -> u64 {
        lock(&self.state).ticks
    }

    pub fn failed_reads(&self) -> u64 {
        lock(&self.state).failed_reads
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).device.is_some()
    }
}

impl<I: I2c + 'static> Drop for TemperatureSensor<I> {
    fn drop(&mut self) {
        let result = self.stop();
        log_close_failure(&self.name, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trimming values and sample from the BMP280 datasheet.
    const CALIBRATION: [u8; 6] = [0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC];
    const SAMPLE: [u8; 3] = [0x7E, 0xED, 0x00];

    #[test]
    fn decodes_little_endian_calibration() {
        let calibration = Bmp280Calibration::from_registers(&CALIBRATION);
        assert_eq!(
            calibration,
            Bmp280Calibration {
                t1: 27504,
                t2: 26435,
                t3: -1000
            }
        );
    }

    #[test]
    fn assembles_twenty_bit_sample() {
        assert_eq!(raw_temperature(&SAMPLE), 519_888);
        // Low nibble of xlsb is not part of the sample.
        assert_eq!(raw_temperature(&[0x7E, 0xED, 0x0F]), 519_888);
        assert_eq!(raw_temperature(&[0xFF, 0xFF, 0xF0]), 0xF_FFFF);
    }

    #[test]
    fn compensates_datasheet_sample() {
        let calibration = Bmp280Calibration::from_registers(&CALIBRATION);
        let celsius = compensate_temperature(raw_temperature(&SAMPLE), &calibration);
        assert!((celsius - 25.08).abs() < 0.01, "got {}", celsius);
    }

    #[test]
    fn ctrl_selects_normal_mode_and_1x_oversampling() {
        assert_eq!(POWER_MODE_NORMAL | OVERSAMPLING_TEMP_1X, 0x23);
    }
}

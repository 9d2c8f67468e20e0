use pio_drivers::device::mock::{MockGpio, MockManager};
use pio_drivers::{
    BlinkDriver, Direction, Edge, EdgeEvent, InputWatcher, LogPress, ManualTimer, PeripheralManager, PioError,
    PwmRamp, RampConfig, RampDirection, ResourceError, TemperatureConfig, TemperatureSensor, ThreadTimer,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn board() -> MockManager {
    init_logging();
    MockManager::new(&["BCM6", "BCM21"], &["PWM0"])
}

fn ms(value: f64) -> Duration {
    Duration::from_micros((value * 1000.0).round() as u64)
}

#[test]
fn blink_level_follows_tick_parity() {
    let manager = board();
    let timer = ManualTimer::new();
    let led = BlinkDriver::start(&manager, &timer, "BCM6", Duration::from_millis(500)).unwrap();

    assert_eq!(manager.direction("BCM6"), Some(Direction::OutInitiallyLow));
    assert_eq!(timer.live_intervals(), vec![Duration::from_millis(500)]);

    timer.fire_times(5);
    assert_eq!(led.ticks(), 5);
    assert!(led.is_on());
    assert_eq!(manager.writes("BCM6"), vec![true, false, true, false, true]);

    timer.fire();
    assert!(!led.is_on());
    assert_eq!(manager.level("BCM6"), Some(false));
}

#[test]
fn blink_stop_closes_exactly_once() {
    let manager = board();
    let timer = ManualTimer::new();
    let mut led = BlinkDriver::start(&manager, &timer, "BCM6", BlinkDriver::<MockGpio>::DEFAULT_INTERVAL).unwrap();
    timer.fire_times(2);

    led.stop().unwrap();
    led.stop().unwrap();
    assert!(!led.is_running());
    assert!(timer.live_intervals().is_empty());

    timer.fire_times(3);
    assert_eq!(led.ticks(), 2);

    drop(led);
    assert_eq!(manager.close_count("BCM6"), 1);
    assert!(!manager.is_claimed("BCM6"));
}

#[test]
fn blink_dropped_without_stop_releases_pin() {
    let manager = board();
    let timer = ManualTimer::new();
    {
        let _led = BlinkDriver::start(&manager, &timer, "BCM6", Duration::from_millis(10)).unwrap();
        assert!(manager.is_claimed("BCM6"));
    }
    assert!(!manager.is_claimed("BCM6"));
    assert_eq!(manager.close_count("BCM6"), 1);
    assert!(timer.live_intervals().is_empty());
}

#[test]
fn blink_on_claimed_pin_leaves_nothing_open() {
    let manager = board();
    let timer = ManualTimer::new();
    let held = manager.open_gpio("BCM6").unwrap();

    let err = BlinkDriver::start(&manager, &timer, "BCM6", Duration::from_millis(10)).err().unwrap();
    assert!(err.is_resource_unavailable());
    assert_eq!(manager.open_count("BCM6"), 1);
    assert!(timer.live_intervals().is_empty());

    drop(held);
    assert!(!manager.is_claimed("BCM6"));
}

#[test]
fn blink_on_unknown_pin_fails() {
    let manager = board();
    let err = BlinkDriver::start(&manager, &ManualTimer::new(), "BCM99", Duration::from_millis(10))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        PioError::ResourceUnavailable(ResourceError::NoSuchPeripheral(_))
    ));
}

#[test]
fn watcher_reports_falling_edges_only() {
    let manager = board();
    let presses = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&presses);
    let _button = InputWatcher::start(&manager, "BCM21", move |event: &EdgeEvent| {
        assert_eq!(event.edge, Edge::Falling);
        counter.fetch_add(1, Ordering::SeqCst);
        true
    })
    .unwrap();

    assert!(manager.fire_edge("BCM21", Edge::Falling));
    assert!(!manager.fire_edge("BCM21", Edge::Rising));
    assert!(manager.fire_edge("BCM21", Edge::Falling));
    assert_eq!(presses.load(Ordering::SeqCst), 2);
}

#[test]
fn watcher_callback_returning_false_is_not_called_again() {
    let manager = board();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let button = InputWatcher::start(&manager, "BCM21", move |_: &EdgeEvent| {
        counter.fetch_add(1, Ordering::SeqCst);
        false
    })
    .unwrap();

    assert!(manager.fire_edge("BCM21", Edge::Falling));
    assert!(!manager.fire_edge("BCM21", Edge::Falling));
    assert!(!manager.fire_edge("BCM21", Edge::Falling));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!manager.has_callback("BCM21"));
    // The pin stays open until the watcher is stopped.
    assert!(button.is_running());
    assert!(manager.is_claimed("BCM21"));
}

#[test]
fn watcher_survives_edge_detection_errors() {
    let manager = board();
    let _button = InputWatcher::start(&manager, "BCM21", LogPress::default()).unwrap();

    assert!(manager.fail_edge_detection("BCM21"));
    assert!(manager.has_callback("BCM21"));
    assert!(manager.fire_edge("BCM21", Edge::Falling));
}

#[test]
fn watcher_stop_deregisters_and_closes_once() {
    let manager = board();
    let mut button = InputWatcher::start(&manager, "BCM21", LogPress::default()).unwrap();

    button.stop().unwrap();
    button.stop().unwrap();
    drop(button);

    assert_eq!(manager.close_count("BCM21"), 1);
    assert!(!manager.has_callback("BCM21"));
    assert!(!manager.fire_edge("BCM21", Edge::Falling));
}

#[test]
fn watcher_on_claimed_pin_leaves_nothing_open() {
    let manager = board();
    let _held = manager.open_gpio("BCM21").unwrap();

    let err = InputWatcher::start(&manager, "BCM21", LogPress::default()).err().unwrap();
    assert!(err.is_resource_unavailable());
    assert_eq!(manager.open_count("BCM21"), 1);
    assert!(!manager.has_callback("BCM21"));
}

#[test]
fn ramp_programs_servo_sweep() {
    let manager = board();
    let timer = ManualTimer::new();
    let servo = PwmRamp::start(&manager, &timer, "PWM0", RampConfig::default()).unwrap();

    assert_eq!(manager.frequency("PWM0"), Some(50.0));
    assert!(manager.is_enabled("PWM0"));
    assert_eq!(timer.live_intervals(), vec![Duration::from_millis(1000)]);

    timer.fire_times(10);
    assert_eq!(
        manager.duty_cycles("PWM0"),
        vec![5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 9.0, 8.0, 7.0, 6.0, 5.0]
    );
    assert_eq!(servo.ticks(), 10);
    assert_eq!(servo.state().active(), ms(1.0));
    assert_eq!(servo.state().direction(), RampDirection::Increasing);
}

#[test]
fn ramp_flips_on_the_tick_reaching_max() {
    let manager = board();
    let timer = ManualTimer::new();
    let servo = PwmRamp::start(&manager, &timer, "PWM0", RampConfig::default()).unwrap();

    timer.fire_times(4);
    assert_eq!(servo.state().active(), ms(1.8));
    assert_eq!(servo.state().direction(), RampDirection::Increasing);

    timer.fire();
    assert_eq!(servo.state().active(), ms(2.0));
    assert_eq!(servo.state().direction(), RampDirection::Decreasing);

    timer.fire();
    assert_eq!(servo.state().active(), ms(1.8));
}

#[test]
fn ramp_keeps_ticking_when_duty_cycle_is_rejected() {
    let manager = board();
    let timer = ManualTimer::new();
    let servo = PwmRamp::start(&manager, &timer, "PWM0", RampConfig::default()).unwrap();

    manager.reject_duty_cycles("PWM0", true);
    timer.fire_times(3);
    assert_eq!(servo.ticks(), 3);
    assert_eq!(servo.failed_writes(), 3);
    assert_eq!(servo.state().active(), ms(1.6));

    manager.reject_duty_cycles("PWM0", false);
    timer.fire();
    assert_eq!(manager.duty_cycles("PWM0"), vec![5.0, 9.0]);
    assert_eq!(servo.failed_writes(), 3);
}

#[test]
fn ramp_closes_channel_when_configuration_fails() {
    let manager = board();
    let timer = ManualTimer::new();
    manager.reject_duty_cycles("PWM0", true);

    let err = PwmRamp::start(&manager, &timer, "PWM0", RampConfig::default()).err().unwrap();
    assert!(matches!(
        err,
        PioError::ResourceUnavailable(ResourceError::ConfigureFailed { .. })
    ));
    assert!(!manager.is_claimed("PWM0"));
    assert_eq!(manager.close_count("PWM0"), 1);
    assert!(timer.live_intervals().is_empty());
}

#[test]
fn ramp_rejects_invalid_config_before_opening() {
    let manager = board();
    let config = RampConfig {
        min_pulse: ms(2.5),
        ..RampConfig::default()
    };

    let err = PwmRamp::start(&manager, &ManualTimer::new(), "PWM0", config).err().unwrap();
    assert!(err.is_resource_unavailable());
    assert_eq!(manager.open_count("PWM0"), 0);
}

#[test]
fn ramp_stop_closes_exactly_once() {
    let manager = board();
    let timer = ManualTimer::new();
    let mut servo = PwmRamp::start(&manager, &timer, "PWM0", RampConfig::default()).unwrap();

    servo.stop().unwrap();
    servo.stop().unwrap();
    timer.fire();
    drop(servo);

    assert_eq!(manager.close_count("PWM0"), 1);
    assert_eq!(manager.duty_cycles("PWM0"), vec![5.0]);
}

#[test]
fn ramp_on_claimed_channel_leaves_nothing_open() {
    let manager = board();
    let timer = ManualTimer::new();
    let _held = manager.open_pwm("PWM0").unwrap();

    let err = PwmRamp::start(&manager, &timer, "PWM0", RampConfig::default()).err().unwrap();
    assert!(err.is_resource_unavailable());
    assert_eq!(manager.open_count("PWM0"), 1);
    assert!(timer.live_intervals().is_empty());
}

#[test]
fn blink_on_thread_timer() {
    let manager = board();
    let mut led = BlinkDriver::start(&manager, &ThreadTimer::new(), "BCM6", Duration::from_millis(5)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while led.ticks() < 3 && Instant::now() < deadline {
        sleep(Duration::from_millis(1));
    }
    assert!(led.ticks() >= 3);

    led.stop().unwrap();
    let ticks = led.ticks();
    sleep(Duration::from_millis(30));
    assert_eq!(led.ticks(), ticks);
    assert_eq!(manager.writes("BCM6").len() as u64, ticks);
    assert_eq!(manager.close_count("BCM6"), 1);
}

#[test]
fn blink_closes_pin_when_configuration_fails() {
    let manager = board();
    let timer = ManualTimer::new();
    manager.reject_configuration("BCM6", true);

    let err = BlinkDriver::start(&manager, &timer, "BCM6", Duration::from_millis(10)).err().unwrap();
    assert!(matches!(
        err,
        PioError::ResourceUnavailable(ResourceError::ConfigureFailed { .. })
    ));
    assert_eq!(manager.close_count("BCM6"), 1);
    assert!(!manager.is_claimed("BCM6"));
    assert!(timer.live_intervals().is_empty());
}

#[test]
fn blink_with_zero_interval_leaves_nothing_open() {
    let manager = board();
    let timer = ManualTimer::new();

    let err = BlinkDriver::start(&manager, &timer, "BCM6", Duration::from_secs(0)).err().unwrap();
    assert!(matches!(
        err,
        PioError::ResourceUnavailable(ResourceError::ConfigureFailed { .. })
    ));
    assert_eq!(manager.close_count("BCM6"), 1);
    assert!(!manager.is_claimed("BCM6"));
}

#[test]
fn watcher_closes_pin_when_configuration_fails() {
    let manager = board();
    manager.reject_configuration("BCM21", true);

    let err = InputWatcher::start(&manager, "BCM21", LogPress::default()).err().unwrap();
    assert!(matches!(
        err,
        PioError::ResourceUnavailable(ResourceError::ConfigureFailed { .. })
    ));
    assert_eq!(manager.close_count("BCM21"), 1);
    assert!(!manager.is_claimed("BCM21"));
    assert!(!manager.has_callback("BCM21"));
}

const BMP280: &str = "I2C1@0x77";

/// A BMP280 on `I2C1` reporting the datasheet calibration and a 25.08 C sample.
fn sensor_board() -> MockManager {
    let manager = board();
    manager.add_i2c_device("I2C1", 0x77);
    manager.set_registers(BMP280, 0xD0, &[0x58]);
    manager.set_registers(BMP280, 0x88, &[0x70, 0x6B, 0x43, 0x67, 0x18, 0xFC]);
    manager.set_registers(BMP280, 0xFA, &[0x7E, 0xED, 0x00]);
    manager
}

#[test]
fn temperature_configures_sensor_then_reads_each_tick() {
    let manager = sensor_board();
    let timer = ManualTimer::new();
    let sensor = TemperatureSensor::start(&manager, &timer, "I2C1", TemperatureConfig::default()).unwrap();

    assert_eq!(sensor.device_name(), BMP280);
    assert_eq!(sensor.chip_id(), 0x58);
    assert_eq!(sensor.calibration().t1, 27504);
    assert_eq!(manager.register_writes(BMP280), vec![(0xF4, 0x23)]);
    assert_eq!(timer.live_intervals(), vec![Duration::from_millis(1000)]);
    assert_eq!(sensor.last_celsius(), None);

    timer.fire_times(2);
    assert_eq!(sensor.ticks(), 2);
    let celsius = sensor.last_celsius().unwrap();
    assert!((celsius - 25.08).abs() < 0.01, "got {}", celsius);
}

#[test]
fn temperature_keeps_ticking_after_failed_read() {
    let manager = sensor_board();
    let timer = ManualTimer::new();
    let sensor = TemperatureSensor::start(&manager, &timer, "I2C1", TemperatureConfig::default()).unwrap();

    timer.fire();
    manager.reject_i2c(BMP280, true);
    timer.fire_times(2);
    assert_eq!(sensor.failed_reads(), 2);
    assert!(sensor.last_celsius().is_some());

    manager.reject_i2c(BMP280, false);
    manager.set_registers(BMP280, 0xFA, &[0x80, 0x00, 0x00]);
    timer.fire();
    assert_eq!(sensor.ticks(), 4);
    assert!(sensor.last_celsius().unwrap() > 25.1);
}

#[test]
fn temperature_stop_cancels_and_closes_once() {
    let manager = sensor_board();
    let timer = ManualTimer::new();
    let mut sensor = TemperatureSensor::start(&manager, &timer, "I2C1", TemperatureConfig::default()).unwrap();
    assert!(manager.is_claimed(BMP280));

    sensor.stop().unwrap();
    sensor.stop().unwrap();
    timer.fire();
    drop(sensor);

    assert!(timer.live_intervals().is_empty());
    assert!(!manager.is_claimed(BMP280));
    assert_eq!(manager.close_count(BMP280), 1);
}

#[test]
fn temperature_refuses_claimed_or_missing_sensor() {
    let manager = sensor_board();
    let timer = ManualTimer::new();
    let held = manager.open_i2c("I2C1", 0x77).unwrap();

    let err = TemperatureSensor::start(&manager, &timer, "I2C1", TemperatureConfig::default()).err().unwrap();
    assert!(matches!(err, PioError::ResourceUnavailable(ResourceError::AlreadyClaimed(_))));
    drop(held);

    let config = TemperatureConfig {
        address: 0x76,
        ..TemperatureConfig::default()
    };
    let err = TemperatureSensor::start(&manager, &timer, "I2C1", config).err().unwrap();
    assert!(matches!(err, PioError::ResourceUnavailable(ResourceError::NoSuchPeripheral(_))));
    assert!(timer.live_intervals().is_empty());
}

#[test]
fn temperature_closes_device_when_setup_fails() {
    let manager = sensor_board();
    let timer = ManualTimer::new();
    manager.reject_i2c(BMP280, true);

    let err = TemperatureSensor::start(&manager, &timer, "I2C1", TemperatureConfig::default()).err().unwrap();
    assert!(matches!(
        err,
        PioError::ResourceUnavailable(ResourceError::ConfigureFailed { .. })
    ));
    assert_eq!(manager.close_count(BMP280), 1);
    assert!(!manager.is_claimed(BMP280));
    assert!(manager.register_writes(BMP280).is_empty());
    assert!(timer.live_intervals().is_empty());
}

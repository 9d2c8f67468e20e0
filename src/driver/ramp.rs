use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{configure_failed, lock, log_close_failure};
use crate::device::error::ResourceError;
use crate::device::{PeripheralManager, Pwm};
use crate::timer::{CancelToken, Timer};
use crate::PioResult;

/// Pulse shape and sweep speed of a `PwmRamp`.
///
/// The defaults fit a typical hobby servo: 50 Hz, 1 ms to 2 ms active pulse, moving 0.2 ms every second.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RampConfig {
    pub min_pulse: Duration,
    pub max_pulse: Duration,
    pub period: Duration,
    pub step: Duration,
    pub interval: Duration,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            min_pulse: Duration::from_millis(1),
            max_pulse: Duration::from_millis(2),
            period: Duration::from_millis(20),
            step: Duration::from_micros(200),
            interval: Duration::from_millis(1000),
        }
    }
}

impl RampConfig {
    /// Rejects configurations no PWM could output. A `step` wider than the pulse range is accepted.
    pub fn validate(&self) -> PioResult<()> {
        if self.period == Duration::from_secs(0) {
            return Err(ResourceError::InvalidConfig("period must not be zero".to_string()).into());
        }
        if self.min_pulse > self.max_pulse {
            return Err(ResourceError::InvalidConfig(format!(
                "min pulse {:?} is longer than max pulse {:?}",
                self.min_pulse, self.max_pulse
            ))
            .into());
        }
        if self.max_pulse > self.period {
            return Err(ResourceError::InvalidConfig(format!(
                "max pulse {:?} does not fit in period {:?}",
                self.max_pulse, self.period
            ))
            .into());
        }
        Ok(())
    }

    pub fn frequency_hz(&self) -> f64 {
        1e9 / self.period.as_nanos() as f64
    }

    /// Percentage of the period covered by an active pulse of `active`.
    pub fn duty_cycle(&self, active: Duration) -> f64 {
        100.0 * active.as_nanos() as f64 / self.period.as_nanos() as f64
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RampDirection {
    Increasing,
    Decreasing,
}

/// Active pulse duration bouncing between the configured bounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RampState {
    active: Duration,
    direction: RampDirection,
}

impl RampState {
    pub fn new(config: &RampConfig) -> Self {
        Self {
            active: config.min_pulse,
            direction: RampDirection::Increasing,
        }
    }

    pub fn active(&self) -> Duration {
        self.active
    }

    pub fn direction(&self) -> RampDirection {
        self.direction
    }

    /// Moves one step and returns the new active duration.
    ///
    /// A step that reaches or passes a bound lands on the bound and turns around, so the bound itself is output for
    /// exactly one tick.
    pub fn step(&mut self, config: &RampConfig) -> Duration {
        let next = match self.direction {
            RampDirection::Increasing => self.active.saturating_add(config.step),
            RampDirection::Decreasing => self.active.saturating_sub(config.step),
        };

        if next >= config.max_pulse {
            self.active = config.max_pulse;
            self.direction = RampDirection::Decreasing;
        } else if next <= config.min_pulse {
            self.active = config.min_pulse;
            self.direction = RampDirection::Increasing;
        } else {
            self.active = next;
        }
        self.active
    }
}

struct Ramp<P> {
    pwm: Option<P>,
    config: RampConfig,
    state: RampState,
    ticks: u64,
    failed_writes: u64,
}

impl<P: Pwm> Ramp<P> {
    fn tick(&mut self) {
        let pwm = match self.pwm.as_mut() {
            Some(pwm) => pwm,
            None => {
                warn!("ramp tick after the channel was closed");
                return;
            }
        };

        self.ticks += 1;
        let active = self.state.step(&self.config);
        debug!("changing {} active pulse duration to {:?}", pwm.name(), active);

        if let Err(err) = pwm.set_duty_cycle(self.config.duty_cycle(active)) {
            self.failed_writes += 1;
            error!("failed to program {}: {}", pwm.name(), err);
        }
    }
}

/// Sweeps the duty cycle of a PWM channel back and forth, e.g. to swing a servo.
///
/// Every `config.interval` the active pulse moves by `config.step` towards the current bound and the resulting duty
/// cycle is programmed. A rejected duty cycle is logged and the sweep goes on.
pub struct PwmRamp<P: Pwm + 'static> {
    name: String,
    state: Arc<Mutex<Ramp<P>>>,
    token: Option<CancelToken>,
}

impl<P: Pwm + 'static> PwmRamp<P> {
    /// Opens `channel`, programs the frequency and the duty cycle of `config.min_pulse`, enables the output and starts
    /// the sweep.
    ///
    /// Fails with `ResourceUnavailable` if the configuration is invalid or the channel cannot be opened or configured;
    /// nothing stays open in that case.
    pub fn start<M, T>(manager: &M, timer: &T, channel: &str, config: RampConfig) -> PioResult<Self>
    where
        M: PeripheralManager<Pwm = P>,
        T: Timer,
    {
        config.validate()?;
        info!(
            "starting ramp on {} at {} Hz, {:?}..={:?}",
            channel,
            config.frequency_hz(),
            config.min_pulse,
            config.max_pulse
        );

        let mut pwm = manager.open_pwm(channel)?;
        // Frequency and initial duty cycle have to be in place before the output is enabled.
        let configured = pwm
            .set_frequency_hz(config.frequency_hz())
            .and_then(|_| pwm.set_duty_cycle(config.duty_cycle(config.min_pulse)))
            .and_then(|_| pwm.set_enabled(true));
        if let Err(err) = configured {
            log_close_failure(channel, pwm.close());
            return Err(configure_failed(channel, err));
        }

        let mut ramp = Self {
            name: channel.to_string(),
            state: Arc::new(Mutex::new(Ramp {
                pwm: Some(pwm),
                config,
                state: RampState::new(&config),
                ticks: 0,
                failed_writes: 0,
            })),
            token: None,
        };

        let state = Arc::clone(&ramp.state);
        let token = timer
            .schedule_repeating(config.interval, Box::new(move || lock(&state).tick()))
            .map_err(|err| configure_failed(channel, err))?;
        ramp.token = Some(token);

        Ok(ramp)
    }

    /// Cancels the ticks, then closes the channel. Calling it again does nothing.
    ///
    /// The channel is not disabled first; what it outputs after closing is up to the hardware.
    pub fn stop(&mut self) -> PioResult<()> {
        if let Some(mut token) = self.token.take() {
            token.cancel();
        }

        let pwm = lock(&self.state).pwm.take();
        match pwm {
            Some(pwm) => {
                info!("closing {}", self.name);
                pwm.close()
            }
            None => Ok(()),
        }
    }

    pub fn channel_name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RampState {
        lock(&self.state).state
    }

    pub fn ticks(&self) -> u64 {
        lock(&self.state).ticks
    }

    /// Ticks whose duty cycle the channel refused.
    pub fn failed_writes(&self) -> u64 {
        lock(&self.state).failed_writes
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).pwm.is_some()
    }
}

impl<P: Pwm + 'static> Drop for PwmRamp<P> {
    fn drop(&mut self) {
        let result = self.stop();
        log_close_failure(&self.name, result);
    }
}

//! Light-load regulation
//!
//! Once the compensator asks for a period at or below the allowed floor the
//! stage can no longer reduce gain by frequency alone. Two strategies take
//! over from there:
//!
//! * PWM sub-mode pins the period at a reference-dependent floor and trims
//!   duty below 50 % with its own PI controller.
//! * Burst mode parks the period at a fixed value and gates the stage fully
//!   on or off on the voltage error, with a timeout that forces the loop
//!   back to continuous operation when bursts stop regulating.

use crate::config::{BurstConfig, ConfigError, PwmModeConfig};
use crate::control::mode::ModeFlags;
use crate::control::pi_controller::{AntiWindup, PiController, PiForm};
use crate::fixed::{centi, limit, period_ns, Q10, Q16};

/// Duty at 50 % in Q16
pub const DUTY_HALF: i32 = 1 << 15;

/// Duty-trimming sub-mode
pub struct PwmMode {
    pi: PiController,
    /// Error clamp [10 mV]
    min_error: i32,
    max_error: i32,
    /// Period floor at zero reference and at the rated reference [ns]
    soft_start_period: i32,
    period: i32,
    /// Period floor growth per 10 mV of reference [ns] (Q10)
    period_slope: Q10,
    /// Duty limits (Q16)
    duty_min: i32,
    duty_max: i32,
}

impl PwmMode {
    /// # Arguments
    /// * `config` - PWM sub-mode settings
    /// * `full_load_voltage` - Reference at which the period floor reaches its top [V]
    /// * `form` - PI form
    pub fn new(
        config: &PwmModeConfig,
        full_load_voltage: f32,
        form: PiForm,
    ) -> Result<Self, ConfigError> {
        let duty_min = Q16::from_f32(config.min_duty).raw();
        let duty_max = Q16::from_f32(config.max_duty).raw().min(DUTY_HALF);
        let soft_start_period = period_ns(config.soft_start_frequency);
        let period = period_ns(config.frequency);
        if period < soft_start_period {
            return Err(ConfigError::FrequencyRange);
        }
        let full_load = centi(full_load_voltage).max(1);

        Ok(Self {
            pi: PiController::new(config.kp, config.ki, 8, duty_min, duty_max)
                .with_form(form)
                .with_anti_windup(AntiWindup::BackCalculation),
            min_error: centi(config.min_error),
            max_error: centi(config.max_error),
            soft_start_period,
            period,
            period_slope: Q10::from_f32((period - soft_start_period) as f32 / full_load as f32),
            duty_min,
            duty_max,
        })
    }

    /// Duty command for the present voltage error [10 mV]
    pub fn regulate(&mut self, error: i32) -> i32 {
        self.pi.update(limit(error, self.min_error, self.max_error))
    }

    /// Period floor for the next cycle [ns]
    ///
    /// Grows linearly with the reference so that the sub-mode starts at a
    /// high frequency during soft-start and settles at the nominal PWM
    /// frequency once the output is up.
    pub fn period_floor(&self, reference: i32) -> i32 {
        limit(
            self.soft_start_period + self.period_slope.mul(reference),
            self.soft_start_period,
            self.period,
        )
    }

    pub fn duty_min(&self) -> i32 {
        self.duty_min
    }

    pub fn duty_max(&self) -> i32 {
        self.duty_max
    }

    pub fn reset(&mut self) {
        self.pi.reset();
    }
}

/// Burst sub-mode
pub struct BurstMode {
    /// Period held while bursting [ns]
    period: i32,
    /// Voltage burst entry below this commanded period [ns]
    entry_period: i32,
    /// Frequency burst during soft-start: pulse below/above, entry below [ns]
    soft_start_period: i32,
    soft_start_entry_period: i32,
    /// Load current hysteresis [10 mA]
    entry_current: i32,
    exit_current: i32,
    /// [10 mV]
    error_offset: i32,
    threshold_floor: i32,
    threshold_ceiling: i32,
    timeout_limit: i32,
    timeout_decay: i32,
    timeout_steps: [i32; 3],
    /// [10 mV]
    timeout_errors: [i32; 3],
    /// Turn-on threshold on the voltage error [10 mV]
    threshold: i32,
    timeout_counter: i32,
    duty_min: i32,
    duty_max: i32,
}

impl BurstMode {
    pub fn new(config: &BurstConfig, duty_min: i32, duty_max: i32) -> Self {
        let threshold_floor = centi(config.threshold_floor);
        Self {
            period: period_ns(config.frequency),
            entry_period: period_ns(config.entry_frequency),
            soft_start_period: period_ns(config.soft_start_frequency),
            soft_start_entry_period: period_ns(config.soft_start_entry_frequency),
            entry_current: centi(config.entry_current),
            exit_current: centi(config.exit_current),
            error_offset: centi(config.error_offset),
            threshold_floor,
            threshold_ceiling: centi(config.threshold_ceiling),
            timeout_limit: config.timeout_limit as i32,
            timeout_decay: config.timeout_decay as i32,
            timeout_steps: config.timeout_steps.map(|s| s as i32),
            timeout_errors: config.timeout_errors.map(centi),
            threshold: threshold_floor,
            timeout_counter: 0,
            duty_min,
            duty_max,
        }
    }

    /// Period held while bursting [ns]
    pub fn period(&self) -> i32 {
        self.period
    }

    /// Frequency burst used during soft-start
    ///
    /// # Returns
    /// Duty command (Q16)
    pub fn frequency_burst(&self, period: i32, flags: &mut ModeFlags) -> i32 {
        flags.set_burst(period < self.soft_start_entry_period);

        if flags.burst() && period <= self.soft_start_period {
            self.duty_min
        } else {
            self.duty_max
        }
    }

    /// Voltage burst used after soft-start
    ///
    /// # Arguments
    /// * `period` - Period commanded by the compensator [ns]
    /// * `output_current` - [10 mA]
    /// * `error` - Unfiltered voltage error [10 mV]
    /// * `flags` - Burst and burst-timeout flags are updated
    ///
    /// # Returns
    /// Duty command (Q16)
    pub fn voltage_burst(
        &mut self,
        period: i32,
        output_current: i32,
        error: i32,
        flags: &mut ModeFlags,
    ) -> i32 {
        if period < self.entry_period && output_current < self.entry_current {
            flags.set_burst(true);
        } else if output_current > self.exit_current || flags.burst_timeout() {
            flags.set_burst(false);
        }

        // Output sagging below the reference moves the turn-on point up
        self.threshold = if error < self.error_offset {
            (self.threshold + 1).min(self.threshold_ceiling)
        } else {
            (self.threshold - 1).max(self.threshold_floor)
        };

        if !flags.burst() {
            return self.duty_max;
        }

        let duty = if error > self.threshold {
            let excess = error - self.threshold;
            let step = self
                .timeout_errors
                .iter()
                .zip(self.timeout_steps.iter())
                .rev()
                .find(|(&edge, _)| excess > edge)
                .map_or(0, |(_, &step)| step);
            self.timeout_counter += step;
            self.duty_max
        } else {
            self.timeout_counter = (self.timeout_counter - self.timeout_decay).max(0);
            self.duty_min
        };

        if self.timeout_counter > self.timeout_limit {
            flags.set_burst_timeout(true);
            self.timeout_counter = 0;
        } else {
            flags.set_burst_timeout(false);
        }

        duty
    }

    #[cfg(test)]
    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn timeout_counter(&self) -> i32 {
        self.timeout_counter
    }

    pub fn reset(&mut self) {
        self.threshold = self.threshold_floor;
        self.timeout_counter = 0;
    }
}

/// Configured light-load strategy with its state
pub enum LightLoad {
    Pwm(PwmMode),
    Burst(BurstMode),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LightLoadMode;

    fn pwm() -> PwmMode {
        PwmMode::new(&PwmModeConfig::default(), 53.5, PiForm::Positional).unwrap()
    }

    fn burst() -> BurstMode {
        BurstMode::new(&BurstConfig::default(), 0, DUTY_HALF)
    }

    #[test]
    fn test_period_floor_tracks_reference() {
        let p = pwm();
        // 300 kHz at zero reference, 150 kHz from the rated voltage up
        assert_eq!(p.period_floor(0), 3333);
        assert_eq!(p.period_floor(5350), 6666);
        assert_eq!(p.period_floor(6000), 6666);
        let mid = p.period_floor(2675);
        assert!((4998..=5001).contains(&mid));
    }

    #[test]
    fn test_pwm_duty_rises_with_positive_error() {
        let mut p = pwm();
        let first = p.regulate(20);
        assert!(first > 0);
        let mut previous = first;
        for _ in 0..500 {
            let duty = p.regulate(20);
            assert!(duty >= previous);
            assert!(duty <= DUTY_HALF);
            previous = duty;
        }
        assert_eq!(previous, DUTY_HALF);
    }

    #[test]
    fn test_pwm_duty_floor_on_negative_error() {
        let mut p = pwm();
        for _ in 0..100 {
            assert_eq!(p.regulate(-300), 0);
        }
    }

    #[test]
    fn test_frequency_burst_during_soft_start() {
        let b = burst();
        let mut flags = ModeFlags::new();
        flags.arm(LightLoadMode::Burst);

        // Long period: continuous switching
        assert_eq!(b.frequency_burst(5000, &mut flags), DUTY_HALF);
        assert!(!flags.burst());

        // Between 300 kHz and 320 kHz: bursting, stage on
        assert_eq!(b.frequency_burst(3200, &mut flags), DUTY_HALF);
        assert!(flags.burst());

        // At the floor: stage off
        assert_eq!(b.frequency_burst(3125, &mut flags), 0);
    }

    #[test]
    fn test_voltage_burst_gates_on_error() {
        let mut b = burst();
        let mut flags = ModeFlags::new();

        // Light load at short period enters burst; output above reference -> off
        assert_eq!(b.voltage_burst(3200, 100, -20, &mut flags), 0);
        assert!(flags.burst());

        // Output well below reference -> on
        assert_eq!(b.voltage_burst(3200, 100, 40, &mut flags), DUTY_HALF);
    }

    #[test]
    fn test_voltage_burst_exit_on_load_step() {
        let mut b = burst();
        let mut flags = ModeFlags::new();
        b.voltage_burst(3200, 100, -20, &mut flags);
        assert!(flags.burst());
        assert_eq!(b.voltage_burst(5000, 500, 0, &mut flags), DUTY_HALF);
        assert!(!flags.burst());
    }

    #[test]
    fn test_threshold_stays_in_band() {
        let mut b = burst();
        let mut flags = ModeFlags::new();
        for _ in 0..200 {
            b.voltage_burst(5000, 1000, -10, &mut flags);
        }
        assert_eq!(b.threshold(), 60);
        for _ in 0..200 {
            b.voltage_burst(5000, 1000, 10, &mut flags);
        }
        assert_eq!(b.threshold(), 10);
    }

    #[test]
    fn test_burst_timeout_on_large_error() {
        let mut b = burst();
        let mut flags = ModeFlags::new();
        b.voltage_burst(3200, 100, -20, &mut flags);
        assert!(flags.burst());

        // Error 0.8 V above a 0.1 V threshold: +300 per cycle
        let mut cycles = 0;
        while !flags.burst_timeout() {
            b.voltage_burst(3200, 100, 80, &mut flags);
            cycles += 1;
            assert!(cycles < 10);
        }
        assert_eq!(cycles, 4);
        assert_eq!(b.timeout_counter(), 0);

        // Timeout forces the exit on the next cycle even at light load
        b.voltage_burst(5000, 100, 80, &mut flags);
        assert!(!flags.burst());
    }
}

//! Controller configuration
//!
//! Engineering-unit settings for every loop plus the capability flags that
//! select optional behaviour. `LlcConfig::default()` reproduces the
//! production calibration in [`params`]. The configuration is checked once
//! by [`LlcConfig::validate`]; the loops themselves never fail.

pub mod params;

pub use params::*;

use crate::control::PiForm;

/// Configuration rejected at construction time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// A frequency setting is zero
    ZeroFrequency,
    /// Minimum switching frequency is not below the maximum
    FrequencyRange,
    /// A mode frequency lies outside the switching frequency range
    FrequencyOutOfRange,
    /// Duty limits outside 0..=0.5 or crossed
    DutyRange,
    /// A clamp has its lower bound above its upper bound
    ClampRange,
    /// Load points are not positive and increasing
    LoadPoints,
    /// Soft-start duration is not positive
    SoftStartTime,
    /// Current filter weights are negative or do not add up to one
    FilterWeights,
    /// Dead-time breakpoints are not ordered by falling frequency, or a
    /// primary dead time is negative
    DeadTimeBreakpoints,
    /// A counter setting would never expire
    ZeroTicks,
}

/// Light-load regulation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LightLoadMode {
    /// Hold the frequency at its floor and reduce duty below 50 %
    Pwm,
    /// Cycle the stage on and off
    Burst,
}

/// Optional behaviour of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Constant-current limiting through the reference
    pub current_limit: bool,
    pub light_load: LightLoadMode,
    /// Twice-line ripple cancellation
    pub ripple_filter: bool,
    /// Active current share over the analog bus
    pub current_share: bool,
    /// Synchronized start-up pulse protocol (needs the share bus wired)
    pub sync_start: bool,
    /// CT over-current stays latched until the fault monitor clears it
    pub ocp_latch: bool,
    /// Blend the external (load side) voltage sense into the feedback
    pub external_sense: bool,
    /// Scale the raw current by the reference calibration factor
    pub current_reference_calibration: bool,
    /// Additional droop beyond the rated load
    pub overload_droop: bool,
    /// Form of all PI controllers
    pub pi_form: PiForm,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            current_limit: true,
            light_load: LightLoadMode::Pwm,
            ripple_filter: true,
            current_share: true,
            sync_start: false,
            ocp_latch: true,
            external_sense: true,
            current_reference_calibration: true,
            overload_droop: true,
            pi_form: PiForm::Positional,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementConfig {
    /// Weight of the previous filtered current sample
    pub current_filter_old: f32,
    /// Weight of the new current sample
    pub current_filter_new: f32,
    /// Sense difference where feedback moves fully to the internal sense [V]
    pub sense_transition_voltage: f32,
    /// Raw current selecting the narrow error clamp [A]
    pub high_current_threshold: f32,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            current_filter_old: measurement::DEFAULT_CURRENT_FILTER_OLD,
            current_filter_new: measurement::DEFAULT_CURRENT_FILTER_NEW,
            sense_transition_voltage: measurement::DEFAULT_SENSE_TRANSITION_VOLTAGE,
            high_current_threshold: measurement::DEFAULT_HIGH_CURRENT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageLoopConfig {
    /// Rate of the fast step [Hz]
    pub control_frequency: f32,
    /// Droop line [V] / [A]
    pub zero_load_voltage: f32,
    pub full_load_voltage: f32,
    pub full_load_current: f32,
    pub overload_voltage: f32,
    pub overload_current: f32,
    /// Soft-start ramp duration [s]
    pub soft_start_time_zero_load: f32,
    pub soft_start_time_full_load: f32,
    /// Compensator coefficients, error taps b0..b3 and output taps a1..a3
    pub soft_start_b: [f32; 4],
    pub soft_start_a: [f32; 3],
    pub regulation_b: [f32; 4],
    pub regulation_a: [f32; 3],
    /// Error clamp [V]
    pub max_error: f32,
    pub min_error: f32,
    pub max_error_high_current: f32,
    /// Switching frequency range [Hz]
    pub max_frequency: u32,
    pub min_frequency: u32,
    /// Frequency forced by OVP and CT-OCP [Hz]
    pub protection_frequency: u32,
}

impl Default for VoltageLoopConfig {
    fn default() -> Self {
        Self {
            control_frequency: DEFAULT_CONTROL_FREQUENCY_HZ,
            zero_load_voltage: DEFAULT_ZERO_LOAD_VOLTAGE,
            full_load_voltage: DEFAULT_FULL_LOAD_VOLTAGE,
            full_load_current: DEFAULT_FULL_LOAD_CURRENT,
            overload_voltage: DEFAULT_OVERLOAD_VOLTAGE,
            overload_current: DEFAULT_OVERLOAD_CURRENT,
            soft_start_time_zero_load: voltage_loop::DEFAULT_SOFT_START_TIME_ZERO_LOAD,
            soft_start_time_full_load: voltage_loop::DEFAULT_SOFT_START_TIME_FULL_LOAD,
            soft_start_b: voltage_loop::DEFAULT_SOFT_START_B,
            soft_start_a: voltage_loop::DEFAULT_SOFT_START_A,
            regulation_b: voltage_loop::DEFAULT_REGULATION_B,
            regulation_a: voltage_loop::DEFAULT_REGULATION_A,
            max_error: voltage_loop::DEFAULT_MAX_ERROR,
            min_error: voltage_loop::DEFAULT_MIN_ERROR,
            max_error_high_current: voltage_loop::DEFAULT_MAX_ERROR_HIGH_CURRENT,
            max_frequency: voltage_loop::DEFAULT_MAX_FREQUENCY,
            min_frequency: voltage_loop::DEFAULT_MIN_FREQUENCY,
            protection_frequency: voltage_loop::DEFAULT_PROTECTION_FREQUENCY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentLimitConfig {
    pub kp: f32,
    pub ki: f32,
    /// Limits per line class and phase [A]
    pub soft_start_low_line: f32,
    pub regulation_low_line: f32,
    pub soft_start_high_line: f32,
    pub regulation_high_line: f32,
    /// Ceiling of the reference correction [V]
    pub max_adjust: f32,
}

impl Default for CurrentLimitConfig {
    fn default() -> Self {
        Self {
            kp: current_limit::DEFAULT_KP,
            ki: current_limit::DEFAULT_KI,
            soft_start_low_line: current_limit::DEFAULT_SOFT_START_LOW_LINE,
            regulation_low_line: current_limit::DEFAULT_REGULATION_LOW_LINE,
            soft_start_high_line: current_limit::DEFAULT_SOFT_START_HIGH_LINE,
            regulation_high_line: current_limit::DEFAULT_REGULATION_HIGH_LINE,
            max_adjust: current_limit::DEFAULT_MAX_ADJUST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmModeConfig {
    pub kp: f32,
    pub ki: f32,
    /// Error clamp [V]
    pub max_error: f32,
    pub min_error: f32,
    /// Frequency floor at zero reference and at the rated voltage [Hz]
    pub soft_start_frequency: u32,
    pub frequency: u32,
    /// Duty limits (fraction of period)
    pub max_duty: f32,
    pub min_duty: f32,
}

impl Default for PwmModeConfig {
    fn default() -> Self {
        Self {
            kp: pwm_mode::DEFAULT_KP,
            ki: pwm_mode::DEFAULT_KI,
            max_error: pwm_mode::DEFAULT_MAX_ERROR,
            min_error: pwm_mode::DEFAULT_MIN_ERROR,
            soft_start_frequency: pwm_mode::DEFAULT_SOFT_START_FREQUENCY,
            frequency: pwm_mode::DEFAULT_FREQUENCY,
            max_duty: pwm_mode::DEFAULT_MAX_DUTY,
            min_duty: pwm_mode::DEFAULT_MIN_DUTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstConfig {
    /// [Hz]
    pub frequency: u32,
    pub entry_frequency: u32,
    pub soft_start_frequency: u32,
    pub soft_start_entry_frequency: u32,
    /// [A]
    pub entry_current: f32,
    pub exit_current: f32,
    /// [V]
    pub error_offset: f32,
    pub threshold_floor: f32,
    pub threshold_ceiling: f32,
    pub timeout_limit: u16,
    pub timeout_decay: u16,
    pub timeout_steps: [u16; 3],
    /// [V]
    pub timeout_errors: [f32; 3],
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            frequency: burst::DEFAULT_FREQUENCY,
            entry_frequency: burst::DEFAULT_ENTRY_FREQUENCY,
            soft_start_frequency: burst::DEFAULT_SOFT_START_FREQUENCY,
            soft_start_entry_frequency: burst::DEFAULT_SOFT_START_ENTRY_FREQUENCY,
            entry_current: burst::DEFAULT_ENTRY_CURRENT,
            exit_current: burst::DEFAULT_EXIT_CURRENT,
            error_offset: burst::DEFAULT_ERROR_OFFSET,
            threshold_floor: burst::DEFAULT_THRESHOLD_FLOOR,
            threshold_ceiling: burst::DEFAULT_THRESHOLD_CEILING,
            timeout_limit: burst::DEFAULT_TIMEOUT_LIMIT,
            timeout_decay: burst::DEFAULT_TIMEOUT_DECAY,
            timeout_steps: burst::DEFAULT_TIMEOUT_STEPS,
            timeout_errors: burst::DEFAULT_TIMEOUT_ERRORS,
        }
    }
}

/// Dead-time breakpoints as (switching frequency [Hz], dead time [ns]),
/// ordered by falling frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadTimeConfig {
    pub primary: [(u32, i32); 2],
    pub sr_turn_on: [(u32, i32); 3],
    pub sr_turn_off: [(u32, i32); 3],
}

impl Default for DeadTimeConfig {
    fn default() -> Self {
        Self {
            primary: dead_time::DEFAULT_PRIMARY,
            sr_turn_on: dead_time::DEFAULT_SR_TURN_ON,
            sr_turn_off: dead_time::DEFAULT_SR_TURN_OFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RippleFilterConfig {
    pub gain: f32,
    /// [V]
    pub input_limit: f32,
    pub output_limit: f32,
}

impl Default for RippleFilterConfig {
    fn default() -> Self {
        Self {
            gain: ripple::DEFAULT_GAIN,
            input_limit: ripple::DEFAULT_INPUT_LIMIT,
            output_limit: ripple::DEFAULT_OUTPUT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcsConfig {
    pub kp: f32,
    pub ki: f32,
    /// [A]
    pub max_bus_error: f32,
    /// [V]
    pub max_adjust: f32,
    pub min_adjust: f32,
    /// [A]
    pub max_compensation: f32,
    pub bus_offset: f32,
}

impl Default for AcsConfig {
    fn default() -> Self {
        Self {
            kp: acs::DEFAULT_KP,
            ki: acs::DEFAULT_KI,
            max_bus_error: acs::DEFAULT_MAX_BUS_ERROR,
            max_adjust: acs::DEFAULT_MAX_ADJUST,
            min_adjust: acs::DEFAULT_MIN_ADJUST,
            max_compensation: acs::DEFAULT_MAX_COMPENSATION,
            bus_offset: acs::DEFAULT_BUS_OFFSET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncStartConfig {
    /// [A]
    pub pulse_detect_current: f32,
    pub pulse_current: f32,
    /// [V]
    pub bypass_voltage: f32,
    /// Housekeeping ticks
    pub detect_delay_ticks: u16,
    pub pulse_ticks: u16,
    pub start_delay_ticks: u16,
}

impl Default for SyncStartConfig {
    fn default() -> Self {
        Self {
            pulse_detect_current: sync_start::DEFAULT_PULSE_DETECT_CURRENT,
            pulse_current: sync_start::DEFAULT_PULSE_CURRENT,
            bypass_voltage: sync_start::DEFAULT_BYPASS_VOLTAGE,
            detect_delay_ticks: sync_start::DEFAULT_DETECT_DELAY_TICKS,
            pulse_ticks: sync_start::DEFAULT_PULSE_TICKS,
            start_delay_ticks: sync_start::DEFAULT_START_DELAY_TICKS,
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LlcConfig {
    pub features: Features,
    pub measurement: MeasurementConfig,
    pub voltage_loop: VoltageLoopConfig,
    pub current_limit: CurrentLimitConfig,
    pub pwm_mode: PwmModeConfig,
    pub burst: BurstConfig,
    pub dead_time: DeadTimeConfig,
    pub ripple: RippleFilterConfig,
    pub acs: AcsConfig,
    pub sync_start: SyncStartConfig,
}

impl LlcConfig {
    /// Check every setting the loops rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let vl = &self.voltage_loop;

        let frequencies = [
            vl.max_frequency,
            vl.min_frequency,
            vl.protection_frequency,
            self.pwm_mode.frequency,
            self.pwm_mode.soft_start_frequency,
            self.burst.frequency,
            self.burst.entry_frequency,
            self.burst.soft_start_frequency,
            self.burst.soft_start_entry_frequency,
        ];
        if frequencies.iter().any(|&f| f == 0) || vl.control_frequency <= 0.0 {
            return Err(ConfigError::ZeroFrequency);
        }
        if vl.min_frequency >= vl.max_frequency {
            return Err(ConfigError::FrequencyRange);
        }
        let in_range = |f: u32| f >= vl.min_frequency && f <= vl.max_frequency;
        if !frequencies[2..].iter().all(|&f| in_range(f)) {
            return Err(ConfigError::FrequencyOutOfRange);
        }

        let pwm = &self.pwm_mode;
        if pwm.min_duty < 0.0 || pwm.max_duty > 0.5 || pwm.min_duty > pwm.max_duty {
            return Err(ConfigError::DutyRange);
        }

        if vl.min_error > vl.max_error
            || vl.max_error_high_current > vl.max_error
            || pwm.min_error > pwm.max_error
            || self.acs.min_adjust > self.acs.max_adjust
            || self.acs.max_bus_error < 0.0
            || self.acs.max_compensation < 0.0
            || self.ripple.input_limit < 0.0
            || self.ripple.output_limit < 0.0
            || self.burst.threshold_floor > self.burst.threshold_ceiling
            || self.burst.entry_current > self.burst.exit_current
        {
            return Err(ConfigError::ClampRange);
        }

        if vl.full_load_current <= 0.0
            || vl.overload_current <= vl.full_load_current
            || vl.zero_load_voltage <= 0.0
        {
            return Err(ConfigError::LoadPoints);
        }

        if vl.soft_start_time_zero_load <= 0.0 || vl.soft_start_time_full_load <= 0.0 {
            return Err(ConfigError::SoftStartTime);
        }

        let m = &self.measurement;
        let weight_sum = m.current_filter_old + m.current_filter_new;
        if m.current_filter_old < 0.0
            || m.current_filter_new < 0.0
            || libm::fabsf(weight_sum - 1.0) > 1.0e-3
            || m.sense_transition_voltage <= 0.0
        {
            return Err(ConfigError::FilterWeights);
        }

        let dt = &self.dead_time;
        if !falling_frequency(&dt.primary)
            || !falling_frequency(&dt.sr_turn_on)
            || !falling_frequency(&dt.sr_turn_off)
            || dt.primary.iter().any(|&(_, ns)| ns < 0)
        {
            return Err(ConfigError::DeadTimeBreakpoints);
        }

        let sync = &self.sync_start;
        if self.burst.timeout_limit == 0 || sync.pulse_ticks == 0 {
            return Err(ConfigError::ZeroTicks);
        }

        Ok(())
    }
}

fn falling_frequency(points: &[(u32, i32)]) -> bool {
    points.iter().all(|&(f, _)| f > 0) && points.windows(2).all(|w| w[0].0 > w[1].0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(LlcConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_crossed_frequency_range_rejected() {
        let mut config = LlcConfig::default();
        config.voltage_loop.min_frequency = 400_000;
        assert_eq!(config.validate(), Err(ConfigError::FrequencyRange));
    }

    #[test]
    fn test_protection_frequency_outside_range_rejected() {
        let mut config = LlcConfig::default();
        config.voltage_loop.protection_frequency = 50_000;
        assert_eq!(config.validate(), Err(ConfigError::FrequencyOutOfRange));
    }

    #[test]
    fn test_duty_above_half_rejected() {
        let mut config = LlcConfig::default();
        config.pwm_mode.max_duty = 0.6;
        assert_eq!(config.validate(), Err(ConfigError::DutyRange));
    }

    #[test]
    fn test_unordered_dead_time_breakpoints_rejected() {
        let mut config = LlcConfig::default();
        config.dead_time.sr_turn_on = [(115_000, 50), (220_000, 80), (300_000, 450)];
        assert_eq!(config.validate(), Err(ConfigError::DeadTimeBreakpoints));
    }

    #[test]
    fn test_filter_weights_must_sum_to_one() {
        let mut config = LlcConfig::default();
        config.measurement.current_filter_new = 0.7;
        assert_eq!(config.validate(), Err(ConfigError::FilterWeights));
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let mut config = LlcConfig::default();
        config.burst.frequency = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroFrequency));
    }
}

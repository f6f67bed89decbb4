//! Voltage/frequency loop and mode arbiter
//!
//! One call per fast cycle turns the measured output into a switching
//! period and duty command:
//!
//! 1. Droop reference from the load current, plus the current-share trim
//! 2. Soft-start ramp, or the droop reference once the ramp has met it
//! 3. Current-limit correction of the reference
//! 4. Clamped error (plus ripple correction) through the compensator
//! 5. Protection override, then the light-load strategy
//!
//! Disabling the converter resets every piece of loop state and parks the
//! soft-start ramp at the present output voltage.

use crate::config::{ConfigError, LightLoadMode, LlcConfig};
use crate::control::compensator::{Coefficients, Compensator};
use crate::control::current_limit::{CurrentLimiter, LineClass};
use crate::control::light_load::{BurstMode, LightLoad, PwmMode};
use crate::control::mode::ModeFlags;
use crate::fixed::{centi, limit, period_ns, Q15, Q8};

/// Per-cycle inputs of the voltage loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopInputs {
    pub enable: bool,
    /// Feedback voltage [10 mV]
    pub output_voltage: i32,
    /// Filtered, calibrated output current [10 mA]
    pub output_current: i32,
    /// Raw current above the high-current threshold
    pub high_current: bool,
    /// Current-share reference trim [10 mV]
    pub share_adjust: i32,
    /// Ripple filter correction [10 mV]
    pub ripple_correction: i32,
    /// Output over-voltage
    pub over_voltage: bool,
    /// Delayed CT over-current protection has tripped
    pub ct_trip: bool,
}

/// Command produced by one loop step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LoopOutput {
    /// Switching period [ns]
    pub period: i32,
    /// Duty cycle (Q16, 0.5 = 32768)
    pub duty: i32,
}

/// Protection currently overriding the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protection {
    OverVoltage,
    CtOverCurrent,
}

pub struct VoltageLoop {
    // Droop line
    zero_load_voltage: i32,
    full_load_current: i32,
    droop: Q15,
    overload_droop: Q15,

    // Soft-start ramp rate [Q8 10 mV per cycle] at zero and full load
    soft_start_rate: i32,
    soft_start_rate_min: i32,
    /// Rate reduction per 10 mA of load (Q15 of the Q8 rate)
    soft_start_slope: Q15,

    soft_start_coefficients: Coefficients,
    regulation_coefficients: Coefficients,

    min_error: i32,
    max_error: i32,
    max_error_high_current: i32,

    /// Absolute switching period range [ns]
    period_min: i32,
    period_max: i32,
    protection_period: i32,

    compensator: Compensator,
    current_limiter: Option<CurrentLimiter>,
    light_load: LightLoad,
    light_load_mode: LightLoadMode,
    flags: ModeFlags,

    /// Soft-start ramp (Q8 10 mV)
    soft_start_reference: i32,
    /// Droop reference of the last cycle [10 mV]
    droop_reference: i32,
    /// Total reference of the last cycle [10 mV]
    reference: i32,
    /// Unclamped voltage error of the last cycle [10 mV]
    error: i32,
    /// Period floor for the next cycle; moves with the reference in PWM mode [ns]
    period_floor: i32,
    duty_min: i32,
    duty_max: i32,

    enabled: bool,
    protection: Option<Protection>,
}

impl VoltageLoop {
    pub fn new(config: &LlcConfig) -> Result<Self, ConfigError> {
        let vl = &config.voltage_loop;
        let features = &config.features;

        let zero_load_voltage = centi(vl.zero_load_voltage);
        let full_load_voltage = centi(vl.full_load_voltage);
        let full_load_current = centi(vl.full_load_current);
        if full_load_current <= 0 {
            return Err(ConfigError::LoadPoints);
        }

        let droop =
            ((vl.zero_load_voltage - vl.full_load_voltage) / vl.full_load_current).max(0.0);
        let overload_droop = if features.overload_droop {
            let extra = (vl.full_load_voltage - vl.overload_voltage)
                - (vl.zero_load_voltage - vl.full_load_voltage);
            (extra / (vl.overload_current - vl.full_load_current)).max(0.0)
        } else {
            0.0
        };

        let soft_start_rate = ramp_rate(
            zero_load_voltage,
            vl.control_frequency,
            vl.soft_start_time_zero_load,
        )?;
        let soft_start_rate_min = ramp_rate(
            full_load_voltage,
            vl.control_frequency,
            vl.soft_start_time_full_load,
        )?;

        let period_min = period_ns(vl.max_frequency);
        let period_max = period_ns(vl.min_frequency);
        if period_min >= period_max {
            return Err(ConfigError::FrequencyRange);
        }

        let current_limiter = if features.current_limit {
            Some(CurrentLimiter::new(&config.current_limit, features.pi_form)?)
        } else {
            None
        };

        let pwm = PwmMode::new(&config.pwm_mode, vl.full_load_voltage, features.pi_form)?;
        let (duty_min, duty_max) = (pwm.duty_min(), pwm.duty_max());
        let light_load = match features.light_load {
            LightLoadMode::Pwm => LightLoad::Pwm(pwm),
            LightLoadMode::Burst => {
                LightLoad::Burst(BurstMode::new(&config.burst, duty_min, duty_max))
            }
        };

        let mut vloop = Self {
            zero_load_voltage,
            full_load_current,
            droop: Q15::from_f32(droop),
            overload_droop: Q15::from_f32(overload_droop),
            soft_start_rate,
            soft_start_rate_min,
            soft_start_slope: Q15::from_f32(
                (soft_start_rate - soft_start_rate_min) as f32 / full_load_current as f32,
            ),
            soft_start_coefficients: Coefficients::from_f32(vl.soft_start_b, vl.soft_start_a),
            regulation_coefficients: Coefficients::from_f32(vl.regulation_b, vl.regulation_a),
            min_error: centi(vl.min_error),
            max_error: centi(vl.max_error),
            max_error_high_current: centi(vl.max_error_high_current),
            period_min,
            period_max,
            protection_period: period_ns(vl.protection_frequency),
            compensator: Compensator::new(),
            current_limiter,
            light_load,
            light_load_mode: features.light_load,
            flags: ModeFlags::new(),
            soft_start_reference: 0,
            droop_reference: 0,
            reference: 0,
            error: 0,
            period_floor: period_min,
            duty_min,
            duty_max,
            enabled: false,
            protection: None,
        };
        vloop.disable(0);
        Ok(vloop)
    }

    /// Run one fast cycle
    pub fn step(&mut self, inputs: &LoopInputs) -> LoopOutput {
        if !inputs.enable {
            return self.disable(inputs.output_voltage);
        }
        if !self.enabled {
            self.enabled = true;
            self.flags.arm(self.light_load_mode);
            info!("converter enabled, soft-start from {}", self.soft_start_reference >> 8);
        }

        let droop_reference = self.droop_reference(inputs.output_current, inputs.share_adjust);
        let soft_start = self.flags.soft_start();
        let mut reference = if soft_start {
            self.ramp(droop_reference, inputs.output_current)
        } else {
            droop_reference
        };

        if let Some(limiter) = self.current_limiter.as_mut() {
            let adjust = limiter.update(inputs.output_current, reference, soft_start);
            self.flags.set_current_limit(limiter.is_limiting());
            reference = (reference + adjust).max(0);
        }
        self.reference = reference;

        self.error = reference - inputs.output_voltage;
        let max_error = if inputs.high_current {
            self.max_error_high_current
        } else {
            self.max_error
        };
        let error = limit(self.error + inputs.ripple_correction, self.min_error, max_error);

        // The cycle that ends soft-start still runs on the soft-start set
        let coefficients = if soft_start {
            &self.soft_start_coefficients
        } else {
            &self.regulation_coefficients
        };
        let period_q4 = self
            .compensator
            .evaluate(coefficients, error, self.period_floor << 4, self.period_max << 4);
        let mut output = LoopOutput {
            period: period_q4 >> 4,
            duty: self.duty_max,
        };

        let protection = if inputs.over_voltage {
            Some(Protection::OverVoltage)
        } else if inputs.ct_trip {
            Some(Protection::CtOverCurrent)
        } else {
            None
        };
        if protection != self.protection {
            match protection {
                Some(p) => warn!("protection override: {}", p),
                None => info!("protection released"),
            }
            self.protection = protection;
        }

        match protection {
            Some(Protection::OverVoltage) => {
                self.compensator.reset(self.protection_period << 4);
                output = LoopOutput {
                    period: self.protection_period,
                    duty: self.duty_min,
                };
            }
            Some(Protection::CtOverCurrent) => {
                self.flags.set_ct_ocp(true);
                self.compensator.reset(self.protection_period << 4);
                self.soft_start_reference = inputs.output_voltage.max(0) << 8;
                output = LoopOutput {
                    period: self.protection_period,
                    duty: self.duty_max,
                };
            }
            None => self.arbitrate(&mut output, inputs.output_current),
        }

        self.compensator.shift();
        output
    }

    /// Droop reference for the present load, saturated at the zero-load voltage
    fn droop_reference(&mut self, output_current: i32, share_adjust: i32) -> i32 {
        let overload = (output_current - self.full_load_current).max(0);
        let droop = self.zero_load_voltage
            - self.droop.mul(output_current)
            - self.overload_droop.mul(overload);
        self.droop_reference = droop.min(self.zero_load_voltage) + share_adjust;
        self.droop_reference
    }

    /// Advance the soft-start ramp; leaves soft-start once it meets the droop reference
    fn ramp(&mut self, droop_reference: i32, output_current: i32) -> i32 {
        if self.soft_start_reference >> 8 >= droop_reference {
            self.flags.set_soft_start(false);
            info!("soft-start complete at {}", droop_reference);
            return droop_reference;
        }
        let rate = (self.soft_start_rate - self.soft_start_slope.mul(output_current))
            .max(self.soft_start_rate_min);
        self.soft_start_reference = self.soft_start_reference.saturating_add(rate);
        self.soft_start_reference >> 8
    }

    fn arbitrate(&mut self, output: &mut LoopOutput, output_current: i32) {
        match &mut self.light_load {
            LightLoad::Pwm(pwm) => {
                if output.period <= self.period_floor || self.flags.pwm() {
                    let duty = pwm.regulate(self.error);
                    if duty >= self.duty_max {
                        self.flags.set_pwm(false);
                    } else {
                        self.flags.set_pwm(true);
                        output.period = self.period_floor;
                        self.compensator.reset(self.period_floor << 4);
                        output.duty = duty;
                    }
                }
                if !self.flags.pwm() {
                    output.duty = self.duty_max;
                }
                self.period_floor = pwm.period_floor(self.reference);
            }
            LightLoad::Burst(burst) => {
                if self.flags.soft_start() {
                    // Frequency burst gates the duty only; the period stays with the compensator
                    output.duty = burst.frequency_burst(output.period, &mut self.flags);
                } else {
                    let was_timed_out = self.flags.burst_timeout();
                    output.duty = burst.voltage_burst(
                        output.period,
                        output_current,
                        self.error,
                        &mut self.flags,
                    );
                    if self.flags.burst_timeout() && !was_timed_out {
                        warn!("burst timeout");
                    }
                    if self.flags.burst() {
                        output.period = burst.period();
                        self.compensator.reset(output.period << 4);
                    }
                }
            }
        }
    }

    /// Converter disabled: reset all loop state
    ///
    /// The soft-start ramp parks at `output_voltage` so the next enable
    /// continues from the present output without a reference step.
    pub fn disable(&mut self, output_voltage: i32) -> LoopOutput {
        if self.enabled {
            info!("converter disabled at {}", output_voltage);
        }
        self.enabled = false;
        self.protection = None;
        self.flags.clear();
        self.reference = 0;
        self.droop_reference = 0;
        self.error = 0;
        self.soft_start_reference = output_voltage.max(0) << 8;

        if let Some(limiter) = self.current_limiter.as_mut() {
            limiter.reset();
        }
        self.period_floor = match &mut self.light_load {
            LightLoad::Pwm(pwm) => {
                pwm.reset();
                pwm.period_floor(0)
            }
            LightLoad::Burst(burst) => {
                burst.reset();
                self.period_min
            }
        };
        self.compensator.reset(self.period_floor << 4);

        LoopOutput {
            period: self.period_floor,
            duty: self.duty_min,
        }
    }

    /// Switch the current-limit pair for the present line class
    pub fn select_line(&mut self, line: LineClass) {
        if let Some(limiter) = self.current_limiter.as_mut() {
            limiter.select_line(line);
        }
    }

    /// Clear the CT over-current flags once the fault is released
    pub fn clear_ct_ocp(&mut self) {
        self.flags.set_ct_ocp(false);
        self.flags.set_ct_ocp_reported(false);
    }

    /// Hand the CT over-current to the external fault monitor
    pub fn report_ct_ocp(&mut self) {
        if !self.flags.ct_ocp_reported() {
            warn!("CT over-current latched");
        }
        self.flags.set_ct_ocp_reported(true);
    }

    pub fn flags(&self) -> &ModeFlags {
        &self.flags
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Total reference of the last cycle [10 mV]
    pub fn reference(&self) -> i32 {
        self.reference
    }

    pub fn droop_reference_value(&self) -> i32 {
        self.droop_reference
    }

    /// Soft-start ramp position [10 mV]
    pub fn soft_start_reference(&self) -> i32 {
        self.soft_start_reference >> 8
    }

    /// Unclamped voltage error of the last cycle [10 mV]
    pub fn error(&self) -> i32 {
        self.error
    }

    /// Current-limit correction of the last cycle [10 mV]
    pub fn current_limit_adjust(&self) -> i32 {
        self.current_limiter.as_ref().map_or(0, |l| l.adjust())
    }

    pub fn compensator(&self) -> &Compensator {
        &self.compensator
    }

    /// Allowed switching period range [ns]
    pub fn period_range(&self) -> (i32, i32) {
        (self.period_min, self.period_max)
    }

    pub fn protection_period(&self) -> i32 {
        self.protection_period
    }

    /// Duty limits (Q16)
    pub fn duty_range(&self) -> (i32, i32) {
        (self.duty_min, self.duty_max)
    }

    /// Soft-start ramp rate at zero load [Q8 10 mV per cycle]
    pub fn soft_start_rate(&self) -> i32 {
        self.soft_start_rate
    }
}

/// Ramp increment per cycle (Q8 10 mV) that covers `target` in `time` seconds
fn ramp_rate(target: i32, control_frequency: f32, time: f32) -> Result<i32, ConfigError> {
    let cycles = control_frequency * time;
    if cycles < 1.0 {
        return Err(ConfigError::SoftStartTime);
    }
    Ok(Q8::from_f32(target as f32 / cycles).raw().max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(vout: i32, iout: i32) -> LoopInputs {
        LoopInputs {
            enable: true,
            output_voltage: vout,
            output_current: iout,
            ..Default::default()
        }
    }

    fn vloop(light_load: LightLoadMode) -> VoltageLoop {
        let mut config = LlcConfig::default();
        config.features.light_load = light_load;
        VoltageLoop::new(&config).unwrap()
    }

    #[test]
    fn test_resolved_constants() {
        let v = vloop(LightLoadMode::Pwm);
        // 54.5 V over 6000 cycles
        assert_eq!(v.soft_start_rate(), 233);
        assert_eq!(v.period_range(), (3125, 14084));
        assert_eq!(v.protection_period(), 6896);
        assert_eq!(v.duty_range(), (0, 32768));
    }

    #[test]
    fn test_droop_reference() {
        let mut v = vloop(LightLoadMode::Pwm);
        assert_eq!(v.droop_reference(0, 0), 5450);
        // 1 V of droop at the rated 74.07 A
        let at_full = v.droop_reference(7407, 0);
        assert!((5349..=5351).contains(&at_full));
        // Current-share trim rides on top
        assert_eq!(v.droop_reference(0, -50), 5400);
        // Negative current cannot lift the reference above zero-load
        assert_eq!(v.droop_reference(-500, 0), 5450);
    }

    #[test]
    fn test_overload_droop_is_steeper() {
        let mut config = LlcConfig::default();
        config.voltage_loop.overload_voltage = 51.0;
        let mut v = VoltageLoop::new(&config).unwrap();
        let slope_rated = v.droop_reference(0, 0) - v.droop_reference(7400, 0);
        let slope_overload = v.droop_reference(7400, 0) - v.droop_reference(14800, 0);
        assert!(slope_overload > slope_rated);
    }

    #[test]
    fn test_disable_parks_ramp_at_output() {
        let mut v = vloop(LightLoadMode::Pwm);
        let out = v.step(&LoopInputs {
            output_voltage: 1200,
            ..Default::default()
        });
        assert_eq!(out, LoopOutput { period: 3333, duty: 0 });
        assert_eq!(v.soft_start_reference(), 1200);
        assert!(!v.is_enabled());
        assert_eq!(*v.flags(), ModeFlags::new());
    }

    #[test]
    fn test_first_enabled_cycle_arms_flags() {
        let mut v = vloop(LightLoadMode::Burst);
        v.step(&enabled(0, 0));
        assert!(v.is_enabled());
        assert!(v.flags().soft_start());

        let mut v = vloop(LightLoadMode::Pwm);
        v.step(&enabled(0, 0));
        assert!(v.flags().soft_start());
    }

    #[test]
    fn test_ramp_rate_falls_with_load() {
        let mut light = vloop(LightLoadMode::Pwm);
        let mut heavy = vloop(LightLoadMode::Pwm);
        light.step(&enabled(0, 0));
        heavy.step(&enabled(0, 7407));
        for _ in 0..600 {
            light.step(&enabled(0, 0));
            heavy.step(&enabled(0, 7407));
        }
        assert!(light.soft_start_reference() > heavy.soft_start_reference());
        // Full-load rate is the floor: 53.5 V in 250 ms
        let heavy_rate = (heavy.soft_start_reference() << 8) / 601;
        assert!((85..=95).contains(&heavy_rate));
    }

    #[test]
    fn test_high_current_narrows_error_clamp() {
        let mut a = vloop(LightLoadMode::Pwm);
        let mut b = vloop(LightLoadMode::Pwm);
        a.step(&enabled(0, 0));
        b.step(&enabled(0, 0));
        // Leave soft-start so the regulation coefficients are used
        for v in [&mut a, &mut b] {
            for _ in 0..7000 {
                v.step(&enabled(5450, 0));
            }
            assert!(!v.flags().soft_start());
        }
        let wide = a.step(&enabled(5000, 0));
        let narrow = b.step(&LoopInputs {
            high_current: true,
            ..enabled(5000, 0)
        });
        // A positive error lengthens the period; the narrow clamp lengthens it less
        assert!(wide.period > narrow.period);
    }

    #[test]
    fn test_over_voltage_override() {
        let mut v = vloop(LightLoadMode::Pwm);
        for _ in 0..100 {
            v.step(&enabled(3000, 1000));
        }
        let out = v.step(&LoopInputs {
            over_voltage: true,
            ..enabled(3000, 1000)
        });
        assert_eq!(out, LoopOutput { period: 6896, duty: 0 });
        assert_eq!(v.compensator().errors(), &[0; 4]);
        assert_eq!(v.compensator().outputs(), &[6896 << 4; 4]);
    }

    #[test]
    fn test_ct_trip_holds_ramp_at_output() {
        let mut v = vloop(LightLoadMode::Pwm);
        for _ in 0..100 {
            v.step(&enabled(0, 0));
        }
        let out = v.step(&LoopInputs {
            ct_trip: true,
            ..enabled(2500, 0)
        });
        assert_eq!(out, LoopOutput { period: 6896, duty: 32768 });
        assert!(v.flags().ct_ocp());
        assert_eq!(v.soft_start_reference(), 2500);
    }

    #[test]
    fn test_over_voltage_takes_priority_over_ct_trip() {
        let mut v = vloop(LightLoadMode::Pwm);
        v.step(&enabled(0, 0));
        let out = v.step(&LoopInputs {
            over_voltage: true,
            ct_trip: true,
            ..enabled(0, 0)
        });
        assert_eq!(out.duty, 0);
    }

    #[test]
    fn test_pwm_sub_mode_at_light_load() {
        let mut v = vloop(LightLoadMode::Pwm);
        // Output above the reference drives the period to its floor
        let mut out = v.step(&enabled(5600, 0));
        for _ in 0..200 {
            out = v.step(&enabled(5600, 0));
        }
        assert!(v.flags().pwm());
        assert!(out.duty < 32768);
        // Pinned at the floor, which rises slowly with the soft-start reference
        assert!((3333..3500).contains(&out.period));
    }

    #[test]
    fn test_soft_start_exit_cycle_uses_soft_start_coefficients() {
        let mut v = vloop(LightLoadMode::Burst);
        // Ramp parked above the droop reference: soft-start ends on the first cycle
        v.disable(5600);
        let mut soft = *v.compensator();
        let mut regulation = *v.compensator();
        let (floor, max) = (v.period_floor << 4, v.period_max << 4);

        // Load above the burst exit current keeps the compensator period
        let out = v.step(&enabled(5300, 500));
        assert!(!v.flags().soft_start());
        assert!(!v.flags().burst());

        let error = v.error();
        assert!(error > 0 && error < 150);
        let expected = soft.evaluate(&v.soft_start_coefficients, error, floor, max);
        let other = regulation.evaluate(&v.regulation_coefficients, error, floor, max);
        assert_ne!(expected >> 4, other >> 4);
        assert_eq!(out.period, expected >> 4);
    }

    #[test]
    fn test_frequency_burst_leaves_period_to_compensator() {
        let mut v = vloop(LightLoadMode::Burst);
        v.disable(3000);
        // Output above the ramp walks the period down to its floor
        let mut min_period = i32::MAX;
        let mut gated = 0;
        for _ in 0..500 {
            let out = v.step(&enabled(5000, 0));
            assert!(v.flags().soft_start());
            assert_ne!(out.period, 3636);
            min_period = min_period.min(out.period);
            if out.duty == 0 {
                assert!(v.flags().burst());
                gated += 1;
            }
        }
        assert_eq!(min_period, 3125);
        assert!(gated > 400);
    }

    #[test]
    fn test_pwm_sub_mode_exits_when_duty_saturates() {
        let mut v = vloop(LightLoadMode::Pwm);
        v.step(&enabled(5600, 0));
        assert!(v.flags().pwm());
        // Output far below the reference: duty climbs to 50 % and the
        // compensator takes over
        let mut out = v.step(&enabled(0, 0));
        for _ in 0..2000 {
            out = v.step(&enabled(0, 0));
        }
        assert!(!v.flags().pwm());
        assert_eq!(out.duty, 32768);
    }
}

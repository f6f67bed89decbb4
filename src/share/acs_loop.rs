//! Active current share
//!
//! Each unit drives the analog share bus with its own output-current
//! estimate and trims its voltage reference until its local current
//! matches what the bus reports for the fleet. The reference trim is the
//! only value handed to the voltage loop and is produced earlier in the
//! same fast cycle.

use crate::config::{AcsConfig, ConfigError, MeasurementConfig};
use crate::control::pi_controller::{AntiWindup, PiController, PiForm};
use crate::fixed::{centi, limit, Q12, Q15};

/// Per-cycle inputs of the share loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AcsInputs {
    /// Converter enabled, as left by the previous voltage-loop cycle
    pub enable: bool,
    /// Soft-start active, as left by the previous voltage-loop cycle
    pub soft_start: bool,
    /// Synchronized start-up pulse owns the bus
    pub sync_sequence: bool,
    /// Local share sense [10 mA]
    pub local: i32,
    /// Share bus sense [10 mA]
    pub bus: i32,
    /// Unfiltered output current [10 mA]
    pub output_current: i32,
}

/// Result of one share-loop step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AcsOutput {
    /// Voltage reference trim [10 mV]
    pub adjust: i32,
    /// New share bus drive [10 mA]; `None` while the start-up pulse owns the bus
    pub bus_drive: Option<i32>,
}

pub struct AcsLoop {
    pi: PiController,
    /// Bus error clamp [10 mA]
    max_bus_error: i32,
    /// Added to the bus error [10 mA]
    bus_offset: i32,
    min_adjust: i32,
    /// Bound of the slow compensation [10 mA]
    max_compensation: i32,
    filter_old: Q15,
    filter_new: Q15,
    share_gain: Q12,
    share_offset: i32,

    /// Filtered output current [10 mA]
    filtered: i32,
    /// Calibrated output-current estimate driven onto the bus [10 mA]
    estimate: i32,
    local: i32,
    /// Slow feed-forward correction of the bus drive [10 mA]
    compensation: i32,
    adjust: i32,
    active: bool,
}

impl AcsLoop {
    pub fn new(
        config: &AcsConfig,
        measurement: &MeasurementConfig,
        form: PiForm,
    ) -> Result<Self, ConfigError> {
        let min_adjust = centi(config.min_adjust);
        let max_adjust = centi(config.max_adjust);
        if min_adjust > max_adjust {
            return Err(ConfigError::ClampRange);
        }

        Ok(Self {
            pi: PiController::new(config.kp, config.ki, 15, min_adjust, max_adjust)
                .with_form(form)
                .with_anti_windup(AntiWindup::BackCalculation),
            max_bus_error: centi(config.max_bus_error),
            bus_offset: centi(config.bus_offset),
            min_adjust,
            max_compensation: centi(config.max_compensation),
            filter_old: Q15::from_f32(measurement.current_filter_old),
            filter_new: Q15::from_f32(measurement.current_filter_new),
            share_gain: Q12::from_int(1),
            share_offset: 0,
            filtered: 0,
            estimate: 0,
            local: 0,
            compensation: 0,
            adjust: min_adjust,
            active: false,
        })
    }

    /// Run one fast cycle
    pub fn step(&mut self, inputs: &AcsInputs) -> AcsOutput {
        self.local = inputs.local;

        self.filtered =
            self.filter_old.mul(self.filtered) + self.filter_new.mul(inputs.output_current);
        self.estimate = self.share_gain.mul(self.filtered) + self.share_offset;

        let bus_drive = if inputs.sync_sequence {
            None
        } else {
            Some((self.estimate + self.compensation).max(0))
        };

        let active = inputs.enable && !inputs.soft_start && !inputs.sync_sequence;
        if active {
            let error = limit(
                inputs.bus - self.local + self.bus_offset,
                -self.max_bus_error,
                self.max_bus_error,
            );
            self.adjust = self.pi.update(error);
        } else {
            self.pi.reset();
            self.adjust = self.min_adjust;
        }
        self.active = active;

        AcsOutput {
            adjust: self.adjust,
            bus_drive,
        }
    }

    /// Slow nudge of the bus feed-forward toward parity between the local
    /// share sense and the output-current estimate
    pub fn compensate(&mut self) {
        if self.local < self.estimate {
            self.compensation += 1;
        } else if self.local > self.estimate {
            self.compensation -= 1;
        }
        self.compensation = limit(
            self.compensation,
            -self.max_compensation,
            self.max_compensation,
        );
    }

    /// Current-share calibration: gain (Q12) and offset [10 mA]
    pub fn set_calibration(&mut self, gain: Q12, offset: i32) {
        self.share_gain = gain;
        self.share_offset = offset;
    }

    /// Reference trim of the last cycle [10 mV]
    pub fn adjust(&self) -> i32 {
        self.adjust
    }

    pub fn compensation(&self) -> i32 {
        self.compensation
    }

    /// Output-current estimate of the last cycle [10 mA]
    pub fn estimate(&self) -> i32 {
        self.estimate
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn integral(&self) -> i32 {
        self.pi.get_integral()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acs(config: &AcsConfig) -> AcsLoop {
        AcsLoop::new(config, &MeasurementConfig::default(), PiForm::Positional).unwrap()
    }

    fn running(local: i32, bus: i32) -> AcsInputs {
        AcsInputs {
            enable: true,
            local,
            bus,
            output_current: local,
            ..Default::default()
        }
    }

    #[test]
    fn test_pinned_at_floor_while_disabled() {
        let mut a = acs(&AcsConfig::default());
        for _ in 0..100 {
            let out = a.step(&AcsInputs {
                bus: 3000,
                ..Default::default()
            });
            assert_eq!(out.adjust, 0);
        }
        assert!(!a.is_active());
        assert_eq!(a.integral(), 0);
    }

    #[test]
    fn test_pinned_at_floor_during_soft_start() {
        let mut a = acs(&AcsConfig::default());
        let out = a.step(&AcsInputs {
            soft_start: true,
            ..running(1000, 3000)
        });
        assert_eq!(out.adjust, 0);
        assert!(!a.is_active());
    }

    #[test]
    fn test_bus_offset_biases_toward_local() {
        // Equal local and bus: the -1 A offset keeps the trim at its floor
        let mut a = acs(&AcsConfig::default());
        for _ in 0..10_000 {
            assert_eq!(a.step(&running(3000, 3000)).adjust, 0);
        }
    }

    #[test]
    fn test_trim_saturates_and_recovers() {
        let config = AcsConfig {
            bus_offset: 0.0,
            ..Default::default()
        };
        let mut a = acs(&config);
        for _ in 0..20_000 {
            a.step(&running(3000, 3500));
        }
        assert_eq!(a.adjust(), 50);

        // Back-calculation keeps the integrator at the ceiling
        let held = a.integral();
        for _ in 0..1000 {
            a.step(&running(3000, 3500));
        }
        assert!((a.integral() - held).abs() <= 2);

        // Reversed error brings the trim straight back down
        let mut previous = a.adjust();
        for _ in 0..20_000 {
            let adj = a.step(&running(3500, 3000)).adjust;
            assert!(adj <= previous && adj >= 0);
            previous = adj;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_bus_drive_follows_estimate() {
        let mut a = acs(&AcsConfig::default());
        let mut out = AcsOutput::default();
        for _ in 0..50 {
            out = a.step(&running(2000, 2000));
        }
        // Filter settles within an LSB of the input
        let drive = out.bus_drive.unwrap();
        assert!((1999..=2000).contains(&drive));

        let out = a.step(&AcsInputs {
            sync_sequence: true,
            ..running(2000, 2000)
        });
        assert_eq!(out.bus_drive, None);
    }

    #[test]
    fn test_calibration_scales_estimate() {
        let mut a = acs(&AcsConfig::default());
        a.set_calibration(Q12::from_f32(0.5), 100);
        for _ in 0..50 {
            a.step(&running(2000, 2000));
        }
        assert!((1099..=1100).contains(&a.estimate()));
    }

    #[test]
    fn test_compensation_steps_once_per_call() {
        let mut a = acs(&AcsConfig::default());
        for _ in 0..50 {
            a.step(&AcsInputs {
                output_current: 2000,
                ..running(1990, 1990)
            });
        }
        let estimate = a.estimate();
        assert!(estimate > 1990);
        for n in 1..=10 {
            a.compensate();
            assert_eq!(a.compensation(), n);
        }

        // Parity holds the term
        a.step(&AcsInputs {
            output_current: 2000,
            ..running(estimate, estimate)
        });
        let held = a.compensation();
        a.compensate();
        assert_eq!(a.compensation(), held);
    }

    #[test]
    fn test_compensation_is_bounded() {
        let mut a = acs(&AcsConfig::default());
        a.step(&running(0, 0));
        a.step(&AcsInputs {
            output_current: 0,
            ..running(100, 100)
        });
        for _ in 0..2000 {
            a.compensate();
        }
        assert_eq!(a.compensation(), -500);
    }
}

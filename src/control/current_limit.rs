//! Constant-current limiter
//!
//! Compares the filtered output current against the active limit and
//! lowers the voltage reference through a PI controller when the load
//! asks for more. The correction is never positive beyond a fixed ceiling
//! and never pulls the total reference below zero.

use crate::config::{CurrentLimitConfig, ConfigError};
use crate::control::pi_controller::{AntiWindup, PiController, PiForm};
use crate::fixed::centi;

/// Input line class reported by the primary side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineClass {
    Low,
    High,
}

/// Limits in use for one line class [10 mA]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentLimits {
    pub soft_start: i32,
    pub regulation: i32,
}

pub struct CurrentLimiter {
    pi: PiController,
    low_line: CurrentLimits,
    high_line: CurrentLimits,
    active: CurrentLimits,
    /// Ceiling of the correction [10 mV]
    max_adjust: i32,
    /// Last correction [10 mV]
    adjust: i32,
    limiting: bool,
}

impl CurrentLimiter {
    pub fn new(config: &CurrentLimitConfig, form: PiForm) -> Result<Self, ConfigError> {
        let max_adjust = centi(config.max_adjust);
        let low_line = CurrentLimits {
            soft_start: centi(config.soft_start_low_line),
            regulation: centi(config.regulation_low_line),
        };
        let high_line = CurrentLimits {
            soft_start: centi(config.soft_start_high_line),
            regulation: centi(config.regulation_high_line),
        };
        if [low_line, high_line]
            .iter()
            .any(|l| l.soft_start <= 0 || l.regulation <= 0)
        {
            return Err(ConfigError::ClampRange);
        }

        Ok(Self {
            pi: PiController::new(config.kp, config.ki, 15, 0, max_adjust)
                .with_form(form)
                .with_anti_windup(AntiWindup::Clamp),
            low_line,
            high_line,
            active: low_line,
            max_adjust,
            adjust: 0,
            limiting: false,
        })
    }

    /// Switch the limit pair for the present line class
    pub fn select_line(&mut self, line: LineClass) {
        self.active = match line {
            LineClass::Low => self.low_line,
            LineClass::High => self.high_line,
        };
    }

    /// Limit pair currently in use
    #[cfg(test)]
    pub fn limits(&self) -> CurrentLimits {
        self.active
    }

    /// Run one limiter step
    ///
    /// # Arguments
    /// * `output_current` - Filtered, calibrated output current [10 mA]
    /// * `reference` - Voltage reference before correction [10 mV]
    /// * `soft_start` - Selects the soft-start limit
    ///
    /// # Returns
    /// Reference correction [10 mV], in `-reference..=max_adjust`
    pub fn update(&mut self, output_current: i32, reference: i32, soft_start: bool) -> i32 {
        let limit = if soft_start {
            self.active.soft_start
        } else {
            self.active.regulation
        };

        self.pi.set_limits(-reference.max(0), self.max_adjust);
        self.adjust = self.pi.update(limit - output_current);
        self.limiting = self.adjust < self.max_adjust;
        self.adjust
    }

    /// Last correction [10 mV]
    pub fn adjust(&self) -> i32 {
        self.adjust
    }

    /// Limiter is pulling the reference down
    pub fn is_limiting(&self) -> bool {
        self.limiting
    }

    pub fn integral(&self) -> i32 {
        self.pi.get_integral()
    }

    pub fn reset(&mut self) {
        self.pi.set_limits(0, self.max_adjust);
        self.pi.reset();
        self.adjust = 0;
        self.limiting = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> CurrentLimiter {
        CurrentLimiter::new(&CurrentLimitConfig::default(), PiForm::Positional).unwrap()
    }

    #[test]
    fn test_inactive_below_limit() {
        let mut cl = limiter();
        for _ in 0..100 {
            assert_eq!(cl.update(5000, 5400, false), 0);
        }
        assert!(!cl.is_limiting());
    }

    #[test]
    fn test_line_class_selects_limits() {
        let mut cl = limiter();
        assert_eq!(cl.limits().regulation, 8500);
        cl.select_line(LineClass::High);
        assert_eq!(cl.limits().regulation, 16000);
        assert_eq!(cl.limits().soft_start, 12000);
        cl.select_line(LineClass::Low);
        assert_eq!(cl.limits().soft_start, 8000);
    }

    #[test]
    fn test_overcurrent_lowers_reference() {
        let mut cl = limiter();
        let first = cl.update(9000, 5400, false);
        assert!(first < 0);
        assert!(cl.is_limiting());
        let mut previous = first;
        for _ in 0..50 {
            let adj = cl.update(9000, 5400, false);
            assert!(adj <= previous);
            previous = adj;
        }
    }

    #[test]
    fn test_correction_never_below_negative_reference() {
        let mut cl = limiter();
        for _ in 0..10_000 {
            let adj = cl.update(20_000, 1000, false);
            assert!(adj >= -1000);
        }
        assert_eq!(cl.adjust(), -1000);
    }

    #[test]
    fn test_integral_frozen_while_clamped() {
        let mut cl = limiter();
        for _ in 0..10_000 {
            cl.update(20_000, 1000, false);
        }
        let frozen = cl.integral();
        for _ in 0..10_000 {
            cl.update(20_000, 1000, false);
        }
        assert_eq!(cl.integral(), frozen);
    }

    #[test]
    fn test_recovers_without_overshoot() {
        let mut cl = limiter();
        for _ in 0..10_000 {
            cl.update(20_000, 1000, false);
        }
        let mut previous = cl.adjust();
        for _ in 0..100_000 {
            let adj = cl.update(5000, 1000, false);
            assert!(adj >= previous && adj <= 0);
            previous = adj;
        }
        assert_eq!(previous, 0);
        assert!(!cl.is_limiting());
    }

    #[test]
    fn test_soft_start_limit_is_used_during_soft_start() {
        let mut cl = limiter();
        // 82 A is above the 80 A soft-start limit but below the 85 A regulation limit
        assert!(cl.update(8200, 3000, true) < 0);
        cl.reset();
        assert_eq!(cl.update(8200, 3000, false), 0);
    }
}

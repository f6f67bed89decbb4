//! Measurement adapter
//!
//! Turns front-end samples (already scaled to 10 mV / 10 mA by the ADC
//! driver) into the calibrated feedback values the loops consume.

use crate::config::{Features, MeasurementConfig};
use crate::fixed::{centi, limit, Q12, Q15};

/// Calibration factors, reloaded by the housekeeping step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Calibration {
    pub vout_gain: Q12,
    pub iout_gain: Q12,
    /// ADC reference correction applied to the raw current
    pub vref_factor: Q12,
    pub share_gain: Q12,
    /// [10 mA]
    pub share_offset: i32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            vout_gain: Q12::from_int(1),
            iout_gain: Q12::from_int(1),
            vref_factor: Q12::from_int(1),
            share_gain: Q12::from_int(1),
            share_offset: 0,
        }
    }
}

/// Samples of one fast cycle [10 mV] / [10 mA]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSamples {
    /// Output voltage sensed at the load terminals
    pub vout_ext: i32,
    /// Output voltage sensed inside the unit
    pub vout_int: i32,
    pub iout: i32,
}

/// Calibrated feedback values [10 mV] / [10 mA]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Measurement {
    pub vout_ext: i32,
    pub vout_int: i32,
    /// Blended feedback voltage
    pub vout: i32,
    /// Current after the reference correction, before filtering
    pub iout_raw: i32,
    /// Filtered, calibrated current
    pub iout: i32,
    pub high_current: bool,
}

pub struct MeasurementAdapter {
    external_sense: bool,
    reference_calibration: bool,
    /// Sense difference at which the feedback is fully internal [10 mV]
    sense_transition: i32,
    /// 1 / `sense_transition` (Q15)
    sense_weight: Q15,
    filter_old: Q15,
    filter_new: Q15,
    high_current_threshold: i32,
    calibration: Calibration,
    /// Filter state [10 mA]
    filtered: i32,
    last: Measurement,
}

impl MeasurementAdapter {
    pub fn new(config: &MeasurementConfig, features: &Features) -> Self {
        let sense_transition = centi(config.sense_transition_voltage).max(1);
        Self {
            external_sense: features.external_sense,
            reference_calibration: features.current_reference_calibration,
            sense_transition,
            sense_weight: Q15::from_f32(1.0 / sense_transition as f32),
            filter_old: Q15::from_f32(config.current_filter_old),
            filter_new: Q15::from_f32(config.current_filter_new),
            high_current_threshold: centi(config.high_current_threshold),
            calibration: Calibration::default(),
            filtered: 0,
            last: Measurement::default(),
        }
    }

    /// Process one cycle of samples
    pub fn update(&mut self, raw: &RawSamples) -> Measurement {
        let cal = &self.calibration;
        let vout_ext = cal.vout_gain.mul(raw.vout_ext);
        let vout_int = cal.vout_gain.mul(raw.vout_int);

        // Feedback moves from the external to the internal sense as the
        // drop across the output path grows (or the external sense opens)
        let vout = if self.external_sense {
            let k_int = (limit(vout_ext - vout_int, 0, self.sense_transition)
                * self.sense_weight.raw())
            .min(1 << 15);
            let k_ext = (1 << 15) - k_int;
            ((k_ext as i64 * vout_ext as i64 + k_int as i64 * vout_int as i64) >> 15) as i32
        } else {
            vout_int
        };

        let iout_raw = if self.reference_calibration {
            cal.vref_factor.mul(raw.iout)
        } else {
            raw.iout
        };
        self.filtered = self.filter_old.mul(self.filtered) + self.filter_new.mul(iout_raw);
        let iout = cal.iout_gain.mul(self.filtered);

        self.last = Measurement {
            vout_ext,
            vout_int,
            vout,
            iout_raw,
            iout,
            high_current: iout_raw > self.high_current_threshold,
        };
        self.last
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
    }

    /// Values of the last cycle
    pub fn last(&self) -> &Measurement {
        &self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> MeasurementAdapter {
        MeasurementAdapter::new(&MeasurementConfig::default(), &Features::default())
    }

    fn samples(vout_ext: i32, vout_int: i32, iout: i32) -> RawSamples {
        RawSamples {
            vout_ext,
            vout_int,
            iout,
        }
    }

    #[test]
    fn test_external_sense_when_drop_is_small() {
        let mut m = adapter();
        // Load side reads lower than the internal sense: fully external
        assert_eq!(m.update(&samples(5400, 5420, 0)).vout, 5400);
        assert_eq!(m.update(&samples(5400, 5400, 0)).vout, 5400);
    }

    #[test]
    fn test_blend_toward_internal_sense() {
        let mut m = adapter();
        // 2 V of the 4 V transition: halfway
        let v = m.update(&samples(5400, 5200, 0)).vout;
        assert!((5299..=5301).contains(&v));
        // Beyond the transition: internal only
        assert_eq!(m.update(&samples(5400, 4000, 0)).vout, 4000);
    }

    #[test]
    fn test_internal_only_without_external_sense() {
        let features = Features {
            external_sense: false,
            ..Default::default()
        };
        let mut m = MeasurementAdapter::new(&MeasurementConfig::default(), &features);
        assert_eq!(m.update(&samples(5400, 5300, 0)).vout, 5300);
    }

    #[test]
    fn test_current_filter_settles() {
        let mut m = adapter();
        let first = m.update(&samples(0, 0, 4000)).iout;
        assert_eq!(first, 2000);
        let mut last = first;
        for _ in 0..30 {
            last = m.update(&samples(0, 0, 4000)).iout;
        }
        assert!((3999..=4000).contains(&last));
    }

    #[test]
    fn test_calibration_applied() {
        let mut m = adapter();
        m.set_calibration(Calibration {
            vout_gain: Q12::from_f32(1.01),
            iout_gain: Q12::from_f32(0.5),
            ..Default::default()
        });
        let out = m.update(&samples(5000, 5000, 0));
        assert!((5049..=5050).contains(&out.vout));
        for _ in 0..30 {
            m.update(&samples(5000, 5000, 4000));
        }
        assert!((1999..=2000).contains(&m.last().iout));
    }

    #[test]
    fn test_high_current_on_raw_sample() {
        let mut m = adapter();
        // The filter lags, the flag does not
        let out = m.update(&samples(0, 0, 8100));
        assert!(out.high_current);
        assert!(out.iout < 8000);
        assert!(!m.update(&samples(0, 0, 7900)).high_current);
    }
}

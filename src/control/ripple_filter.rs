//! Twice-line ripple cancellation
//!
//! A second-order band-pass on the voltage error, tuned to twice the input
//! line frequency, whose output is added back into the error ahead of the
//! compensator. The filter runs in the 5 kHz housekeeping step; the
//! coefficient set follows the measured line frequency.

use crate::config::RippleFilterConfig;
use crate::fixed::{centi, limit, saturate, Q15, Q30, Q8};

/// Band-pass coefficients. The numerator is `b0 * (1 - z^-2)`, so the
/// filter has no DC gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RippleCoefficients {
    pub b0: Q15,
    pub a1: Q30,
    pub a2: Q30,
}

impl RippleCoefficients {
    pub const OFF: Self = Self {
        b0: Q15::ZERO,
        a1: Q30::ZERO,
        a2: Q30::ZERO,
    };

    fn new(b0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: Q15::from_f32(b0),
            a1: Q30::from_f32(a1),
            a2: Q30::from_f32(a2),
        }
    }

    pub fn is_off(&self) -> bool {
        self.b0.is_zero() && self.a1.is_zero() && self.a2.is_zero()
    }
}

/// Upper band edges in 100 mHz of line frequency and the coefficients
/// (b0, a1, a2) tuned for the centre of each band at 5 kHz sampling
const BANDS: [(u16, Option<(f32, f32, f32)>); 8] = [
    (400, None),
    (490, Some((0.005295056836108720, 1.975250469494065580, -0.989409886327782484))),
    (510, Some((0.005310303638607782, 1.973692542012342570, -0.989379392722784412))),
    (530, Some((0.005324766833247133, 1.972140424986102540, -0.989350466333505762))),
    (550, Some((0.005339209041465511, 1.970518129141805460, -0.989321581917068982))),
    (570, Some((0.005355146753642061, 1.968643489466320060, -0.989289706492715859))),
    (590, Some((0.005370301077859338, 1.966778559982777840, -0.989259397844281296))),
    (640, Some((0.005385431242382720, 1.964836090273921920, -0.989229137515234558))),
];

/// Index of the band holding `line_frequency` (100 mHz units); `None`
/// above the last edge
pub fn band_index(line_frequency: u16) -> Option<usize> {
    BANDS.iter().position(|&(edge, _)| line_frequency <= edge)
}

/// Coefficients for `line_frequency` (100 mHz units)
///
/// Below 40 Hz and above 64 Hz the filter is switched off.
pub fn select_coefficients(line_frequency: u16) -> RippleCoefficients {
    match band_index(line_frequency).and_then(|i| BANDS[i].1) {
        Some((b0, a1, a2)) => RippleCoefficients::new(b0, a1, a2),
        None => RippleCoefficients::OFF,
    }
}

/// Ripple filter state
pub struct RippleFilter {
    gain: Q8,
    /// Input clamp [10 mV]
    input_limit: i32,
    /// Output clamp [10 mV]
    output_limit: i32,
    coefficients: RippleCoefficients,
    /// Gained inputs e[n-1], e[n-2] [10 mV]
    inputs: [i32; 2],
    /// Outputs u[n-1], u[n-2] [Q15 10 mV]
    outputs: [i32; 2],
    /// Correction handed to the voltage loop [10 mV]
    correction: i32,
}

impl RippleFilter {
    pub fn new(config: &RippleFilterConfig) -> Self {
        Self {
            gain: Q8::from_f32(config.gain),
            input_limit: centi(config.input_limit),
            output_limit: centi(config.output_limit),
            coefficients: RippleCoefficients::OFF,
            inputs: [0; 2],
            outputs: [0; 2],
            correction: 0,
        }
    }

    /// Pick the coefficient set for the present line frequency
    pub fn select_band(&mut self, line_frequency: u16) {
        self.coefficients = select_coefficients(line_frequency);
    }

    /// Run one filter step on the latest voltage error
    ///
    /// # Arguments
    /// * `voltage_error` - Reference minus output [10 mV]
    /// * `soft_start` - Correction is held at zero while soft-starting
    ///
    /// # Returns
    /// Correction for the voltage loop [10 mV]
    pub fn update(&mut self, voltage_error: i32, soft_start: bool) -> i32 {
        let clamped = limit(voltage_error, -self.input_limit, self.input_limit);
        let input = self.gain.mul(clamped);

        let c = &self.coefficients;
        let forward = c.b0.mul_wide(input as i64) - c.b0.mul_wide(self.inputs[1] as i64);
        let feedback =
            (c.a1.mul_wide(self.outputs[0] as i64) + c.a2.mul_wide(self.outputs[1] as i64)) >> 30;
        let output = saturate(forward.saturating_add(feedback));

        self.inputs = [input, self.inputs[0]];
        self.outputs = [output, self.outputs[0]];

        self.correction = if soft_start {
            0
        } else {
            limit(output >> 15, -self.output_limit, self.output_limit)
        };
        self.correction
    }

    /// Latest correction
    pub fn correction(&self) -> i32 {
        self.correction
    }

    pub fn coefficients(&self) -> &RippleCoefficients {
        &self.coefficients
    }

    pub fn reset(&mut self) {
        self.inputs = [0; 2];
        self.outputs = [0; 2];
        self.correction = 0;
    }
}

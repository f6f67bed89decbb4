// Direct-form voltage compensator: 4 error taps, 3 output taps
//
//   u[n] = b0*e[n] + b1*e[n-1] + b2*e[n-2] + b3*e[n-3]
//        + a1*u[n-1] + a2*u[n-2] + a3*u[n-3]
//
// e is the voltage error in 10 mV, u the switching period in Q4 ns.

use crate::fixed::{saturate, Q24};

/// Coefficient set of the compensator (Q24)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coefficients {
    pub b: [Q24; 4],
    pub a: [Q24; 3],
}

impl Coefficients {
    pub fn from_f32(b: [f32; 4], a: [f32; 3]) -> Self {
        Self {
            b: b.map(Q24::from_f32),
            a: a.map(Q24::from_f32),
        }
    }
}

/// Compensator history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compensator {
    /// e[n]..e[n-3] [10 mV]
    errors: [i32; 4],
    /// u[n]..u[n-3] [Q4 ns]
    outputs: [i32; 4],
}

impl Compensator {
    pub const fn new() -> Self {
        Self {
            errors: [0; 4],
            outputs: [0; 4],
        }
    }

    /// Evaluate one step with `error` as e[n]
    ///
    /// The result is clamped to `[period_min_q4, period_max_q4]` and stored as
    /// u[n]; history is not shifted until [`Compensator::shift`].
    ///
    /// # Returns
    /// Period command in Q4 ns
    pub fn evaluate(
        &mut self,
        coefficients: &Coefficients,
        error: i32,
        period_min_q4: i32,
        period_max_q4: i32,
    ) -> i32 {
        self.errors[0] = error;

        // b (Q24) * e (10 mV) >> 20 lands in Q4; a (Q24) * u (Q4) >> 24 stays Q4
        let forward = coefficients
            .b
            .iter()
            .zip(self.errors.iter())
            .fold(0i64, |acc, (b, &e)| acc.saturating_add(b.mul_wide(e as i64)));
        let feedback = coefficients
            .a
            .iter()
            .zip(self.outputs[1..].iter())
            .fold(0i64, |acc, (a, &u)| acc.saturating_add(a.mul_wide(u as i64)));

        let unclamped = saturate((forward >> 20).saturating_add(feedback >> 24));
        let output = if unclamped > period_max_q4 {
            period_max_q4
        } else if unclamped < period_min_q4 {
            period_min_q4
        } else {
            unclamped
        };
        self.outputs[0] = output;
        output
    }

    /// Load every output tap with `period_q4` and clear the error taps
    pub fn reset(&mut self, period_q4: i32) {
        self.errors = [0; 4];
        self.outputs = [period_q4; 4];
    }

    /// Age the history by one sample
    pub fn shift(&mut self) {
        self.errors.copy_within(0..3, 1);
        self.outputs.copy_within(0..3, 1);
    }

    pub fn errors(&self) -> &[i32; 4] {
        &self.errors
    }

    pub fn outputs(&self) -> &[i32; 4] {
        &self.outputs
    }
}

impl Default for Compensator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_Q4: i32 = 3125 << 4;
    const MAX_Q4: i32 = 14084 << 4;

    fn integrator() -> Coefficients {
        // u[n] = u[n-1] + e[n] (in Q4 ns per 10 mV after the >> 20)
        Coefficients::from_f32([1.0 / 16.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0])
    }

    #[test]
    fn test_holds_period_at_zero_error() {
        let mut comp = Compensator::new();
        comp.reset(5000 << 4);
        for _ in 0..10 {
            let u = comp.evaluate(&integrator(), 0, MIN_Q4, MAX_Q4);
            assert_eq!(u, 5000 << 4);
            comp.shift();
        }
    }

    #[test]
    fn test_integrates_positive_error() {
        let mut comp = Compensator::new();
        comp.reset(5000 << 4);
        // b0 = 2^20 (Q24 of 1/16), e = 16 -> +16 in Q4 = +1 ns per step
        let u = comp.evaluate(&integrator(), 16, MIN_Q4, MAX_Q4);
        assert_eq!(u, (5000 << 4) + 16);
        comp.shift();
        let u = comp.evaluate(&integrator(), 16, MIN_Q4, MAX_Q4);
        assert_eq!(u, (5000 << 4) + 32);
    }

    #[test]
    fn test_output_clamped_to_period_range() {
        let mut comp = Compensator::new();
        comp.reset(MAX_Q4);
        let u = comp.evaluate(&integrator(), 150, MIN_Q4, MAX_Q4);
        assert_eq!(u, MAX_Q4);
        comp.reset(MIN_Q4);
        let u = comp.evaluate(&integrator(), -150, MIN_Q4, MAX_Q4);
        assert_eq!(u, MIN_Q4);
    }

    #[test]
    fn test_shift_ages_history() {
        let mut comp = Compensator::new();
        comp.reset(MIN_Q4);
        comp.evaluate(&integrator(), 7, MIN_Q4, MAX_Q4);
        comp.shift();
        assert_eq!(comp.errors()[1], 7);
        comp.evaluate(&integrator(), 9, MIN_Q4, MAX_Q4);
        comp.shift();
        assert_eq!(comp.errors()[1], 9);
        assert_eq!(comp.errors()[2], 7);
    }

    #[test]
    fn test_reset_clears_errors_and_loads_outputs() {
        let mut comp = Compensator::new();
        comp.evaluate(&integrator(), 100, MIN_Q4, MAX_Q4);
        comp.shift();
        comp.reset(6896 << 4);
        assert_eq!(comp.errors(), &[0; 4]);
        assert_eq!(comp.outputs(), &[6896 << 4; 4]);
    }
}

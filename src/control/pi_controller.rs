// Fixed-point PI controller with anti-windup and output limiting

use crate::fixed::{limit, saturate};

/// Discrete form of the PI law
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PiForm {
    /// `u = kp*e + integral`, integral corrected by the anti-windup policy
    Positional,
    /// `u += b0*e + b1*e_prev`, output clamped only
    Incremental,
}

/// What the positional form does with the integrator while the output is
/// clamped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AntiWindup {
    /// Skip the integrator increment for the clamped cycle
    Clamp,
    /// Pull the integrator back by the amount the output overshot the limit
    BackCalculation,
}

/// PI controller on scaled integers
///
/// Gains carry `frac` fractional bits. The positional integrator is kept at
/// the same resolution so that small `ki * e` products still accumulate.
#[derive(Debug, Clone, Copy)]
pub struct PiController {
    /// Proportional gain (Q`frac`)
    kp: i32,
    /// Integral gain (Q`frac`)
    ki: i32,
    frac: u32,
    form: PiForm,
    anti_windup: AntiWindup,
    /// Integral accumulator (Q`frac`, output units)
    integral: i64,
    /// Previous error (incremental form)
    last_error: i32,
    /// Last limited output
    last_output: i32,
    output_min: i32,
    output_max: i32,
}

impl PiController {
    /// Create a new PI controller
    ///
    /// # Arguments
    /// * `kp` - Proportional gain
    /// * `ki` - Integral gain per call
    /// * `frac` - Fractional bits used to represent the gains
    /// * `output_min` - Minimum output limit
    /// * `output_max` - Maximum output limit
    pub fn new(kp: f32, ki: f32, frac: u32, output_min: i32, output_max: i32) -> Self {
        let scale = (1u64 << frac) as f32;
        Self {
            kp: saturate(libm::roundf(kp * scale) as i64),
            ki: saturate(libm::roundf(ki * scale) as i64),
            frac,
            form: PiForm::Positional,
            anti_windup: AntiWindup::Clamp,
            integral: 0,
            last_error: 0,
            last_output: limit(0, output_min, output_max),
            output_min,
            output_max,
        }
    }

    /// Select the discrete form
    pub fn with_form(mut self, form: PiForm) -> Self {
        self.form = form;
        self
    }

    /// Select the anti-windup policy of the positional form
    pub fn with_anti_windup(mut self, anti_windup: AntiWindup) -> Self {
        self.anti_windup = anti_windup;
        self
    }

    /// Run one controller step
    ///
    /// # Arguments
    /// * `error` - Setpoint minus measurement, already clamped by the caller
    ///
    /// # Returns
    /// Controller output, limited to `output_min..=output_max`
    pub fn update(&mut self, error: i32) -> i32 {
        let output = match self.form {
            PiForm::Positional => self.update_positional(error),
            PiForm::Incremental => self.update_incremental(error),
        };
        self.last_output = output;
        output
    }

    fn update_positional(&mut self, error: i32) -> i32 {
        let p_term = self.kp as i64 * error as i64;
        let unclamped = saturate(p_term.saturating_add(self.integral) >> self.frac);
        let mut increment = self.ki as i64 * error as i64;

        let output = if unclamped > self.output_max {
            self.output_max
        } else if unclamped < self.output_min {
            self.output_min
        } else {
            unclamped
        };

        if output != unclamped {
            increment = match self.anti_windup {
                AntiWindup::Clamp => 0,
                AntiWindup::BackCalculation => ((output as i64) - (unclamped as i64)) << self.frac,
            };
        }

        self.integral = self.integral.saturating_add(increment);
        output
    }

    fn update_incremental(&mut self, error: i32) -> i32 {
        // Trapezoidal integration: b0 = kp + ki/2, b1 = -kp + ki/2
        let half_ki = self.ki as i64 / 2;
        let b0 = self.kp as i64 + half_ki;
        let b1 = -(self.kp as i64) + half_ki;
        let delta = (b0 * error as i64 + b1 * self.last_error as i64) >> self.frac;

        self.last_error = error;
        limit(
            saturate(self.last_output as i64 + delta),
            self.output_min,
            self.output_max,
        )
    }

    /// Clear the history; the output parks at zero (or the nearest limit)
    pub fn reset(&mut self) {
        self.integral = 0;
        self.last_error = 0;
        self.last_output = limit(0, self.output_min, self.output_max);
    }

    /// Set the output limits
    ///
    /// # Arguments
    /// * `output_min` - Minimum output limit
    /// * `output_max` - Maximum output limit
    pub fn set_limits(&mut self, output_min: i32, output_max: i32) {
        self.output_min = output_min;
        self.output_max = output_max;
    }

    /// Get the last output
    pub fn get_output(&self) -> i32 {
        self.last_output
    }

    /// Get the integral term in output units
    pub fn get_integral(&self) -> i32 {
        saturate(self.integral >> self.frac)
    }

    pub fn output_min(&self) -> i32 {
        self.output_min
    }

    pub fn output_max(&self) -> i32 {
        self.output_max
    }

    /// Check if the last output sits on a limit
    #[cfg(test)]
    pub fn is_saturated(&self) -> bool {
        self.last_output <= self.output_min || self.last_output >= self.output_max
    }
}

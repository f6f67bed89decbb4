// Dead-time scheduling against switching period
//
// Each curve is a base dead time plus up to two linear segments. A segment
// contributes `(p_k - period) * slope >> 12`, clamped to the span between its
// two breakpoint values, so the sum is continuous and flat outside the
// breakpoints.

use crate::config::{ConfigError, DeadTimeConfig};
use crate::fixed::{limit, period_ns, Q12};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Segment {
    /// Period of the segment's first breakpoint [ns]
    period: i32,
    /// Dead-time change per ns of period (Q12)
    slope: Q12,
    /// Contribution bounds [ns]
    min: i32,
    max: i32,
}

/// Piecewise-linear dead time over switching period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadTimeCurve {
    /// Dead time at the shortest period [ns]
    base: i32,
    segments: [Segment; 2],
    segment_count: usize,
}

impl DeadTimeCurve {
    /// Build a curve from (frequency [Hz], dead time [ns]) breakpoints,
    /// ordered by falling frequency
    ///
    /// # Arguments
    /// * `points` - Two or three breakpoints
    pub fn from_breakpoints(points: &[(u32, i32)]) -> Result<Self, ConfigError> {
        if !(2..=3).contains(&points.len()) {
            return Err(ConfigError::DeadTimeBreakpoints);
        }

        let mut segments = [Segment::default(); 2];
        for (segment, pair) in segments.iter_mut().zip(points.windows(2)) {
            let (f1, dt1) = pair[0];
            let (f2, dt2) = pair[1];
            let p1 = period_ns(f1);
            let p2 = period_ns(f2);
            if p2 <= p1 {
                return Err(ConfigError::DeadTimeBreakpoints);
            }
            let span = dt2 - dt1;
            *segment = Segment {
                period: p1,
                slope: Q12::from_f32((dt1 - dt2) as f32 / (p2 - p1) as f32),
                min: span.min(0),
                max: span.max(0),
            };
        }

        Ok(Self {
            base: points[0].1,
            segments,
            segment_count: points.len() - 1,
        })
    }

    /// Dead time [ns] for a switching period [ns]
    pub fn evaluate(&self, period: i32) -> i32 {
        self.segments[..self.segment_count]
            .iter()
            .fold(self.base, |dead_time, s| {
                let contribution = s.slope.mul(s.period - period);
                dead_time + limit(contribution, s.min, s.max)
            })
    }

    /// Largest value the curve can produce
    pub fn max_value(&self) -> i32 {
        self.base
            + self.segments[..self.segment_count]
                .iter()
                .map(|s| s.max)
                .sum::<i32>()
    }
}

/// Dead times handed to the power stage [ns]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeadTimes {
    /// Primary half-bridge
    pub primary: i32,
    /// Synchronous rectifier turn-on delay
    pub sr_turn_on: i32,
    /// Synchronous rectifier turn-off advance
    pub sr_turn_off: i32,
}

/// The three dead-time curves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadTimeScheduler {
    primary: DeadTimeCurve,
    sr_turn_on: DeadTimeCurve,
    sr_turn_off: DeadTimeCurve,
}

impl DeadTimeScheduler {
    pub fn new(config: &DeadTimeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            primary: DeadTimeCurve::from_breakpoints(&config.primary)?,
            sr_turn_on: DeadTimeCurve::from_breakpoints(&config.sr_turn_on)?,
            sr_turn_off: DeadTimeCurve::from_breakpoints(&config.sr_turn_off)?,
        })
    }

    /// Dead times for the present switching period [ns]
    pub fn schedule(&self, period: i32) -> DeadTimes {
        DeadTimes {
            primary: self.primary.evaluate(period),
            sr_turn_on: self.sr_turn_on.evaluate(period),
            sr_turn_off: self.sr_turn_off.evaluate(period),
        }
    }

    /// Widest dead times, used while the stage is off
    pub fn safe(&self) -> DeadTimes {
        DeadTimes {
            primary: self.primary.max_value(),
            sr_turn_on: self.sr_turn_on.max_value(),
            sr_turn_off: self.sr_turn_off.max_value(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> DeadTimeScheduler {
        DeadTimeScheduler::new(&DeadTimeConfig::default()).unwrap()
    }

    #[test]
    fn test_primary_endpoints() {
        let s = scheduler();
        // 200 kHz = 5000 ns, 120 kHz = 8333 ns
        assert_eq!(s.schedule(3125).primary, 200);
        assert_eq!(s.schedule(5000).primary, 200);
        assert_eq!(s.schedule(8333).primary, 160);
        assert_eq!(s.schedule(14084).primary, 160);
    }

    #[test]
    fn test_primary_interpolates() {
        let s = scheduler();
        let mid = s.schedule(6666).primary;
        assert!((179..=181).contains(&mid));
    }

    #[test]
    fn test_sr_turn_on_two_segments() {
        let s = scheduler();
        assert_eq!(s.schedule(3125).sr_turn_on, 450);
        assert_eq!(s.schedule(3333).sr_turn_on, 450);
        // 220 kHz = 4545 ns, 115 kHz = 8695 ns
        let at_second = s.schedule(4545).sr_turn_on;
        assert!((79..=81).contains(&at_second));
        let at_last = s.schedule(8695).sr_turn_on;
        assert!((49..=51).contains(&at_last));
        assert_eq!(s.schedule(14084).sr_turn_on, 50);
    }

    #[test]
    fn test_sr_turn_off_rises_with_period() {
        let s = scheduler();
        assert_eq!(s.schedule(5000).sr_turn_off, 200);
        let mut previous = 0;
        for period in (8000..=14084).step_by(100) {
            let dt = s.schedule(period).sr_turn_off;
            assert!(dt >= previous);
            previous = dt;
        }
        assert!((3249..=3251).contains(&s.schedule(14084).sr_turn_off));
    }

    #[test]
    fn test_continuous_at_breakpoints() {
        let s = scheduler();
        let breakpoints = [5000, 8333, 3333, 4545, 8695, 8000, 11764, 14084];
        for &p in breakpoints.iter() {
            let below = s.schedule(p - 1);
            let above = s.schedule(p + 1);
            let at = s.schedule(p);
            for (a, b) in [
                (below.primary, at.primary),
                (at.primary, above.primary),
                (below.sr_turn_on, at.sr_turn_on),
                (at.sr_turn_on, above.sr_turn_on),
                (below.sr_turn_off, at.sr_turn_off),
                (at.sr_turn_off, above.sr_turn_off),
            ] {
                assert!((a - b).abs() <= 1, "jump at {} ns: {} vs {}", p, a, b);
            }
        }
    }

    #[test]
    fn test_safe_dead_times_are_the_widest() {
        let s = scheduler();
        let safe = s.safe();
        assert_eq!(safe.primary, 200);
        assert_eq!(safe.sr_turn_on, 450);
        assert_eq!(safe.sr_turn_off, 200 + 2000 + 1050);
    }

    #[test]
    fn test_rejects_single_breakpoint() {
        assert_eq!(
            DeadTimeCurve::from_breakpoints(&[(100_000, 100)]),
            Err(ConfigError::DeadTimeBreakpoints)
        );
    }
}

// Synchronized start-up over the share bus
//
// Parallel units agree on a common power-up instant: a unit that is ready
// to start pulls the share bus up with a fixed current pulse, and every
// unit that sees the pulse (or sees the output already rising) reports
// start-up ready. Runs in the housekeeping step.

use crate::config::SyncStartConfig;
use crate::fixed::centi;

/// Protocol phase, derived from the protocol flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncPhase {
    Idle,
    /// Pulse or rising output seen on the bus
    PulseDetected,
    /// Own stabilization delay expired
    StartReady,
    /// Driving the start-up pulse onto the bus
    PulseGenerating,
}

/// Housekeeping inputs of the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncInputs {
    /// Converter enable flag
    pub enable: bool,
    /// Share bus sense [10 mA]
    pub bus: i32,
    /// External output voltage [10 mV]
    pub output_voltage: i32,
    /// Unit is in standby, waiting for the start command
    pub standby: bool,
}

pub struct SyncStartup {
    enabled: bool,
    pulse_detect_current: i32,
    pulse_current: i32,
    bypass_voltage: i32,
    detect_delay: u16,
    pulse_ticks: u16,
    start_delay: u16,

    detect_counter: u16,
    delay_counter: u16,
    pulse_counter: u16,
    start_up: bool,
    start_ready: bool,
    sequence: bool,
}

impl SyncStartup {
    /// # Arguments
    /// * `config` - Protocol thresholds and timings
    /// * `enabled` - Units are wired for synchronization; without it the
    ///   unit is always ready and never drives a pulse
    pub fn new(config: &SyncStartConfig, enabled: bool) -> Self {
        Self {
            enabled,
            pulse_detect_current: centi(config.pulse_detect_current),
            pulse_current: centi(config.pulse_current),
            bypass_voltage: centi(config.bypass_voltage),
            detect_delay: config.detect_delay_ticks,
            pulse_ticks: config.pulse_ticks,
            start_delay: config.start_delay_ticks,
            detect_counter: 0,
            delay_counter: 0,
            pulse_counter: 0,
            start_up: !enabled,
            start_ready: false,
            sequence: false,
        }
    }

    /// Run one housekeeping tick
    ///
    /// # Returns
    /// Share bus drive for the start-up pulse [10 mA], while it is generated
    pub fn step(&mut self, inputs: &SyncInputs) -> Option<i32> {
        if !self.enabled {
            self.start_up = true;
            self.sequence = false;
            return None;
        }

        let was_generating = self.sequence;
        let drive = if inputs.enable {
            self.step_running()
        } else {
            self.step_waiting(inputs)
        };

        match (was_generating, self.sequence) {
            (false, true) => info!("sync start pulse on"),
            (true, false) => info!("sync start pulse off"),
            _ => {}
        }
        drive
    }

    fn step_waiting(&mut self, inputs: &SyncInputs) -> Option<i32> {
        // Pulse detection with an up/down counter
        if inputs.bus > self.pulse_detect_current || inputs.output_voltage > self.bypass_voltage {
            if self.detect_counter > self.detect_delay {
                self.start_up = true;
            } else {
                self.detect_counter += 1;
            }
        } else {
            self.start_up = false;
            self.detect_counter = self.detect_counter.saturating_sub(1);
        }

        // Stabilization delay while in standby
        if inputs.standby {
            if self.delay_counter > self.start_delay {
                self.start_ready = true;
            } else {
                self.delay_counter += 1;
            }
        } else {
            self.start_ready = false;
            self.delay_counter = 0;
        }

        // Output already up: the pulse is bypassed
        if self.start_ready && inputs.output_voltage < self.bypass_voltage {
            self.sequence = true;
            Some(self.pulse_current)
        } else {
            self.pulse_counter = 0;
            self.sequence = false;
            None
        }
    }

    fn step_running(&mut self) -> Option<i32> {
        if self.sequence && self.pulse_counter < self.pulse_ticks {
            self.pulse_counter += 1;
        } else {
            self.sequence = false;
            self.pulse_counter = 0;
        }
        self.detect_counter = 0;
        self.delay_counter = 0;
        self.start_ready = false;
        None
    }

    /// Start-up ready, published to the power-up sequencing
    pub fn start_up(&self) -> bool {
        self.start_up
    }

    /// The start-up pulse owns the share bus
    pub fn sequence_active(&self) -> bool {
        self.sequence
    }

    pub fn phase(&self) -> SyncPhase {
        if self.sequence {
            SyncPhase::PulseGenerating
        } else if self.start_ready {
            SyncPhase::StartReady
        } else if self.start_up {
            SyncPhase::PulseDetected
        } else {
            SyncPhase::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync() -> SyncStartup {
        SyncStartup::new(&SyncStartConfig::default(), true)
    }

    fn waiting(bus: i32, output_voltage: i32, standby: bool) -> SyncInputs {
        SyncInputs {
            enable: false,
            bus,
            output_voltage,
            standby,
        }
    }

    #[test]
    fn test_without_wiring_always_ready() {
        let mut s = SyncStartup::new(&SyncStartConfig::default(), false);
        assert!(s.start_up());
        assert_eq!(s.step(&waiting(0, 0, true)), None);
        assert!(s.start_up());
        assert!(!s.sequence_active());
    }

    #[test]
    fn test_pulse_detection_needs_consecutive_ticks() {
        let mut s = sync();
        // Counter must exceed the 10 tick delay
        for _ in 0..11 {
            s.step(&waiting(4000, 0, false));
            assert!(!s.start_up());
        }
        s.step(&waiting(4000, 0, false));
        assert!(s.start_up());
        assert_eq!(s.phase(), SyncPhase::PulseDetected);

        // Bus drops: flag clears at once, counter decays
        s.step(&waiting(0, 0, false));
        assert!(!s.start_up());
        assert_eq!(s.phase(), SyncPhase::Idle);
        s.step(&waiting(4000, 0, false));
        assert!(!s.start_up());
        s.step(&waiting(4000, 0, false));
        assert!(s.start_up());
    }

    #[test]
    fn test_rising_output_counts_as_pulse() {
        let mut s = sync();
        for _ in 0..12 {
            s.step(&waiting(0, 4500, false));
        }
        assert!(s.start_up());
    }

    #[test]
    fn test_pulse_after_start_delay() {
        let mut s = sync();
        for _ in 0..4001 {
            assert_eq!(s.step(&waiting(0, 0, true)), None);
        }
        assert_eq!(s.step(&waiting(0, 0, true)), Some(6000));
        assert_eq!(s.phase(), SyncPhase::PulseGenerating);
        assert!(s.sequence_active());

        // Leaving standby cancels the pending pulse
        assert_eq!(s.step(&waiting(0, 0, false)), None);
        assert!(!s.sequence_active());
    }

    #[test]
    fn test_pulse_bypassed_when_output_is_up() {
        let mut s = sync();
        for _ in 0..5000 {
            assert_eq!(s.step(&waiting(0, 4500, true)), None);
        }
        assert_eq!(s.phase(), SyncPhase::StartReady);
    }

    #[test]
    fn test_pulse_ends_after_its_length() {
        let mut s = sync();
        for _ in 0..4002 {
            s.step(&waiting(0, 0, true));
        }
        assert!(s.sequence_active());

        let running = SyncInputs {
            enable: true,
            ..Default::default()
        };
        for _ in 0..20 {
            s.step(&running);
            assert!(s.sequence_active());
        }
        s.step(&running);
        assert!(!s.sequence_active());
        assert_eq!(s.phase(), SyncPhase::Idle);
    }
}

// Operating mode flags of the voltage loop

use crate::config::LightLoadMode;

/// Independently settable mode flags
///
/// Soft-start and the light-load sub-modes only carry meaning while the
/// converter is enabled; [`ModeFlags::clear`] drops all of them at disable
/// and [`ModeFlags::arm`] sets up the start-up combination on enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeFlags {
    soft_start: bool,
    burst: bool,
    pwm: bool,
    current_limit: bool,
    ct_ocp: bool,
    ct_ocp_reported: bool,
    burst_timeout: bool,
}

impl ModeFlags {
    pub const fn new() -> Self {
        Self {
            soft_start: false,
            burst: false,
            pwm: false,
            current_limit: false,
            ct_ocp: false,
            ct_ocp_reported: false,
            burst_timeout: false,
        }
    }

    /// Flags for the first enabled cycle
    pub fn arm(&mut self, light_load: LightLoadMode) {
        *self = Self::new();
        self.soft_start = true;
        match light_load {
            LightLoadMode::Pwm => self.pwm = true,
            LightLoadMode::Burst => self.burst = true,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn soft_start(&self) -> bool {
        self.soft_start
    }

    pub fn set_soft_start(&mut self, active: bool) {
        self.soft_start = active;
    }

    pub fn burst(&self) -> bool {
        self.burst
    }

    pub fn set_burst(&mut self, active: bool) {
        self.burst = active;
    }

    pub fn pwm(&self) -> bool {
        self.pwm
    }

    pub fn set_pwm(&mut self, active: bool) {
        self.pwm = active;
    }

    pub fn current_limit(&self) -> bool {
        self.current_limit
    }

    pub fn set_current_limit(&mut self, active: bool) {
        self.current_limit = active;
    }

    /// CT over-current caught by the delayed hardware protection
    pub fn ct_ocp(&self) -> bool {
        self.ct_ocp
    }

    pub fn set_ct_ocp(&mut self, active: bool) {
        self.ct_ocp = active;
    }

    /// CT over-current handed to the fault monitor (latch policy)
    pub fn ct_ocp_reported(&self) -> bool {
        self.ct_ocp_reported
    }

    pub fn set_ct_ocp_reported(&mut self, active: bool) {
        self.ct_ocp_reported = active;
    }

    pub fn burst_timeout(&self) -> bool {
        self.burst_timeout
    }

    pub fn set_burst_timeout(&mut self, active: bool) {
        self.burst_timeout = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_sets_start_up_flags() {
        let mut flags = ModeFlags::new();
        flags.set_current_limit(true);
        flags.arm(LightLoadMode::Pwm);
        assert!(flags.soft_start());
        assert!(flags.pwm());
        assert!(!flags.burst());
        assert!(!flags.current_limit());

        flags.arm(LightLoadMode::Burst);
        assert!(flags.burst());
        assert!(!flags.pwm());
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut flags = ModeFlags::new();
        flags.arm(LightLoadMode::Burst);
        flags.set_ct_ocp(true);
        flags.set_burst_timeout(true);
        flags.clear();
        assert_eq!(flags, ModeFlags::default());
    }
}

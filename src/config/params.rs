//! Production calibration of the LLC stage (default values)
//!
//! Physical units are noted per constant. The loops run on 10 mV / 10 mA
//! integers; conversion happens once when the controller is built.

/// Fast control interrupt rate [Hz]
pub const DEFAULT_CONTROL_FREQUENCY_HZ: f32 = 60_000.0;

/// Housekeeping rate [Hz] (200 us)
pub const DEFAULT_HOUSEKEEPING_FREQUENCY_HZ: f32 = 5_000.0;

/// Output voltage at zero load [V]
pub const DEFAULT_ZERO_LOAD_VOLTAGE: f32 = 54.5;

/// Output voltage at the rated load [V]
pub const DEFAULT_FULL_LOAD_VOLTAGE: f32 = 53.5;

/// Rated load current [A]
pub const DEFAULT_FULL_LOAD_CURRENT: f32 = 74.07;

/// Output voltage at the overload current [V]
pub const DEFAULT_OVERLOAD_VOLTAGE: f32 = 52.5;

/// Overload current [A]
pub const DEFAULT_OVERLOAD_CURRENT: f32 = 148.14;

/// Measurement front end
pub mod measurement {
    /// Weight of the previous filtered current sample
    pub const DEFAULT_CURRENT_FILTER_OLD: f32 = 0.5;

    /// Weight of the new raw current sample
    pub const DEFAULT_CURRENT_FILTER_NEW: f32 = 0.5;

    /// External-sense to internal-sense difference where feedback fully
    /// hands over to the internal sense [V]
    pub const DEFAULT_SENSE_TRANSITION_VOLTAGE: f32 = 4.0;

    /// Raw output current above which the error clamp narrows [A]
    pub const DEFAULT_HIGH_CURRENT_THRESHOLD: f32 = 80.0;
}

/// Voltage/frequency compensator
pub mod voltage_loop {
    /// Soft-start ramp duration at zero load [s]
    pub const DEFAULT_SOFT_START_TIME_ZERO_LOAD: f32 = 0.100;

    /// Soft-start ramp duration at rated load [s]
    pub const DEFAULT_SOFT_START_TIME_FULL_LOAD: f32 = 0.250;

    /// Soft-start coefficients (b0..b3, a1..a3)
    pub const DEFAULT_SOFT_START_B: [f32; 4] = [1.133263, -0.941044, 0.0, 0.0];
    pub const DEFAULT_SOFT_START_A: [f32; 3] = [1.0, 0.0, 0.0];

    /// Regulation coefficients (b0..b3, a1..a3)
    pub const DEFAULT_REGULATION_B: [f32; 4] = [5.029079, -4.293651, -5.002460, 4.320270];
    pub const DEFAULT_REGULATION_A: [f32; 3] = [1.052857, 0.854358, -0.907215];

    /// Voltage error clamp [V]
    pub const DEFAULT_MAX_ERROR: f32 = 1.5;
    pub const DEFAULT_MIN_ERROR: f32 = -1.5;

    /// Upper error clamp while the raw current is above the high-current threshold [V]
    pub const DEFAULT_MAX_ERROR_HIGH_CURRENT: f32 = 0.9;

    /// Highest switching frequency [Hz]
    pub const DEFAULT_MAX_FREQUENCY: u32 = 320_000;

    /// Lowest switching frequency [Hz]
    pub const DEFAULT_MIN_FREQUENCY: u32 = 71_000;

    /// Frequency forced by OVP and CT-OCP [Hz]
    pub const DEFAULT_PROTECTION_FREQUENCY: u32 = 145_000;
}

/// Constant-current limiter
pub mod current_limit {
    pub const DEFAULT_KP: f32 = 0.4;
    pub const DEFAULT_KI: f32 = 0.01;

    /// Current limits [A]
    pub const DEFAULT_SOFT_START_LOW_LINE: f32 = 80.0;
    pub const DEFAULT_REGULATION_LOW_LINE: f32 = 85.0;
    pub const DEFAULT_SOFT_START_HIGH_LINE: f32 = 120.0;
    pub const DEFAULT_REGULATION_HIGH_LINE: f32 = 160.0;

    /// Largest reference correction the limiter may add [V]
    pub const DEFAULT_MAX_ADJUST: f32 = 0.0;
}

/// Light-load PWM sub-mode
pub mod pwm_mode {
    pub const DEFAULT_KP: f32 = 100.0;
    pub const DEFAULT_KI: f32 = 4.0;

    /// Error clamp ahead of the duty controller [V]
    pub const DEFAULT_MAX_ERROR: f32 = 5.0;
    pub const DEFAULT_MIN_ERROR: f32 = -5.0;

    /// Switching frequency while soft-starting from zero output [Hz]
    pub const DEFAULT_SOFT_START_FREQUENCY: u32 = 300_000;

    /// Switching frequency at rated output voltage [Hz]
    pub const DEFAULT_FREQUENCY: u32 = 150_000;

    /// Duty limits (fraction of the period)
    pub const DEFAULT_MAX_DUTY: f32 = 0.5;
    pub const DEFAULT_MIN_DUTY: f32 = 0.0;
}

/// Light-load burst sub-mode
pub mod burst {
    /// Switching frequency inside a burst [Hz]
    pub const DEFAULT_FREQUENCY: u32 = 275_000;

    /// Commanded frequency above which voltage burst may start [Hz]
    pub const DEFAULT_ENTRY_FREQUENCY: u32 = 265_000;

    /// Frequency burst during soft-start: pulse frequency [Hz]
    pub const DEFAULT_SOFT_START_FREQUENCY: u32 = 320_000;

    /// Frequency burst during soft-start: entry frequency [Hz]
    pub const DEFAULT_SOFT_START_ENTRY_FREQUENCY: u32 = 300_000;

    /// Load current hysteresis [A]
    pub const DEFAULT_ENTRY_CURRENT: f32 = 3.5;
    pub const DEFAULT_EXIT_CURRENT: f32 = 4.0;

    /// Error below which the turn-on threshold moves up [V]
    pub const DEFAULT_ERROR_OFFSET: f32 = 0.0;

    /// Travel of the turn-on threshold [V]
    pub const DEFAULT_THRESHOLD_FLOOR: f32 = 0.1;
    pub const DEFAULT_THRESHOLD_CEILING: f32 = 0.6;

    /// Timeout counter
    pub const DEFAULT_TIMEOUT_LIMIT: u16 = 1000;
    pub const DEFAULT_TIMEOUT_DECAY: u16 = 100;

    /// Counter increments for the three error ranges (small, medium, large)
    pub const DEFAULT_TIMEOUT_STEPS: [u16; 3] = [10, 200, 300];

    /// Lower edge of each error range above the threshold [V]
    pub const DEFAULT_TIMEOUT_ERRORS: [f32; 3] = [0.0, 0.3, 0.5];
}

/// Dead-time curves: (switching frequency [Hz], dead time [ns]) breakpoints
pub mod dead_time {
    pub const DEFAULT_PRIMARY: [(u32, i32); 2] = [(200_000, 200), (120_000, 160)];
    pub const DEFAULT_SR_TURN_ON: [(u32, i32); 3] = [(300_000, 450), (220_000, 80), (115_000, 50)];
    pub const DEFAULT_SR_TURN_OFF: [(u32, i32); 3] =
        [(125_000, 200), (85_000, 2200), (71_000, 3250)];
}

/// Twice-line ripple cancellation
pub mod ripple {
    pub const DEFAULT_GAIN: f32 = 3.0;

    /// Input and output clamp [V]
    pub const DEFAULT_INPUT_LIMIT: f32 = 0.5;
    pub const DEFAULT_OUTPUT_LIMIT: f32 = 0.5;
}

/// Active current share
pub mod acs {
    pub const DEFAULT_KP: f32 = 0.01;
    pub const DEFAULT_KI: f32 = 0.0005;

    /// Bus error clamp [A]
    pub const DEFAULT_MAX_BUS_ERROR: f32 = 10.0;

    /// Reference adjustment bounds [V]
    pub const DEFAULT_MAX_ADJUST: f32 = 0.5;
    pub const DEFAULT_MIN_ADJUST: f32 = 0.0;

    /// Bound of the slow feed-forward compensation [A]
    pub const DEFAULT_MAX_COMPENSATION: f32 = 5.0;

    /// Offset added to the bus error; negative keeps the bus at or below
    /// the local reading [A]
    pub const DEFAULT_BUS_OFFSET: f32 = -1.0;
}

/// Synchronized start-up over the share bus
pub mod sync_start {
    /// Bus current read as a start pulse from another unit [A]
    pub const DEFAULT_PULSE_DETECT_CURRENT: f32 = 30.0;

    /// Bus drive while generating the pulse [A]
    pub const DEFAULT_PULSE_CURRENT: f32 = 60.0;

    /// Output voltage above which the pulse is skipped [V]
    pub const DEFAULT_BYPASS_VOLTAGE: f32 = 40.0;

    /// Timing in housekeeping ticks (5 ticks per ms)
    pub const DEFAULT_DETECT_DELAY_TICKS: u16 = 2 * 5;
    pub const DEFAULT_PULSE_TICKS: u16 = 4 * 5;
    pub const DEFAULT_START_DELAY_TICKS: u16 = 800 * 5;
}

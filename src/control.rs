// Voltage/frequency control path
// Compensator, reference correction and mode arbitration for the LLC stage

pub mod compensator;
pub mod current_limit;
pub mod dead_time;
pub mod light_load;
pub mod mode;
pub mod pi_controller;
pub mod ripple_filter;
pub mod voltage_loop;

// Re-export main types for easier access
pub use compensator::{Coefficients, Compensator};
pub use current_limit::{CurrentLimiter, LineClass};
pub use dead_time::{DeadTimeScheduler, DeadTimes};
pub use light_load::DUTY_HALF;
pub use mode::ModeFlags;
pub use pi_controller::{AntiWindup, PiController, PiForm};
pub use ripple_filter::RippleFilter;
pub use voltage_loop::{LoopInputs, LoopOutput, Protection, VoltageLoop};

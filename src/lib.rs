//! Secondary-side control core for an LLC resonant DC-DC converter
//!
//! The crate is hardware independent: the firmware samples the ADC,
//! calls [`LlcConverter::fast_step`] from the control interrupt and
//! [`LlcConverter::slow_step`] from the housekeeping tick, and writes the
//! resulting [`PwmCommand`] through its [`PowerStage`] implementation.
//!
//! Units throughout: voltages in 10 mV, currents in 10 mA, periods and
//! dead times in ns, duty in Q16 of the period.

#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod config;
pub mod control;
pub mod converter;
pub mod fixed;
pub mod measurement;
pub mod share;

pub use config::{ConfigError, Features, LightLoadMode, LlcConfig};
pub use control::{DeadTimes, LineClass, ModeFlags, PiForm};
pub use converter::{FastInputs, LlcConverter, LlcStatus, PowerStage, PwmCommand, SlowInputs};
pub use measurement::{Calibration, RawSamples};
pub use share::SyncPhase;

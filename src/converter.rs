//! Per-cycle orchestration
//!
//! [`LlcConverter`] owns every component and runs them in a fixed order.
//! The fast step runs once per control interrupt: measurement, current
//! share, voltage loop, dead times, driver write and CT over-current
//! release. The slow step runs from the housekeeping tick and only feeds
//! values the fast step picks up on its next cycles.

use crate::config::{ConfigError, LlcConfig};
use crate::control::{
    DeadTimeScheduler, DeadTimes, LineClass, LoopInputs, ModeFlags, RippleFilter, VoltageLoop,
};
use crate::measurement::{Calibration, Measurement, MeasurementAdapter, RawSamples};
use crate::share::{AcsInputs, AcsLoop, SyncInputs, SyncPhase, SyncStartup};

/// Voltage-error samples averaged for telemetry (power of two)
const ERROR_AVERAGE_SHIFT: u32 = 12;

/// Command written to the power stage every fast cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmCommand {
    /// Switching period [ns]
    pub period: i32,
    /// Duty cycle (Q16, 0.5 = 32768)
    pub duty: i32,
    pub dead_times: DeadTimes,
}

/// Output driver seam
///
/// Implemented by the firmware over the timer peripheral and by test
/// doubles on the host. The stage is expected to start with its outputs
/// off.
pub trait PowerStage {
    /// Commit period, duty and dead times
    fn apply(&mut self, command: &PwmCommand);

    /// Switch the gate drive outputs
    fn set_outputs_enabled(&mut self, enabled: bool);

    /// Re-arm the delayed CT over-current protection
    fn clear_ct_trip(&mut self);

    /// Drive the current-share bus [10 mA]
    fn set_share_bus(&mut self, drive: i32);
}

/// Inputs sampled every fast cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FastInputs {
    pub samples: RawSamples,
    /// Local current-share sense [10 mA]
    pub share_local: i32,
    /// Current-share bus sense [10 mA]
    pub share_bus: i32,
    pub enable: bool,
    pub over_voltage: bool,
    /// Delayed CT over-current protection has tripped
    pub ct_trip: bool,
    /// Peak current comparator still reports over-current
    pub ct_comparator_active: bool,
}

/// Inputs of the housekeeping step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowInputs {
    pub line: LineClass,
    /// Line frequency [100 mHz]
    pub line_frequency: u16,
    pub calibration: Calibration,
    /// Unit waits in standby for the start command
    pub standby: bool,
}

impl Default for SlowInputs {
    fn default() -> Self {
        Self {
            line: LineClass::Low,
            line_frequency: 0,
            calibration: Calibration::default(),
            standby: false,
        }
    }
}

/// Status published by the housekeeping step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LlcStatus {
    pub enabled: bool,
    pub soft_start: bool,
    pub current_limit: bool,
    pub ct_ocp: bool,
    /// CT over-current waiting for the fault monitor to clear it
    pub ct_ocp_reported: bool,
    pub burst_timeout: bool,
    /// Synchronized start-up may proceed
    pub start_up: bool,
    pub sync_phase: SyncPhase,
    /// Voltage reference of the last fast cycle [10 mV]
    pub reference: i32,
    /// Current-share reference trim [10 mV]
    pub share_adjust: i32,
    /// Current-share PI is regulating
    pub share_active: bool,
    /// Slow feed-forward on the share estimate [10 mA]
    pub share_compensation: i32,
    /// Mean voltage error over the last averaging window [10 mV]
    pub error_average: i32,
}

pub struct LlcConverter {
    ocp_latch: bool,
    measurement: MeasurementAdapter,
    voltage_loop: VoltageLoop,
    dead_time: DeadTimeScheduler,
    ripple: Option<RippleFilter>,
    current_share: Option<AcsLoop>,
    sync: SyncStartup,

    // Values handed between the two rates
    ripple_correction: i32,
    share_adjust: i32,
    enable: bool,
    share_bus: i32,

    error_sum: i32,
    error_samples: u32,
    error_average: i32,

    outputs_enabled: bool,
    last_command: PwmCommand,
}

impl LlcConverter {
    /// Validate `config` and build every component
    pub fn new(config: &LlcConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let features = &config.features;

        let current_share = if features.current_share {
            Some(AcsLoop::new(
                &config.acs,
                &config.measurement,
                features.pi_form,
            )?)
        } else {
            None
        };

        let voltage_loop = VoltageLoop::new(config)?;
        let dead_time = DeadTimeScheduler::new(&config.dead_time)?;
        let (period, _) = voltage_loop.period_range();
        let last_command = PwmCommand {
            period,
            duty: voltage_loop.duty_range().0,
            dead_times: dead_time.safe(),
        };

        Ok(Self {
            ocp_latch: features.ocp_latch,
            measurement: MeasurementAdapter::new(&config.measurement, features),
            voltage_loop,
            dead_time,
            ripple: features
                .ripple_filter
                .then(|| RippleFilter::new(&config.ripple)),
            current_share,
            sync: SyncStartup::new(
                &config.sync_start,
                features.sync_start && features.current_share,
            ),
            ripple_correction: 0,
            share_adjust: 0,
            enable: false,
            share_bus: 0,
            error_sum: 0,
            error_samples: 0,
            error_average: 0,
            outputs_enabled: false,
            last_command,
        })
    }

    /// Run one control interrupt
    ///
    /// # Returns
    /// The command committed to `stage`
    pub fn fast_step<S: PowerStage>(&mut self, inputs: &FastInputs, stage: &mut S) -> PwmCommand {
        self.enable = inputs.enable;
        self.share_bus = inputs.share_bus;

        let measurement = self.measurement.update(&inputs.samples);

        // Current share first, so the voltage loop sees this cycle's trim
        self.share_adjust = match self.current_share.as_mut() {
            Some(acs) => {
                let out = acs.step(&AcsInputs {
                    enable: inputs.enable && self.voltage_loop.is_enabled(),
                    soft_start: self.voltage_loop.flags().soft_start(),
                    sync_sequence: self.sync.sequence_active(),
                    local: inputs.share_local,
                    bus: inputs.share_bus,
                    output_current: measurement.iout_raw,
                });
                if let Some(drive) = out.bus_drive {
                    stage.set_share_bus(drive);
                }
                out.adjust
            }
            None => 0,
        };

        if !inputs.enable {
            self.set_outputs(stage, false);
        } else if inputs.ct_trip {
            // Delayed protection has already dropped the outputs in hardware
            self.outputs_enabled = false;
        } else {
            self.set_outputs(stage, true);
        }

        let out = self.voltage_loop.step(&LoopInputs {
            enable: inputs.enable,
            output_voltage: measurement.vout,
            output_current: measurement.iout,
            high_current: measurement.high_current,
            share_adjust: self.share_adjust,
            ripple_correction: self.ripple_correction,
            over_voltage: inputs.over_voltage,
            ct_trip: inputs.ct_trip,
        });

        let dead_times = if inputs.enable {
            self.dead_time.schedule(out.period)
        } else {
            self.dead_time.safe()
        };
        let command = PwmCommand {
            period: out.period,
            duty: out.duty,
            dead_times,
        };
        stage.apply(&command);

        if self.voltage_loop.flags().ct_ocp() && !inputs.ct_comparator_active {
            if self.ocp_latch {
                self.voltage_loop.report_ct_ocp();
            } else {
                stage.clear_ct_trip();
                self.voltage_loop.clear_ct_ocp();
                self.set_outputs(stage, inputs.enable);
                info!("CT over-current released");
            }
        }

        self.last_command = command;
        command
    }

    /// Run one housekeeping tick
    pub fn slow_step<S: PowerStage>(&mut self, inputs: &SlowInputs, stage: &mut S) -> LlcStatus {
        self.measurement.set_calibration(inputs.calibration);
        if let Some(acs) = self.current_share.as_mut() {
            acs.set_calibration(inputs.calibration.share_gain, inputs.calibration.share_offset);
        }

        self.voltage_loop.select_line(inputs.line);

        let error = self.voltage_loop.error();
        if let Some(ripple) = self.ripple.as_mut() {
            ripple.select_band(inputs.line_frequency);
            let hold = self.voltage_loop.flags().soft_start() || !self.voltage_loop.is_enabled();
            self.ripple_correction = ripple.update(error, hold);
        }
        self.error_sum = self.error_sum.saturating_add(error);
        self.error_samples += 1;
        if self.error_samples == 1 << ERROR_AVERAGE_SHIFT {
            self.error_average = self.error_sum >> ERROR_AVERAGE_SHIFT;
            self.error_sum = 0;
            self.error_samples = 0;
        }

        let pulse = self.sync.step(&SyncInputs {
            enable: self.enable,
            bus: self.share_bus,
            output_voltage: self.measurement.last().vout_ext,
            standby: inputs.standby,
        });
        if let Some(drive) = pulse {
            stage.set_share_bus(drive);
        }
        if let Some(acs) = self.current_share.as_mut() {
            acs.compensate();
        }

        self.status()
    }

    /// Fault monitor clears a latched CT over-current
    pub fn clear_ct_ocp_fault<S: PowerStage>(&mut self, stage: &mut S) {
        stage.clear_ct_trip();
        self.voltage_loop.clear_ct_ocp();
        info!("CT over-current fault cleared");
    }

    pub fn status(&self) -> LlcStatus {
        let flags = self.voltage_loop.flags();
        LlcStatus {
            enabled: self.voltage_loop.is_enabled(),
            soft_start: flags.soft_start(),
            current_limit: flags.current_limit(),
            ct_ocp: flags.ct_ocp(),
            ct_ocp_reported: flags.ct_ocp_reported(),
            burst_timeout: flags.burst_timeout(),
            start_up: self.sync.start_up(),
            sync_phase: self.sync.phase(),
            reference: self.voltage_loop.reference(),
            share_adjust: self.share_adjust,
            share_active: self.current_share.as_ref().is_some_and(AcsLoop::is_active),
            share_compensation: self.current_share.as_ref().map_or(0, AcsLoop::compensation),
            error_average: self.error_average,
        }
    }

    fn set_outputs<S: PowerStage>(&mut self, stage: &mut S, enabled: bool) {
        if self.outputs_enabled != enabled {
            stage.set_outputs_enabled(enabled);
            self.outputs_enabled = enabled;
        }
    }

    pub fn flags(&self) -> &ModeFlags {
        self.voltage_loop.flags()
    }

    pub fn voltage_loop(&self) -> &VoltageLoop {
        &self.voltage_loop
    }

    pub fn current_share(&self) -> Option<&AcsLoop> {
        self.current_share.as_ref()
    }

    pub fn ripple_filter(&self) -> Option<&RippleFilter> {
        self.ripple.as_ref()
    }

    pub fn measurement(&self) -> &Measurement {
        self.measurement.last()
    }

    pub fn last_command(&self) -> &PwmCommand {
        &self.last_command
    }
}

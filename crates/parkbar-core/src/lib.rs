//! Hardware-independent core library for parkbar
//!
//! This crate contains all platform-agnostic logic of the parking-space
//! sensor node: Hall-sensor calibration and debouncing, the barrier servo
//! state machine, backend synchronisation with backoff, and the cooperative
//! scheduler that ties them together.
//!
//! It is `no_std` with `extern crate alloc` so it compiles on both the
//! ESP32 firmware and desktop hosts (for the simulator and tests). The core
//! never reads the clock; every time-dependent call takes `now`.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod actuator;
pub mod config;
pub mod scheduler;
pub mod sensors;
pub mod status;
pub mod sync;

#[cfg(test)]
mod mock;

pub use actuator::{ActuatorController, ActuatorError, ActuatorState, BarrierPosition, BarrierServo};
pub use config::{ConfigError, DeviceConfig};
pub use scheduler::{LoopStats, Scheduler};
pub use sensors::{CalibrationProfile, HallSensor, OccupancyState, SensorMonitor};
pub use sync::{Command, CommandKind, SyncAgent, SyncError, TelemetryReport, Transport};

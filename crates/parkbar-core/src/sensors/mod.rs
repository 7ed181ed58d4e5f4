//! Occupancy sensing
//!
//! The bay is watched by an analog Hall sensor. [`calibration`] derives the
//! detection threshold at boot and [`monitor`] turns raw readings into a
//! debounced [`OccupancyState`].

mod calibration;
mod monitor;

pub use calibration::*;
pub use monitor::*;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: read failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: no conversion result in time")]
    Timeout { sensor: &'static str },
}

/// Source of raw Hall readings, typically one ADC channel
pub trait HallSensor {
    /// Take one raw ADC sample.
    fn read_raw(&mut self) -> impl Future<Output = Result<u16, SensorError>>;
}

/// Debounced state of the parking bay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyState {
    /// No stable window has been observed since boot
    #[default]
    Unknown,
    Free,
    Occupied,
}

impl OccupancyState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Free => "free",
            Self::Occupied => "occupied",
        }
    }
}

/// Accepted change of the debounced state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupancyEvent {
    pub from: OccupancyState,
    pub to: OccupancyState,
}

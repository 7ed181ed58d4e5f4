//! Device health inputs and the status LED pattern

use embassy_time::Duration;

use crate::actuator::ActuatorState;

/// Radio and supply readings for telemetry
pub trait HealthProbe {
    /// Signal strength of the current WiFi association in dBm
    fn rssi(&mut self) -> Option<i8>;

    /// Supply or battery voltage
    fn supply_millivolts(&mut self) -> Option<u16>;
}

/// Probe for targets without radio or supply measurement
pub struct NoHealth;

impl HealthProbe for NoHealth {
    fn rssi(&mut self) -> Option<i8> {
        None
    }

    fn supply_millivolts(&mut self) -> Option<u16> {
        None
    }
}

/// What the single status LED shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    /// Running and in contact with the backend
    Solid,
    /// Backend unreachable
    SlowBlink,
    /// Barrier moving
    Pulse,
    /// Barrier faulted, needs a reset
    FastBlink,
    Off,
}

impl LedPattern {
    /// Pattern for the current actuator state and backend link.
    ///
    /// A fault outranks everything else.
    pub fn select(actuator: ActuatorState, backend_reachable: bool) -> Self {
        match actuator {
            ActuatorState::Fault => Self::FastBlink,
            ActuatorState::MovingUp | ActuatorState::MovingDown => Self::Pulse,
            ActuatorState::Up | ActuatorState::Down if !backend_reachable => Self::SlowBlink,
            ActuatorState::Up | ActuatorState::Down => Self::Solid,
        }
    }

    /// On and off durations of one blink period, `None` for a steady LED
    pub const fn timing(self) -> Option<(Duration, Duration)> {
        match self {
            Self::Solid | Self::Off => None,
            Self::SlowBlink => Some((Duration::from_millis(1000), Duration::from_millis(1000))),
            Self::Pulse => Some((Duration::from_millis(300), Duration::from_millis(300))),
            Self::FastBlink => Some((Duration::from_millis(100), Duration::from_millis(100))),
        }
    }

    pub const fn is_lit(self) -> bool {
        !matches!(self, Self::Off)
    }
}

use heapless::Deque;
use log::{debug, info, warn};

use super::{CalibrationProfile, HallSensor, OccupancyEvent, OccupancyState};
use crate::config::SensorPolarity;

/// Number of consecutive agreeing readings needed to accept a new state
pub const DEBOUNCE_WINDOW: usize = 5;

/// Debounced occupancy detection on top of a [`HallSensor`]
///
/// Each [`sample`](Self::sample) classifies one raw reading against the
/// calibration profile and pushes it into a window of the last `WINDOW`
/// classifications. The stable state only changes when the window is full
/// and every entry agrees, so single-sample flicker at the edge of the
/// magnet's field never reaches the backend.
pub struct SensorMonitor<S, const WINDOW: usize = DEBOUNCE_WINDOW> {
    sensor: S,
    profile: CalibrationProfile,
    polarity: SensorPolarity,
    /// Classified readings, `true` = occupied
    window: Deque<bool, WINDOW>,
    state: OccupancyState,
    pending_event: Option<OccupancyEvent>,
    last_raw: Option<u16>,
    read_errors: u32,
}

impl<S, const WINDOW: usize> SensorMonitor<S, WINDOW>
where
    S: HallSensor,
{
    pub fn new(sensor: S, profile: CalibrationProfile, polarity: SensorPolarity) -> Self {
        Self {
            sensor,
            profile,
            polarity,
            window: Deque::new(),
            state: OccupancyState::Unknown,
            pending_event: None,
            last_raw: None,
            read_errors: 0,
        }
    }

    /// Read the sensor once and return the debounced state.
    ///
    /// A failed read is logged and counted but does not enter the window.
    pub async fn sample(&mut self) -> OccupancyState {
        match self.sensor.read_raw().await {
            Ok(raw) => self.record(raw),
            Err(e) => {
                self.read_errors = self.read_errors.saturating_add(1);
                warn!("Hall sensor read failed: {}", e);
            }
        }
        self.state
    }

    fn record(&mut self, raw: u16) {
        self.last_raw = Some(raw);
        let occupied = self.profile.is_occupied(raw, self.polarity);

        if self.window.is_full() {
            self.window.pop_front();
        }
        // Cannot fail, a slot was freed above
        let _ = self.window.push_back(occupied);

        if !self.window.is_full() || !self.window.iter().all(|&o| o == occupied) {
            return;
        }

        let candidate = if occupied {
            OccupancyState::Occupied
        } else {
            OccupancyState::Free
        };

        if candidate != self.state {
            info!(
                "Occupancy {} -> {} (raw {})",
                self.state.label(),
                candidate.label(),
                raw
            );
            self.pending_event = Some(OccupancyEvent {
                from: self.state,
                to: candidate,
            });
            self.state = candidate;
        } else {
            debug!("Occupancy stable: {} (raw {})", self.state.label(), raw);
        }
    }

    /// Take the transition accepted by the most recent sample, if any
    pub fn take_event(&mut self) -> Option<OccupancyEvent> {
        self.pending_event.take()
    }

    pub fn state(&self) -> OccupancyState {
        self.state
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    pub fn last_raw(&self) -> Option<u16> {
        self.last_raw
    }

    pub fn read_errors(&self) -> u32 {
        self.read_errors
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }
}

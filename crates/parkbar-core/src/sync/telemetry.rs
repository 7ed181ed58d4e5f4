use serde::Serialize;

use crate::actuator::ActuatorState;
use crate::sensors::OccupancyState;

/// Size of the buffer a report is encoded into
pub const TELEMETRY_BUFFER_SIZE: usize = 512;

/// Snapshot pushed to the backend every telemetry tick
///
/// Built fresh each time and dropped after the push, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryReport<'a> {
    pub device_id: &'a str,
    pub occupancy: OccupancyState,
    #[serde(rename = "barrier_position")]
    pub actuator_state: ActuatorState,
    /// Milliseconds since boot
    pub timestamp: u64,
    pub rssi: Option<i8>,
    pub supply_mv: Option<u16>,
    pub hall_raw: Option<u16>,
    pub hall_baseline: u16,
    pub hall_threshold: u16,
    pub calibrated: bool,
    pub sensor_errors: u32,
    pub motion_count: u32,
    /// Milliseconds since boot at the end of the last completed motion
    pub last_motion_ms: Option<u64>,
    pub sync_failures: u32,
    pub deferred_commands: u32,
    pub loop_overruns: u32,
}

impl TelemetryReport<'_> {
    /// Encode as JSON into `buf`, returning the encoded length
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, serde_json_core::ser::Error> {
        serde_json_core::to_slice(self, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report() -> TelemetryReport<'static> {
        TelemetryReport {
            device_id: "PARK_DEVICE_001",
            occupancy: OccupancyState::Occupied,
            actuator_state: ActuatorState::MovingUp,
            timestamp: 123_456,
            rssi: Some(-55),
            supply_mv: None,
            hall_raw: Some(520),
            hall_baseline: 300,
            hall_threshold: 500,
            calibrated: true,
            sensor_errors: 0,
            motion_count: 2,
            last_motion_ms: Some(120_000),
            sync_failures: 1,
            deferred_commands: 0,
            loop_overruns: 0,
        }
    }

    #[test]
    fn encodes_backend_field_names() {
        let mut buf = [0u8; TELEMETRY_BUFFER_SIZE];
        let len = sample_report().encode(&mut buf).unwrap();
        let json = core::str::from_utf8(&buf[..len]).unwrap();

        assert!(json.starts_with(r#"{"device_id":"PARK_DEVICE_001","occupancy":"occupied","barrier_position":"moving_up","timestamp":123456,"rssi":-55,"supply_mv":null"#));
        assert!(json.contains(r#""calibrated":true"#));
        assert!(json.contains(r#""motion_count":2,"last_motion_ms":120000,"#));
        assert!(json.ends_with(r#""loop_overruns":0}"#));
    }

    #[test]
    fn small_buffer_is_an_error() {
        let mut buf = [0u8; 32];
        assert!(sample_report().encode(&mut buf).is_err());
    }
}

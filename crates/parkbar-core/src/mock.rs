//! Test doubles for the hardware and network seams

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use embedded_hal_async::delay::DelayNs;

pub use embassy_futures::block_on;

use crate::actuator::BarrierServo;
use crate::sensors::{HallSensor, SensorError};
use crate::status::HealthProbe;
use crate::sync::{Response, Transport, TransportError};

/// Hall sensor replaying a fixed script, then repeating its last good value
pub struct ScriptedHall {
    script: VecDeque<Result<u16, SensorError>>,
    last: u16,
    reads: usize,
}

impl ScriptedHall {
    pub fn new(readings: &[u16]) -> Self {
        Self {
            script: readings.iter().copied().map(Ok).collect(),
            last: readings.first().copied().unwrap_or(0),
            reads: 0,
        }
    }

    pub fn constant(value: u16) -> Self {
        Self::new(&[value])
    }

    pub fn push_error(&mut self, error: SensorError) {
        self.script.push_back(Err(error));
    }

    pub fn reads(&self) -> usize {
        self.reads
    }
}

impl HallSensor for ScriptedHall {
    async fn read_raw(&mut self) -> Result<u16, SensorError> {
        self.reads += 1;
        match self.script.pop_front() {
            Some(Ok(value)) => {
                self.last = value;
                Ok(value)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last),
        }
    }
}

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Servo recording every commanded angle
pub struct MockServo {
    pub angles: Vec<u8>,
    /// When false the servo never confirms reaching its endpoint
    pub confirms: bool,
    pub fail_writes: bool,
}

impl MockServo {
    pub fn new() -> Self {
        Self {
            angles: Vec::new(),
            confirms: true,
            fail_writes: false,
        }
    }

    pub fn stuck() -> Self {
        Self {
            confirms: false,
            ..Self::new()
        }
    }

    pub fn last_angle(&self) -> Option<u8> {
        self.angles.last().copied()
    }
}

#[derive(Debug)]
pub struct ServoWriteFailed;

impl BarrierServo for MockServo {
    type Error = ServoWriteFailed;

    fn set_angle(&mut self, degrees: u8) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(ServoWriteFailed);
        }
        self.angles.push(degrees);
        Ok(())
    }

    fn confirm_position(&mut self, degrees: u8) -> bool {
        self.confirms && self.last_angle() == Some(degrees)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn body_str(&self) -> &str {
        self.body
            .as_deref()
            .and_then(|b| core::str::from_utf8(b).ok())
            .unwrap_or("")
    }
}

/// Transport answering from queued responses
///
/// With an empty queue GETs answer `200 []` and POSTs `200` with no body.
#[derive(Default)]
pub struct MockTransport {
    pub get_responses: VecDeque<Result<Response, TransportError>>,
    pub post_responses: VecDeque<Result<Response, TransportError>>,
    pub requests: Vec<Request>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_get(&mut self, status: u16, body: &str) {
        self.get_responses.push_back(Ok(Response::new(status, body.as_bytes())));
    }

    pub fn queue_get_error(&mut self, error: TransportError) {
        self.get_responses.push_back(Err(error));
    }

    pub fn queue_post(&mut self, status: u16) {
        self.post_responses.push_back(Ok(Response::new(status, b"")));
    }

    pub fn queue_post_error(&mut self, error: TransportError) {
        self.post_responses.push_back(Err(error));
    }

    pub fn posts_to(&self, suffix: &str) -> Vec<&Request> {
        self.requests
            .iter()
            .filter(|r| r.body.is_some() && r.url.ends_with(suffix))
            .collect()
    }
}

impl Transport for MockTransport {
    async fn get(
        &mut self,
        url: &str,
        _timeout: embassy_time::Duration,
    ) -> Result<Response, TransportError> {
        self.requests.push(Request {
            url: url.into(),
            body: None,
        });
        self.get_responses
            .pop_front()
            .unwrap_or_else(|| Ok(Response::new(200, b"[]")))
    }

    async fn post(
        &mut self,
        url: &str,
        body: &[u8],
        _timeout: embassy_time::Duration,
    ) -> Result<Response, TransportError> {
        self.requests.push(Request {
            url: url.into(),
            body: Some(body.to_vec()),
        });
        self.post_responses
            .pop_front()
            .unwrap_or_else(|| Ok(Response::new(200, b"")))
    }
}

pub struct FixedHealth {
    pub rssi: Option<i8>,
    pub supply_mv: Option<u16>,
}

impl HealthProbe for FixedHealth {
    fn rssi(&mut self) -> Option<i8> {
        self.rssi
    }

    fn supply_millivolts(&mut self) -> Option<u16> {
        self.supply_mv
    }
}

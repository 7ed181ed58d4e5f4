//! In-memory stand-in for the parking backend
//!
//! Issues a barrier command every [`COMMAND_INTERVAL`] and keeps re-issuing
//! it until the node acknowledges, like the real backend does. Requests
//! fail on a fixed pattern so backoff and replay handling get exercised.

use std::time::Duration as StdDuration;

use embassy_time::{Duration, Instant};
use log::{debug, info};

use parkbar_core::sync::{Response, Transport, TransportError};

/// Time between two newly issued commands
const COMMAND_INTERVAL: Duration = Duration::from_secs(25);

/// Simulated round trip of every request
const LATENCY: StdDuration = StdDuration::from_millis(15);

/// Command names issued in turn, including one the node does not know
const COMMAND_CYCLE: [&str; 6] = [
    "raise_barrier",
    "lower_barrier",
    "up",
    "update_settings",
    "down",
    "reset",
];

struct PendingCommand {
    id: u64,
    name: &'static str,
}

pub struct FlakyBackend {
    started: Instant,
    requests: u32,
    issued: u64,
    pending: Vec<PendingCommand>,
}

impl FlakyBackend {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            requests: 0,
            issued: 0,
            pending: Vec::new(),
        }
    }

    /// Deterministic failure pattern keyed on the request counter
    fn injected_failure(&mut self) -> Option<Result<Response, TransportError>> {
        self.requests = self.requests.wrapping_add(1);
        let n = self.requests;

        if n % 9 == 4 {
            debug!("backend: dropping request {} (timeout)", n);
            Some(Err(TransportError::Timeout))
        } else if n % 13 == 7 {
            debug!("backend: request {} answered 503", n);
            Some(Ok(Response::new(503, b"")))
        } else {
            None
        }
    }

    fn issue_due_commands(&mut self) {
        let elapsed = Instant::now().saturating_duration_since(self.started);
        let due = elapsed.as_ticks() / COMMAND_INTERVAL.as_ticks();

        while self.issued < due {
            self.issued += 1;
            let name = COMMAND_CYCLE[(self.issued as usize - 1) % COMMAND_CYCLE.len()];
            info!("backend: issuing command {} ({})", self.issued, name);
            self.pending.push(PendingCommand {
                id: self.issued,
                name,
            });
        }
    }

    fn commands_body(&self) -> String {
        let items: Vec<String> = self
            .pending
            .iter()
            .map(|c| {
                format!(
                    r#"{{"id":{},"command":"{}","parameters":{{}},"created_at":null}}"#,
                    c.id, c.name
                )
            })
            .collect();
        format!(r#"{{"commands":[{}]}}"#, items.join(","))
    }

    fn handle_ack(&mut self, url: &str, body: &[u8]) -> Response {
        let id = url
            .trim_end_matches("/ack")
            .rsplit('/')
            .next()
            .and_then(|id| id.parse::<u64>().ok());

        match id {
            Some(id) => {
                info!(
                    "backend: command {} acknowledged with {}",
                    id,
                    String::from_utf8_lossy(body)
                );
                self.pending.retain(|c| c.id != id);
                Response::new(200, b"{\"ok\":true}")
            }
            None => Response::new(404, b"{\"detail\":\"unknown command\"}"),
        }
    }
}

impl Transport for FlakyBackend {
    async fn get(&mut self, url: &str, _timeout: Duration) -> Result<Response, TransportError> {
        std::thread::sleep(LATENCY);
        if let Some(failure) = self.injected_failure() {
            return failure;
        }
        if !url.ends_with("/commands") {
            return Ok(Response::new(404, b""));
        }

        self.issue_due_commands();
        let body = self.commands_body();
        debug!("backend: GET {} -> {}", url, body);
        Ok(Response::new(200, body.as_bytes()))
    }

    async fn post(
        &mut self,
        url: &str,
        body: &[u8],
        _timeout: Duration,
    ) -> Result<Response, TransportError> {
        std::thread::sleep(LATENCY);
        if let Some(failure) = self.injected_failure() {
            return failure;
        }

        if url.ends_with("/ack") {
            Ok(self.handle_ack(url, body))
        } else if url.ends_with("/telemetry") {
            info!("backend: telemetry {}", String::from_utf8_lossy(body));
            Ok(Response::new(201, b"{\"ok\":true}"))
        } else {
            Ok(Response::new(404, b""))
        }
    }
}

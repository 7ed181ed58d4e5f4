//! Backend synchronisation
//!
//! [`SyncAgent`] owns the network [`Transport`] and runs two independent
//! channels against the backend:
//!
//! - **command poll**: `GET {base}/devices/{id}/commands` every
//!   `poll_interval_ms`, applying each new command to the actuator exactly
//!   once and acknowledging it;
//! - **telemetry**: `POST {base}/devices/{id}/telemetry` every
//!   `telemetry_interval_ms`, best effort.
//!
//! Every request is bounded by `request_timeout_ms`. A failed cycle is
//! skipped and the channel backs off exponentially; nothing here ever waits
//! for a retry.

mod backoff;
mod command;
mod telemetry;
mod transport;

pub use backoff::Backoff;
pub use command::*;
pub use telemetry::*;
pub use transport::*;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use embassy_time::{Instant, with_timeout};
use heapless::Deque;
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use crate::actuator::{ActuatorController, ActuatorError, BarrierServo};
use crate::config::DeviceConfig;

/// Commands held back while the barrier is busy
pub const MAX_DEFERRED: usize = 4;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("backend answered HTTP {0}")]
    Status(u16),
    #[error("malformed payload")]
    Malformed,
    #[error("report does not fit the encode buffer")]
    Encode,
}

enum Outcome {
    Handled(AckStatus),
    Busy,
}

pub struct SyncAgent<'a, T> {
    transport: T,
    config: &'a DeviceConfig<'a>,
    poll_backoff: Backoff,
    telemetry_backoff: Backoff,
    /// Idempotence ledger, reset on reboot
    last_applied: Option<u64>,
    deferred: Deque<Command, MAX_DEFERRED>,
}

impl<'a, T> SyncAgent<'a, T>
where
    T: Transport,
{
    /// Both channels are due immediately after boot.
    pub fn new(transport: T, config: &'a DeviceConfig<'a>, now: Instant) -> Self {
        Self {
            transport,
            config,
            poll_backoff: Backoff::new(config.poll_interval(), config.max_backoff_factor, now),
            telemetry_backoff: Backoff::new(
                config.telemetry_interval(),
                config.max_backoff_factor,
                now,
            ),
            last_applied: None,
            deferred: Deque::new(),
        }
    }

    fn device_url(&self, suffix: &str) -> String {
        format!(
            "{}/devices/{}/{}",
            self.config.backend.base_url(),
            self.config.device_id,
            suffix
        )
    }

    async fn get(&mut self, url: &str) -> Result<Response, SyncError> {
        let timeout = self.config.request_timeout();
        let response = with_timeout(timeout, self.transport.get(url, timeout))
            .await
            .map_err(|_| TransportError::Timeout)??;
        Self::check_status(response)
    }

    async fn post(&mut self, url: &str, body: &[u8]) -> Result<Response, SyncError> {
        let timeout = self.config.request_timeout();
        let response = with_timeout(timeout, self.transport.post(url, body, timeout))
            .await
            .map_err(|_| TransportError::Timeout)??;
        Self::check_status(response)
    }

    fn check_status(response: Response) -> Result<Response, SyncError> {
        if response.is_success() {
            Ok(response)
        } else {
            Err(SyncError::Status(response.status))
        }
    }

    /// Fetch pending commands from the backend
    pub async fn poll_commands(&mut self) -> Result<Vec<Command>, SyncError> {
        let url = self.device_url("commands");
        let response = self.get(&url).await?;
        decode_commands(&response.body).map_err(|e| {
            warn!("Command payload rejected: {}", e);
            SyncError::Malformed
        })
    }

    /// Send one telemetry report
    pub async fn push_telemetry(&mut self, report: &TelemetryReport<'_>) -> Result<(), SyncError> {
        let mut buf = [0u8; TELEMETRY_BUFFER_SIZE];
        let len = report.encode(&mut buf).map_err(|_| SyncError::Encode)?;
        let url = self.device_url("telemetry");
        self.post(&url, &buf[..len]).await?;
        Ok(())
    }

    /// POST one acknowledgement, reporting whether the backend took it
    async fn acknowledge(&mut self, id: u64, status: AckStatus) -> bool {
        let mut buf = [0u8; 32];
        let Ok(len) = serde_json_core::to_slice(&AckBody { status }, &mut buf) else {
            return false;
        };
        let url = self.device_url(&format!("commands/{}/ack", id));
        match self.post(&url, &buf[..len]).await {
            Ok(_) => {
                debug!("Command {} acknowledged ({:?})", id, status);
                true
            }
            Err(e) => {
                warn!("Ack for command {} failed: {}", id, e);
                false
            }
        }
    }

    async fn send_acks(&mut self, acks: &[(u64, AckStatus)]) -> usize {
        for (sent, &(id, status)) in acks.iter().enumerate() {
            if !self.acknowledge(id, status).await {
                return sent;
            }
        }
        acks.len()
    }

    /// Acknowledge one cycle's commands within a single request timeout.
    ///
    /// Sending stops at the first failure. The backend re-issues whatever
    /// stays unacknowledged and the ledger answers those with `duplicate`.
    async fn acknowledge_all(&mut self, acks: &[(u64, AckStatus)]) {
        if acks.is_empty() {
            return;
        }
        let budget = self.config.request_timeout();
        match with_timeout(budget, self.send_acks(acks)).await {
            Ok(sent) if sent == acks.len() => {}
            Ok(sent) => warn!(
                "{} of {} acknowledgement(s) left unsent",
                acks.len() - sent,
                acks.len()
            ),
            Err(_) => warn!(
                "Acknowledgements exceeded {} ms, rest left unsent",
                budget.as_millis()
            ),
        }
    }

    pub fn poll_due(&self, now: Instant) -> bool {
        self.poll_backoff.is_due(now)
    }

    pub fn telemetry_due(&self, now: Instant) -> bool {
        self.telemetry_backoff.is_due(now)
    }

    /// Push telemetry at the next opportunity, unless the channel is backing off
    pub fn request_telemetry(&mut self, now: Instant) {
        self.telemetry_backoff.expedite(now);
    }

    /// One command-poll cycle: retry deferred commands, poll, apply, ack.
    ///
    /// A failed poll still gives deferred commands their retry. The cycle
    /// suspends for at most two request timeouts, one for the poll and one
    /// shared by all acknowledgements.
    pub async fn run_poll_cycle<S>(&mut self, now: Instant, actuator: &mut ActuatorController<S>)
    where
        S: BarrierServo,
    {
        let incoming = match self.poll_commands().await {
            Ok(commands) => {
                self.poll_backoff.record_success(now);
                if !commands.is_empty() {
                    info!("Received {} command(s)", commands.len());
                }
                commands
            }
            Err(e) => {
                let retry_in = self.poll_backoff.record_failure(now);
                warn!(
                    "Command poll failed ({}), attempt {} - next in {} ms",
                    e,
                    self.poll_backoff.consecutive_failures(),
                    retry_in.as_millis()
                );
                Vec::new()
            }
        };

        self.apply_batch(incoming, now, actuator).await;
    }

    /// One telemetry cycle. The report is dropped whatever the outcome.
    pub async fn run_telemetry_cycle(&mut self, now: Instant, report: &TelemetryReport<'_>) {
        match self.push_telemetry(report).await {
            Ok(()) => {
                self.telemetry_backoff.record_success(now);
                debug!("Telemetry sent");
            }
            Err(e) => {
                let retry_in = self.telemetry_backoff.record_failure(now);
                warn!(
                    "Telemetry push failed ({}), attempt {} - next in {} ms",
                    e,
                    self.telemetry_backoff.consecutive_failures(),
                    retry_in.as_millis()
                );
            }
        }
    }

    async fn apply_batch<S>(
        &mut self,
        incoming: Vec<Command>,
        now: Instant,
        actuator: &mut ActuatorController<S>,
    ) where
        S: BarrierServo,
    {
        let mut queue: Vec<Command> = Vec::with_capacity(self.deferred.len() + incoming.len());
        while let Some(command) = self.deferred.pop_front() {
            queue.push(command);
        }
        queue.extend(incoming);

        // Once a command is held back, everything after it waits too so the
        // ledger only ever moves forward in delivery order.
        let mut holding = false;
        let mut acks: Vec<(u64, AckStatus)> = Vec::new();

        for command in queue {
            if self.last_applied.is_some_and(|last| command.id <= last) {
                debug!("Skipping already handled command {}", command.id);
                acks.push((command.id, AckStatus::Duplicate));
                continue;
            }
            if self.deferred.iter().any(|c| c.id == command.id) {
                debug!("Command {} already deferred", command.id);
                continue;
            }

            if !holding {
                match Self::apply(&command, now, actuator) {
                    Outcome::Handled(status) => {
                        self.last_applied = Some(command.id);
                        acks.push((command.id, status));
                        continue;
                    }
                    Outcome::Busy => holding = true,
                }
            }

            self.defer(command);
        }

        self.acknowledge_all(&acks).await;
    }

    fn apply<S>(command: &Command, now: Instant, actuator: &mut ActuatorController<S>) -> Outcome
    where
        S: BarrierServo,
    {
        match &command.kind {
            CommandKind::SetBarrier(target) => match actuator.request_move(*target, now) {
                Ok(()) => {
                    info!("Command {}: barrier {:?}", command.id, target);
                    Outcome::Handled(AckStatus::Done)
                }
                Err(ActuatorError::Busy) => Outcome::Busy,
                Err(e) => {
                    error!("Command {} not applied: {}", command.id, e);
                    Outcome::Handled(AckStatus::Failed)
                }
            },
            CommandKind::Reset => {
                info!("Command {}: reset", command.id);
                actuator.reset(now);
                Outcome::Handled(AckStatus::Done)
            }
            CommandKind::Unsupported(name) => {
                warn!("Command {}: unsupported '{}'", command.id, name);
                Outcome::Handled(AckStatus::Failed)
            }
        }
    }

    fn defer(&mut self, command: Command) {
        let id = command.id;
        match self.deferred.push_back(command) {
            Ok(()) => debug!("Command {} deferred to next poll", id),
            Err(_) => warn!("Deferred queue full, dropping command {}", id),
        }
    }

    /// Both channels currently succeed
    pub fn backend_reachable(&self) -> bool {
        self.poll_backoff.consecutive_failures() == 0
            && self.telemetry_backoff.consecutive_failures() == 0
    }

    /// Worst consecutive failure count across both channels
    pub fn consecutive_failures(&self) -> u32 {
        self.poll_backoff
            .consecutive_failures()
            .max(self.telemetry_backoff.consecutive_failures())
    }

    pub fn last_applied(&self) -> Option<u64> {
        self.last_applied
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn poll_backoff(&self) -> &Backoff {
        &self.poll_backoff
    }

    pub fn telemetry_backoff(&self) -> &Backoff {
        &self.telemetry_backoff
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

//! Barrier servo control
//!
//! The barrier is a hobby servo swinging between two calibrated angles.
//! [`ActuatorController`] owns it and runs every motion through a timed
//! profile: the angle is ramped linearly over `speed_ms`, and a motion that
//! is not confirmed within `speed_ms * safety_factor` latches [`ActuatorState::Fault`].

use embassy_time::{Duration, Instant};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::config::ServoConfig;

/// Output stage driving the barrier servo
pub trait BarrierServo {
    type Error: core::fmt::Debug;

    /// Command the horn to an absolute angle in degrees.
    fn set_angle(&mut self, degrees: u8) -> Result<(), Self::Error>;

    /// Whether the horn is known to sit at `degrees`.
    ///
    /// Servos without position feedback keep the default, in which case a
    /// successful write of the final angle counts as confirmation.
    fn confirm_position(&mut self, degrees: u8) -> bool {
        let _ = degrees;
        true
    }
}

/// Resting position requested by a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPosition {
    /// Bay free to park
    Down,
    /// Bay blocked
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorState {
    Down,
    Up,
    MovingUp,
    MovingDown,
    /// Latched until an explicit reset
    Fault,
}

impl ActuatorState {
    pub const fn is_moving(self) -> bool {
        matches!(self, Self::MovingUp | Self::MovingDown)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Down => "down",
            Self::Up => "up",
            Self::MovingUp => "moving_up",
            Self::MovingDown => "moving_down",
            Self::Fault => "fault",
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    #[error("barrier is already moving")]
    Busy,
    #[error("barrier is faulted, reset required")]
    Fault,
    #[error("servo rejected the initial position")]
    Servo,
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    target: BarrierPosition,
    from_angle: u8,
    to_angle: u8,
    started_at: Instant,
    endpoint_written: bool,
}

impl Motion {
    /// Angle on the linear ramp after `elapsed` of a `duration`-long motion
    fn angle_at(&self, elapsed: Duration, duration: Duration) -> u8 {
        let total = duration.as_millis().max(1) as i32;
        let done = (elapsed.as_millis() as i32).min(total);
        let from = self.from_angle as i32;
        let to = self.to_angle as i32;
        (from + (to - from) * done / total) as u8
    }
}

pub struct ActuatorController<S> {
    servo: S,
    pos_down: u8,
    pos_up: u8,
    speed: Duration,
    fault_after: Duration,
    state: ActuatorState,
    motion: Option<Motion>,
    motion_count: u32,
    last_motion_at: Option<Instant>,
}

impl<S> ActuatorController<S>
where
    S: BarrierServo,
{
    pub fn new(servo: S, config: &ServoConfig) -> Self {
        let speed = Duration::from_millis(config.speed_ms as u64);
        Self {
            servo,
            pos_down: config.pos_down,
            pos_up: config.pos_up,
            speed,
            fault_after: speed * config.safety_factor,
            state: ActuatorState::Down,
            motion: None,
            motion_count: 0,
            last_motion_at: None,
        }
    }

    /// Drive the servo to the down endpoint at boot.
    ///
    /// A servo that rejects the write leaves the controller in `Fault`.
    pub fn init(&mut self) -> Result<(), ActuatorError> {
        match self.servo.set_angle(self.pos_down) {
            Ok(()) => {
                info!("Barrier homed to {} degrees (down)", self.pos_down);
                self.state = ActuatorState::Down;
                Ok(())
            }
            Err(e) => {
                error!("Servo init failed: {:?}", e);
                self.state = ActuatorState::Fault;
                Err(ActuatorError::Servo)
            }
        }
    }

    /// Start moving the barrier towards `target`.
    ///
    /// Requesting the current resting position is a successful no-op, so a
    /// replayed command is harmless. Requests during a motion are rejected,
    /// never queued and never reverse a motion mid-travel.
    pub fn request_move(&mut self, target: BarrierPosition, now: Instant) -> Result<(), ActuatorError> {
        let from_angle = match (self.state, target) {
            (ActuatorState::Fault, _) => return Err(ActuatorError::Fault),
            (ActuatorState::MovingUp | ActuatorState::MovingDown, _) => {
                return Err(ActuatorError::Busy);
            }
            (ActuatorState::Up, BarrierPosition::Up) | (ActuatorState::Down, BarrierPosition::Down) => {
                debug!("Barrier already {}", self.state.label());
                return Ok(());
            }
            (ActuatorState::Down, BarrierPosition::Up) => self.pos_down,
            (ActuatorState::Up, BarrierPosition::Down) => self.pos_up,
        };

        self.start_motion(target, from_angle, now);
        Ok(())
    }

    /// Leave `Fault` by homing the barrier down.
    ///
    /// The horn position is unknown after a fault, so the down angle is
    /// commanded directly instead of ramped. A no-op in any other state.
    pub fn reset(&mut self, now: Instant) {
        if self.state != ActuatorState::Fault {
            debug!("Reset ignored, barrier is {}", self.state.label());
            return;
        }
        warn!("Resetting faulted barrier, homing down");
        self.start_motion(BarrierPosition::Down, self.pos_down, now);
    }

    fn start_motion(&mut self, target: BarrierPosition, from_angle: u8, now: Instant) {
        let (state, to_angle) = match target {
            BarrierPosition::Up => (ActuatorState::MovingUp, self.pos_up),
            BarrierPosition::Down => (ActuatorState::MovingDown, self.pos_down),
        };
        info!("Barrier {} ({} -> {} degrees)", state.label(), from_angle, to_angle);

        self.state = state;
        self.motion = Some(Motion {
            target,
            from_angle,
            to_angle,
            started_at: now,
            endpoint_written: false,
        });
        self.motion_count = self.motion_count.wrapping_add(1);
    }

    /// Advance the in-flight motion, if any. Cheap when idle.
    pub fn tick(&mut self, now: Instant) {
        let Some(mut motion) = self.motion else {
            return;
        };
        let elapsed = now.saturating_duration_since(motion.started_at);

        if elapsed < self.speed {
            let angle = motion.angle_at(elapsed, self.speed);
            if let Err(e) = self.servo.set_angle(angle) {
                warn!("Servo write of {} degrees failed: {:?}", angle, e);
            }
            return;
        }

        if !motion.endpoint_written {
            match self.servo.set_angle(motion.to_angle) {
                Ok(()) => motion.endpoint_written = true,
                Err(e) => warn!("Servo endpoint write failed: {:?}", e),
            }
        }

        if motion.endpoint_written && self.servo.confirm_position(motion.to_angle) {
            self.state = match motion.target {
                BarrierPosition::Up => ActuatorState::Up,
                BarrierPosition::Down => ActuatorState::Down,
            };
            self.motion = None;
            self.last_motion_at = Some(now);
            info!(
                "Barrier {} after {} ms",
                self.state.label(),
                elapsed.as_millis()
            );
        } else if elapsed > self.fault_after {
            error!(
                "Barrier motion unconfirmed after {} ms, latching fault",
                elapsed.as_millis()
            );
            self.state = ActuatorState::Fault;
            self.motion = None;
        } else {
            self.motion = Some(motion);
        }
    }

    pub fn current_state(&self) -> ActuatorState {
        self.state
    }

    /// Motions started since boot, including resets
    pub fn motion_count(&self) -> u32 {
        self.motion_count
    }

    pub fn last_motion_at(&self) -> Option<Instant> {
        self.last_motion_at
    }

    pub fn servo(&self) -> &S {
        &self.servo
    }

    pub fn servo_mut(&mut self) -> &mut S {
        &mut self.servo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::mock::MockServo;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn controller(servo: MockServo) -> ActuatorController<MockServo> {
        let mut c = ActuatorController::new(servo, &DeviceConfig::default().servo);
        c.init().unwrap();
        c
    }

    fn settle(c: &mut ActuatorController<MockServo>, from_ms: u64) {
        c.tick(at(from_ms + 1000));
    }

    #[test]
    fn init_homes_down() {
        let c = controller(MockServo::new());
        assert_eq!(c.current_state(), ActuatorState::Down);
        assert_eq!(c.servo().last_angle(), Some(0));
    }

    #[test]
    fn failed_init_latches_fault() {
        let mut servo = MockServo::new();
        servo.fail_writes = true;
        let mut c = ActuatorController::new(servo, &DeviceConfig::default().servo);

        assert_eq!(c.init(), Err(ActuatorError::Servo));
        assert_eq!(c.current_state(), ActuatorState::Fault);
    }

    #[test]
    fn move_up_ramps_then_rests() {
        let mut c = controller(MockServo::new());

        c.request_move(BarrierPosition::Up, at(0)).unwrap();
        assert_eq!(c.current_state(), ActuatorState::MovingUp);

        c.tick(at(500));
        assert_eq!(c.servo().last_angle(), Some(45));
        assert_eq!(c.current_state(), ActuatorState::MovingUp);

        c.tick(at(1000));
        assert_eq!(c.current_state(), ActuatorState::Up);
        assert_eq!(c.servo().last_angle(), Some(90));
        assert_eq!(c.last_motion_at(), Some(at(1000)));
    }

    #[test]
    fn request_at_rest_is_idempotent() {
        let mut c = controller(MockServo::new());
        c.request_move(BarrierPosition::Up, at(0)).unwrap();
        settle(&mut c, 0);
        let writes = c.servo().angles.len();

        assert_eq!(c.request_move(BarrierPosition::Up, at(2000)), Ok(()));
        c.tick(at(2500));

        assert_eq!(c.current_state(), ActuatorState::Up);
        assert_eq!(c.servo().angles.len(), writes);
        assert_eq!(c.motion_count(), 1);
    }

    #[test]
    fn busy_only_while_moving() {
        let mut c = controller(MockServo::new());

        // Down: accepted
        assert_eq!(c.request_move(BarrierPosition::Up, at(0)), Ok(()));
        // MovingUp: both directions rejected
        assert_eq!(c.request_move(BarrierPosition::Up, at(10)), Err(ActuatorError::Busy));
        assert_eq!(c.request_move(BarrierPosition::Down, at(10)), Err(ActuatorError::Busy));

        settle(&mut c, 0);
        // Up: accepted
        assert_eq!(c.request_move(BarrierPosition::Down, at(1100)), Ok(()));
        // MovingDown: rejected
        assert_eq!(c.request_move(BarrierPosition::Up, at(1200)), Err(ActuatorError::Busy));

        settle(&mut c, 1100);
        assert_eq!(c.current_state(), ActuatorState::Down);
        assert_eq!(c.request_move(BarrierPosition::Down, at(2200)), Ok(()));
    }

    #[test]
    fn unconfirmed_motion_faults_after_safety_window() {
        let mut c = controller(MockServo::stuck());
        c.request_move(BarrierPosition::Up, at(0)).unwrap();

        c.tick(at(1000));
        assert_eq!(c.current_state(), ActuatorState::MovingUp);
        c.tick(at(2000));
        assert_eq!(c.current_state(), ActuatorState::MovingUp);
        c.tick(at(2001));
        assert_eq!(c.current_state(), ActuatorState::Fault);

        assert_eq!(c.request_move(BarrierPosition::Down, at(3000)), Err(ActuatorError::Fault));
        assert_eq!(c.request_move(BarrierPosition::Up, at(3000)), Err(ActuatorError::Fault));
        c.tick(at(10_000));
        assert_eq!(c.current_state(), ActuatorState::Fault);
    }

    #[test]
    fn reset_homes_down_and_clears_fault() {
        let mut c = controller(MockServo::stuck());
        c.request_move(BarrierPosition::Up, at(0)).unwrap();
        c.tick(at(5000));
        assert_eq!(c.current_state(), ActuatorState::Fault);

        c.servo_mut().confirms = true;
        c.reset(at(6000));
        assert_eq!(c.current_state(), ActuatorState::MovingDown);

        c.tick(at(7000));
        assert_eq!(c.current_state(), ActuatorState::Down);
        assert_eq!(c.servo().last_angle(), Some(0));
        assert_eq!(c.request_move(BarrierPosition::Up, at(7100)), Ok(()));
    }

    #[test]
    fn reset_outside_fault_is_ignored() {
        let mut c = controller(MockServo::new());
        c.reset(at(0));
        assert_eq!(c.current_state(), ActuatorState::Down);
        assert_eq!(c.motion_count(), 0);
    }

    #[test]
    fn late_confirmed_tick_still_completes() {
        let mut c = controller(MockServo::new());
        c.request_move(BarrierPosition::Up, at(0)).unwrap();

        c.tick(at(5000));

        assert_eq!(c.current_state(), ActuatorState::Up);
    }
}

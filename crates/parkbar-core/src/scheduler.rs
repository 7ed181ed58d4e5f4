//! Cooperative control loop
//!
//! One [`Scheduler::tick`] per wake, in a fixed order: sensor sample when
//! due, actuator tick always, command poll when due, telemetry when due.
//! Only the sync channels ever suspend, and each request they make is
//! bounded by the configured timeout.

use embassy_time::{Duration, Instant};
use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};

use crate::actuator::{ActuatorController, BarrierServo};
use crate::config::DeviceConfig;
use crate::sensors::{CalibrationSource, HallSensor, SensorMonitor};
use crate::status::{HealthProbe, LedPattern};
use crate::sync::{SyncAgent, TelemetryReport, Transport};

/// Longest sleep between two ticks, keeps servo ramps smooth
pub const MAX_TICK_PERIOD: Duration = Duration::from_millis(50);

/// Loop health counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    /// Ticks that took longer than the budget
    pub overruns: u32,
    pub worst_case: Duration,
}

pub struct Scheduler<'a, H, S, T, P> {
    config: &'a DeviceConfig<'a>,
    monitor: SensorMonitor<H>,
    actuator: ActuatorController<S>,
    sync: SyncAgent<'a, T>,
    health: P,
    sample_interval: Duration,
    next_sample_at: Instant,
    tick_budget: Duration,
    stats: LoopStats,
}

impl<'a, H, S, T, P> Scheduler<'a, H, S, T, P>
where
    H: HallSensor,
    S: BarrierServo,
    T: Transport,
    P: HealthProbe,
{
    /// The first sample is due at `now`.
    ///
    /// The default tick budget allows one poll and one telemetry request to
    /// run to their timeout.
    pub fn new(
        config: &'a DeviceConfig<'a>,
        monitor: SensorMonitor<H>,
        actuator: ActuatorController<S>,
        sync: SyncAgent<'a, T>,
        health: P,
        now: Instant,
    ) -> Self {
        Self {
            config,
            monitor,
            actuator,
            sync,
            health,
            sample_interval: config.sample_interval(),
            next_sample_at: now,
            tick_budget: config.request_timeout() * 2,
            stats: LoopStats::default(),
        }
    }

    pub fn with_tick_budget(mut self, budget: Duration) -> Self {
        self.tick_budget = budget;
        self
    }

    /// Interval the runner sleeps towards between ticks
    pub fn tick_period(&self) -> Duration {
        self.sample_interval.min(MAX_TICK_PERIOD)
    }

    pub async fn tick(&mut self, now: Instant) {
        if now >= self.next_sample_at {
            self.monitor.sample().await;
            self.next_sample_at = now + self.sample_interval;

            if let Some(event) = self.monitor.take_event() {
                debug!(
                    "Occupancy event {} -> {}, telemetry requested",
                    event.from.label(),
                    event.to.label()
                );
                self.sync.request_telemetry(now);
            }
        }

        self.actuator.tick(now);

        if self.sync.poll_due(now) {
            self.sync.run_poll_cycle(now, &mut self.actuator).await;
        }

        if self.sync.telemetry_due(now) {
            let report = self.build_report(now);
            self.sync.run_telemetry_cycle(now, &report).await;
        }
    }

    /// Account one tick's wall-clock duration against the budget
    pub fn record_tick(&mut self, elapsed: Duration) {
        self.stats.ticks = self.stats.ticks.wrapping_add(1);
        if elapsed > self.tick_budget {
            self.stats.overruns = self.stats.overruns.saturating_add(1);
            warn!(
                "Tick took {} ms, budget {} ms",
                elapsed.as_millis(),
                self.tick_budget.as_millis()
            );
        }
        if elapsed > self.stats.worst_case {
            self.stats.worst_case = elapsed;
        }
    }

    fn build_report(&mut self, now: Instant) -> TelemetryReport<'a> {
        let profile = self.monitor.profile();
        TelemetryReport {
            device_id: self.config.device_id,
            occupancy: self.monitor.state(),
            actuator_state: self.actuator.current_state(),
            timestamp: now.as_millis(),
            rssi: self.health.rssi(),
            supply_mv: self.health.supply_millivolts(),
            hall_raw: self.monitor.last_raw(),
            hall_baseline: profile.baseline,
            hall_threshold: profile.threshold,
            calibrated: profile.source == CalibrationSource::Calibrated,
            sensor_errors: self.monitor.read_errors(),
            motion_count: self.actuator.motion_count(),
            last_motion_ms: self.actuator.last_motion_at().map(|at| at.as_millis()),
            sync_failures: self.sync.consecutive_failures(),
            deferred_commands: u32::try_from(self.sync.deferred_len()).unwrap_or(u32::MAX),
            loop_overruns: self.stats.overruns,
        }
    }

    pub fn led_pattern(&self) -> LedPattern {
        LedPattern::select(self.actuator.current_state(), self.sync.backend_reachable())
    }

    /// Run forever: tick, account, sleep out the rest of the tick period.
    ///
    /// `on_pattern` is called whenever the status LED pattern changes.
    pub async fn run<C, D, L>(&mut self, mut clock: C, delay: &mut D, mut on_pattern: L) -> !
    where
        C: FnMut() -> Instant,
        D: DelayNs,
        L: FnMut(LedPattern),
    {
        info!(
            "Control loop running, tick period {} ms",
            self.tick_period().as_millis()
        );
        let mut shown = LedPattern::Off;

        loop {
            let started = clock();
            self.tick(started).await;
            let elapsed = clock().saturating_duration_since(started);
            self.record_tick(elapsed);

            let pattern = self.led_pattern();
            if pattern != shown {
                on_pattern(pattern);
                shown = pattern;
            }

            if let Some(idle) = self.tick_period().checked_sub(elapsed) {
                delay.delay_us(idle.as_micros() as u32).await;
            }
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn monitor(&self) -> &SensorMonitor<H> {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut SensorMonitor<H> {
        &mut self.monitor
    }

    pub fn actuator(&self) -> &ActuatorController<S> {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut ActuatorController<S> {
        &mut self.actuator
    }

    pub fn sync(&self) -> &SyncAgent<'a, T> {
        &self.sync
    }

    pub fn sync_mut(&mut self) -> &mut SyncAgent<'a, T> {
        &mut self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorState;
    use crate::mock::{FixedHealth, MockServo, MockTransport, ScriptedHall, block_on};
    use crate::sensors::{CalibrationProfile, OccupancyState};

    type TestScheduler<'a> = Scheduler<'a, ScriptedHall, MockServo, MockTransport, FixedHealth>;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn scheduler<'a>(
        config: &'a DeviceConfig<'a>,
        hall: ScriptedHall,
        transport: MockTransport,
    ) -> TestScheduler<'a> {
        let monitor = SensorMonitor::new(
            hall,
            CalibrationProfile::from_static(&config.sensor),
            config.sensor.polarity,
        );
        let mut actuator = ActuatorController::new(MockServo::new(), &config.servo);
        actuator.init().unwrap();
        let sync = SyncAgent::new(transport, config, at(0));
        let health = FixedHealth {
            rssi: Some(-60),
            supply_mv: None,
        };
        Scheduler::new(config, monitor, actuator, sync, health, at(0))
    }

    fn telemetry_bodies(s: &TestScheduler<'_>) -> Vec<String> {
        s.sync()
            .transport()
            .posts_to("/telemetry")
            .iter()
            .map(|r| String::from(r.body_str()))
            .collect()
    }

    #[test]
    fn samples_on_sensor_cadence() {
        let config = DeviceConfig::default();
        let mut s = scheduler(&config, ScriptedHall::constant(300), MockTransport::new());

        for ms in [0, 100, 199, 200, 250, 400] {
            block_on(s.tick(at(ms)));
        }

        assert_eq!(s.monitor_mut().sensor_mut().reads(), 3);
    }

    #[test]
    fn actuator_advances_between_polls() {
        let config = DeviceConfig::default();
        let mut transport = MockTransport::new();
        transport.queue_get(200, r#"[{"id":1,"command":"raise_barrier"}]"#);
        let mut s = scheduler(&config, ScriptedHall::constant(300), transport);

        block_on(s.tick(at(0)));
        assert_eq!(s.actuator().current_state(), ActuatorState::MovingUp);
        assert_eq!(s.led_pattern(), LedPattern::Pulse);

        block_on(s.tick(at(500)));
        block_on(s.tick(at(1000)));

        assert_eq!(s.actuator().current_state(), ActuatorState::Up);
        assert_eq!(s.led_pattern(), LedPattern::Solid);
        // Only the boot poll ran
        let gets = s
            .sync()
            .transport()
            .requests
            .iter()
            .filter(|r| r.body.is_none())
            .count();
        assert_eq!(gets, 1);
        // Telemetry at boot already reports the motion started by the poll
        assert!(telemetry_bodies(&s)[0].contains(r#""barrier_position":"moving_up""#));
    }

    #[test]
    fn telemetry_reports_last_completed_motion() {
        let config = DeviceConfig::default();
        let mut transport = MockTransport::new();
        transport.queue_get(200, r#"[{"id":1,"command":"raise_barrier"}]"#);
        let mut s = scheduler(&config, ScriptedHall::constant(300), transport);

        block_on(s.tick(at(0)));
        block_on(s.tick(at(1000)));
        s.sync_mut().request_telemetry(at(1200));
        block_on(s.tick(at(1200)));

        let bodies = telemetry_bodies(&s);
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].contains(r#""last_motion_ms":null"#));
        assert!(bodies[1].contains(r#""motion_count":1,"last_motion_ms":1000,"#));
        assert!(bodies[1].contains(r#""deferred_commands":0,"#));
    }

    #[test]
    fn occupancy_change_pushes_telemetry_early() {
        let config = DeviceConfig::default();
        let hall = ScriptedHall::new(&[300, 300, 300, 300, 300, 600]);
        let mut s = scheduler(&config, hall, MockTransport::new());

        let mut ms = 0;
        while ms <= 1800 {
            block_on(s.tick(at(ms)));
            ms += 200;
        }

        let bodies = telemetry_bodies(&s);
        assert_eq!(bodies.len(), 3);
        assert!(bodies[0].contains(r#""occupancy":"unknown""#));
        assert!(bodies[1].contains(r#""occupancy":"free""#));
        assert!(bodies[2].contains(r#""occupancy":"occupied""#));
        assert!(bodies[2].contains(r#""timestamp":1800"#));
        assert!(bodies[2].contains(r#""rssi":-60"#));
        assert_eq!(s.monitor().state(), OccupancyState::Occupied);
    }

    #[test]
    fn failed_sync_does_not_stop_sensing() {
        let config = DeviceConfig::default();
        let mut transport = MockTransport::new();
        transport.queue_get_error(crate::sync::TransportError::NotConnected);
        transport.queue_post_error(crate::sync::TransportError::NotConnected);
        let mut s = scheduler(&config, ScriptedHall::constant(300), transport);

        let mut ms = 0;
        while ms <= 1000 {
            block_on(s.tick(at(ms)));
            ms += 200;
        }

        assert_eq!(s.monitor().state(), OccupancyState::Free);
        assert_eq!(s.sync().consecutive_failures(), 1);
        assert_eq!(s.led_pattern(), LedPattern::SlowBlink);
    }

    #[test]
    fn overruns_and_worst_case_are_tracked() {
        let config = DeviceConfig::default();
        let mut s = scheduler(&config, ScriptedHall::constant(300), MockTransport::new())
            .with_tick_budget(Duration::from_millis(100));

        s.record_tick(Duration::from_millis(50));
        s.record_tick(Duration::from_millis(150));
        s.record_tick(Duration::from_millis(120));

        assert_eq!(
            s.stats(),
            LoopStats {
                ticks: 3,
                overruns: 2,
                worst_case: Duration::from_millis(150),
            }
        );
    }

    #[test]
    fn tick_period_is_bounded() {
        let config = DeviceConfig::default();
        let s = scheduler(&config, ScriptedHall::constant(300), MockTransport::new());
        assert_eq!(s.tick_period(), MAX_TICK_PERIOD);
    }
}

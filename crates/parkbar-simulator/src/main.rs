//! Desktop simulator for the parkbar control loop.
//!
//! Runs the real [`Scheduler`] from parkbar-core against a simulated Hall
//! sensor, a logging servo and an in-memory backend that injects timeouts
//! and server errors. A car parks over the sensor for 20 s of every minute;
//! the backend issues a new barrier command every 25 s.
//!
//! Configure log output with `RUST_LOG`, e.g. `RUST_LOG=debug`.

mod backend;

use std::time::Duration as StdDuration;

use embassy_time::Instant;
use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info};

use parkbar_core::config::{BackendConfig, Environment};
use parkbar_core::sensors::SensorError;
use parkbar_core::status::HealthProbe;
use parkbar_core::{
    ActuatorController, BarrierServo, CalibrationProfile, DeviceConfig, HallSensor, Scheduler,
    SensorMonitor, SyncAgent,
};

use backend::FlakyBackend;

/// Empty-bay reading of the simulated sensor
const HALL_BASELINE: f64 = 1800.0;

/// Rise of the reading while a car is parked
const CAR_OFFSET: f64 = 450.0;

/// One car visit per period
const CAR_PERIOD_SECS: f64 = 60.0;

/// Occupied window inside each period
const CAR_ARRIVES_AT: f64 = 20.0;
const CAR_LEAVES_AT: f64 = 40.0;

// ---------------------------------------------------------------------------
// Simulated hardware
// ---------------------------------------------------------------------------

/// Hall sensor with a scheduled car and deterministic noise
struct SimHall {
    started: Instant,
}

impl SimHall {
    fn new(now: Instant) -> Self {
        Self { started: now }
    }

    fn reading_at(t: f64) -> u16 {
        let noise = 12.0 * (t * 7.3).sin() + 6.0 * (t * 2.1).cos();
        let phase = t % CAR_PERIOD_SECS;
        let car = if (CAR_ARRIVES_AT..CAR_LEAVES_AT).contains(&phase) {
            CAR_OFFSET
        } else {
            0.0
        };
        (HALL_BASELINE + car + noise).clamp(0.0, 4095.0) as u16
    }
}

impl HallSensor for SimHall {
    async fn read_raw(&mut self) -> Result<u16, SensorError> {
        let t = Instant::now()
            .saturating_duration_since(self.started)
            .as_millis() as f64
            / 1000.0;
        Ok(Self::reading_at(t))
    }
}

/// Servo that only reports its endpoint writes
#[derive(Default)]
struct SimServo {
    angle: Option<u8>,
}

impl BarrierServo for SimServo {
    type Error = core::convert::Infallible;

    fn set_angle(&mut self, degrees: u8) -> Result<(), Self::Error> {
        if self.angle != Some(degrees) {
            debug!("servo: {} degrees", degrees);
            self.angle = Some(degrees);
        }
        Ok(())
    }
}

/// Slowly drifting WiFi signal on a USB supply
struct SimHealth {
    started: Instant,
}

impl HealthProbe for SimHealth {
    fn rssi(&mut self) -> Option<i8> {
        let t = Instant::now()
            .saturating_duration_since(self.started)
            .as_secs() as f64;
        Some((-58.0 + 6.0 * (t / 45.0).sin()) as i8)
    }

    fn supply_millivolts(&mut self) -> Option<u16> {
        Some(5020)
    }
}

/// Blocking delay, the simulator runs a single-threaded `block_on`
struct ThreadDelay;

impl DelayNs for ThreadDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(StdDuration::from_nanos(ns as u64));
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn simulator_config() -> DeviceConfig<'static> {
    DeviceConfig {
        device_id: "PARK_SIM_001",
        backend: BackendConfig {
            environment: Environment::Local,
            local_base: "http://parkbar-sim.local:8000/",
            production_base: "https://api.gashis.ch/api",
        },
        poll_interval_ms: 5_000,
        telemetry_interval_ms: 15_000,
        request_timeout_ms: 1_000,
        ..DeviceConfig::default()
    }
}

async fn run(config: &DeviceConfig<'_>) -> ! {
    let mut hall = SimHall::new(Instant::now());
    let profile = CalibrationProfile::establish(&mut hall, &mut ThreadDelay, &config.sensor).await;
    let monitor = SensorMonitor::new(hall, profile, config.sensor.polarity);

    let mut actuator = ActuatorController::new(SimServo::default(), &config.servo);
    if let Err(e) = actuator.init() {
        error!("Servo init failed: {}", e);
    }

    let sync = SyncAgent::new(FlakyBackend::new(Instant::now()), config, Instant::now());
    let health = SimHealth {
        started: Instant::now(),
    };

    let mut scheduler = Scheduler::new(config, monitor, actuator, sync, health, Instant::now());
    scheduler
        .run(Instant::now, &mut ThreadDelay, |pattern| {
            info!("Status LED: {:?}", pattern)
        })
        .await
}

fn main() {
    let config = simulator_config();

    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .init();

    info!("Starting parkbar simulator as {}", config.device_id);
    info!("Backend: {}", config.backend.base_url());

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    embassy_futures::block_on(run(&config))
}

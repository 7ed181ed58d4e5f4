//! Device configuration record
//!
//! A single immutable [`DeviceConfig`] is built once at startup and handed
//! to every component by shared reference. Nothing mutates it at runtime.

use embassy_time::Duration;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct DeviceConfig<'a> {
    /// Identity of this node on the backend
    pub device_id: &'a str,
    pub wifi: WifiConfig<'a>,
    pub backend: BackendConfig<'a>,
    pub sensor: SensorConfig,
    pub servo: ServoConfig,
    /// Command poll cadence
    pub poll_interval_ms: u32,
    /// Telemetry push cadence
    pub telemetry_interval_ms: u32,
    /// Upper bound for a single backend request
    pub request_timeout_ms: u32,
    /// Backoff ceiling as a multiple of the channel's interval
    pub max_backoff_factor: u32,
    pub status_led_pin: u8,
    /// Raises the log level from Info to Debug
    pub debug_verbose: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct WifiConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// Which backend deployment the node talks to
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Local,
    Production,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackendConfig<'a> {
    pub environment: Environment,
    /// Development backend, must be reachable from the node's network (no `localhost`)
    pub local_base: &'a str,
    pub production_base: &'a str,
}

impl<'a> BackendConfig<'a> {
    /// The one base URL in effect for the selected environment
    pub fn base_url(&self) -> &'a str {
        let base = match self.environment {
            Environment::Local => self.local_base,
            Environment::Production => self.production_base,
        };
        base.trim_end_matches('/')
    }
}

/// Direction in which a magnet moves the Hall reading
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorPolarity {
    /// A car pushes the reading up; occupied when `raw >= threshold`
    #[default]
    Rising,
    /// A car pulls the reading down; occupied when `raw <= threshold`
    Falling,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SensorConfig {
    /// ADC-capable GPIO the Hall sensor is wired to
    pub pin: u8,
    /// Static threshold, used when calibration is disabled or fails
    pub hall_threshold: u16,
    pub auto_calibrate: bool,
    /// Replaces the calibrated threshold while keeping the measured baseline
    pub threshold_override: Option<u16>,
    /// Distance of the calibrated threshold from the baseline
    pub calibration_margin: u16,
    /// Largest accepted spread of the warm-up readings
    pub calibration_tolerance: u16,
    pub warmup_samples: u16,
    pub warmup_interval_ms: u32,
    pub sample_interval_ms: u32,
    pub polarity: SensorPolarity,
    /// Full-scale ADC value; readings at either rail count as saturated
    pub adc_max: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServoConfig {
    /// PWM-capable GPIO driving the servo
    pub pin: u8,
    /// Barrier lowered, bay free to park (degrees)
    pub pos_down: u8,
    /// Barrier raised, bay blocked (degrees)
    pub pos_up: u8,
    /// Nominal duration of one motion
    pub speed_ms: u32,
    /// A motion that is not confirmed after `speed_ms * safety_factor` faults
    pub safety_factor: u32,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device id must not be empty")]
    EmptyDeviceId,
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("backend URL must start with http:// or https://")]
    InvalidBaseUrl,
    #[error("servo up and down positions must differ")]
    ServoEndpointsEqual,
    #[error("servo angle {0} exceeds 180 degrees")]
    ServoAngleOutOfRange(u8),
    #[error("request timeout must be shorter than the poll interval")]
    TimeoutTooLong,
    #[error("threshold {0} is outside the ADC range")]
    ThresholdOutOfRange(u16),
}

impl Default for DeviceConfig<'_> {
    fn default() -> Self {
        Self {
            device_id: "PARK_DEVICE_001",
            wifi: WifiConfig::default(),
            backend: BackendConfig {
                environment: Environment::Local,
                local_base: "http://192.168.1.255:8000",
                production_base: "https://api.gashis.ch/api",
            },
            sensor: SensorConfig {
                pin: 32,
                hall_threshold: 500,
                auto_calibrate: true,
                threshold_override: None,
                calibration_margin: 200,
                calibration_tolerance: 60,
                warmup_samples: 20,
                warmup_interval_ms: 50,
                sample_interval_ms: 200,
                polarity: SensorPolarity::Rising,
                adc_max: 4095,
            },
            servo: ServoConfig {
                pin: 25,
                pos_down: 0,
                pos_up: 90,
                speed_ms: 1000,
                safety_factor: 2,
            },
            poll_interval_ms: 10_000,
            telemetry_interval_ms: 30_000,
            request_timeout_ms: 3_000,
            max_backoff_factor: 8,
            status_led_pin: 2,
            debug_verbose: true,
        }
    }
}

impl<'a> DeviceConfig<'a> {
    /// Check the record once at boot, before any component is built
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceId);
        }

        let intervals = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("telemetry_interval_ms", self.telemetry_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("servo.speed_ms", self.servo.speed_ms),
            ("servo.safety_factor", self.servo.safety_factor),
            ("sensor.sample_interval_ms", self.sensor.sample_interval_ms),
            ("max_backoff_factor", self.max_backoff_factor),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        if self.sensor.auto_calibrate && self.sensor.warmup_samples == 0 {
            return Err(ConfigError::ZeroInterval("sensor.warmup_samples"));
        }

        if self.request_timeout_ms >= self.poll_interval_ms {
            return Err(ConfigError::TimeoutTooLong);
        }

        let base = self.backend.base_url();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl);
        }

        if self.servo.pos_up == self.servo.pos_down {
            return Err(ConfigError::ServoEndpointsEqual);
        }
        for angle in [self.servo.pos_up, self.servo.pos_down] {
            if angle > 180 {
                return Err(ConfigError::ServoAngleOutOfRange(angle));
            }
        }

        let thresholds = [Some(self.sensor.hall_threshold), self.sensor.threshold_override];
        for threshold in thresholds.into_iter().flatten() {
            if threshold > self.sensor.adc_max {
                return Err(ConfigError::ThresholdOutOfRange(threshold));
            }
        }

        Ok(())
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.debug_verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms as u64)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms as u64)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms as u64)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sensor.sample_interval_ms as u64)
    }
}

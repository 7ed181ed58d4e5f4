use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};
use thiserror_no_std::Error;

use super::{HallSensor, SensorError};
use crate::config::{SensorConfig, SensorPolarity};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("warm-up reading {0} sits at an ADC rail")]
    Saturated(u16),
    #[error("warm-up spread {spread} exceeds tolerance {tolerance}")]
    Unstable { spread: u16, tolerance: u16 },
    #[error("sensor failed during warm-up: {0}")]
    Read(SensorError),
}

/// Where the active threshold came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSource {
    /// Derived from warm-up readings at boot
    Calibrated,
    /// Taken from the configured `hall_threshold`
    Static,
}

/// Detection parameters, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationProfile {
    pub baseline: u16,
    pub threshold: u16,
    pub source: CalibrationSource,
}

impl CalibrationProfile {
    /// Profile built from the configured static threshold.
    ///
    /// No baseline has been measured, so it is reported equal to the threshold.
    pub const fn from_static(config: &SensorConfig) -> Self {
        Self {
            baseline: config.hall_threshold,
            threshold: config.hall_threshold,
            source: CalibrationSource::Static,
        }
    }

    /// Build the boot-time profile.
    ///
    /// Runs the warm-up when auto-calibration is enabled. A failed
    /// calibration is not fatal: the static threshold is used instead.
    pub async fn establish<S, D>(sensor: &mut S, delay: &mut D, config: &SensorConfig) -> Self
    where
        S: HallSensor,
        D: DelayNs,
    {
        if !config.auto_calibrate {
            info!(
                "Auto-calibration disabled, static threshold {}",
                config.hall_threshold
            );
            return Self::from_static(config);
        }

        match calibrate(sensor, delay, config).await {
            Ok(profile) => {
                info!(
                    "Hall sensor calibrated: baseline {} threshold {}",
                    profile.baseline, profile.threshold
                );
                profile
            }
            Err(e) => {
                warn!(
                    "Calibration failed ({}), falling back to static threshold {}",
                    e, config.hall_threshold
                );
                Self::from_static(config)
            }
        }
    }

    /// Whether a raw reading indicates a car above the sensor
    pub fn is_occupied(&self, raw: u16, polarity: SensorPolarity) -> bool {
        match polarity {
            SensorPolarity::Rising => raw >= self.threshold,
            SensorPolarity::Falling => raw <= self.threshold,
        }
    }
}

/// Sample the empty bay and derive baseline and threshold.
///
/// Takes `warmup_samples` readings `warmup_interval_ms` apart. The baseline
/// is their mean; the threshold sits `calibration_margin` away from it in the
/// direction of the configured polarity unless `threshold_override` is set.
pub async fn calibrate<S, D>(
    sensor: &mut S,
    delay: &mut D,
    config: &SensorConfig,
) -> Result<CalibrationProfile, CalibrationError>
where
    S: HallSensor,
    D: DelayNs,
{
    let samples = config.warmup_samples.max(1);
    let mut sum: u32 = 0;
    let mut min = u16::MAX;
    let mut max = u16::MIN;

    for i in 0..samples {
        if i > 0 {
            delay.delay_ms(config.warmup_interval_ms).await;
        }

        let raw = sensor.read_raw().await.map_err(CalibrationError::Read)?;
        if raw == 0 || raw >= config.adc_max {
            return Err(CalibrationError::Saturated(raw));
        }

        sum += raw as u32;
        min = min.min(raw);
        max = max.max(raw);
    }

    let spread = max - min;
    if spread > config.calibration_tolerance {
        return Err(CalibrationError::Unstable {
            spread,
            tolerance: config.calibration_tolerance,
        });
    }

    let baseline = (sum / samples as u32) as u16;
    let threshold = match config.threshold_override {
        Some(threshold) => threshold,
        None => match config.polarity {
            SensorPolarity::Rising => baseline
                .saturating_add(config.calibration_margin)
                .min(config.adc_max),
            SensorPolarity::Falling => baseline.saturating_sub(config.calibration_margin),
        },
    };
    debug!(
        "Warm-up: {} samples, min {} max {} mean {}",
        samples, min, max, baseline
    );

    Ok(CalibrationProfile {
        baseline,
        threshold,
        source: CalibrationSource::Calibrated,
    })
}

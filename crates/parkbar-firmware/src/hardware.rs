//! Peripheral drivers behind the core's hardware traits
//!
//! Pin assignment is fixed by the board wiring: the Hall sensor on GPIO32
//! (ADC1), the barrier servo on GPIO25 (LEDC) and the status LED on GPIO2.

use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::ledc::LowSpeed;
use esp_hal::ledc::channel::{Channel, ChannelHW};
use esp_hal::peripherals::{ADC1, GPIO32};
use thiserror_no_std::Error;

use parkbar_core::actuator::BarrierServo;
use parkbar_core::sensors::{HallSensor, SensorError};

pub const HALL_PIN: u8 = 32;
pub const SERVO_PIN: u8 = 25;
pub const STATUS_LED_PIN: u8 = 2;

/// Servo PWM frequency
pub const SERVO_FREQUENCY_HZ: u32 = 50;

/// LEDC counter resolution used for the servo timer
pub const SERVO_DUTY_BITS: u32 = 14;

const SERVO_PERIOD_US: u32 = 1_000_000 / SERVO_FREQUENCY_HZ;
const SERVO_MIN_PULSE_US: u32 = 500;
const SERVO_MAX_PULSE_US: u32 = 2_500;

/// Analog Hall sensor on one ADC1 channel
pub struct AdcHallSensor<'d> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    pin: AdcPin<GPIO32<'d>, ADC1<'d>>,
}

impl<'d> AdcHallSensor<'d> {
    pub fn new(adc: Adc<'d, ADC1<'d>, Blocking>, pin: AdcPin<GPIO32<'d>, ADC1<'d>>) -> Self {
        Self { adc, pin }
    }
}

impl HallSensor for AdcHallSensor<'_> {
    async fn read_raw(&mut self) -> Result<u16, SensorError> {
        // A one-shot conversion completes within microseconds
        nb::block!(self.adc.read_oneshot(&mut self.pin)).map_err(|_| SensorError::ReadFailed {
            sensor: "hall",
            details: "ADC1 conversion",
        })
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoError {
    #[error("angle {0} exceeds 180 degrees")]
    AngleOutOfRange(u8),
}

/// Hobby servo driven by one LEDC low-speed channel at 50 Hz
///
/// The servo has no position feedback, so the trait's default
/// confirmation (a successful endpoint write) applies.
pub struct LedcServo {
    channel: Channel<'static, LowSpeed>,
}

impl LedcServo {
    pub fn new(channel: Channel<'static, LowSpeed>) -> Self {
        Self { channel }
    }
}

/// LEDC duty for a 0.5 ms (0 degrees) to 2.5 ms (180 degrees) pulse
pub const fn duty_for_angle(degrees: u8) -> u32 {
    let pulse_us =
        SERVO_MIN_PULSE_US + (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) * degrees as u32 / 180;
    pulse_us * (1 << SERVO_DUTY_BITS) / SERVO_PERIOD_US
}

impl BarrierServo for LedcServo {
    type Error = ServoError;

    fn set_angle(&mut self, degrees: u8) -> Result<(), Self::Error> {
        if degrees > 180 {
            return Err(ServoError::AngleOutOfRange(degrees));
        }
        self.channel.set_duty_hw(duty_for_angle(degrees));
        Ok(())
    }
}

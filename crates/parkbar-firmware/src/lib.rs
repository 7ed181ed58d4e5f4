//! ESP32 firmware-specific modules for parkbar
//!
//! This crate contains the hardware-specific code that cannot compile on
//! desktop targets: the ADC Hall sensor and LEDC servo drivers, the WiFi
//! link with its HTTP(S) transport, and the status LED task. All
//! control logic lives in `parkbar_core`.

#![no_std]

extern crate alloc;

pub mod hardware;
pub mod net;
pub mod status_led;
pub mod wifi_secrets;

//! Status LED task
//!
//! The control loop publishes the current [`LedPattern`] through
//! [`LED_PATTERN`]; this task renders it and switches over as soon as a new
//! pattern is signalled, even mid-blink.

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use esp_hal::gpio::Output;

use parkbar_core::status::LedPattern;

pub static LED_PATTERN: Signal<CriticalSectionRawMutex, LedPattern> = Signal::new();

#[embassy_executor::task]
pub async fn status_led_task(mut led: Output<'static>) {
    let mut pattern = LedPattern::Off;

    loop {
        let Some((on, off)) = pattern.timing() else {
            if pattern.is_lit() {
                led.set_high();
            } else {
                led.set_low();
            }
            pattern = LED_PATTERN.wait().await;
            continue;
        };

        led.set_high();
        if let Either::Second(next) = select(Timer::after(on), LED_PATTERN.wait()).await {
            pattern = next;
            continue;
        }

        led.set_low();
        if let Either::Second(next) = select(Timer::after(off), LED_PATTERN.wait()).await {
            pattern = next;
        }
    }
}

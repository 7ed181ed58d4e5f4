#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use embassy_executor::Spawner;
use embassy_net::{Stack, StackResources};
use embassy_time::{Delay, Duration, Instant, Timer};
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::ledc::channel::{self, ChannelIFace};
use esp_hal::ledc::timer::{self, TimerIFace};
use esp_hal::ledc::{LSGlobalClkSource, Ledc, LowSpeed};
use esp_hal::rng::Rng;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use static_cell::StaticCell;

use parkbar_core::config::WifiConfig;
use parkbar_core::status::LedPattern;
use parkbar_core::{
    ActuatorController, CalibrationProfile, DeviceConfig, Scheduler, SensorMonitor, SyncAgent,
};
use parkbar_firmware::hardware::{
    AdcHallSensor, HALL_PIN, LedcServo, SERVO_FREQUENCY_HZ, SERVO_PIN, STATUS_LED_PIN,
};
use parkbar_firmware::net::{HttpTransport, TcpPool, WifiHealth, connection_task, net_task};
use parkbar_firmware::status_led::{LED_PATTERN, status_led_task};
use parkbar_firmware::wifi_secrets::{WIFI_PASSWORD, WIFI_SSID};

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
static TCP_POOL: StaticCell<TcpPool> = StaticCell::new();
static LEDC: StaticCell<Ledc<'static>> = StaticCell::new();
static SERVO_TIMER: StaticCell<timer::Timer<'static, LowSpeed>> = StaticCell::new();

/// Wait for DHCP before the first backend request
async fn wait_for_network(stack: Stack<'static>) {
    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        info!("Got IP {}", config.address);
    }
}

/// Park the node on an unusable configuration, blinking the fault pattern
async fn halt(reason: &str) -> ! {
    LED_PATTERN.signal(LedPattern::FastBlink);
    loop {
        error!("Control loop not started: {}", reason);
        Timer::after(Duration::from_secs(10)).await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = DeviceConfig {
        wifi: WifiConfig {
            ssid: WIFI_SSID,
            password: WIFI_PASSWORD,
        },
        ..DeviceConfig::default()
    };
    log::set_max_level(config.log_level());

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);
    // TLS record buffers
    esp_alloc::heap_allocator!(size: 32 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("parkbar {} booting as {}", env!("CARGO_PKG_VERSION"), config.device_id);

    // Status LED first so every later failure is visible
    let led = Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default());
    match status_led_task(led) {
        Ok(task) => spawner.spawn(task),
        Err(e) => warn!("Status LED task not started: {:?}", e),
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        halt("invalid configuration").await;
    }
    for (name, configured, wired) in [
        ("sensor.pin", config.sensor.pin, HALL_PIN),
        ("servo.pin", config.servo.pin, SERVO_PIN),
        ("status_led_pin", config.status_led_pin, STATUS_LED_PIN),
    ] {
        if configured != wired {
            warn!("{} is {} but the board wires GPIO{}", name, configured, wired);
        }
    }

    // Network
    let radio = match esp_radio::init() {
        Ok(radio) => RADIO.init(radio),
        Err(e) => {
            error!("Radio init failed: {:?}", e);
            halt("radio unavailable").await;
        }
    };
    let (wifi_controller, interfaces) =
        match esp_radio::wifi::new(radio, peripherals.WIFI, Default::default()) {
            Ok(wifi) => wifi,
            Err(e) => {
                error!("WiFi init failed: {:?}", e);
                halt("WiFi unavailable").await;
            }
        };

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        embassy_net::Config::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );

    match connection_task(wifi_controller) {
        Ok(task) => spawner.spawn(task),
        Err(e) => error!("WiFi connection task not started: {:?}", e),
    }
    match net_task(runner) {
        Ok(task) => spawner.spawn(task),
        Err(e) => error!("Network task not started: {:?}", e),
    }

    // Hall sensor on ADC1
    let mut adc_config = AdcConfig::new();
    let hall_pin = adc_config.enable_pin(peripherals.GPIO32, Attenuation::_11dB);
    let adc = Adc::new(peripherals.ADC1, adc_config);
    let mut hall = AdcHallSensor::new(adc, hall_pin);

    // Servo on LEDC, 50 Hz with 14-bit resolution
    let ledc = LEDC.init(Ledc::new(peripherals.LEDC));
    ledc.set_global_slow_clock(LSGlobalClkSource::APBClk);
    let servo_timer = SERVO_TIMER.init(ledc.timer::<LowSpeed>(timer::Number::Timer0));
    if let Err(e) = servo_timer.configure(timer::config::Config {
        duty: timer::config::Duty::Duty14Bit,
        clock_source: timer::LSClockSource::APBClk,
        frequency: Rate::from_hz(SERVO_FREQUENCY_HZ),
    }) {
        error!("Servo timer config failed: {:?}", e);
        halt("servo timer unavailable").await;
    }
    let mut servo_channel = ledc.channel(channel::Number::Channel0, peripherals.GPIO25);
    if let Err(e) = servo_channel.configure(channel::config::Config {
        timer: &*servo_timer,
        duty_pct: 0,
        pin_config: channel::config::PinConfig::PushPull,
    }) {
        error!("Servo channel config failed: {:?}", e);
        halt("servo channel unavailable").await;
    }

    let mut actuator = ActuatorController::new(LedcServo::new(servo_channel), &config.servo);
    if let Err(e) = actuator.init() {
        error!("Barrier init failed: {}", e);
    }

    // Calibrate while the network comes up; the bay must be empty at boot
    let profile = CalibrationProfile::establish(&mut hall, &mut Delay, &config.sensor).await;
    let monitor = SensorMonitor::new(hall, profile, config.sensor.polarity);

    LED_PATTERN.signal(LedPattern::SlowBlink);
    wait_for_network(stack).await;

    let transport = HttpTransport::new(
        stack,
        TCP_POOL.init(TcpPool::new()),
        rng,
        config.request_timeout(),
    );
    let sync = SyncAgent::new(transport, &config, Instant::now());
    let mut scheduler = Scheduler::new(
        &config,
        monitor,
        actuator,
        sync,
        WifiHealth,
        Instant::now(),
    );

    info!("Backend: {}", config.backend.base_url());
    scheduler
        .run(Instant::now, &mut Delay, |pattern| LED_PATTERN.signal(pattern))
        .await
}

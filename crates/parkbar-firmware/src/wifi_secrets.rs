//! WiFi credentials baked in at build time from `.env` (see `build.rs`)

pub const WIFI_SSID: &str = env!("WIFI_SSID");
pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

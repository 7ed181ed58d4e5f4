//! Bakes WiFi credentials from `.env` into the firmware image.
//!
//! `WIFI_SSID` and `WIFI_PASSWORD` are read from the environment or from a
//! `.env` file next to this crate. Missing values become empty strings so
//! the image still builds; the node then never associates.

const SECRETS: [&str; 2] = ["WIFI_SSID", "WIFI_PASSWORD"];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    for key in SECRETS {
        println!("cargo:rerun-if-env-changed={key}");
    }

    if let Err(e) = dotenvy::dotenv() {
        println!("cargo:warning=no .env loaded ({e}), using process environment");
    }

    for key in SECRETS {
        let value = std::env::var(key).unwrap_or_default();
        if value.is_empty() {
            println!("cargo:warning={key} is not set");
        }
        println!("cargo:rustc-env={key}={value}");
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}

//! WiFi link and the HTTP(S) transport
//!
//! [`connection_task`] keeps the station associated and samples RSSI into
//! [`LAST_RSSI`]; [`net_task`] runs the embassy-net stack. [`HttpTransport`]
//! issues requests through `reqwless` on that stack, over TLS for `https://`
//! bases.

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, Ordering};

use embassy_futures::select::{Either, select};
use embassy_net::dns::DnsSocket;
use embassy_net::tcp::client::{TcpClient, TcpClientState};
use embassy_net::{Runner, Stack};
use embassy_time::{Duration, Timer};
use embedded_io_async::Read;
use esp_hal::rng::Rng;
use esp_radio::wifi::{
    ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState,
};
use log::{debug, info, warn};
use reqwless::client::{HttpClient, TlsConfig, TlsVerify};
use reqwless::headers::ContentType;
use reqwless::request::{Method, RequestBuilder};

use parkbar_core::status::HealthProbe;
use parkbar_core::sync::{Response, Transport, TransportError};

use crate::wifi_secrets::{WIFI_PASSWORD, WIFI_SSID};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const RSSI_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

const TCP_BUFFER_SIZE: usize = 1024;
/// Response status line and headers
const HEADER_BUFFER_SIZE: usize = 1024;
/// One full TLS record
const TLS_READ_BUFFER_SIZE: usize = 16_640;
const TLS_WRITE_BUFFER_SIZE: usize = 4096;

/// Largest response body accepted
const MAX_BODY_SIZE: usize = 4096;

/// Socket pool backing [`HttpTransport`], one connection at a time
pub type TcpPool = TcpClientState<1, TCP_BUFFER_SIZE, TCP_BUFFER_SIZE>;

/// Last sampled RSSI in dBm, `i32::MIN` while not associated
pub static LAST_RSSI: AtomicI32 = AtomicI32::new(i32::MIN);

#[embassy_executor::task]
pub async fn connection_task(mut controller: WifiController<'static>) {
    info!("WiFi connection task started");

    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            match select(
                controller.wait_for_event(WifiEvent::StaDisconnected),
                Timer::after(RSSI_SAMPLE_INTERVAL),
            )
            .await
            {
                Either::First(()) => {
                    warn!("WiFi disconnected");
                    LAST_RSSI.store(i32::MIN, Ordering::Relaxed);
                    Timer::after(RECONNECT_DELAY).await;
                }
                Either::Second(()) => {
                    if let Ok(rssi) = controller.rssi() {
                        LAST_RSSI.store(rssi, Ordering::Relaxed);
                    }
                    continue;
                }
            }
        }

        if !matches!(controller.is_started(), Ok(true)) {
            let client = ClientConfig::default()
                .with_ssid(WIFI_SSID.to_string())
                .with_password(WIFI_PASSWORD.to_string());
            if let Err(e) = controller.set_config(&ModeConfig::Client(client)) {
                warn!("WiFi config rejected: {:?}", e);
                Timer::after(RECONNECT_DELAY).await;
                continue;
            }
            info!("Starting WiFi");
            if let Err(e) = controller.start_async().await {
                warn!("WiFi start failed: {:?}", e);
                Timer::after(RECONNECT_DELAY).await;
                continue;
            }
        }

        info!("Connecting to '{}'", WIFI_SSID);
        match controller.connect_async().await {
            Ok(()) => {
                info!("WiFi connected");
                if let Ok(rssi) = controller.rssi() {
                    LAST_RSSI.store(rssi, Ordering::Relaxed);
                }
            }
            Err(e) => {
                warn!("WiFi connect failed: {:?}", e);
                Timer::after(RECONNECT_DELAY).await;
            }
        }
    }
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// Health readings available on the bare board
pub struct WifiHealth;

impl HealthProbe for WifiHealth {
    fn rssi(&mut self) -> Option<i8> {
        match LAST_RSSI.load(Ordering::Relaxed) {
            i32::MIN => None,
            rssi => Some(rssi.clamp(i8::MIN as i32, i8::MAX as i32) as i8),
        }
    }

    fn supply_millivolts(&mut self) -> Option<u16> {
        None
    }
}

fn transport_error(error: reqwless::Error) -> TransportError {
    match error {
        reqwless::Error::Dns => TransportError::Dns,
        reqwless::Error::InvalidUrl(_) => TransportError::InvalidUrl,
        reqwless::Error::Tls(_) => TransportError::Tls,
        reqwless::Error::BufferTooSmall => TransportError::BodyTooLarge,
        reqwless::Error::Network(_) => TransportError::Io,
        _ => TransportError::MalformedResponse,
    }
}

/// Drain a response body into memory, refusing anything over [`MAX_BODY_SIZE`]
async fn read_body<R>(mut reader: R) -> Result<Vec<u8>, TransportError>
where
    R: Read,
{
    let mut body = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|_| TransportError::Io)?;
        if n == 0 {
            return Ok(body);
        }
        if body.len() + n > MAX_BODY_SIZE {
            return Err(TransportError::BodyTooLarge);
        }
        body.extend_from_slice(&chunk[..n]);
    }
}

/// JSON over HTTP or HTTPS, one connection per request
///
/// Server certificates are not verified; the TLS session only encrypts.
pub struct HttpTransport {
    stack: Stack<'static>,
    tcp: TcpClient<'static, 1, TCP_BUFFER_SIZE, TCP_BUFFER_SIZE>,
    dns: DnsSocket<'static>,
    rng: Rng,
    header_buffer: Box<[u8]>,
    tls_read_buffer: Box<[u8]>,
    tls_write_buffer: Box<[u8]>,
}

impl HttpTransport {
    pub fn new(
        stack: Stack<'static>,
        pool: &'static TcpPool,
        rng: Rng,
        timeout: Duration,
    ) -> Self {
        let mut tcp = TcpClient::new(stack, pool);
        tcp.set_timeout(Some(timeout));
        Self {
            stack,
            tcp,
            dns: DnsSocket::new(stack),
            rng,
            header_buffer: vec![0; HEADER_BUFFER_SIZE].into_boxed_slice(),
            tls_read_buffer: vec![0; TLS_READ_BUFFER_SIZE].into_boxed_slice(),
            tls_write_buffer: vec![0; TLS_WRITE_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    async fn request(
        &mut self,
        method: Method,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<Response, TransportError> {
        if !self.stack.is_link_up() || self.stack.config_v4().is_none() {
            return Err(TransportError::NotConnected);
        }

        let seed = (self.rng.random() as u64) << 32 | self.rng.random() as u64;
        let tls = TlsConfig::new(
            seed,
            &mut self.tls_read_buffer,
            &mut self.tls_write_buffer,
            TlsVerify::None,
        );
        let mut client = HttpClient::new_with_tls(&self.tcp, &self.dns, tls);
        debug!("{} {}", if body.is_some() { "POST" } else { "GET" }, url);

        let request = client
            .request(method, url)
            .await
            .map_err(transport_error)?
            .headers(&[("Accept", "application/json")]);

        match body {
            Some(payload) => {
                let mut request = request
                    .body(payload)
                    .content_type(ContentType::ApplicationJson);
                let response = request
                    .send(&mut self.header_buffer)
                    .await
                    .map_err(transport_error)?;
                let status = response.status.0;
                let body = read_body(response.body().reader()).await?;
                Ok(Response { status, body })
            }
            None => {
                let mut request = request;
                let response = request
                    .send(&mut self.header_buffer)
                    .await
                    .map_err(transport_error)?;
                let status = response.status.0;
                let body = read_body(response.body().reader()).await?;
                Ok(Response { status, body })
            }
        }
    }
}

impl Transport for HttpTransport {
    async fn get(&mut self, url: &str, _timeout: Duration) -> Result<Response, TransportError> {
        self.request(Method::GET, url, None).await
    }

    async fn post(
        &mut self,
        url: &str,
        body: &[u8],
        _timeout: Duration,
    ) -> Result<Response, TransportError> {
        self.request(Method::POST, url, Some(body)).await
    }
}

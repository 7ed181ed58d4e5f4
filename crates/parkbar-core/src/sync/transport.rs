use alloc::vec::Vec;

use embassy_time::Duration;
use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network link is down")]
    NotConnected,
    #[error("could not resolve host")]
    Dns,
    #[error("socket I/O failed")]
    Io,
    #[error("invalid URL")]
    InvalidUrl,
    #[error("TLS handshake or record failure")]
    Tls,
    #[error("malformed HTTP response")]
    MalformedResponse,
    #[error("response exceeds the receive buffer")]
    BodyTooLarge,
}

/// Status and body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: &[u8]) -> Self {
        Self {
            status,
            body: body.to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client the node reaches its backend through
///
/// Implementations honour `timeout` themselves; the caller also abandons
/// the returned future once the timeout elapses, so an implementation must
/// not leave shared state half-updated across an await point.
pub trait Transport {
    fn get(
        &mut self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Response, TransportError>>;

    fn post(
        &mut self,
        url: &str,
        body: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<Response, TransportError>>;
}

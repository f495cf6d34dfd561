//! Node-wide run state and error types

use heapless::String;
use thiserror_no_std::Error;

use crate::actuator::ActuatorError;
use crate::evidence::CaptureError;
use crate::http::{HttpError, TransportError};
use crate::peer::PeerError;

/// Delay before a node restarts itself after a fatal boot error
pub const FATAL_RESTART_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRunState {
    Booting,
    WifiConnecting,
    WifiConnected,
    Ready,
    Error,
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("WiFi connection failed: {0}")]
    Wifi(String<64>),
    #[error("Hardware initialization failed: {0}")]
    HardwareInit(String<64>),
    #[error("Transport failure: {0}")]
    Transport(TransportError),
    #[error("HTTP error: {0}")]
    Http(HttpError),
    #[error("Actuator error: {0}")]
    Actuator(ActuatorError),
    #[error("Capture error: {0}")]
    Capture(CaptureError),
    #[error("Peer trigger failed: {0}")]
    Peer(PeerError),
}

impl NodeError {
    /// Errors the node cannot recover from without a restart
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::HardwareInit(_))
    }
}

impl From<ActuatorError> for NodeError {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

impl From<TransportError> for NodeError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<HttpError> for NodeError {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

impl From<PeerError> for NodeError {
    fn from(e: PeerError) -> Self {
        Self::Peer(e)
    }
}

/// Build a bounded string, cutting at the last whole character that fits.
pub trait FromTruncated<T> {
    fn from_truncated(value: T) -> Self;
}

impl<'a, const N: usize> FromTruncated<&'a str> for String<N> {
    fn from_truncated(value: &'a str) -> Self {
        let mut out = String::new();
        for c in value.chars() {
            if out.push(c).is_err() {
                break;
            }
        }
        out
    }
}

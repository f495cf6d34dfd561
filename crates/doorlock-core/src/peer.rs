//! Reader-to-lock trigger
//!
//! A reader node has no actuator of its own. On a grant it pokes the lock
//! node's `/unlock` endpoint and moves on; the lock node owns the hold timer.

use embedded_hal_async::delay::DelayNs;
use log::{error, info};
use serde::Deserialize;
use thiserror_no_std::Error;

use crate::config::PeerConfig;
use crate::http::{
    HttpError, HttpTransport, Method, REQUEST_HEAD_CAPACITY, RequestHead, TransportError,
    parse_response,
};
use crate::retry::retry;

const ACK_CAPACITY: usize = 256;

/// Why a single trigger attempt failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAttemptError {
    #[error("{0}")]
    Transport(TransportError),
    #[error("Lock node answered {0}")]
    Status(u16),
}

impl From<TransportError> for PeerAttemptError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<HttpError> for PeerAttemptError {
    fn from(e: HttpError) -> Self {
        Self::Transport(TransportError::Framing(e))
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerError {
    #[error("Trigger request does not fit: {0}")]
    Request(HttpError),
    #[error("Lock node unreachable after {attempts} attempts: {last}")]
    Exhausted { attempts: u8, last: PeerAttemptError },
}

/// Acknowledgement from the lock node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerAck {
    /// The lock was already open; its hold window was not extended
    pub already_unlocked: bool,
}

#[derive(Deserialize)]
struct AckBody {
    #[serde(default)]
    already_unlocked: bool,
}

pub struct PeerTrigger<'a, T, D> {
    transport: T,
    delay: D,
    config: PeerConfig<'a>,
    response: [u8; ACK_CAPACITY],
}

impl<'a, T, D> PeerTrigger<'a, T, D>
where
    T: HttpTransport,
    D: DelayNs,
{
    pub fn new(transport: T, delay: D, config: PeerConfig<'a>) -> Self {
        Self {
            transport,
            delay,
            config,
            response: [0; ACK_CAPACITY],
        }
    }

    pub fn config(&self) -> &PeerConfig<'a> {
        &self.config
    }

    /// Ask the lock node to open. Any 2xx counts as success.
    pub async fn trigger_unlock(&mut self) -> Result<PeerAck, PeerError> {
        let endpoint = self.config.endpoint();
        let timeout = self.config.timeout();

        let head = RequestHead {
            method: Method::Post,
            path: self.config.path,
            api_key: None,
            content_type: None,
            content_length: 0,
        };
        let mut head_buf = [0u8; REQUEST_HEAD_CAPACITY];
        let head_len = head
            .write(&endpoint, &mut head_buf)
            .map_err(PeerError::Request)?;
        let head_bytes = &head_buf[..head_len];

        let Self {
            transport,
            delay,
            config,
            response,
        } = self;

        let ack = retry(config.retry, delay, "peer unlock", async |_| {
            let len = transport
                .exchange(&endpoint, head_bytes, &[], &mut response[..], timeout)
                .await?;
            let reply = parse_response(&response[..len])?;
            if !reply.is_success() {
                return Err(PeerAttemptError::Status(reply.status));
            }

            // An ack we cannot read still means the lock node accepted.
            let ack = serde_json_core::from_slice::<AckBody>(reply.body)
                .map(|(body, _)| PeerAck {
                    already_unlocked: body.already_unlocked,
                })
                .unwrap_or_default();
            Ok(ack)
        })
        .await
        .map_err(|e| {
            error!("Peer unlock abandoned after {} attempts: {}", e.attempts, e.last);
            PeerError::Exhausted {
                attempts: e.attempts,
                last: e.last,
            }
        })?;

        info!(
            "Lock node at {} acknowledged unlock{}",
            endpoint.host,
            if ack.already_unlocked { " (already open)" } else { "" }
        );
        Ok(ack)
    }
}

//! Remote authorizer client
//!
//! Posts evidence to the backend and turns the reply into a [`Decision`].
//! Transport failures are retried per the configured policy; an HTTP reply
//! of any status is a decision and is never retried.

use embedded_hal_async::delay::DelayNs;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::authorization::{Decision, DenialReason, decode_decision};
use crate::config::AuthorizerConfig;
use crate::evidence::Evidence;
use crate::http::{
    HttpError, HttpTransport, Method, REQUEST_HEAD_CAPACITY, RequestHead, TransportError,
    parse_response,
};
use crate::retry::{Exhausted, retry};

/// Receive buffer for authorizer replies
pub const RESPONSE_CAPACITY: usize = 512;

const JSON_CONTENT_TYPE: &str = "application/json";
const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Anything that can decide whether evidence opens the door.
pub trait Authorizer {
    fn authorize(&mut self, evidence: &Evidence<'_>) -> impl Future<Output = Decision>;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizerError {
    #[error("Authorizer unreachable after {attempts} attempts: {last}")]
    Unreachable { attempts: u8, last: TransportError },
    #[error("HTTP error: {0}")]
    Http(HttpError),
    #[error("Authorizer rejected the API key")]
    Unauthorized,
    #[error("Unexpected HTTP status {0}")]
    Status(u16),
    #[error("Unreadable reply body")]
    Malformed,
}

impl From<Exhausted<TransportError>> for AuthorizerError {
    fn from(e: Exhausted<TransportError>) -> Self {
        Self::Unreachable {
            attempts: e.attempts,
            last: e.last,
        }
    }
}

/// Result of the boot-time health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendHealth {
    /// Identities the backend can currently match against
    pub known: u32,
}

#[derive(Serialize)]
struct RfidRequest<'a> {
    uid: &'a str,
}

#[derive(Deserialize)]
struct HealthBody<'a> {
    status: &'a str,
    #[serde(default)]
    known: u32,
}

/// HTTP client for the recognition/RFID backend
pub struct HttpAuthorizer<'a, T, D> {
    transport: T,
    delay: D,
    config: AuthorizerConfig<'a>,
    response: [u8; RESPONSE_CAPACITY],
}

impl<'a, T, D> HttpAuthorizer<'a, T, D>
where
    T: HttpTransport,
    D: DelayNs,
{
    pub fn new(transport: T, delay: D, config: AuthorizerConfig<'a>) -> Self {
        Self {
            transport,
            delay,
            config,
            response: [0; RESPONSE_CAPACITY],
        }
    }

    pub fn config(&self) -> &AuthorizerConfig<'a> {
        &self.config
    }

    /// Check `GET /api/health` with the shared secret.
    pub async fn health(&mut self) -> Result<BackendHealth, AuthorizerError> {
        let head = RequestHead {
            method: Method::Get,
            path: self.config.health_path,
            api_key: Some(self.config.api_key),
            content_type: None,
            content_length: 0,
        };

        let len = self.send(&head, &[]).await?;
        let response = parse_response(&self.response[..len]).map_err(AuthorizerError::Http)?;

        match response.status {
            401 | 403 => return Err(AuthorizerError::Unauthorized),
            status if !response.is_success() => return Err(AuthorizerError::Status(status)),
            _ => {}
        }

        let (body, _) = serde_json_core::from_slice::<HealthBody<'_>>(response.body)
            .map_err(|_| AuthorizerError::Malformed)?;
        if body.status != "ok" {
            return Err(AuthorizerError::Malformed);
        }

        info!("Authorizer healthy, {} known identities", body.known);
        Ok(BackendHealth { known: body.known })
    }

    /// Send one request with retries; returns the length of the framed reply.
    async fn send(&mut self, head: &RequestHead<'_>, body: &[u8]) -> Result<usize, AuthorizerError> {
        let endpoint = self.config.endpoint();
        let timeout = self.config.timeout();

        let mut head_buf = [0u8; REQUEST_HEAD_CAPACITY];
        let head_len = head
            .write(&endpoint, &mut head_buf)
            .map_err(AuthorizerError::Http)?;
        let head_bytes = &head_buf[..head_len];

        let Self {
            transport,
            delay,
            config,
            response,
        } = self;

        let len = retry(config.retry, delay, "authorizer", async |_| {
            let len = transport
                .exchange(&endpoint, head_bytes, body, &mut response[..], timeout)
                .await?;
            // Only a fully framed reply counts; garbage is retried like a drop.
            parse_response(&response[..len])?;
            Ok::<usize, TransportError>(len)
        })
        .await?;

        Ok(len)
    }
}

impl<T, D> Authorizer for HttpAuthorizer<'_, T, D>
where
    T: HttpTransport,
    D: DelayNs,
{
    async fn authorize(&mut self, evidence: &Evidence<'_>) -> Decision {
        if evidence.is_empty() {
            warn!("Refusing to submit empty {} evidence", evidence.kind());
            return Decision::denied(Some(DenialReason::EmptyPayload));
        }

        let mut json = [0u8; 64];
        let (path, content_type, body): (&str, &str, &[u8]) = match evidence {
            Evidence::Image(frame) => (self.config.recognize_path, IMAGE_CONTENT_TYPE, frame),
            Evidence::Tag(uid) => {
                let uid = uid.to_text();
                let len = match serde_json_core::to_slice(&RfidRequest { uid: &uid }, &mut json) {
                    Ok(len) => len,
                    Err(e) => {
                        error!("Failed to encode RFID request: {:?}", e);
                        return Decision::unreachable();
                    }
                };
                (self.config.rfid_path, JSON_CONTENT_TYPE, &json[..len])
            }
        };

        let head = RequestHead {
            method: Method::Post,
            path,
            api_key: Some(self.config.api_key),
            content_type: Some(content_type),
            content_length: body.len(),
        };

        let len = match self.send(&head, body).await {
            Ok(len) => len,
            Err(e) => {
                error!("Authorization abandoned: {}", e);
                return Decision::unreachable();
            }
        };

        let decision = match parse_response(&self.response[..len]) {
            Ok(response) => decode_decision(response.status, response.body),
            Err(e) => {
                error!("Authorizer reply unreadable: {}", e);
                Decision::unreachable()
            }
        };

        if let Some(reason) = decision.reason.filter(|r| r.is_configuration_fault()) {
            error!("Authorizer refused this node ({}), check API key and backend", reason);
        }

        decision
    }
}

//! Fakes shared by the unit tests

extern crate std;

use std::collections::VecDeque;
use std::format;
use std::string::String;
use std::vec::Vec;

use embassy_time::Duration;
use embedded_hal::digital::{self, OutputPin};
use embedded_hal::pwm::{self, SetDutyCycle};
use embedded_hal_async::delay::DelayNs;

use crate::actuator::{Actuator, ActuatorError, LockPosition};
use crate::authorization::Decision;
use crate::authorizer::Authorizer;
use crate::evidence::{CaptureError, Evidence, EvidenceSource, TagUid};
use crate::http::{Endpoint, HttpTransport, TransportError, reason_phrase};
use crate::indicator::{Status, StatusIndicator};

/// Output pin recording every level written to it
#[derive(Debug, Default)]
pub struct FakePin {
    pub levels: Vec<bool>,
    fail: bool,
}

impl FakePin {
    pub fn failing() -> Self {
        Self {
            levels: Vec::new(),
            fail: true,
        }
    }

    fn write(&mut self, high: bool) -> Result<(), digital::ErrorKind> {
        if self.fail {
            return Err(digital::ErrorKind::Other);
        }
        self.levels.push(high);
        Ok(())
    }
}

impl digital::ErrorType for FakePin {
    type Error = digital::ErrorKind;
}

impl OutputPin for FakePin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

/// PWM channel recording every duty written to it
#[derive(Debug)]
pub struct FakePwm {
    pub duties: Vec<u16>,
    max: u16,
}

impl FakePwm {
    pub fn new(max: u16) -> Self {
        Self {
            duties: Vec::new(),
            max,
        }
    }
}

impl pwm::ErrorType for FakePwm {
    type Error = pwm::ErrorKind;
}

impl SetDutyCycle for FakePwm {
    fn max_duty_cycle(&self) -> u16 {
        self.max
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.duties.push(duty);
        Ok(())
    }
}

/// Actuator recording successful moves; can be told to fail
#[derive(Debug, Default)]
pub struct RecordingActuator {
    pub positions: Vec<LockPosition>,
    /// Fail this many upcoming moves
    pub fail_next: usize,
    always_fail: bool,
}

impl RecordingActuator {
    pub fn failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }
}

impl Actuator for RecordingActuator {
    fn set_position(&mut self, position: LockPosition) -> Result<(), ActuatorError> {
        if self.always_fail {
            return Err(ActuatorError::Pin);
        }
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(ActuatorError::Pin);
        }
        self.positions.push(position);
        Ok(())
    }
}

/// Delay that returns immediately and records what was asked for
#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub delays_ms: Vec<u32>,
}

impl DelayNs for RecordingDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.delays_ms.push(ns / 1_000_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.delays_ms.push(ms);
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub host: String,
    pub port: u16,
    pub head: String,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

/// Transport replaying scripted replies in order. Runs dry as `Connect`.
#[derive(Debug, Default)]
pub struct FakeTransport {
    replies: VecDeque<Result<Vec<u8>, TransportError>>,
    pub requests: Vec<RecordedRequest>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a well-formed reply
    pub fn reply(self, status: u16, body: &str) -> Self {
        let phrase = match reason_phrase(status) {
            "" => "Status",
            phrase => phrase,
        };
        let raw = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            phrase,
            body.len(),
            body
        );
        self.raw(raw.as_bytes())
    }

    /// Queue raw bytes as the reply
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.replies.push_back(Ok(bytes.to_vec()));
        self
    }

    pub fn fail(mut self, error: TransportError) -> Self {
        self.replies.push_back(Err(error));
        self
    }
}

impl HttpTransport for FakeTransport {
    async fn exchange(
        &mut self,
        endpoint: &Endpoint<'_>,
        head: &[u8],
        body: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.requests.push(RecordedRequest {
            host: endpoint.host.into(),
            port: endpoint.port,
            head: String::from_utf8_lossy(head).into_owned(),
            body: body.to_vec(),
            timeout,
        });

        let reply = self
            .replies
            .pop_front()
            .unwrap_or(Err(TransportError::Connect))?;
        let len = reply.len().min(response.len());
        response[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }
}

/// Owned form of what a [`ScriptedSource`] presents
#[derive(Debug, Clone)]
pub enum Presented {
    Image(Vec<u8>),
    Tag(TagUid),
}

impl Presented {
    pub fn tag(bytes: &[u8]) -> Self {
        Self::Tag(TagUid::new(bytes).unwrap())
    }
}

/// Evidence source playing back one scripted step per acquire.
/// Runs dry as "nothing presented".
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: VecDeque<Result<Option<Presented>, CaptureError>>,
    current: Option<Presented>,
    pub acquires: usize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn present(mut self, presented: Presented) -> Self {
        self.script.push_back(Ok(Some(presented)));
        self
    }

    pub fn nothing(mut self) -> Self {
        self.script.push_back(Ok(None));
        self
    }

    pub fn fail(mut self, error: CaptureError) -> Self {
        self.script.push_back(Err(error));
        self
    }
}

impl EvidenceSource for ScriptedSource {
    async fn acquire(&mut self) -> Result<bool, CaptureError> {
        self.acquires += 1;
        self.current = None;
        self.current = self.script.pop_front().unwrap_or(Ok(None))?;
        Ok(self.current.is_some())
    }

    fn evidence(&self) -> Option<Evidence<'_>> {
        self.current.as_ref().map(|presented| match presented {
            Presented::Image(frame) => Evidence::Image(frame),
            Presented::Tag(uid) => Evidence::Tag(uid.clone()),
        })
    }
}

/// Authorizer answering from a script. Runs dry as unreachable.
#[derive(Debug, Default)]
pub struct ScriptedAuthorizer {
    decisions: VecDeque<Decision>,
    /// Kind of every evidence submitted
    pub seen: Vec<&'static str>,
}

impl ScriptedAuthorizer {
    pub fn answering(decisions: impl IntoIterator<Item = Decision>) -> Self {
        Self {
            decisions: decisions.into_iter().collect(),
            seen: Vec::new(),
        }
    }
}

impl Authorizer for ScriptedAuthorizer {
    async fn authorize(&mut self, evidence: &Evidence<'_>) -> Decision {
        self.seen.push(evidence.kind());
        self.decisions
            .pop_front()
            .unwrap_or_else(Decision::unreachable)
    }
}

#[derive(Debug, Default)]
pub struct RecordingIndicator {
    pub shown: Vec<Status>,
}

impl StatusIndicator for RecordingIndicator {
    async fn show(&mut self, status: Status) {
        self.shown.push(status);
    }
}

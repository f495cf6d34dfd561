//! Lock node HTTP endpoint
//!
//! Transport-agnostic: the caller reads a request into a buffer, hands it
//! here together with the gate, and writes whatever lands in `out` back to
//! the socket.

use embassy_time::Instant;
use log::{error, info, warn};
use serde::Serialize;

use crate::actuator::Actuator;
use crate::gate::{ActuatorGate, GateEvent};
use crate::http::{HttpError, Method, parse_request, write_response};

pub const UNLOCK_PATH: &str = "/unlock";
pub const STATUS_PATH: &str = "/status";

/// Room for a request head from a peer or a browser
pub const REQUEST_CAPACITY: usize = 1024;
/// Room for any response this endpoint produces
pub const RESPONSE_CAPACITY: usize = 256;

#[derive(Serialize)]
struct UnlockAck {
    status: &'static str,
    already_unlocked: bool,
}

#[derive(Serialize)]
struct LockStatus {
    locked: bool,
}

/// A written response and what it did to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handled {
    /// Bytes of `out` holding the response
    pub len: usize,
    pub status: u16,
    /// Set when the request reached the gate
    pub event: Option<GateEvent>,
}

/// Answer one request against the gate.
///
/// Only fails if `out` is too small for the response.
pub fn handle_request<A: Actuator>(
    raw: &[u8],
    gate: &mut ActuatorGate<A>,
    now: Instant,
    out: &mut [u8],
) -> Result<Handled, HttpError> {
    let request = match parse_request(raw) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejecting unreadable request: {}", e);
            return respond(out, 400, br#"{"status":"bad_request"}"#, None);
        }
    };

    match (request.path, request.method) {
        (UNLOCK_PATH, Method::Get | Method::Post) => unlock(gate, now, out),
        (UNLOCK_PATH, _) => respond(out, 405, br#"{"status":"method_not_allowed"}"#, None),
        (STATUS_PATH, Method::Get) => {
            let mut body = [0u8; 32];
            let len = serde_json_core::to_slice(
                &LockStatus {
                    locked: gate.is_locked(),
                },
                &mut body,
            )
            .map_err(|_| HttpError::BufferTooSmall)?;
            respond(out, 200, &body[..len], None)
        }
        (STATUS_PATH, _) => respond(out, 405, br#"{"status":"method_not_allowed"}"#, None),
        (path, _) => {
            warn!("No route for {} {}", request.method_name, path);
            respond(out, 404, br#"{"status":"not_found"}"#, None)
        }
    }
}

fn unlock<A: Actuator>(
    gate: &mut ActuatorGate<A>,
    now: Instant,
    out: &mut [u8],
) -> Result<Handled, HttpError> {
    let event = match gate.request_unlock(now) {
        Ok(event) => event,
        Err(e) => {
            error!("Remote unlock failed: {}", e);
            return respond(out, 500, br#"{"status":"error"}"#, None);
        }
    };

    let already_unlocked = event == GateEvent::AlreadyUnlocked;
    info!("Remote unlock request: {:?}", event);

    let mut body = [0u8; 64];
    let len = serde_json_core::to_slice(
        &UnlockAck {
            status: "unlocked",
            already_unlocked,
        },
        &mut body,
    )
    .map_err(|_| HttpError::BufferTooSmall)?;

    respond(out, 200, &body[..len], Some(event))
}

fn respond(
    out: &mut [u8],
    status: u16,
    body: &[u8],
    event: Option<GateEvent>,
) -> Result<Handled, HttpError> {
    let len = write_response(out, status, body)?;
    Ok(Handled { len, status, event })
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::actuator::LockPosition;
    use crate::http::parse_response;
    use crate::testing::RecordingActuator;
    use embassy_time::Duration;

    fn gate() -> ActuatorGate<RecordingActuator> {
        ActuatorGate::new(RecordingActuator::default(), Duration::from_secs(5))
    }

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn body_of(out: &[u8], handled: &Handled) -> std::string::String {
        let response = parse_response(&out[..handled.len]).unwrap();
        assert_eq!(response.status, handled.status);
        std::string::String::from_utf8(response.body.to_vec()).unwrap()
    }

    #[test]
    fn unlock_opens_gate_and_acks() {
        let mut gate = gate();
        let mut out = [0u8; RESPONSE_CAPACITY];

        let handled = handle_request(
            b"POST /unlock HTTP/1.1\r\nHost: lock\r\nContent-Length: 0\r\n\r\n",
            &mut gate,
            at(1000),
            &mut out,
        )
        .unwrap();

        assert_eq!(handled.status, 200);
        assert_eq!(handled.event, Some(GateEvent::Unlocked));
        assert_eq!(
            body_of(&out, &handled),
            r#"{"status":"unlocked","already_unlocked":false}"#
        );
        assert_eq!(gate.state().unlocked_at(), Some(at(1000)));
        assert_eq!(gate.actuator().positions, [LockPosition::Unlocked]);
    }

    #[test]
    fn get_unlock_is_accepted_too() {
        let mut gate = gate();
        let mut out = [0u8; RESPONSE_CAPACITY];

        let handled =
            handle_request(b"GET /unlock HTTP/1.1\r\n\r\n", &mut gate, at(0), &mut out).unwrap();

        assert_eq!(handled.status, 200);
        assert!(!gate.is_locked());
    }

    #[test]
    fn repeated_unlock_keeps_original_timestamp() {
        let mut gate = gate();
        let mut out = [0u8; RESPONSE_CAPACITY];
        let request = b"POST /unlock HTTP/1.1\r\n\r\n";

        handle_request(request, &mut gate, at(1000), &mut out).unwrap();
        let handled = handle_request(request, &mut gate, at(3000), &mut out).unwrap();

        assert_eq!(handled.event, Some(GateEvent::AlreadyUnlocked));
        assert_eq!(
            body_of(&out, &handled),
            r#"{"status":"unlocked","already_unlocked":true}"#
        );
        assert_eq!(gate.state().unlocked_at(), Some(at(1000)));
        assert_eq!(gate.actuator().positions, [LockPosition::Unlocked]);
    }

    #[test]
    fn actuator_failure_is_a_server_error() {
        let mut gate = ActuatorGate::new(RecordingActuator::failing(), Duration::from_secs(5));
        let mut out = [0u8; RESPONSE_CAPACITY];

        let handled =
            handle_request(b"POST /unlock HTTP/1.1\r\n\r\n", &mut gate, at(0), &mut out).unwrap();

        assert_eq!(handled.status, 500);
        assert_eq!(handled.event, None);
        assert_eq!(body_of(&out, &handled), r#"{"status":"error"}"#);
        assert!(gate.is_locked());
    }

    #[test]
    fn status_reports_lock_state() {
        let mut gate = gate();
        let mut out = [0u8; RESPONSE_CAPACITY];

        let handled =
            handle_request(b"GET /status HTTP/1.1\r\n\r\n", &mut gate, at(0), &mut out).unwrap();
        assert_eq!(body_of(&out, &handled), r#"{"locked":true}"#);

        gate.request_unlock(at(0)).unwrap();
        let handled =
            handle_request(b"GET /status HTTP/1.1\r\n\r\n", &mut gate, at(10), &mut out).unwrap();
        assert_eq!(body_of(&out, &handled), r#"{"locked":false}"#);
    }

    #[test]
    fn query_string_is_ignored() {
        let mut gate = gate();
        let mut out = [0u8; RESPONSE_CAPACITY];

        let handled = handle_request(
            b"GET /unlock?from=reader HTTP/1.1\r\n\r\n",
            &mut gate,
            at(0),
            &mut out,
        )
        .unwrap();

        assert_eq!(handled.status, 200);
    }

    #[test]
    fn unknown_routes_and_methods() {
        let mut gate = gate();
        let mut out = [0u8; RESPONSE_CAPACITY];

        let handled =
            handle_request(b"GET /open HTTP/1.1\r\n\r\n", &mut gate, at(0), &mut out).unwrap();
        assert_eq!(handled.status, 404);

        let handled =
            handle_request(b"DELETE /unlock HTTP/1.1\r\n\r\n", &mut gate, at(0), &mut out)
                .unwrap();
        assert_eq!(handled.status, 405);

        let handled =
            handle_request(b"\x16\x03\x01garbage\r\n\r\n", &mut gate, at(0), &mut out).unwrap();
        assert_eq!(handled.status, 400);

        assert!(gate.is_locked());
        assert!(gate.actuator().positions.is_empty());
    }

    #[test]
    fn tiny_output_buffer_is_an_error() {
        let mut gate = gate();
        let mut out = [0u8; 8];

        assert_eq!(
            handle_request(b"GET /status HTTP/1.1\r\n\r\n", &mut gate, at(0), &mut out),
            Err(HttpError::BufferTooSmall)
        );
    }
}

//! In-process network: a stand-in authorizer backend and a lock node.
//!
//! Nodes under simulation get a [`Loopback`] as their `HttpTransport`. Requests
//! to [`BACKEND_HOST`] are answered by a [`Directory`] that follows the real
//! backend's reply format; requests to [`LOCK_HOST`] go through the same
//! `/unlock` handler the lock firmware runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use doorlock_core::actuator::{Actuator, ActuatorError, LockPosition};
use doorlock_core::clock::{Clock, ManualClock};
use doorlock_core::gate::{ActuatorGate, GateEvent};
use doorlock_core::http::{Endpoint, HttpTransport, Method, TransportError, parse_request, write_response};
use doorlock_core::unlock_server::{self, handle_request};
use embassy_time::Duration;
use log::{debug, info};
use serde_json::{Value, json};

pub const BACKEND_HOST: &str = "authorizer.local";
pub const LOCK_HOST: &str = "lock.local";

/// JPEG start/end markers around the simulated frame payload
const SOI: &[u8] = &[0xff, 0xd8];
const EOI: &[u8] = &[0xff, 0xd9];
const FACE_TAG: &[u8] = b"FACE:";

/// A fake camera frame showing `name`'s face
pub fn face_frame(name: &str) -> Vec<u8> {
    [SOI, FACE_TAG, name.as_bytes(), EOI].concat()
}

/// A valid frame with nobody in it
pub fn empty_scene_frame() -> Vec<u8> {
    [SOI, b"hallway".as_slice(), EOI].concat()
}

/// Relay stand-in that logs every move
#[derive(Debug)]
pub struct LoggingActuator {
    name: &'static str,
    pub moves: usize,
}

impl LoggingActuator {
    pub fn new(name: &'static str) -> Self {
        Self { name, moves: 0 }
    }
}

impl Actuator for LoggingActuator {
    fn set_position(&mut self, position: LockPosition) -> Result<(), ActuatorError> {
        self.moves += 1;
        info!("[{}] actuator -> {:?}", self.name, position);
        Ok(())
    }
}

/// Identities the stand-in backend knows about
#[derive(Debug, Clone)]
pub struct Directory {
    api_key: String,
    /// Card UID text to assigned user; `None` for a registered but unassigned card
    cards: HashMap<String, Option<String>>,
    faces: Vec<String>,
}

impl Directory {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_owned(),
            cards: HashMap::new(),
            faces: Vec::new(),
        }
    }

    pub fn with_card(mut self, uid: &str, user: Option<&str>) -> Self {
        self.cards.insert(uid.to_owned(), user.map(str::to_owned));
        self
    }

    pub fn with_face(mut self, name: &str) -> Self {
        self.faces.push(name.to_owned());
        self
    }

    fn answer(&self, head: &[u8], body: &[u8]) -> (u16, Value) {
        let Ok(request) = parse_request(head) else {
            return (400, json!({"status": "error"}));
        };
        let key_ok = api_key(head).is_some_and(|key| key == self.api_key);

        match (request.method, request.path) {
            (Method::Get, "/api/health") if key_ok => {
                (200, json!({"status": "ok", "known": self.faces.len()}))
            }
            (Method::Get, "/api/health") => (401, json!({"status": "unauthorized"})),
            (Method::Post, "/api/rfid") if key_ok => self.rfid(body),
            (Method::Post, "/api/rfid") => {
                (403, json!({"status": "denied", "reason": "invalid_api_key"}))
            }
            (Method::Post, "/api/recognize") if key_ok => self.recognize(body),
            (Method::Post, "/api/recognize") => {
                (401, json!({"status": "denied", "reason": "invalid_api_key"}))
            }
            _ => (404, json!({"status": "error"})),
        }
    }

    fn rfid(&self, body: &[u8]) -> (u16, Value) {
        let uid = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| v.get("uid").and_then(Value::as_str).map(str::to_uppercase))
            .unwrap_or_default();

        if uid.is_empty() {
            return (400, json!({"status": "denied", "reason": "empty_uid"}));
        }

        match self.cards.get(&uid) {
            Some(Some(user)) => (200, json!({"status": "granted", "user": user})),
            Some(None) => (200, json!({"status": "denied", "reason": "card_not_assigned"})),
            None => (200, json!({"status": "denied", "reason": "card_not_found"})),
        }
    }

    fn recognize(&self, body: &[u8]) -> (u16, Value) {
        if body.is_empty() {
            return (400, json!({"status": "denied", "reason": "empty_payload"}));
        }
        if !body.starts_with(SOI) || !body.ends_with(EOI) {
            return (200, json!({"status": "denied", "reason": "decode_failed"}));
        }

        let scene = &body[SOI.len()..body.len() - EOI.len()];
        let Some(name) = scene.strip_prefix(FACE_TAG) else {
            return (200, json!({"status": "denied", "reason": "no_face"}));
        };
        if self.faces.is_empty() {
            return (200, json!({"status": "denied", "reason": "db_empty"}));
        }

        let name = String::from_utf8_lossy(name);
        if self.faces.iter().any(|known| *known == name) {
            (200, json!({"status": "granted", "user": name, "dist": 0.31}))
        } else {
            (200, json!({"status": "denied", "reason": "no_match", "min_dist": 0.72}))
        }
    }
}

fn api_key(head: &[u8]) -> Option<&str> {
    std::str::from_utf8(head).ok()?.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.eq_ignore_ascii_case("x-api-key").then(|| value.trim())
    })
}

struct Network {
    clock: Rc<ManualClock>,
    directory: Directory,
    backend_online: bool,
    lock: Option<ActuatorGate<LoggingActuator>>,
    lock_online: bool,
}

/// Handle to the shared in-process network
#[derive(Clone)]
pub struct Loopback {
    net: Rc<RefCell<Network>>,
}

impl Loopback {
    pub fn new(clock: Rc<ManualClock>, directory: Directory) -> Self {
        Self {
            net: Rc::new(RefCell::new(Network {
                clock,
                directory,
                backend_online: true,
                lock: None,
                lock_online: true,
            })),
        }
    }

    /// Attach a lock node reachable at [`LOCK_HOST`]
    pub fn with_lock_node(self, hold: Duration) -> Self {
        self.net.borrow_mut().lock = Some(ActuatorGate::new(LoggingActuator::new("lock node"), hold));
        self
    }

    pub fn set_backend_online(&self, online: bool) {
        info!("Backend {}", if online { "back online" } else { "goes offline" });
        self.net.borrow_mut().backend_online = online;
    }

    pub fn set_lock_online(&self, online: bool) {
        info!("Lock node {}", if online { "back online" } else { "goes offline" });
        self.net.borrow_mut().lock_online = online;
    }

    /// Run the attached lock node's own gate tick
    pub fn tick_lock(&self) -> Result<GateEvent, ActuatorError> {
        let mut net = self.net.borrow_mut();
        let now = net.clock.now();
        match net.lock.as_mut() {
            Some(gate) => gate.tick(now),
            None => Ok(GateEvent::Idle),
        }
    }

    pub fn lock_is_locked(&self) -> Option<bool> {
        self.net.borrow().lock.as_ref().map(|gate| gate.is_locked())
    }

    fn route(&self, endpoint: &Endpoint<'_>, head: &[u8], body: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut net = self.net.borrow_mut();
        let net = &mut *net;
        let now = net.clock.now();

        match endpoint.host {
            BACKEND_HOST if net.backend_online => {
                let (status, reply) = net.directory.answer(head, body);
                debug!("backend -> {} {}", status, reply);
                let reply = reply.to_string();
                let mut out = vec![0u8; reply.len() + 128];
                let len = write_response(&mut out, status, reply.as_bytes())?;
                out.truncate(len);
                Ok(out)
            }
            LOCK_HOST if net.lock_online => {
                let gate = net.lock.as_mut().ok_or(TransportError::Connect)?;
                let raw = [head, body].concat();
                let mut out = [0u8; unlock_server::RESPONSE_CAPACITY];
                let handled = handle_request(&raw, gate, now, &mut out)?;
                Ok(out[..handled.len].to_vec())
            }
            BACKEND_HOST | LOCK_HOST => Err(TransportError::Connect),
            _ => Err(TransportError::Dns),
        }
    }
}

impl HttpTransport for Loopback {
    async fn exchange(
        &mut self,
        endpoint: &Endpoint<'_>,
        head: &[u8],
        body: &[u8],
        response: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        let reply = self.route(endpoint, head, body)?;
        let len = reply.len().min(response.len());
        response[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }
}

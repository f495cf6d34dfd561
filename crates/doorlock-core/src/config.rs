//! Node configuration
//!
//! Firmware builds bake these values in at compile time (secrets come from a
//! `.env` file through `build.rs`); the simulator can also load them from a
//! JSON file. String fields borrow from wherever the config came from.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

use crate::http::Endpoint;
use crate::retry::RetryPolicy;

pub const DEFAULT_AUTHORIZER_PORT: u16 = 5000;
pub const DEFAULT_RECOGNIZE_PATH: &str = "/api/recognize";
pub const DEFAULT_RFID_PATH: &str = "/api/rfid";
pub const DEFAULT_HEALTH_PATH: &str = "/api/health";
pub const DEFAULT_UNLOCK_PATH: &str = "/unlock";
pub const DEFAULT_UNLOCK_PORT: u16 = 80;

pub const DEFAULT_HOLD_MS: u32 = 5_000;
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 200;
pub const DEFAULT_DEBOUNCE_MS: u32 = 2_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u32 = 5_000;
pub const DEFAULT_PEER_TIMEOUT_MS: u32 = 2_000;

/// Authorizer transport: 3 attempts, 1 s apart
pub const DEFAULT_AUTHORIZER_RETRY: RetryPolicy = RetryPolicy::new(3, 1_000);
/// Peer trigger: 3 attempts, 500 ms apart
pub const DEFAULT_PEER_RETRY: RetryPolicy = RetryPolicy::new(3, 500);
/// Sensor capture: 3 attempts, 100 ms apart
pub const DEFAULT_CAPTURE_RETRY: RetryPolicy = RetryPolicy::new(3, 100);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct NodeConfig<'a> {
    pub internet: InternetConfig<'a>,
    pub authorizer: AuthorizerConfig<'a>,
    /// Lock node to trigger; `None` when this node owns the actuator
    #[serde(default)]
    pub peer: Option<PeerConfig<'a>>,
    pub gate: GateConfig,
    pub poll_interval_ms: u32,
    pub debounce_ms: u32,
    pub capture_retry: RetryPolicy,
}

impl<'a> NodeConfig<'a> {
    pub const fn new(internet: InternetConfig<'a>, authorizer: AuthorizerConfig<'a>) -> Self {
        Self {
            internet,
            authorizer,
            peer: None,
            gate: GateConfig::DEFAULT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            capture_retry: DEFAULT_CAPTURE_RETRY,
        }
    }

    pub const fn with_peer(mut self, peer: PeerConfig<'a>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Parse a JSON config document
    pub fn from_json(json: &'a [u8]) -> Result<Self, serde_json_core::de::Error> {
        serde_json_core::from_slice(json).map(|(config, _)| config)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms as u64)
    }

    pub const fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms as u64)
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InternetConfig<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// Where and how to reach the remote authorizer
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    /// Shared secret sent as `X-API-Key`
    pub api_key: &'a str,
    pub recognize_path: &'a str,
    pub rfid_path: &'a str,
    pub health_path: &'a str,
    pub timeout_ms: u32,
    pub retry: RetryPolicy,
}

impl<'a> AuthorizerConfig<'a> {
    pub const fn new(host: &'a str, api_key: &'a str) -> Self {
        Self {
            host,
            port: DEFAULT_AUTHORIZER_PORT,
            api_key,
            recognize_path: DEFAULT_RECOGNIZE_PATH,
            rfid_path: DEFAULT_RFID_PATH,
            health_path: DEFAULT_HEALTH_PATH,
            timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            retry: DEFAULT_AUTHORIZER_RETRY,
        }
    }

    pub const fn endpoint(&self) -> Endpoint<'a> {
        Endpoint {
            host: self.host,
            port: self.port,
        }
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }
}

/// The lock node a reader node triggers on a grant
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerConfig<'a> {
    pub host: &'a str,
    pub port: u16,
    pub path: &'a str,
    pub timeout_ms: u32,
    pub retry: RetryPolicy,
}

impl<'a> PeerConfig<'a> {
    pub const fn new(host: &'a str) -> Self {
        Self {
            host,
            port: DEFAULT_UNLOCK_PORT,
            path: DEFAULT_UNLOCK_PATH,
            timeout_ms: DEFAULT_PEER_TIMEOUT_MS,
            retry: DEFAULT_PEER_RETRY,
        }
    }

    pub const fn endpoint(&self) -> Endpoint<'a> {
        Endpoint {
            host: self.host,
            port: self.port,
        }
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    /// Longest the lock stays open after one grant
    pub hold_ms: u32,
}

impl GateConfig {
    pub const DEFAULT: Self = Self {
        hold_ms: DEFAULT_HOLD_MS,
    };

    pub const fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms as u64)
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = NodeConfig::new(
            InternetConfig {
                ssid: "door",
                password: "secret",
            },
            AuthorizerConfig::new("192.168.0.10", "key"),
        );

        assert_eq!(config.gate.hold(), Duration::from_millis(5000));
        assert_eq!(config.authorizer.endpoint().port, 5000);
        assert_eq!(config.authorizer.rfid_path, "/api/rfid");
        assert_eq!(config.peer, None);
        assert_eq!(PeerConfig::new("lock").retry.max_attempts(), 3);
    }

    #[test]
    fn parses_json_config() {
        let json = br#"{
            "internet": {"ssid": "door-net", "password": "pw"},
            "authorizer": {
                "host": "10.0.0.2", "port": 5000, "api_key": "k",
                "recognize_path": "/api/recognize", "rfid_path": "/api/rfid",
                "health_path": "/api/health", "timeout_ms": 3000,
                "retry": {"attempts": 2, "delay_ms": 250}
            },
            "peer": {
                "host": "10.0.0.3", "port": 80, "path": "/unlock",
                "timeout_ms": 2000, "retry": {"attempts": 3, "delay_ms": 500}
            },
            "gate": {"hold_ms": 8000},
            "poll_interval_ms": 100,
            "debounce_ms": 1500,
            "capture_retry": {"attempts": 3, "delay_ms": 100}
        }"#;

        let config = NodeConfig::from_json(json).unwrap();

        assert_eq!(config.internet.ssid, "door-net");
        assert_eq!(config.authorizer.retry, RetryPolicy::new(2, 250));
        assert_eq!(config.peer.unwrap().endpoint().host, "10.0.0.3");
        assert_eq!(config.gate.hold(), Duration::from_millis(8000));
        assert_eq!(config.debounce_window(), Duration::from_millis(1500));
    }

    #[test]
    fn peer_is_optional_in_json() {
        let json = br#"{
            "internet": {"ssid": "s", "password": "p"},
            "authorizer": {
                "host": "h", "port": 1, "api_key": "k",
                "recognize_path": "/r", "rfid_path": "/f", "health_path": "/h",
                "timeout_ms": 1, "retry": {"attempts": 1, "delay_ms": 0}
            },
            "gate": {"hold_ms": 5000},
            "poll_interval_ms": 200,
            "debounce_ms": 2000,
            "capture_retry": {"attempts": 1, "delay_ms": 0}
        }"#;

        let config = NodeConfig::from_json(json).unwrap();
        assert_eq!(config.peer, None);
    }
}

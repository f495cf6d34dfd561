//! Hardware-independent core library for the doorlock access-control nodes
//!
//! This crate contains all platform-agnostic logic of the lock and reader
//! nodes: the actuator gate state machine, authorization decoding, the HTTP
//! wire framing shared by the authorizer client, the peer trigger and the
//! `/unlock` endpoint, evidence debouncing and the status LED patterns.
//!
//! It is `#![no_std]` without an allocator so it compiles on both embedded
//! targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

pub mod actuator;
pub mod app_state;
pub mod authorization;
pub mod authorizer;
pub mod clock;
pub mod config;
pub mod evidence;
pub mod gate;
pub mod http;
pub mod indicator;
pub mod node;
pub mod peer;
pub mod retry;
pub mod unlock_server;

#[cfg(test)]
pub(crate) mod testing;

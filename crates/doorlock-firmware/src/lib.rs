//! ESP32-S3 glue for the doorlock nodes: WiFi, TCP transport, the unlock
//! listener and the MFRC522 reader. All decision logic lives in
//! `doorlock-core`.

#![no_std]

pub mod app_state;
pub mod net;
pub mod rfid;
pub mod secrets;

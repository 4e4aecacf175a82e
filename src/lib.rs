//! Library crate for wifi-manager-rs: talk to an ESP32 AP/STA bridge, track its
//! station link and keep a periodically refreshed view of the hosts behind it.
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod simulator;
pub mod state;
pub mod subnet;
pub mod types;

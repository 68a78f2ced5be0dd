//! # idlefleet-mcstatus
//!
//! Client for the Minecraft Server List Ping protocol, the status query
//! every vanilla and modded server answers on its game port.
//!
//! ## Exchange
//!
//! ```text
//! client                                   server
//!   |-- Handshake(version, host, port, 1) -->|
//!   |-- StatusRequest ---------------------->|
//!   |<--------------------- StatusResponse --|   JSON: version, players, description
//!   |-- Ping(payload) ---------------------->|
//!   |<------------------------- Pong(payload)|
//! ```
//!
//! Every packet is framed as `varint(length) || varint(packet_id) || body`.
//!
//! Errors are classified by [`StatusError::is_transient`] so probe loops can
//! retry "server not up yet" conditions without masking real faults.

pub mod codec;
mod client;
mod error;
mod status;

pub use client::{StatusClient, DEFAULT_PROTOCOL_VERSION};
pub use error::StatusError;
pub use status::{PlayerSample, Players, ServerStatus, ServerVersion};

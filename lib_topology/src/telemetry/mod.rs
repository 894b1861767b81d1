//! # Telemetry Module
//!
//! Wire types for the device telemetry stream and the decoder that turns one
//! encoded message into typed [`Record`](crate::model::Record)s.

/// Protobuf messages for the telemetry envelope and row payloads.
pub mod proto_handler;
/// Pure message-to-records decoding.
pub mod decoder;

pub use decoder::{decode, DecodedMessage};

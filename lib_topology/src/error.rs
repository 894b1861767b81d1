//! # Error Types
//!
//! One error enum per failure domain. Each one is recovered locally by the
//! component that hits it: a bad message is skipped, a broken stream ends one
//! collector, a failed store write abandons one message, a failed push drops
//! one subscriber. Nothing here aborts the process.

use thiserror::Error;

use crate::model::ResourceKind;

/// A telemetry payload did not match the schema expected for its kind.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The envelope or a row payload is not valid protobuf for the expected message.
    #[error("malformed {kind} telemetry: {reason}")]
    Malformed { kind: ResourceKind, reason: String },

    /// The envelope belongs to another subscription.
    #[error("unexpected subscription '{found}' for {kind} telemetry (expected '{expected}')")]
    WrongSubscription {
        kind: ResourceKind,
        expected: &'static str,
        found: String,
    },

    /// A non-sentinel address field is not an IPv4 address.
    #[error("invalid IPv4 address '{value}' in {kind} telemetry")]
    InvalidAddress { kind: ResourceKind, value: String },
}

/// Stream setup or mid-stream failure on a device subscription.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("subscription stream failed: {0}")]
    Stream(String),

    #[error("certificate error for {path}: {reason}")]
    Certificate { path: String, reason: String },

    #[error("no subscription available for device '{device}' ({kind})")]
    Unavailable { device: String, kind: ResourceKind },
}

/// A state store operation failed. The message being applied is abandoned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("state store lock poisoned")]
    Poisoned,

    #[error("failed to connect to state store: {0}")]
    Connection(String),

    #[error("state store query failed: {0}")]
    Query(String),

    #[error("corrupt row in state store: {0}")]
    Corrupt(String),
}

/// A push to one subscriber failed. That subscriber is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber {0} is gone")]
    Disconnected(u64),

    #[error("failed to deliver snapshot to subscriber {id}: {reason}")]
    Failed { id: u64, reason: String },
}

/// Device lifecycle requests that could not be honoured.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("device '{0}' is already being collected")]
    AlreadyRunning(String),

    #[error("device '{0}' is not being collected")]
    UnknownDevice(String),

    #[error("device name must not be empty")]
    EmptyName,

    #[error(transparent)]
    Store(#[from] StoreError),
}

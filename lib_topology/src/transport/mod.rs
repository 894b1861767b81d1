//! # Telemetry Transports
//!
//! A transport opens one long-lived subscription per device and resource
//! kind and hands back the encoded telemetry messages as a stream. The
//! collectors never see sockets or sessions; dropping the stream releases
//! whatever connection backs it.
//!
//! - [`ChannelTransport`]: in-process, fed through `mpsc` senders.
//! - `WsRelayTransport` (feature `relay`): WebSocket relay in front of the devices.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::error::TransportError;
use crate::model::{DeviceDescriptor, ResourceKind};

pub mod channel;
#[cfg(feature = "relay")]
pub mod ws_relay;

pub use channel::ChannelTransport;
#[cfg(feature = "relay")]
pub use ws_relay::WsRelayTransport;

/// One subscription: encoded messages in arrival order. An `Err` item means
/// the subscription is broken; the stream ending means the device closed it.
pub type TelemetryStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Opens telemetry subscriptions.
pub trait TelemetryTransport: Send + Sync + 'static {
    fn subscribe(
        &self,
        device: &DeviceDescriptor,
        kind: ResourceKind,
    ) -> impl Future<Output = Result<TelemetryStream, TransportError>> + Send;
}

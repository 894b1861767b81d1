//! # In-Process Channel Transport
//!
//! Streams are registered ahead of time per `(device, kind)` and handed out
//! once, on the first subscription. Subscribing again without registering a
//! new stream fails with [`TransportError::Unavailable`].

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;
use futures_util::stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::model::{DeviceDescriptor, ResourceKind};
use crate::transport::{TelemetryStream, TelemetryTransport};

/// Buffered messages per registered channel.
const CHANNEL_CAPACITY: usize = 64;

/// Sending half of a registered subscription.
pub type TelemetrySender = mpsc::Sender<Result<Bytes, TransportError>>;

/// [`TelemetryTransport`] over streams supplied by the embedding code.
#[derive(Default)]
pub struct ChannelTransport {
    pending: Mutex<HashMap<(String, ResourceKind), TelemetryStream>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel for `device`/`kind` and returns its sender.
    ///
    /// Dropping every clone of the sender ends the stream, which the
    /// collector treats as the device closing the subscription.
    pub fn sender(&self, device: &str, kind: ResourceKind) -> TelemetrySender {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        self.register(device, kind, Box::pin(stream));
        tx
    }

    /// Registers an arbitrary stream for `device`/`kind`, replacing any
    /// stream that was registered and not yet subscribed.
    pub fn register(&self, device: &str, kind: ResourceKind, stream: TelemetryStream) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.insert((device.to_string(), kind), stream);
        debug!(device, %kind, "telemetry stream registered");
    }
}

impl TelemetryTransport for ChannelTransport {
    async fn subscribe(
        &self,
        device: &DeviceDescriptor,
        kind: ResourceKind,
    ) -> Result<TelemetryStream, TransportError> {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending
            .remove(&(device.name.clone(), kind))
            .ok_or_else(|| TransportError::Unavailable {
                device: device.name.clone(),
                kind,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Credentials;
    use futures_util::StreamExt;

    fn device(name: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            name: name.to_string(),
            address: "127.0.0.1".to_string(),
            port: 57400,
            credentials: Credentials::default(),
            certificate: None,
        }
    }

    #[tokio::test]
    async fn test_sender_feeds_subscription_once() {
        let transport = ChannelTransport::new();
        let tx = transport.sender("R1", ResourceKind::Interface);

        let mut stream = transport.subscribe(&device("R1"), ResourceKind::Interface).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"abc"))).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(Ok(Bytes::from_static(b"abc"))));
        assert_eq!(stream.next().await, None);

        let again = transport.subscribe(&device("R1"), ResourceKind::Interface).await;
        assert!(matches!(again, Err(TransportError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_unavailable() {
        let transport = ChannelTransport::new();
        let _tx = transport.sender("R1", ResourceKind::Interface);
        let res = transport.subscribe(&device("R1"), ResourceKind::Neighbor).await;
        assert!(matches!(res, Err(TransportError::Unavailable { kind: ResourceKind::Neighbor, .. })));
    }
}

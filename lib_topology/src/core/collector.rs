//! # Collector
//!
//! One collector owns one subscription: a single device and a single
//! resource kind. For every message it decodes the records, applies them to
//! the store as one unit and, when that changed anything, emits exactly one
//! [`ChangeEvent`].
//!
//! Failure handling is local:
//! - a message that fails to decode is logged and skipped;
//! - a store failure abandons that message (no event) and the stream goes on;
//! - a stream error, the stream ending, cancellation, or the change channel
//!   closing ends the run.
//!
//! Cancellation is observed while waiting for a message and while waiting
//! to report a change, never in the middle of applying one, so a message is
//! either applied in full or not at all. The stream is dropped on every exit
//! path, which releases the underlying connection.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::events::{ChangeEvent, EventSender};
use crate::error::TransportError;
use crate::model::{DeviceDescriptor, ResourceKind};
use crate::store::StateStore;
use crate::telemetry;
use crate::transport::TelemetryTransport;

/// Why a collector stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectorExit {
    /// The device closed the subscription.
    Completed,
    /// The subscription could not be opened or broke mid-stream.
    Failed(TransportError),
    /// Stopped through its cancellation token.
    Cancelled,
    /// The hub is gone; nobody would see further changes.
    EventChannelClosed,
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// Drives one device subscription of one kind.
pub struct Collector<S, T> {
    device: Arc<DeviceDescriptor>,
    kind: ResourceKind,
    store: Arc<S>,
    transport: Arc<T>,
    events: EventSender,
}

impl<S: StateStore, T: TelemetryTransport> Collector<S, T> {
    pub fn new(
        device: Arc<DeviceDescriptor>,
        kind: ResourceKind,
        store: Arc<S>,
        transport: Arc<T>,
        events: EventSender,
    ) -> Self {
        Self { device, kind, store, transport, events }
    }

    /// Subscribes and processes messages until the subscription ends.
    pub async fn run(self, cancel: CancellationToken) -> CollectorExit {
        let name = self.device.name.as_str();
        let kind = self.kind;

        let subscribed = tokio::select! {
            _ = cancel.cancelled() => return CollectorExit::Cancelled,
            res = self.transport.subscribe(&self.device, kind) => res,
        };
        let mut stream = match subscribed {
            Ok(stream) => stream,
            Err(e) => {
                error!(device = name, %kind, error = %e, "telemetry subscription failed");
                return CollectorExit::Failed(e);
            }
        };
        info!(device = name, %kind, "collector started");

        let exit = loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break CollectorExit::Cancelled,
                item = stream.next() => item,
            };

            let payload = match item {
                Some(Ok(payload)) => payload,
                Some(Err(e)) => {
                    error!(device = name, %kind, error = %e, "telemetry stream failed");
                    break CollectorExit::Failed(e);
                }
                None => break CollectorExit::Completed,
            };

            let decoded = match telemetry::decode(name, kind, &payload, now_millis()) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(device = name, %kind, error = %e, "skipping undecodable message");
                    continue;
                }
            };

            let outcome = match self.store.apply(name, kind, decoded.records).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(device = name, %kind, error = %e, "failed to apply message, abandoning it");
                    continue;
                }
            };

            if !outcome.changed() {
                debug!(device = name, %kind, refreshed = outcome.refreshed, "no material change");
                continue;
            }

            let event = ChangeEvent {
                device: name.to_string(),
                kind: kind.into(),
                records: outcome.upserted(),
                removed: outcome.removed,
            };
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break CollectorExit::Cancelled,
                sent = self.events.send(event) => sent,
            };
            if sent.is_err() {
                warn!(device = name, %kind, "change channel closed");
                break CollectorExit::EventChannelClosed;
            }
        };

        drop(stream);
        info!(device = name, %kind, ?exit, "collector stopped");
        exit
    }
}

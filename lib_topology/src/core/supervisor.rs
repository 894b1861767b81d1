//! # Device Supervisor
//!
//! Keeps a registry of supervised devices, each with its own cancellation
//! token derived from the process-wide one. Starting a device spawns one
//! [`Collector`] per [`ResourceKind`] and one [`Reaper`]; stopping it cancels
//! the token, waits for the three tasks, and clears what the device left in
//! the store so viewers drop the node.
//!
//! The registry lock is held for the whole of `start` and `stop`, so
//! lifecycle requests for the same name never interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::collector::{Collector, CollectorExit};
use crate::core::events::{ChangeEvent, EventSender};
use crate::core::reaper::Reaper;
use crate::error::SupervisorError;
use crate::model::{DeviceDescriptor, ResourceKind};
use crate::store::StateStore;
use crate::transport::TelemetryTransport;

struct DeviceTasks {
    descriptor: Arc<DeviceDescriptor>,
    token: CancellationToken,
    collectors: Vec<JoinHandle<CollectorExit>>,
    reaper: JoinHandle<()>,
}

impl DeviceTasks {
    async fn join(self) {
        let name = &self.descriptor.name;
        for handle in self.collectors {
            if let Err(e) = handle.await {
                warn!(device = %name, error = %e, "collector task did not finish cleanly");
            }
        }
        if let Err(e) = self.reaper.await {
            warn!(device = %name, error = %e, "reaper task did not finish cleanly");
        }
    }
}

/// A supervised device as reported to operators.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    #[serde(flatten)]
    pub descriptor: DeviceDescriptor,
    /// Collectors of this device still running.
    pub active_collectors: usize,
}

/// Starts and stops per-device collection.
pub struct Supervisor<S, T> {
    store: Arc<S>,
    transport: Arc<T>,
    events: EventSender,
    root: CancellationToken,
    reap_interval: Duration,
    devices: Mutex<HashMap<String, DeviceTasks>>,
}

impl<S: StateStore, T: TelemetryTransport> Supervisor<S, T> {
    pub fn new(
        store: Arc<S>,
        transport: Arc<T>,
        events: EventSender,
        root: CancellationToken,
        reap_interval: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            events,
            root,
            reap_interval,
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Starts collecting from `descriptor`.
    ///
    /// Entries left in the store under the same name by an earlier run are
    /// cleared first.
    pub async fn start(&self, descriptor: DeviceDescriptor) -> Result<(), SupervisorError> {
        let name = descriptor.name.trim().to_string();
        if name.is_empty() {
            return Err(SupervisorError::EmptyName);
        }

        let mut devices = self.devices.lock().await;
        if devices.contains_key(&name) {
            return Err(SupervisorError::AlreadyRunning(name));
        }

        let cleared = self.store.clear_device(&name).await?;
        if cleared > 0 {
            info!(device = %name, cleared, "cleared leftover state");
        }

        let descriptor = Arc::new(DeviceDescriptor { name: name.clone(), ..descriptor });
        let token = self.root.child_token();

        let collectors = ResourceKind::ALL
            .into_iter()
            .map(|kind| {
                let collector = Collector::new(
                    Arc::clone(&descriptor),
                    kind,
                    Arc::clone(&self.store),
                    Arc::clone(&self.transport),
                    self.events.clone(),
                );
                tokio::spawn(collector.run(token.clone()))
            })
            .collect();

        let reaper = Reaper::new(name.clone(), Arc::clone(&self.store), self.events.clone(), self.reap_interval);
        let reaper = tokio::spawn(reaper.run(token.clone()));

        info!(device = %name, target = %descriptor.target(), "device started");
        devices.insert(
            name,
            DeviceTasks {
                descriptor,
                token,
                collectors,
                reaper,
            },
        );
        Ok(())
    }

    /// Stops collecting from `name` and removes its state.
    pub async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let mut devices = self.devices.lock().await;
        let tasks = devices
            .remove(name)
            .ok_or_else(|| SupervisorError::UnknownDevice(name.to_string()))?;

        tasks.token.cancel();
        tasks.join().await;

        let cleared = self.store.clear_device(name).await?;
        info!(device = name, cleared, "device stopped");

        if self.events.send(ChangeEvent::generic(name)).await.is_err() {
            warn!(device = name, "change channel closed, removal not broadcast");
        }
        Ok(())
    }

    /// The supervised devices, ordered by name.
    pub async fn devices(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.lock().await;
        let mut out: Vec<DeviceInfo> = devices
            .values()
            .map(|tasks| DeviceInfo {
                descriptor: tasks.descriptor.as_ref().clone(),
                active_collectors: tasks.collectors.iter().filter(|h| !h.is_finished()).count(),
            })
            .collect();
        out.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));
        out
    }

    /// Cancels every device and waits for all tasks to finish.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let drained: Vec<DeviceTasks> = self.devices.lock().await.drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for tasks in drained {
            tasks.join().await;
        }
        info!(devices = count, "supervisor shut down");
    }
}

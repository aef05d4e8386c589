//! Reference-counted registry of open device connections.
//!
//! Two sibling actions may need the same physical channel (two axes on one
//! controller, two acquisitions on one board). The first `acquire` of a
//! [`DeviceId`] opens it through the backend; later acquisitions share the open
//! handle. Each `release` drops one reference and the last releaser closes the
//! connection. Actions never own a device exclusively.

use super::capabilities::{
    Camera, DeviceHandle, DeviceId, DeviceKind, Digitizer, HardwareBackend, MotionController,
    ToneGenerator,
};
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

struct OpenChannel {
    handle: DeviceHandle,
    holders: usize,
}

/// Shared connection manager handed to every action at setup time.
#[derive(Clone)]
pub struct ConnectionManager {
    backend: Arc<dyn HardwareBackend>,
    channels: Arc<Mutex<HashMap<DeviceId, OpenChannel>>>,
}

impl ConnectionManager {
    pub fn new(backend: Arc<dyn HardwareBackend>) -> Self {
        Self {
            backend,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire a reference to `id`, opening it if nobody holds it yet.
    pub async fn acquire(&self, id: &DeviceId) -> Result<DeviceHandle> {
        let mut channels = self.channels.lock().await;

        if let Some(open) = channels.get_mut(id) {
            open.holders += 1;
            debug!(device = %id, holders = open.holders, "Sharing open device");
            return Ok(open.handle.clone());
        }

        let handle = self.backend.open(id).await?;
        if handle.kind() != id.kind {
            bail!(
                "Backend returned a {} device for {}",
                handle.kind(),
                id
            );
        }
        info!(device = %id, "Opened device");
        channels.insert(
            id.clone(),
            OpenChannel {
                handle: handle.clone(),
                holders: 1,
            },
        );
        Ok(handle)
    }

    /// Drop one reference to `id`; the last release closes the device.
    pub async fn release(&self, id: &DeviceId) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let open = channels
            .get_mut(id)
            .ok_or_else(|| anyhow!("Device {} released but not held", id))?;

        open.holders -= 1;
        if open.holders > 0 {
            debug!(device = %id, holders = open.holders, "Released shared device");
            return Ok(());
        }

        if let Some(open) = channels.remove(id) {
            self.backend.close(id, open.handle).await?;
            info!(device = %id, "Closed device");
        }
        Ok(())
    }

    /// Channels of `kind` the backend can currently see.
    pub async fn discover(&self, kind: DeviceKind) -> Result<Vec<String>> {
        self.backend.discover(kind).await
    }

    /// Number of outstanding references to `id`.
    pub async fn holders(&self, id: &DeviceId) -> usize {
        self.channels
            .lock()
            .await
            .get(id)
            .map_or(0, |open| open.holders)
    }

    /// Number of devices currently open.
    pub async fn open_count(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn acquire_motion(&self, channel: &str) -> Result<Arc<dyn MotionController>> {
        let id = DeviceId::new(DeviceKind::Motion, channel);
        match self.acquire(&id).await? {
            DeviceHandle::Motion(device) => Ok(device),
            other => Err(mismatch(&id, &other)),
        }
    }

    pub async fn acquire_digitizer(&self, channel: &str) -> Result<Arc<dyn Digitizer>> {
        let id = DeviceId::new(DeviceKind::Digitizer, channel);
        match self.acquire(&id).await? {
            DeviceHandle::Digitizer(device) => Ok(device),
            other => Err(mismatch(&id, &other)),
        }
    }

    pub async fn acquire_tone(&self, channel: &str) -> Result<Arc<dyn ToneGenerator>> {
        let id = DeviceId::new(DeviceKind::Tone, channel);
        match self.acquire(&id).await? {
            DeviceHandle::Tone(device) => Ok(device),
            other => Err(mismatch(&id, &other)),
        }
    }

    pub async fn acquire_camera(&self, channel: &str) -> Result<Arc<dyn Camera>> {
        let id = DeviceId::new(DeviceKind::Camera, channel);
        match self.acquire(&id).await? {
            DeviceHandle::Camera(device) => Ok(device),
            other => Err(mismatch(&id, &other)),
        }
    }
}

// Unreachable while `acquire` checks the backend's handle kind.
fn mismatch(id: &DeviceId, handle: &DeviceHandle) -> anyhow::Error {
    anyhow!("Device {} is a {} device", id, handle.kind())
}

//! Enumeration of attached capture devices

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::backend::{CaptureBackend, DeviceEnumerator, DeviceMoniker};
use crate::error::{CaptureError, Result};
use crate::platform::Platform;

/// One enumerated device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Opaque, pass it to [`CaptureSession::bind`](crate::CaptureSession::bind)
    pub identifier: String,
    pub display_name: String,
}

/// Walks the devices attached to the host.
///
/// Call [`reset`](Self::reset) (or [`init`](Self::init)) to take a snapshot,
/// then [`next`](Self::next) until it returns `None`. The snapshot does not
/// change until the next reset.
pub struct DeviceDirectory<B: CaptureBackend> {
    platform: Arc<Platform<B>>,
    enumerator: Option<B::Enumerator>,
}

impl<B: CaptureBackend> DeviceDirectory<B> {
    pub fn new(platform: Arc<Platform<B>>) -> Self {
        Self {
            platform,
            enumerator: None,
        }
    }

    /// Acquire the enumeration service and take the first snapshot
    pub fn init(&mut self) -> Result<()> {
        self.reset()
    }

    /// Drop the current snapshot and take a new one.
    ///
    /// On failure the directory is left empty.
    pub fn reset(&mut self) -> Result<()> {
        self.term();
        let enumerator = self
            .platform
            .backend()
            .create_enumerator()
            .map_err(CaptureError::ServiceUnavailable)?;
        self.enumerator = Some(enumerator);
        debug!("Device enumeration reset");
        Ok(())
    }

    /// Next readable device in the snapshot.
    ///
    /// Devices whose identifier or friendly name cannot be read are skipped.
    /// Returns `None` once the snapshot is exhausted, and keeps returning
    /// `None` until the next reset.
    pub fn next(&mut self) -> Option<DeviceRecord> {
        let enumerator = self.enumerator.as_mut()?;
        while let Some(moniker) = enumerator.next_moniker() {
            let identifier = match moniker.identifier() {
                Ok(id) => id,
                Err(e) => {
                    warn!("Skipping device without identifier: {}", e);
                    continue;
                }
            };
            match moniker.friendly_name() {
                Ok(display_name) => {
                    debug!(%identifier, %display_name, "Found capture device");
                    return Some(DeviceRecord {
                        identifier,
                        display_name,
                    });
                }
                Err(e) => {
                    warn!(%identifier, "Skipping device without friendly name: {}", e);
                }
            }
        }
        None
    }

    /// Reset and collect every readable device
    pub fn snapshot(&mut self) -> Result<Vec<DeviceRecord>> {
        self.reset()?;
        let mut devices = Vec::new();
        while let Some(record) = self.next() {
            devices.push(record);
        }
        info!("{} capture device(s) attached", devices.len());
        Ok(devices)
    }

    /// Release the enumeration service. Safe to call repeatedly.
    pub fn term(&mut self) {
        self.enumerator = None;
    }

    pub fn platform(&self) -> &Arc<Platform<B>> {
        &self.platform
    }
}

impl<B: CaptureBackend> Drop for DeviceDirectory<B> {
    fn drop(&mut self) {
        self.term();
    }
}

use tracing::{info, warn};

use crate::backend::CaptureBackend;
use crate::capture::{DeviceDirectory, DeviceRecord};
use crate::error::Result;

/// Pick the preferred device if it is attached, otherwise the first one.
///
/// `Ok(None)` means no device is attached at all.
pub fn pick_device<B: CaptureBackend>(
    directory: &mut DeviceDirectory<B>,
    preferred: Option<&str>,
) -> Result<Option<DeviceRecord>> {
    info!("Auto-detecting capture devices...");

    let devices = directory.snapshot()?;
    if let Some(wanted) = preferred {
        if let Some(found) = devices.iter().find(|d| d.identifier == wanted) {
            info!("Found configured device: {}", found.display_name);
            return Ok(Some(found.clone()));
        }
        warn!("Configured device {} not attached, falling back", wanted);
    }

    let first = devices.into_iter().next();
    if let Some(device) = &first {
        info!("Using {} ({})", device.display_name, device.identifier);
    }
    Ok(first)
}

/// Next device in the current snapshot, taking a fresh snapshot and
/// starting over once it runs out
pub fn next_device_wrapping<B: CaptureBackend>(
    directory: &mut DeviceDirectory<B>,
) -> Result<Option<DeviceRecord>> {
    if let Some(record) = directory.next() {
        return Ok(Some(record));
    }
    directory.reset()?;
    Ok(directory.next())
}

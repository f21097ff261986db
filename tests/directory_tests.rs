//! Integration tests for device enumeration

use camtap::backend::synthetic::{SyntheticBackend, SyntheticDevice};
use camtap::utils::{next_device_wrapping, pick_device};
use camtap::{CaptureError, DeviceDirectory, Platform};

fn directory(backend: &SyntheticBackend) -> DeviceDirectory<SyntheticBackend> {
    DeviceDirectory::new(Platform::init(backend.clone()).unwrap())
}

#[test]
fn test_zero_devices_is_not_an_error() {
    let backend = SyntheticBackend::new();
    let mut dir = directory(&backend);

    dir.init().unwrap();
    dir.reset().unwrap();
    assert!(dir.next().is_none());
    assert!(dir.snapshot().unwrap().is_empty());
}

#[test]
fn test_next_before_reset_yields_nothing() {
    let backend = SyntheticBackend::with_devices([SyntheticDevice::new("a", "Cam A")]);
    let mut dir = directory(&backend);
    assert!(dir.next().is_none());
}

#[test]
fn test_enumeration_yields_snapshot_then_stays_exhausted() {
    let backend = SyntheticBackend::with_devices([
        SyntheticDevice::new("a", "Cam A"),
        SyntheticDevice::new("b", "Cam B"),
    ]);
    let mut dir = directory(&backend);
    dir.reset().unwrap();

    // Attached after the snapshot, must not show up until the next reset
    backend.attach(SyntheticDevice::new("c", "Cam C"));

    let first = dir.next().unwrap();
    let second = dir.next().unwrap();
    assert_eq!(first.identifier, "synthetic:a");
    assert_eq!(first.display_name, "Cam A");
    assert_eq!(second.display_name, "Cam B");
    assert!(dir.next().is_none());
    assert!(dir.next().is_none());

    dir.reset().unwrap();
    let names: Vec<_> = std::iter::from_fn(|| dir.next())
        .map(|r| r.display_name)
        .collect();
    assert_eq!(names, ["Cam A", "Cam B", "Cam C"]);
}

#[test]
fn test_devices_without_friendly_name_are_skipped() {
    let backend = SyntheticBackend::with_devices([
        SyntheticDevice::new("a", "Cam A").without_name(),
        SyntheticDevice::new("b", "Cam B"),
        SyntheticDevice::new("c", "Cam C").without_name(),
    ]);
    let mut dir = directory(&backend);

    let devices = dir.snapshot().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].display_name, "Cam B");
}

#[test]
fn test_service_failure_leaves_directory_empty() {
    let backend = SyntheticBackend::with_devices([SyntheticDevice::new("a", "Cam A")]);
    let mut dir = directory(&backend);
    dir.reset().unwrap();

    backend.set_service_available(false);
    let err = dir.reset().unwrap_err();
    assert!(matches!(err, CaptureError::ServiceUnavailable(_)));
    assert!(dir.next().is_none());

    backend.set_service_available(true);
    dir.reset().unwrap();
    assert!(dir.next().is_some());
}

#[test]
fn test_term_is_idempotent() {
    let backend = SyntheticBackend::with_devices([SyntheticDevice::new("a", "Cam A")]);
    let mut dir = directory(&backend);
    dir.init().unwrap();
    dir.term();
    dir.term();
    assert!(dir.next().is_none());
}

#[test]
fn test_wrapping_cycles_through_devices() {
    let backend = SyntheticBackend::with_devices([
        SyntheticDevice::new("a", "Cam A"),
        SyntheticDevice::new("b", "Cam B"),
    ]);
    let mut dir = directory(&backend);
    dir.init().unwrap();

    let order: Vec<_> = (0..5)
        .map(|_| next_device_wrapping(&mut dir).unwrap().unwrap().display_name)
        .collect();
    assert_eq!(order, ["Cam A", "Cam B", "Cam A", "Cam B", "Cam A"]);
}

#[test]
fn test_wrapping_with_no_devices_returns_none() {
    let backend = SyntheticBackend::new();
    let mut dir = directory(&backend);
    dir.init().unwrap();
    assert!(next_device_wrapping(&mut dir).unwrap().is_none());
}

#[test]
fn test_pick_device_prefers_configured_identifier() {
    let backend = SyntheticBackend::with_devices([
        SyntheticDevice::new("a", "Cam A"),
        SyntheticDevice::new("b", "Cam B"),
    ]);
    let mut dir = directory(&backend);

    let picked = pick_device(&mut dir, Some("synthetic:b")).unwrap().unwrap();
    assert_eq!(picked.display_name, "Cam B");

    let fallback = pick_device(&mut dir, Some("synthetic:zzz")).unwrap().unwrap();
    assert_eq!(fallback.display_name, "Cam A");

    let none = pick_device(&mut directory(&SyntheticBackend::new()), None).unwrap();
    assert!(none.is_none());
}

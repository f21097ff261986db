//! In-process backend with virtual devices
//!
//! Devices are attached and detached at runtime. A running pipeline either
//! generates a test pattern on its own delivery thread (`fps > 0`) or waits
//! for frames pushed through a [`FrameInjector`]. Every run and stop is
//! recorded in a journal so callers can check pipeline ordering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use super::{CaptureBackend, CaptureGraph, DeviceEnumerator, DeviceMoniker, TapConfig};
use crate::capture::callback::FrameCallback;
use crate::capture::frame::{FrameBuffer, PixelFormat, VideoFormat};
use crate::error::{BackendError, BackendResult};

const IDENTIFIER_PREFIX: &str = "synthetic:";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Description of one virtual camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticDevice {
    pub key: String,
    /// `None` makes the friendly-name property unreadable
    pub name: Option<String>,
    /// Advertised formats, in advertised order
    pub formats: Vec<VideoFormat>,
    /// Format used when none is selected
    pub default_format: VideoFormat,
    pub fail_bind: bool,
    pub fail_connect: bool,
    /// Generated frames per second, 0 for injection only
    pub fps: u32,
}

impl SyntheticDevice {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: Some(name.into()),
            formats: vec![VideoFormat::new(PixelFormat::Rgb24, 640, 480)],
            default_format: VideoFormat::new(PixelFormat::Rgb24, 320, 240),
            fail_bind: false,
            fail_connect: false,
            fps: 0,
        }
    }

    pub fn with_formats(mut self, formats: Vec<VideoFormat>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_default_format(mut self, format: VideoFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn without_name(mut self) -> Self {
        self.name = None;
        self
    }

    pub fn failing_bind(mut self) -> Self {
        self.fail_bind = true;
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn identifier(&self) -> String {
        format!("{IDENTIFIER_PREFIX}{}", self.key)
    }
}

/// Pipeline lifecycle entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    Run { device: String, graph: u64 },
    Stop { device: String, graph: u64 },
}

/// Frame tap of a running graph. Pushes are serialized and refused once
/// the tap is closed; closing waits for an in-flight push.
struct LiveTap {
    callback: Arc<FrameCallback>,
    open: Mutex<bool>,
}

impl LiveTap {
    fn push(&self, data: &[u8]) -> bool {
        let open = lock(&self.open);
        if !*open {
            return false;
        }
        self.callback.deliver(data);
        true
    }

    fn close(&self) {
        *lock(&self.open) = false;
    }
}

struct Live {
    device: String,
    tap: Arc<LiveTap>,
}

struct State {
    devices: Vec<SyntheticDevice>,
    service_available: bool,
    live: HashMap<u64, Live>,
    journal: Vec<GraphEvent>,
    next_graph: u64,
}

struct Shared {
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct SyntheticBackend {
    shared: Arc<Shared>,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    devices: Vec::new(),
                    service_available: true,
                    live: HashMap::new(),
                    journal: Vec::new(),
                    next_graph: 1,
                }),
            }),
        }
    }

    pub fn with_devices(devices: impl IntoIterator<Item = SyntheticDevice>) -> Self {
        let backend = Self::new();
        for device in devices {
            backend.attach(device);
        }
        backend
    }

    /// `count` pattern-generating cameras named "Synthetic Camera N"
    pub fn pattern_cameras(count: usize, fps: u32) -> Self {
        Self::with_devices((0..count).map(|i| {
            SyntheticDevice::new(format!("cam{i}"), format!("Synthetic Camera {}", i + 1))
                .with_fps(fps)
        }))
    }

    /// Attach a device, replacing one with the same key
    pub fn attach(&self, device: SyntheticDevice) {
        let mut state = lock(&self.shared.state);
        state.devices.retain(|d| d.key != device.key);
        debug!(key = %device.key, "Synthetic device attached");
        state.devices.push(device);
    }

    pub fn detach(&self, key: &str) {
        lock(&self.shared.state).devices.retain(|d| d.key != key);
    }

    /// Make enumeration fail as if the platform service were missing
    pub fn set_service_available(&self, available: bool) {
        lock(&self.shared.state).service_available = available;
    }

    pub fn journal(&self) -> Vec<GraphEvent> {
        lock(&self.shared.state).journal.clone()
    }

    /// Running pipelines whose source is the device `key`
    pub fn running_pipelines(&self, key: &str) -> usize {
        lock(&self.shared.state)
            .live
            .values()
            .filter(|l| l.device == key)
            .count()
    }

    /// Handle that pushes frames into whichever pipeline runs on `key`
    pub fn injector(&self, key: &str) -> FrameInjector {
        FrameInjector {
            shared: self.shared.clone(),
            key: key.to_owned(),
        }
    }
}

/// Pushes raw frames into a running synthetic pipeline, on the caller's
/// thread, as that pipeline's delivery thread would.
#[derive(Clone)]
pub struct FrameInjector {
    shared: Arc<Shared>,
    key: String,
}

impl FrameInjector {
    /// Deliver one buffer; `false` when no pipeline runs on the device
    pub fn push(&self, data: &[u8]) -> bool {
        let tap = {
            let state = lock(&self.shared.state);
            state
                .live
                .values()
                .find(|l| l.device == self.key)
                .map(|l| l.tap.clone())
        };
        match tap {
            Some(tap) => tap.push(data),
            None => false,
        }
    }
}

pub struct SyntheticEnumerator {
    pending: std::vec::IntoIter<SyntheticMoniker>,
}

impl DeviceEnumerator for SyntheticEnumerator {
    type Moniker = SyntheticMoniker;

    fn next_moniker(&mut self) -> Option<SyntheticMoniker> {
        self.pending.next()
    }
}

pub struct SyntheticMoniker {
    device: SyntheticDevice,
}

impl DeviceMoniker for SyntheticMoniker {
    type Source = SyntheticSource;

    fn identifier(&self) -> BackendResult<String> {
        Ok(self.device.identifier())
    }

    fn friendly_name(&self) -> BackendResult<String> {
        self.device
            .name
            .clone()
            .ok_or_else(|| BackendError::Property(format!("{} has no FriendlyName", self.device.key)))
    }

    fn bind_source(&self) -> BackendResult<SyntheticSource> {
        if self.device.fail_bind {
            return Err(BackendError::Bind(format!("{} refused binding", self.device.key)));
        }
        Ok(SyntheticSource {
            device: self.device.clone(),
        })
    }
}

#[derive(Clone)]
pub struct SyntheticSource {
    device: SyntheticDevice,
}

impl CaptureBackend for SyntheticBackend {
    type Moniker = SyntheticMoniker;
    type Enumerator = SyntheticEnumerator;
    type Source = SyntheticSource;
    type Graph = SyntheticGraph;

    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn create_enumerator(&self) -> BackendResult<SyntheticEnumerator> {
        let state = lock(&self.shared.state);
        if !state.service_available {
            return Err(BackendError::Unavailable(
                "synthetic device service disabled".into(),
            ));
        }
        let pending: Vec<_> = state
            .devices
            .iter()
            .map(|device| SyntheticMoniker {
                device: device.clone(),
            })
            .collect();
        Ok(SyntheticEnumerator {
            pending: pending.into_iter(),
        })
    }

    fn parse_identifier(&self, identifier: &str) -> BackendResult<SyntheticMoniker> {
        let key = identifier
            .strip_prefix(IDENTIFIER_PREFIX)
            .ok_or_else(|| BackendError::NotFound(format!("malformed identifier {identifier:?}")))?;
        let state = lock(&self.shared.state);
        let device = state
            .devices
            .iter()
            .find(|d| d.key == key)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("no device {key:?} attached")))?;
        Ok(SyntheticMoniker { device })
    }

    fn create_graph(&self) -> BackendResult<SyntheticGraph> {
        let id = {
            let mut state = lock(&self.shared.state);
            let id = state.next_graph;
            state.next_graph += 1;
            id
        };
        Ok(SyntheticGraph {
            id,
            shared: self.shared.clone(),
            tap: None,
            source: None,
            selected: None,
            tap_encoding: None,
            connected: None,
            callback: None,
            rendered: false,
            running: None,
        })
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct RunningGraph {
    tap: Arc<LiveTap>,
    worker: Option<Worker>,
}

pub struct SyntheticGraph {
    id: u64,
    shared: Arc<Shared>,
    tap: Option<TapConfig>,
    source: Option<SyntheticSource>,
    selected: Option<VideoFormat>,
    tap_encoding: Option<PixelFormat>,
    connected: Option<VideoFormat>,
    callback: Option<Arc<FrameCallback>>,
    rendered: bool,
    running: Option<RunningGraph>,
}

impl SyntheticGraph {
    fn source(&self) -> BackendResult<&SyntheticSource> {
        self.source
            .as_ref()
            .ok_or_else(|| BackendError::Link("no source in graph".into()))
    }
}

impl CaptureGraph for SyntheticGraph {
    type Source = SyntheticSource;

    fn add_frame_tap(&mut self, config: TapConfig) -> BackendResult<()> {
        if config.buffer_samples {
            return Err(BackendError::Element(
                "synthetic tap only supports unbuffered delivery".into(),
            ));
        }
        self.tap = Some(config);
        Ok(())
    }

    fn add_source(&mut self, source: SyntheticSource) -> BackendResult<()> {
        self.source = Some(source);
        Ok(())
    }

    fn source_formats(&mut self) -> BackendResult<Vec<VideoFormat>> {
        Ok(self.source()?.device.formats.clone())
    }

    fn set_source_format(&mut self, format: &VideoFormat) -> BackendResult<()> {
        if !self.source()?.device.formats.contains(format) {
            return Err(BackendError::Negotiation(format!("{format} not advertised")));
        }
        self.selected = Some(*format);
        Ok(())
    }

    fn set_tap_encoding(&mut self, encoding: PixelFormat) -> BackendResult<()> {
        if encoding != PixelFormat::Rgb32 {
            return Err(BackendError::Negotiation(format!(
                "tap cannot emit {encoding:?}"
            )));
        }
        self.tap_encoding = Some(encoding);
        Ok(())
    }

    fn connect_source_to_tap(&mut self) -> BackendResult<()> {
        let device = &self.source()?.device;
        if self.tap.is_none() {
            return Err(BackendError::Link("no frame tap in graph".into()));
        }
        if device.fail_connect {
            return Err(BackendError::Link(format!(
                "{} has no format the tap accepts",
                device.key
            )));
        }
        let upstream = self.selected.unwrap_or(device.default_format);
        let encoding = self.tap_encoding.unwrap_or(upstream.encoding);
        self.connected = Some(VideoFormat::new(encoding, upstream.width, upstream.height));
        Ok(())
    }

    fn connected_format(&mut self) -> BackendResult<VideoFormat> {
        self.connected
            .ok_or_else(|| BackendError::Negotiation("source and tap are not connected".into()))
    }

    fn set_callback(&mut self, callback: Arc<FrameCallback>) -> BackendResult<()> {
        self.callback = Some(callback);
        Ok(())
    }

    fn render_tap_output(&mut self, _suppress_preview: bool) -> BackendResult<()> {
        if self.connected.is_none() {
            return Err(BackendError::Link("tap input is not connected".into()));
        }
        self.rendered = true;
        Ok(())
    }

    fn run(&mut self) -> BackendResult<()> {
        if self.running.is_some() {
            return Ok(());
        }
        if !self.rendered {
            return Err(BackendError::State("graph has no sink".into()));
        }
        let callback = self
            .callback
            .clone()
            .ok_or_else(|| BackendError::State("no frame callback registered".into()))?;
        let format = self.connected_format()?;
        let device = self.source()?.device.clone();

        let tap = Arc::new(LiveTap {
            callback,
            open: Mutex::new(true),
        });
        {
            let mut state = lock(&self.shared.state);
            state.live.insert(
                self.id,
                Live {
                    device: device.key.clone(),
                    tap: tap.clone(),
                },
            );
            state.journal.push(GraphEvent::Run {
                device: device.key.clone(),
                graph: self.id,
            });
        }

        let worker = (device.fps > 0).then(|| spawn_pattern(tap.clone(), format, device.fps));
        info!(device = %device.key, graph = self.id, "Synthetic pipeline running");
        self.running = Some(RunningGraph { tap, worker });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.tap.close();
        if let Some(worker) = running.worker {
            worker.stop.store(true, Ordering::Release);
            let _ = worker.handle.join();
        }

        let mut state = lock(&self.shared.state);
        if let Some(live) = state.live.remove(&self.id) {
            state.journal.push(GraphEvent::Stop {
                device: live.device,
                graph: self.id,
            });
        }
        debug!(graph = self.id, "Synthetic pipeline stopped");
    }
}

impl Drop for SyntheticGraph {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_pattern(tap: Arc<LiveTap>, format: VideoFormat, fps: u32) -> Worker {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let period = Duration::from_secs(1) / fps.max(1);
    let handle = std::thread::spawn(move || {
        let mut frame_no = 0u32;
        while !flag.load(Ordering::Acquire) {
            let data = test_pattern(format.width, format.height, frame_no);
            if !tap.push(&data) {
                break;
            }
            frame_no = frame_no.wrapping_add(1);
            std::thread::sleep(period);
        }
    });
    Worker { stop, handle }
}

/// Moving gradient in 32-bit BGRx, stored bottom row first
pub fn test_pattern(width: u32, height: u32, frame_no: u32) -> Vec<u8> {
    let stride = width as usize * FrameBuffer::BYTES_PER_PIXEL;
    if stride == 0 || height == 0 {
        return Vec::new();
    }
    let mut data = vec![0u8; stride * height as usize];
    for (stored, row) in data.chunks_exact_mut(stride).enumerate() {
        let y = height - 1 - stored as u32;
        for (x, px) in row.chunks_exact_mut(FrameBuffer::BYTES_PER_PIXEL).enumerate() {
            let x = x as u32;
            px[0] = x.min(255) as u8;
            px[1] = y.min(255) as u8;
            px[2] = x.saturating_add(y).saturating_add(frame_no).min(255) as u8;
            px[3] = 0xff;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_round_trip_through_parse() {
        let backend = SyntheticBackend::with_devices([SyntheticDevice::new("a", "Cam A")]);
        let moniker = backend.parse_identifier("synthetic:a").unwrap();
        assert_eq!(moniker.friendly_name().unwrap(), "Cam A");
        assert_eq!(moniker.identifier().unwrap(), "synthetic:a");
    }

    #[test]
    fn malformed_identifiers_are_not_found() {
        let backend = SyntheticBackend::with_devices([SyntheticDevice::new("a", "Cam A")]);
        for bad in ["", "a", "synthetic:", "synthetic:b", "@device:pnp:\\\\?\\usb#vid"] {
            assert!(matches!(
                backend.parse_identifier(bad),
                Err(BackendError::NotFound(_))
            ));
        }
    }

    #[test]
    fn enumeration_is_a_snapshot() {
        let backend = SyntheticBackend::with_devices([SyntheticDevice::new("a", "Cam A")]);
        let mut e = backend.create_enumerator().unwrap();
        backend.attach(SyntheticDevice::new("b", "Cam B"));
        assert!(e.next_moniker().is_some());
        assert!(e.next_moniker().is_none());
    }

    #[test]
    fn pattern_is_stored_bottom_up() {
        let data = test_pattern(2, 3, 0);
        let frame = FrameBuffer::new(&data, 2, 3, true).unwrap();
        // green channel carries the logical row index
        assert_eq!(frame.row(0).unwrap()[1], 0);
        assert_eq!(frame.row(2).unwrap()[1], 2);
    }

    #[test]
    fn pattern_handles_degenerate_sizes_and_late_frames() {
        assert!(test_pattern(0, 480, 0).is_empty());
        assert!(test_pattern(640, 0, 0).is_empty());

        let data = test_pattern(2, 2, u32::MAX);
        assert_eq!(data.len(), 16);
        assert!(data.chunks_exact(4).all(|px| px[2] == 255));
    }

    #[test]
    fn zero_sized_default_format_keeps_pattern_thread_alive() {
        let backend = SyntheticBackend::with_devices([SyntheticDevice::new("a", "Cam A")
            .with_formats(Vec::new())
            .with_default_format(VideoFormat::new(PixelFormat::Rgb24, 0, 0))
            .with_fps(200)]);
        let mut graph = backend.create_graph().unwrap();
        graph.add_frame_tap(TapConfig { buffer_samples: false }).unwrap();
        let source = backend
            .parse_identifier("synthetic:a")
            .unwrap()
            .bind_source()
            .unwrap();
        graph.add_source(source).unwrap();
        graph.set_tap_encoding(PixelFormat::Rgb32).unwrap();
        graph.connect_source_to_tap().unwrap();
        let format = graph.connected_format().unwrap();
        assert_eq!((format.width, format.height), (0, 0));

        let callback = Arc::new(FrameCallback::new(0, 0, Box::new(|_: &FrameBuffer<'_>| {})));
        graph.set_callback(callback.clone()).unwrap();
        graph.render_tap_output(true).unwrap();
        graph.run().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        graph.stop();

        assert_eq!(backend.running_pipelines("a"), 0);
        assert!(callback.stats().snapshot().delivered > 0);
    }

    #[test]
    fn graph_requires_connection_before_sink() {
        let backend = SyntheticBackend::with_devices([SyntheticDevice::new("a", "Cam A")]);
        let mut graph = backend.create_graph().unwrap();
        assert!(graph.render_tap_output(true).is_err());
        assert!(graph.run().is_err());
    }
}

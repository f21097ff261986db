//! Capture backend capabilities
//!
//! A backend supplies the two platform services the capture layer delegates
//! to: a device enumeration service and a pipeline/graph service. One
//! implementation exists per platform and is picked at build time.
//!
//! ```text
//! DeviceDirectory ──► CaptureBackend::create_enumerator ──► DeviceEnumerator
//!                                                            │
//! CaptureSession  ──► CaptureBackend::parse_identifier  ──► DeviceMoniker ──► Source
//!                 └─► CaptureBackend::create_graph      ──► CaptureGraph
//!                       source ─► tap (FrameCallback) ─► sink
//! ```

#[cfg(feature = "gstreamer-pipeline")]
pub mod gst;
pub mod synthetic;

use std::sync::Arc;

use crate::capture::callback::FrameCallback;
use crate::capture::frame::{PixelFormat, VideoFormat};
use crate::error::BackendResult;

#[cfg(feature = "gstreamer-pipeline")]
pub use gst::GstBackend;
pub use synthetic::SyntheticBackend;

/// Platform capture services
pub trait CaptureBackend: Send + Sync + 'static {
    type Moniker: DeviceMoniker<Source = Self::Source>;
    type Enumerator: DeviceEnumerator<Moniker = Self::Moniker>;
    /// Bound device handle usable as a pipeline source
    type Source: Clone + Send + 'static;
    type Graph: CaptureGraph<Source = Self::Source>;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Acquire the process-wide multimedia subsystem
    fn initialize(&self) -> BackendResult<()> {
        Ok(())
    }

    /// Release the process-wide multimedia subsystem
    fn shutdown(&self) {}

    /// Create an enumerator over a snapshot of the devices attached right now
    fn create_enumerator(&self) -> BackendResult<Self::Enumerator>;

    /// Resolve an identifier produced by [`DeviceMoniker::identifier`]
    fn parse_identifier(&self, identifier: &str) -> BackendResult<Self::Moniker>;

    /// Create an empty pipeline
    fn create_graph(&self) -> BackendResult<Self::Graph>;
}

/// Iterates one enumeration snapshot
pub trait DeviceEnumerator: Send {
    type Moniker: DeviceMoniker;

    fn next_moniker(&mut self) -> Option<Self::Moniker>;
}

/// Unbound reference to a device
pub trait DeviceMoniker {
    type Source;

    /// Opaque string that [`CaptureBackend::parse_identifier`] accepts
    fn identifier(&self) -> BackendResult<String>;

    /// Human readable name read from the device's property store
    fn friendly_name(&self) -> BackendResult<String>;

    fn bind_source(&self) -> BackendResult<Self::Source>;
}

/// Frame tap configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapConfig {
    /// Keep samples queued inside the tap. Capture always asks for `false`
    /// so every frame is consumed before the next one is produced.
    pub buffer_samples: bool,
}

/// Source → tap → sink pipeline under construction or running.
///
/// Dropping a graph tears it down.
pub trait CaptureGraph: Send {
    type Source;

    fn add_frame_tap(&mut self, config: TapConfig) -> BackendResult<()>;

    fn add_source(&mut self, source: Self::Source) -> BackendResult<()>;

    /// Formats the source output advertises, in advertised order
    fn source_formats(&mut self) -> BackendResult<Vec<VideoFormat>>;

    fn set_source_format(&mut self, format: &VideoFormat) -> BackendResult<()>;

    /// Encoding the tap emits
    fn set_tap_encoding(&mut self, encoding: PixelFormat) -> BackendResult<()>;

    fn connect_source_to_tap(&mut self) -> BackendResult<()>;

    /// Format agreed between source and tap after connecting
    fn connected_format(&mut self) -> BackendResult<VideoFormat>;

    fn set_callback(&mut self, callback: Arc<FrameCallback>) -> BackendResult<()>;

    /// Connect the tap output to a rendering sink
    fn render_tap_output(&mut self, suppress_preview: bool) -> BackendResult<()>;

    fn run(&mut self) -> BackendResult<()>;

    /// Halt delivery. Returns once any in-flight callback has finished.
    fn stop(&mut self);
}

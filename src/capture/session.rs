//! Capture from one bound device

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::backend::{CaptureBackend, CaptureGraph, DeviceMoniker, TapConfig};
use crate::capture::callback::{FrameCallback, FrameHandler, FrameStats, StatsHandle};
use crate::capture::directory::DeviceRecord;
use crate::capture::frame::{PixelFormat, VideoFormat};
use crate::capture::negotiate::FormatPolicy;
use crate::error::{BackendError, CaptureError, Result, StartStage};
use crate::platform::Platform;

/// Per-session capture options
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub policy: FormatPolicy,
    /// Keep the sink from opening its own preview window
    pub suppress_preview: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            policy: FormatPolicy::default(),
            suppress_preview: true,
        }
    }
}

struct Binding<S> {
    record: DeviceRecord,
    source: S,
}

struct Running<G> {
    graph: G,
    format: VideoFormat,
    stats: StatsHandle,
}

/// Owns at most one running pipeline for one bound device.
///
/// Lifecycle: unbound → [`bind`](Self::bind) → [`start`](Self::start) →
/// [`stop`](Self::stop) (or another `start`, or drop).
pub struct CaptureSession<B: CaptureBackend> {
    platform: Arc<Platform<B>>,
    options: SessionOptions,
    binding: Option<Binding<B::Source>>,
    running: Option<Running<B::Graph>>,
}

impl<B: CaptureBackend> CaptureSession<B> {
    pub fn new(platform: Arc<Platform<B>>) -> Self {
        Self::with_options(platform, SessionOptions::default())
    }

    pub fn with_options(platform: Arc<Platform<B>>, options: SessionOptions) -> Self {
        Self {
            platform,
            options,
            binding: None,
            running: None,
        }
    }

    /// Resolve `identifier` and hold on to the device.
    ///
    /// Any previous binding and running capture are released first, so a
    /// failed bind leaves the session unbound.
    #[instrument(skip(self))]
    pub fn bind(&mut self, identifier: &str) -> Result<()> {
        self.term();

        let backend = self.platform.backend();
        let moniker = backend
            .parse_identifier(identifier)
            .map_err(|source| CaptureError::DeviceNotFound {
                identifier: identifier.to_owned(),
                source,
            })?;
        let display_name =
            moniker
                .friendly_name()
                .map_err(|source| CaptureError::PropertyUnavailable {
                    identifier: identifier.to_owned(),
                    source,
                })?;
        let source = moniker
            .bind_source()
            .map_err(|source| CaptureError::BindFailed {
                identifier: identifier.to_owned(),
                source,
            })?;

        info!(%display_name, "Bound capture device");
        self.binding = Some(Binding {
            record: DeviceRecord {
                identifier: identifier.to_owned(),
                display_name,
            },
            source,
        });
        Ok(())
    }

    pub fn id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.record.identifier.as_str())
    }

    pub fn name(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.record.display_name.as_str())
    }

    pub fn record(&self) -> Option<&DeviceRecord> {
        self.binding.as_ref().map(|b| &b.record)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Format negotiated by the running pipeline
    pub fn negotiated_format(&self) -> Option<VideoFormat> {
        self.running.as_ref().map(|r| r.format)
    }

    /// Counters of the running pipeline
    pub fn stats(&self) -> Option<FrameStats> {
        self.running.as_ref().map(|r| r.stats.snapshot())
    }

    /// Build the pipeline and start delivering frames to `handler`.
    ///
    /// A running pipeline is stopped first. `handler` runs on the pipeline's
    /// delivery thread, one frame at a time. On failure the session stays
    /// bound and `start` may be retried.
    #[instrument(skip(self, handler), fields(device = self.name().unwrap_or("")))]
    pub fn start<H: FrameHandler>(&mut self, handler: H) -> Result<()> {
        self.stop();

        let binding = self.binding.as_ref().ok_or(CaptureError::NotBound)?;
        let options = self.options;
        let backend = self.platform.backend();

        let mut graph = backend
            .create_graph()
            .map_err(failed_at(StartStage::CreateTap))?;
        graph
            .add_frame_tap(TapConfig {
                buffer_samples: false,
            })
            .map_err(failed_at(StartStage::CreateTap))?;
        graph
            .add_source(binding.source.clone())
            .map_err(failed_at(StartStage::AddSource))?;

        negotiate_source_format(&mut graph, &options.policy);

        graph
            .set_tap_encoding(PixelFormat::Rgb32)
            .map_err(failed_at(StartStage::TapEncoding))?;
        graph.connect_source_to_tap().map_err(|e| {
            CaptureError::start_failed(StartStage::Connect, CaptureError::ConnectFailed(e))
        })?;
        let format = graph
            .connected_format()
            .map_err(failed_at(StartStage::QueryFormat))?;
        debug!(%format, "Connected format");

        let callback = Arc::new(FrameCallback::new(
            format.width,
            format.height,
            Box::new(handler),
        ));
        let stats = callback.stats();
        graph
            .set_callback(callback)
            .map_err(failed_at(StartStage::RegisterCallback))?;
        graph
            .render_tap_output(options.suppress_preview)
            .map_err(failed_at(StartStage::Render))?;
        graph.run().map_err(failed_at(StartStage::Run))?;

        info!(%format, "Capture started");
        self.running = Some(Running {
            graph,
            format,
            stats,
        });
        Ok(())
    }

    /// Halt the running pipeline, if any. Waits for an in-flight frame
    /// callback to return.
    pub fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.graph.stop();
            let stats = running.stats.snapshot();
            info!(
                delivered = stats.delivered,
                rejected = stats.rejected,
                panicked = stats.panicked,
                "Capture stopped"
            );
        }
    }

    /// Stop capture and forget the bound device
    pub fn term(&mut self) {
        self.stop();
        self.binding = None;
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.term();
    }
}

fn failed_at(stage: StartStage) -> impl FnOnce(BackendError) -> CaptureError {
    move |e| CaptureError::start_failed(stage, CaptureError::Backend(e))
}

/// Pin the source to the first format the policy accepts. Failing to list or
/// set formats is not fatal, the source keeps its default.
fn negotiate_source_format<G: CaptureGraph>(graph: &mut G, policy: &FormatPolicy) {
    let formats = match graph.source_formats() {
        Ok(formats) => formats,
        Err(e) => {
            warn!("Source formats unavailable, using default: {}", e);
            return;
        }
    };
    match policy.select(&formats) {
        Some(format) => {
            debug!(%format, "Selected source format");
            if let Err(e) = graph.set_source_format(format) {
                warn!(%format, "Source rejected format, using default: {}", e);
            }
        }
        None => debug!(
            candidates = formats.len(),
            "No format meets the policy, using source default"
        ),
    }
}

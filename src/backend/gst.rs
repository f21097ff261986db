//! GStreamer capture backend
//!
//! Devices come from a `DeviceMonitor` filtered on `Video/Source`. The
//! capture graph is
//!
//! ```text
//! source ! capsfilter(source-caps) ! videoconvert ! capsfilter(tap-caps)
//!        ! videoflip(vert) ! identity(grabber, signal-handoffs)
//!        ! fakesink | videoflip(vert) ! videoconvert ! autovideosink
//! ```
//!
//! Raw GStreamer video is stored top row first. The tap flips it so the
//! callback sees bottom-up rows, and the preview branch flips it back.
//! `identity` hands every buffer to the frame callback on the streaming
//! thread and does not pass the buffer on until the callback returns.

use std::collections::VecDeque;
use std::sync::Arc;

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use super::{CaptureBackend, CaptureGraph, DeviceEnumerator, DeviceMoniker, TapConfig};
use crate::capture::callback::FrameCallback;
use crate::capture::frame::{PixelFormat, VideoFormat};
use crate::error::{BackendError, BackendResult};

/// Device properties that name a device stably, most specific first
const IDENTITY_KEYS: [&str; 4] = ["object.path", "api.v4l2.path", "device.path", "device.bus_path"];

#[derive(Debug, Default, Clone, Copy)]
pub struct GstBackend;

impl GstBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for GstBackend {
    type Moniker = GstMoniker;
    type Enumerator = GstEnumerator;
    type Source = gst::Element;
    type Graph = GstGraph;

    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn initialize(&self) -> BackendResult<()> {
        gst::init()
            .map_err(|e| BackendError::Unavailable(format!("Failed to initialize GStreamer: {}", e)))
    }

    // gst_deinit may only run once per process and nothing may touch
    // GStreamer afterwards, so shutdown leaves the library loaded.

    fn create_enumerator(&self) -> BackendResult<GstEnumerator> {
        Ok(GstEnumerator {
            pending: monitor_devices()?.into(),
        })
    }

    fn parse_identifier(&self, identifier: &str) -> BackendResult<GstMoniker> {
        if !identifier.contains('=') {
            return Err(BackendError::NotFound(format!(
                "malformed identifier {identifier:?}"
            )));
        }
        monitor_devices()?
            .into_iter()
            .find(|m| m.identifier == identifier)
            .ok_or_else(|| BackendError::NotFound(format!("no device matches {identifier:?}")))
    }

    fn create_graph(&self) -> BackendResult<GstGraph> {
        GstGraph::new()
    }
}

fn monitor_devices() -> BackendResult<Vec<GstMoniker>> {
    let monitor = gst::DeviceMonitor::new();
    monitor.add_filter(Some("Video/Source"), None);
    monitor
        .start()
        .map_err(|e| BackendError::Unavailable(format!("Failed to start device monitor: {}", e)))?;
    let devices: Vec<GstMoniker> = monitor.devices().into_iter().map(GstMoniker::new).collect();
    monitor.stop();
    debug!("Device monitor reported {} video source(s)", devices.len());
    Ok(devices)
}

fn device_identifier(device: &gst::Device) -> String {
    if let Some(props) = device.properties() {
        for key in IDENTITY_KEYS {
            if let Ok(value) = props.get::<String>(key) {
                return format!("{key}={value}");
            }
        }
    }
    format!("name={}", device.display_name())
}

pub struct GstEnumerator {
    pending: VecDeque<GstMoniker>,
}

impl DeviceEnumerator for GstEnumerator {
    type Moniker = GstMoniker;

    fn next_moniker(&mut self) -> Option<GstMoniker> {
        self.pending.pop_front()
    }
}

pub struct GstMoniker {
    device: gst::Device,
    identifier: String,
}

impl GstMoniker {
    fn new(device: gst::Device) -> Self {
        let identifier = device_identifier(&device);
        Self { device, identifier }
    }
}

impl DeviceMoniker for GstMoniker {
    type Source = gst::Element;

    fn identifier(&self) -> BackendResult<String> {
        Ok(self.identifier.clone())
    }

    fn friendly_name(&self) -> BackendResult<String> {
        let name = self.device.display_name();
        if name.is_empty() {
            return Err(BackendError::Property(format!(
                "{} has no display name",
                self.identifier
            )));
        }
        Ok(name.to_string())
    }

    fn bind_source(&self) -> BackendResult<gst::Element> {
        self.device
            .create_element(Some("camera"))
            .map_err(|e| BackendError::Bind(e.to_string()))
    }
}

fn make_element(factory: &str, name: &str) -> BackendResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .name(name)
        .build()
        .map_err(|e| BackendError::Element(format!("{factory}: {e}")))
}

fn vertical_flip(name: &str) -> BackendResult<gst::Element> {
    gst::ElementFactory::make("videoflip")
        .name(name)
        .property_from_str("video-direction", "vert")
        .build()
        .map_err(|e| BackendError::Element(format!("videoflip: {e}")))
}

fn raw_format_name(encoding: PixelFormat) -> Option<&'static str> {
    match encoding {
        PixelFormat::Rgb24 => Some("RGB"),
        PixelFormat::Bgr24 => Some("BGR"),
        PixelFormat::Rgb32 => Some("BGRx"),
        PixelFormat::Yuyv4 => Some("YUY2"),
        PixelFormat::Nv12 => Some("NV12"),
        PixelFormat::Mjpeg => None,
    }
}

fn structure_format(s: &gst::StructureRef) -> Option<VideoFormat> {
    let encoding = if s.has_name("image/jpeg") {
        PixelFormat::Mjpeg
    } else if s.has_name("video/x-raw") {
        match s.get::<&str>("format").ok()? {
            "RGB" => PixelFormat::Rgb24,
            "BGR" => PixelFormat::Bgr24,
            "BGRx" | "RGBx" | "xRGB" | "xBGR" | "BGRA" | "RGBA" => PixelFormat::Rgb32,
            "YUY2" => PixelFormat::Yuyv4,
            "NV12" => PixelFormat::Nv12,
            _ => return None,
        }
    } else {
        return None;
    };
    // Ranges and lists are skipped, only fixed sizes are candidates
    let width = u32::try_from(s.get::<i32>("width").ok()?).ok()?;
    let height = u32::try_from(s.get::<i32>("height").ok()?).ok()?;
    Some(VideoFormat::new(encoding, width, height))
}

fn raw_caps(encoding: PixelFormat, size: Option<(u32, u32)>) -> BackendResult<gst::Caps> {
    let name = raw_format_name(encoding).ok_or_else(|| {
        BackendError::Negotiation(format!("{encoding:?} needs a decoder, only raw formats are tapped"))
    })?;
    let mut builder = gst::Caps::builder("video/x-raw").field("format", name);
    if let Some((width, height)) = size {
        builder = builder
            .field("width", width as i32)
            .field("height", height as i32);
    }
    Ok(builder.build())
}

/// Capture pipeline around one bound source
pub struct GstGraph {
    pipeline: gst::Pipeline,
    source_caps: gst::Element,
    source: Option<gst::Element>,
    /// videoconvert, tap capsfilter, videoflip, [queue], identity
    tap_chain: Vec<gst::Element>,
    handoff: Option<glib::SignalHandlerId>,
}

impl GstGraph {
    fn new() -> BackendResult<Self> {
        let pipeline = gst::Pipeline::new();
        let source_caps = make_element("capsfilter", "source-caps")?;
        pipeline
            .add(&source_caps)
            .map_err(|e| BackendError::Element(e.to_string()))?;
        Ok(Self {
            pipeline,
            source_caps,
            source: None,
            tap_chain: Vec::new(),
            handoff: None,
        })
    }

    fn source(&self) -> BackendResult<&gst::Element> {
        self.source
            .as_ref()
            .ok_or_else(|| BackendError::Link("no source in pipeline".into()))
    }

    fn tap_input(&self) -> BackendResult<&gst::Element> {
        self.tap_chain
            .first()
            .ok_or_else(|| BackendError::Link("no frame tap in pipeline".into()))
    }

    fn tap_caps(&self) -> BackendResult<&gst::Element> {
        self.tap_chain
            .get(1)
            .ok_or_else(|| BackendError::Link("no frame tap in pipeline".into()))
    }

    fn tap(&self) -> BackendResult<&gst::Element> {
        self.tap_chain
            .last()
            .ok_or_else(|| BackendError::Link("no frame tap in pipeline".into()))
    }
}

impl CaptureGraph for GstGraph {
    type Source = gst::Element;

    fn add_frame_tap(&mut self, config: TapConfig) -> BackendResult<()> {
        let mut chain = vec![
            make_element("videoconvert", "tap-convert")?,
            make_element("capsfilter", "tap-caps")?,
            vertical_flip("tap-flip")?,
        ];
        if config.buffer_samples {
            chain.push(make_element("queue", "tap-queue")?);
        }
        let grabber = gst::ElementFactory::make("identity")
            .name("grabber")
            .property("signal-handoffs", true)
            .property("sync", false)
            .build()
            .map_err(|e| BackendError::Element(format!("identity: {e}")))?;
        chain.push(grabber);

        self.pipeline
            .add_many(&chain)
            .map_err(|e| BackendError::Element(e.to_string()))?;
        gst::Element::link_many(&chain).map_err(|e| BackendError::Link(e.to_string()))?;
        self.tap_chain = chain;
        Ok(())
    }

    fn add_source(&mut self, source: gst::Element) -> BackendResult<()> {
        self.pipeline
            .add(&source)
            .map_err(|e| BackendError::Element(e.to_string()))?;
        source
            .link(&self.source_caps)
            .map_err(|e| BackendError::Link(e.to_string()))?;
        self.source = Some(source);
        Ok(())
    }

    fn source_formats(&mut self) -> BackendResult<Vec<VideoFormat>> {
        let source = self.source()?;
        // Sources only query the hardware once opened
        source
            .set_state(gst::State::Ready)
            .map_err(|e| BackendError::State(format!("{e:?}")))?;
        let pad = source
            .static_pad("src")
            .ok_or_else(|| BackendError::Negotiation("source has no src pad".into()))?;
        let caps = pad.query_caps(None);
        Ok(caps.iter().filter_map(structure_format).collect())
    }

    fn set_source_format(&mut self, format: &VideoFormat) -> BackendResult<()> {
        let caps = raw_caps(format.encoding, Some((format.width, format.height)))?;
        debug!("Source caps: {}", caps);
        self.source_caps.set_property("caps", &caps);
        Ok(())
    }

    fn set_tap_encoding(&mut self, encoding: PixelFormat) -> BackendResult<()> {
        let caps = raw_caps(encoding, None)?;
        self.tap_caps()?.set_property("caps", &caps);
        Ok(())
    }

    fn connect_source_to_tap(&mut self) -> BackendResult<()> {
        self.source()?;
        self.source_caps
            .link(self.tap_input()?)
            .map_err(|e| BackendError::Link(e.to_string()))
    }

    fn connected_format(&mut self) -> BackendResult<VideoFormat> {
        let tap_caps = self.tap_caps()?;
        let pad = tap_caps
            .static_pad("src")
            .ok_or_else(|| BackendError::Negotiation("tap caps has no src pad".into()))?;
        let mut caps = pad.query_caps(None);
        if caps.is_empty() || caps.is_any() {
            return Err(BackendError::Negotiation(format!(
                "source and tap share no format: {caps}"
            )));
        }
        caps.fixate();
        let info = gst_video::VideoInfo::from_caps(&caps)
            .map_err(|e| BackendError::Negotiation(format!("Failed to parse video info: {e}")))?;
        // Pin the size only, the framerate stays whatever the source runs at
        let pinned = raw_caps(PixelFormat::Rgb32, Some((info.width(), info.height())))?;
        tap_caps.set_property("caps", &pinned);
        Ok(VideoFormat::new(PixelFormat::Rgb32, info.width(), info.height()))
    }

    fn set_callback(&mut self, callback: Arc<FrameCallback>) -> BackendResult<()> {
        let tap = self.tap()?.clone();
        if let Some(previous) = self.handoff.take() {
            tap.disconnect(previous);
        }
        let id = tap.connect("handoff", false, move |values| {
            let buffer = values.get(1).and_then(|v| v.get::<gst::Buffer>().ok());
            match buffer.as_ref().map(|b| b.map_readable()) {
                Some(Ok(map)) => callback.deliver(map.as_slice()),
                Some(Err(_)) => warn!("Failed to map buffer"),
                None => warn!("Handoff without buffer"),
            }
            None
        });
        self.handoff = Some(id);
        Ok(())
    }

    fn render_tap_output(&mut self, suppress_preview: bool) -> BackendResult<()> {
        let sinks = if suppress_preview {
            vec![gst::ElementFactory::make("fakesink")
                .name("renderer")
                .property("sync", false)
                .build()
                .map_err(|e| BackendError::Element(format!("fakesink: {e}")))?]
        } else {
            vec![
                vertical_flip("render-flip")?,
                make_element("videoconvert", "render-convert")?,
                make_element("autovideosink", "renderer")?,
            ]
        };
        self.pipeline
            .add_many(&sinks)
            .map_err(|e| BackendError::Element(e.to_string()))?;
        let mut chain = vec![self.tap()?.clone()];
        chain.extend(sinks);
        gst::Element::link_many(&chain).map_err(|e| BackendError::Link(e.to_string()))
    }

    fn run(&mut self) -> BackendResult<()> {
        info!("Starting GStreamer pipeline");

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| BackendError::State(format!("Failed to start pipeline: {:?}", e)))?;

        // Wait for pipeline to reach playing state
        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));

        match state_change {
            Ok(gst::StateChangeSuccess::Success) | Ok(gst::StateChangeSuccess::NoPreroll) => {
                info!("Pipeline started successfully");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) => {
                info!("Pipeline starting asynchronously");
                Ok(())
            }
            Err(e) => {
                let _ = self.pipeline.set_state(gst::State::Null);
                Err(BackendError::State(format!("Failed to start pipeline: {:?}", e)))
            }
        }
    }

    fn stop(&mut self) {
        // Blocks until the streaming thread has left the handoff callback
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop pipeline: {:?}", e);
        }
        if let (Some(id), Some(tap)) = (self.handoff.take(), self.tap_chain.last()) {
            tap.disconnect(id);
        }
    }
}

impl Drop for GstGraph {
    fn drop(&mut self) {
        self.stop();
        // The bound source outlives the pipeline and may join the next one
        if let Some(source) = self.source.take() {
            source.unlink(&self.source_caps);
            let _ = self.pipeline.remove(&source);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::capture::frame::FrameBuffer;

    fn init() -> bool {
        gst::init().unwrap();
        ["videotestsrc", "videoconvert", "videoflip", "identity", "fakesink"]
            .iter()
            .all(|f| gst::ElementFactory::find(f).is_some())
    }

    #[test]
    fn fixed_raw_structures_become_formats() {
        gst::init().unwrap();
        let s = gst::Structure::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", 640i32)
            .field("height", 480i32)
            .build();
        assert_eq!(
            structure_format(&s),
            Some(VideoFormat::new(PixelFormat::Rgb24, 640, 480))
        );
    }

    #[test]
    fn ranged_structures_are_skipped() {
        gst::init().unwrap();
        let s = gst::Structure::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", gst::IntRange::new(1i32, 1920))
            .field("height", 480i32)
            .build();
        assert_eq!(structure_format(&s), None);

        let unknown = gst::Structure::builder("video/x-raw")
            .field("format", "P010_10LE")
            .field("width", 640i32)
            .field("height", 480i32)
            .build();
        assert_eq!(structure_format(&unknown), None);
    }

    #[test]
    fn jpeg_structures_have_no_bit_depth() {
        gst::init().unwrap();
        let s = gst::Structure::builder("image/jpeg")
            .field("width", 1280i32)
            .field("height", 720i32)
            .build();
        let format = structure_format(&s).unwrap();
        assert_eq!(format.encoding, PixelFormat::Mjpeg);
        assert_eq!((format.width, format.height, format.bit_depth), (1280, 720, 0));
    }

    #[test]
    fn raw_caps_name_the_tap_format() {
        gst::init().unwrap();
        let caps = raw_caps(PixelFormat::Rgb32, Some((2, 3))).unwrap();
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get::<&str>("format").unwrap(), "BGRx");
        assert_eq!(s.get::<i32>("width").unwrap(), 2);
        assert_eq!(s.get::<i32>("height").unwrap(), 3);

        assert!(raw_caps(PixelFormat::Mjpeg, None).is_err());
    }

    #[test]
    fn test_source_delivers_bottom_up_frames() {
        if !init() {
            eprintln!("GStreamer base plugins missing, skipping");
            return;
        }

        let mut graph = GstGraph::new().unwrap();
        graph
            .add_frame_tap(TapConfig {
                buffer_samples: false,
            })
            .unwrap();
        let source = gst::ElementFactory::make("videotestsrc")
            .property("is-live", true)
            .build()
            .unwrap();
        graph.add_source(source).unwrap();
        graph
            .set_source_format(&VideoFormat::new(PixelFormat::Rgb24, 320, 240))
            .unwrap();
        graph.set_tap_encoding(PixelFormat::Rgb32).unwrap();
        graph.connect_source_to_tap().unwrap();

        let format = graph.connected_format().unwrap();
        assert_eq!(format, VideoFormat::new(PixelFormat::Rgb32, 320, 240));

        // SMPTE bars: the top-left corner is 75% white, the bottom-left is the
        // dark blue -I patch
        let (tx, rx) = flume::bounded(1);
        let callback = Arc::new(FrameCallback::new(
            format.width,
            format.height,
            Box::new(move |frame: &FrameBuffer<'_>| {
                let corner = |y: u32| {
                    let px = &frame.row(y).unwrap()[..4];
                    (px[2], px[1], px[0])
                };
                let _ = tx.try_send((
                    frame.width(),
                    frame.height(),
                    corner(0),
                    corner(frame.height() - 1),
                ));
            }),
        ));
        graph.set_callback(callback.clone()).unwrap();
        graph.render_tap_output(true).unwrap();
        graph.run().unwrap();

        let received = rx.recv_timeout(Duration::from_secs(10));
        graph.stop();
        let (width, height, top, bottom) = received.unwrap();

        assert_eq!((width, height), (320, 240));
        assert!(top.0 > 150 && top.1 > 150 && top.2 > 150, "top {top:?}");
        assert!(bottom.0 < 100, "bottom {bottom:?}");
        assert!(callback.stats().snapshot().delivered >= 1);
    }
}

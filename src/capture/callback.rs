//! Adapter the pipeline calls once per delivered frame

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use tracing::{error, warn};

use super::frame::FrameBuffer;

/// Receives frames on the pipeline's delivery thread.
///
/// The buffer is only valid for the duration of the call. The pipeline is
/// blocked until this returns, so keep it short and hand heavier work to
/// another thread.
pub trait FrameHandler: Send + 'static {
    fn on_frame(&mut self, frame: &FrameBuffer<'_>);
}

impl<F> FrameHandler for F
where
    F: FnMut(&FrameBuffer<'_>) + Send + 'static,
{
    fn on_frame(&mut self, frame: &FrameBuffer<'_>) {
        self(frame)
    }
}

/// Delivery counters for one running capture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub delivered: u64,
    pub rejected: u64,
    /// Handler invocations that panicked. The stream keeps going.
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,
}

/// Shared read side of a callback's counters
#[derive(Clone, Default)]
pub(crate) struct StatsHandle(Arc<CachePadded<Counters>>);

impl StatsHandle {
    pub(crate) fn snapshot(&self) -> FrameStats {
        FrameStats {
            delivered: self.0.delivered.load(Ordering::Relaxed),
            rejected: self.0.rejected.load(Ordering::Relaxed),
            panicked: self.0.panicked.load(Ordering::Relaxed),
        }
    }
}

/// Wraps raw buffers into [`FrameBuffer`] views stamped with the negotiated
/// dimensions and forwards them to the application handler.
///
/// Backends hold it as `Arc<FrameCallback>`; it is dropped with the last
/// graph reference.
pub struct FrameCallback {
    width: u32,
    height: u32,
    handler: Mutex<Box<dyn FrameHandler>>,
    stats: StatsHandle,
}

impl FrameCallback {
    pub(crate) fn new(width: u32, height: u32, handler: Box<dyn FrameHandler>) -> Self {
        Self {
            width,
            height,
            handler: Mutex::new(handler),
            stats: StatsHandle::default(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Forward one raw buffer to the handler. Calls never overlap; a second
    /// caller waits until the first handler invocation returns.
    pub fn deliver(&self, data: &[u8]) {
        let Some(frame) = FrameBuffer::new(data, self.width, self.height, true) else {
            self.stats.0.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camtap_frames_rejected").increment(1);
            warn!(
                len = data.len(),
                width = self.width,
                height = self.height,
                "Buffer too short for negotiated format, frame dropped"
            );
            return;
        };

        let started = Instant::now();
        let outcome = {
            let mut handler = match self.handler.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Unwinding into the pipeline's streaming thread would end the
            // stream (or abort inside a C callback)
            panic::catch_unwind(AssertUnwindSafe(|| handler.on_frame(&frame)))
        };
        if let Err(payload) = outcome {
            self.stats.0.panicked.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camtap_handler_panics").increment(1);
            error!("Frame handler panicked: {}", panic_message(&*payload));
            return;
        }

        self.stats.0.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camtap_frames_delivered").increment(1);
        metrics::histogram!("camtap_handler_time_us").record(started.elapsed().as_micros() as f64);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

//! Demo windows: single camera preview, histogram, one window per camera
//!
//! Frames arrive on the pipeline thread. The handler only copies the frame
//! into a one-slot channel; the SDL event loop on this thread draws it. A
//! busy event loop drops frames instead of stalling the pipeline.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, Sender, TrySendError};
use sdl2::event::{Event, WindowEvent};
use sdl2::keyboard::Scancode;
use tracing::{error, info, warn};

use super::histogram::Histogram;
use super::window::PreviewWindow;
use crate::backend::CaptureBackend;
use crate::capture::{CaptureSession, DeviceDirectory, Frame, FrameBuffer, SessionOptions};
use crate::platform::Platform;
use crate::utils::next_device_wrapping;
use crate::Config;

const WINDOW_OFFSET: i32 = 64;

/// What a window draws for each received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Video,
    Histogram,
}

impl View {
    fn title(self) -> &'static str {
        match self {
            View::Video => "Simple",
            View::Histogram => "Grayscale Histogram",
        }
    }
}

/// Handler that copies each frame into `tx`, dropping it when the slot is full
pub fn forward_frames(tx: Sender<Frame>) -> impl FnMut(&FrameBuffer<'_>) + Send + 'static {
    let mut sequence = 0u64;
    move |frame: &FrameBuffer<'_>| {
        sequence += 1;
        match tx.try_send(Frame::copy_from(frame, sequence)) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                warn!("Preview closed, dropping frame {}", sequence)
            }
        }
    }
}

fn draw(window: &mut PreviewWindow, view: View, frame: &Frame) -> Result<()> {
    match view {
        View::Video => window.show_frame(frame),
        View::Histogram => window.show_histogram(&Histogram::from_frame(&frame.view())),
    }
}

/// One window cycling through the attached cameras with TAB
pub fn run_single<B: CaptureBackend>(
    platform: Arc<Platform<B>>,
    config: &Config,
    view: View,
) -> Result<()> {
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let video = sdl_context.video().map_err(|e| eyre!(e))?;
    let mut window = PreviewWindow::new(
        &video,
        view.title(),
        (10, 64),
        config.display.width,
        config.display.height,
    )?;

    let options = SessionOptions {
        policy: config.capture.policy,
        suppress_preview: config.capture.suppress_preview,
    };
    let mut directory = DeviceDirectory::new(platform.clone());
    directory.init()?;
    let mut session = CaptureSession::with_options(platform, options);
    let (tx, rx) = flume::bounded::<Frame>(1);

    switch_camera(&mut directory, &mut session, &mut window, view, &tx)?;

    let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
    'running: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. } => {
                    info!("Quit event received");
                    break 'running;
                }
                Event::KeyDown {
                    scancode: Some(Scancode::Tab),
                    ..
                } => switch_camera(&mut directory, &mut session, &mut window, view, &tx)?,
                _ => {}
            }
        }

        match rx.recv_timeout(Duration::from_millis(16)) {
            Ok(frame) => {
                if let Err(e) = draw(&mut window, view, &frame) {
                    error!("Display error: {}", e);
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => {}
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    session.stop();
    Ok(())
}

/// Stop the current camera, move to the next one (wrapping around), and
/// start it
fn switch_camera<B: CaptureBackend>(
    directory: &mut DeviceDirectory<B>,
    session: &mut CaptureSession<B>,
    window: &mut PreviewWindow,
    view: View,
    tx: &Sender<Frame>,
) -> Result<()> {
    session.stop();

    let title = match next_device_wrapping(directory)? {
        Some(record) => match session.bind(&record.identifier) {
            Ok(()) => match session.start(forward_frames(tx.clone())) {
                Ok(()) => format!("{} - {}", view.title(), record.display_name),
                Err(e) => {
                    warn!("Failed to start {}: {}", record.display_name, e);
                    format!("{} - {} failed to start", view.title(), record.display_name)
                }
            },
            Err(e) => {
                warn!("Failed to bind {}: {}", record.display_name, e);
                format!("{} - {} unavailable", view.title(), record.display_name)
            }
        },
        None => format!(
            "{} - Please attach a camera and then press <TAB>",
            view.title()
        ),
    };

    window.set_title(&title)?;
    // Repaint the background while the camera starts
    window.show_background()
}

struct CameraWindow<B: CaptureBackend> {
    window: PreviewWindow,
    session: CaptureSession<B>,
    frames: Receiver<Frame>,
}

/// One window per attached camera, staggered diagonally
pub fn run_multiple<B: CaptureBackend>(platform: Arc<Platform<B>>, config: &Config) -> Result<()> {
    let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
    let video = sdl_context.video().map_err(|e| eyre!(e))?;
    let options = SessionOptions {
        policy: config.capture.policy,
        suppress_preview: config.capture.suppress_preview,
    };

    let devices = DeviceDirectory::new(platform.clone()).snapshot()?;
    if devices.is_empty() {
        return Err(eyre!("No capture device attached"));
    }

    let mut windows = Vec::with_capacity(devices.len());
    let mut position = 0;
    for record in devices {
        let mut window = PreviewWindow::new(
            &video,
            &record.display_name,
            (position, position),
            config.display.width,
            config.display.height,
        )?;
        position += WINDOW_OFFSET;
        window.show_background()?;

        let (tx, rx) = flume::bounded::<Frame>(1);
        let mut session = CaptureSession::with_options(platform.clone(), options);
        if let Err(e) = session
            .bind(&record.identifier)
            .and_then(|()| session.start(forward_frames(tx)))
        {
            warn!("Camera {} unavailable: {}", record.display_name, e);
        }
        windows.push(CameraWindow {
            window,
            session,
            frames: rx,
        });
    }

    let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;
    'running: loop {
        for event in event_pump.poll_iter() {
            match event {
                Event::Quit { .. }
                | Event::Window {
                    win_event: WindowEvent::Close,
                    ..
                } => {
                    info!("Close requested");
                    break 'running;
                }
                _ => {}
            }
        }

        for cw in windows.iter_mut() {
            if let Ok(frame) = cw.frames.try_recv() {
                if let Err(e) = cw.window.show_frame(&frame) {
                    error!(window = cw.window.id(), "Display error: {}", e);
                }
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    for cw in windows.iter_mut() {
        cw.session.stop();
    }
    Ok(())
}

//! camtap demo: camera preview, histogram, multi-camera and headless capture

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camtap::backend::{CaptureBackend, SyntheticBackend};
use camtap::{
    utils, BackendKind, CaptureSession, Config, DemoMode, DeviceDirectory, FrameBuffer, Platform,
    SessionOptions,
};
use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("camtap=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camtap launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!(backend = ?config.capture.backend, mode = ?config.demo.mode, "Configuration loaded");

    // The platform must outlive every directory and session, which hold an Arc to it
    match config.capture.backend {
        BackendKind::Gstreamer => {
            #[cfg(feature = "gstreamer-pipeline")]
            {
                let platform = Platform::init(camtap::backend::GstBackend::new())?;
                run(platform, &config).await?;
            }
            #[cfg(not(feature = "gstreamer-pipeline"))]
            return Err(eyre!("built without the gstreamer-pipeline feature"));
        }
        BackendKind::Synthetic => {
            let backend =
                SyntheticBackend::pattern_cameras(config.synthetic.devices, config.synthetic.fps);
            let platform = Platform::init(backend)?;
            run(platform, &config).await?;
        }
    }

    info!("camtap shutting down");
    Ok(())
}

async fn run<B: CaptureBackend>(platform: Arc<Platform<B>>, config: &Config) -> Result<()> {
    match config.demo.mode {
        DemoMode::Headless => headless(platform, config).await,
        #[cfg(feature = "preview-window")]
        DemoMode::Simple => {
            camtap::display::app::run_single(platform, config, camtap::display::app::View::Video)
        }
        #[cfg(feature = "preview-window")]
        DemoMode::Histogram => camtap::display::app::run_single(
            platform,
            config,
            camtap::display::app::View::Histogram,
        ),
        #[cfg(feature = "preview-window")]
        DemoMode::Multiple => camtap::display::app::run_multiple(platform, config),
        #[cfg(not(feature = "preview-window"))]
        mode => Err(eyre!("{:?} needs the preview-window feature", mode)),
    }
}

/// Capture without a window, logging delivery once a second
async fn headless<B: CaptureBackend>(platform: Arc<Platform<B>>, config: &Config) -> Result<()> {
    let mut directory = DeviceDirectory::new(platform.clone());
    let device = utils::pick_device(&mut directory, config.capture.device.as_deref())?
        .ok_or_else(|| eyre!("No capture device attached"))?;
    directory.term();

    let mut session = CaptureSession::with_options(
        platform,
        SessionOptions {
            policy: config.capture.policy,
            suppress_preview: config.capture.suppress_preview,
        },
    );
    session.bind(&device.identifier)?;
    session.start(|frame: &FrameBuffer<'_>| {
        tracing::trace!(width = frame.width(), height = frame.height(), "Frame");
    })?;
    if let Some(format) = session.negotiated_format() {
        info!(%format, "Capturing from {}", device.display_name);
    }

    let deadline = async {
        match config.demo.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(stats) = session.stats() {
                    info!(
                        fps = stats.delivered - last,
                        delivered = stats.delivered,
                        rejected = stats.rejected,
                        panicked = stats.panicked,
                        "Capture stats"
                    );
                    last = stats.delivered;
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
        }
    }

    session.stop();
    Ok(())
}

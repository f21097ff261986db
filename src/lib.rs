pub mod backend;
pub mod capture;
pub mod display;
pub mod error;
pub mod platform;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use capture::{
    CaptureSession, DeviceDirectory, DeviceRecord, FormatPolicy, Frame, FrameBuffer,
    FrameHandler, FrameStats, PixelFormat, SessionOptions, VideoFormat,
};
pub use error::{CaptureError, Result, StartStage};
pub use platform::Platform;

/// Environment prefix for overrides, e.g. `CAMTAP__CAPTURE__BACKEND=synthetic`
pub const ENV_PREFIX: &str = "CAMTAP";

/// Default config file looked up in the working directory
pub const CONFIG_FILE: &str = "camtap.toml";

/// Demo configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub display: DisplayConfig,
    pub demo: DemoConfig,
    pub synthetic: SyntheticConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Gstreamer,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub backend: BackendKind,
    /// Identifier to prefer over the first enumerated device
    pub device: Option<String>,
    pub policy: FormatPolicy,
    pub suppress_preview: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemoMode {
    Simple,
    Histogram,
    Multiple,
    Headless,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoConfig {
    pub mode: DemoMode,
    /// Headless run time, forever when unset
    pub duration_secs: Option<u64>,
}

/// Virtual cameras used when `capture.backend = "synthetic"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub devices: usize,
    pub fps: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                backend: if cfg!(feature = "gstreamer-pipeline") {
                    BackendKind::Gstreamer
                } else {
                    BackendKind::Synthetic
                },
                device: None,
                policy: FormatPolicy::default(),
                suppress_preview: true,
            },
            display: DisplayConfig {
                width: 640,
                height: 480,
            },
            demo: DemoConfig {
                mode: DemoMode::Simple,
                duration_secs: None,
            },
            synthetic: SyntheticConfig {
                devices: 2,
                fps: 30,
            },
        }
    }
}

impl Config {
    /// Defaults, then `path` (or `camtap.toml` if present), then environment
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, config::ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(CONFIG_FILE).required(false),
        };
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

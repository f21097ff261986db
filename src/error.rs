//! Error types shared by the directory, the session and the backends

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Raw failure reported by a capture backend.
///
/// The session and directory translate these into [`CaptureError`] variants
/// depending on which operation was in progress.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("no such device: {0}")]
    NotFound(String),
    #[error("property unavailable: {0}")]
    Property(String),
    #[error("device bind failed: {0}")]
    Bind(String),
    #[error("element creation failed: {0}")]
    Element(String),
    #[error("format negotiation failed: {0}")]
    Negotiation(String),
    #[error("link failed: {0}")]
    Link(String),
    #[error("state change failed: {0}")]
    State(String),
}

/// Steps of [`CaptureSession::start`](crate::CaptureSession::start) that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStage {
    CreateTap,
    AddSource,
    TapEncoding,
    Connect,
    QueryFormat,
    RegisterCallback,
    Render,
    Run,
}

impl fmt::Display for StartStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StartStage::CreateTap => "creating the frame tap",
            StartStage::AddSource => "adding the source",
            StartStage::TapEncoding => "setting the tap encoding",
            StartStage::Connect => "connecting source to tap",
            StartStage::QueryFormat => "querying the connected format",
            StartStage::RegisterCallback => "registering the frame callback",
            StartStage::Render => "rendering the tap output",
            StartStage::Run => "running the pipeline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture service unavailable")]
    ServiceUnavailable(#[source] BackendError),

    #[error("device not found: {identifier}")]
    DeviceNotFound {
        identifier: String,
        #[source]
        source: BackendError,
    },

    #[error("device {identifier} could not be bound")]
    BindFailed {
        identifier: String,
        #[source]
        source: BackendError,
    },

    #[error("friendly name of {identifier} is unavailable")]
    PropertyUnavailable {
        identifier: String,
        #[source]
        source: BackendError,
    },

    #[error("source could not be connected to the frame tap")]
    ConnectFailed(#[source] BackendError),

    #[error("no device is bound")]
    NotBound,

    #[error("capture start failed while {stage}")]
    CaptureStartFailed {
        stage: StartStage,
        #[source]
        source: Box<CaptureError>,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl CaptureError {
    pub(crate) fn start_failed(stage: StartStage, source: CaptureError) -> Self {
        CaptureError::CaptureStartFailed {
            stage,
            source: Box::new(source),
        }
    }

    /// The stage a failed start stopped at, if this is a start failure.
    pub fn start_stage(&self) -> Option<StartStage> {
        match self {
            CaptureError::CaptureStartFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// True for a start failure caused by the source/tap link.
    pub fn is_connect_failure(&self) -> bool {
        match self {
            CaptureError::ConnectFailed(_) => true,
            CaptureError::CaptureStartFailed { source, .. } => source.is_connect_failure(),
            _ => false,
        }
    }
}

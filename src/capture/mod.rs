pub mod callback;
pub mod directory;
pub mod frame;
pub mod negotiate;
pub mod session;

pub use callback::{FrameHandler, FrameStats};
pub use directory::{DeviceDirectory, DeviceRecord};
pub use frame::{Frame, FrameBuffer, FrameMetadata, PixelFormat, VideoFormat};
pub use negotiate::FormatPolicy;
pub use session::{CaptureSession, SessionOptions};

//! Capture format selection on the source output

use serde::{Deserialize, Serialize};

use super::frame::{PixelFormat, VideoFormat};

/// "Good enough" policy: the first advertised format that meets every
/// threshold wins. Candidates are never ranked against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatPolicy {
    pub encoding: PixelFormat,
    pub min_width: u32,
    pub min_bit_depth: u16,
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self {
            encoding: PixelFormat::Rgb24,
            min_width: 640,
            min_bit_depth: 24,
        }
    }
}

impl FormatPolicy {
    pub fn accepts(&self, format: &VideoFormat) -> bool {
        format.encoding == self.encoding
            && format.width >= self.min_width
            && format.bit_depth >= self.min_bit_depth
    }

    /// First acceptable format in advertised order, `None` keeps the source default
    pub fn select<'a, I>(&self, formats: I) -> Option<&'a VideoFormat>
    where
        I: IntoIterator<Item = &'a VideoFormat>,
    {
        formats.into_iter().find(|f| self.accepts(f))
    }
}

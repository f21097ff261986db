use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Pixel encodings a source may advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    /// 32-bit RGB, stored B, G, R, X in memory
    Rgb32,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// Bits per pixel, or `None` for compressed formats
    pub fn bits_per_pixel(self) -> Option<u16> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(24),
            PixelFormat::Rgb32 => Some(32),
            PixelFormat::Yuyv4 => Some(16),
            PixelFormat::Nv12 => Some(12),
            PixelFormat::Mjpeg => None,
        }
    }
}

/// One format a source pin can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub encoding: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u16,
}

impl VideoFormat {
    /// Format with the bit depth implied by its encoding
    pub fn new(encoding: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            encoding,
            width,
            height,
            bit_depth: encoding.bits_per_pixel().unwrap_or(0),
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {}x{} @{}bpp",
            self.encoding, self.width, self.height, self.bit_depth
        )
    }
}

/// Borrowed view of a frame delivered by the pipeline.
///
/// The view only lives for one callback invocation. Use [`Frame::copy_from`]
/// to keep the pixels past that point.
#[derive(Clone, Copy)]
pub struct FrameBuffer<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    stride: usize,
    bottom_up: bool,
    format: PixelFormat,
}

impl<'a> FrameBuffer<'a> {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Wrap a 32-bit frame; `None` when `data` is too short for the dimensions
    pub fn new(data: &'a [u8], width: u32, height: u32, bottom_up: bool) -> Option<Self> {
        let stride = width as usize * Self::BYTES_PER_PIXEL;
        let needed = stride.checked_mul(height as usize)?;
        if data.len() < needed {
            return None;
        }
        Some(Self {
            data: &data[..needed],
            width,
            height,
            stride,
            bottom_up,
            format: PixelFormat::Rgb32,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes between the starts of two stored rows
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Rows are stored bottom row first
    pub fn is_bottom_up(&self) -> bool {
        self.bottom_up
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw bytes in storage order
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Row `y` counted from the top of the image
    pub fn row(&self, y: u32) -> Option<&'a [u8]> {
        if y >= self.height {
            return None;
        }
        let stored = if self.bottom_up {
            self.height - 1 - y
        } else {
            y
        };
        let data = self.data;
        let start = stored as usize * self.stride;
        Some(&data[start..start + self.width as usize * Self::BYTES_PER_PIXEL])
    }

    /// Iterate `(r, g, b)` over every pixel, top row first
    pub fn pixels(&self) -> impl Iterator<Item = (u8, u8, u8)> + 'a {
        let this = *self;
        (0..this.height)
            .filter_map(move |y| this.row(y))
            .flat_map(|row| row.chunks_exact(4).map(|px| (px[2], px[1], px[0])))
    }
}

impl fmt::Debug for FrameBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("bottom_up", &self.bottom_up)
            .field("format", &self.format)
            .finish()
    }
}

/// Owned copy of a delivered frame that may cross threads
#[derive(Clone)]
pub struct Frame {
    pub data: Bytes,
    pub meta: FrameMetadata,
    /// When the copy was taken
    pub timestamp: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub bottom_up: bool,
    pub format: PixelFormat,
}

impl Frame {
    pub fn copy_from(buffer: &FrameBuffer<'_>, sequence: u64) -> Self {
        Self {
            data: Bytes::copy_from_slice(buffer.data()),
            meta: FrameMetadata {
                sequence,
                width: buffer.width(),
                height: buffer.height(),
                stride: buffer.stride(),
                bottom_up: buffer.is_bottom_up(),
                format: buffer.format(),
            },
            timestamp: Instant::now(),
        }
    }

    /// Borrow the copy as a [`FrameBuffer`] again
    pub fn view(&self) -> FrameBuffer<'_> {
        FrameBuffer {
            data: &self.data,
            width: self.meta.width,
            height: self.meta.height,
            stride: self.meta.stride,
            bottom_up: self.meta.bottom_up,
            format: self.meta.format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2x2 frame, stored bottom-up: stored row 0 is the bottom of the image
    fn two_by_two() -> Vec<u8> {
        vec![
            1, 1, 1, 0, 2, 2, 2, 0, // bottom row
            3, 3, 3, 0, 4, 4, 4, 0, // top row
        ]
    }

    #[test]
    fn short_buffers_are_refused() {
        let data = vec![0u8; 4 * 4 * 3];
        assert!(FrameBuffer::new(&data, 4, 4, true).is_none());
        assert!(FrameBuffer::new(&data, 4, 3, true).is_some());
    }

    #[test]
    fn stride_is_four_bytes_per_pixel() {
        let data = vec![0u8; 640 * 480 * 4];
        let frame = FrameBuffer::new(&data, 640, 480, true).unwrap();
        assert_eq!(frame.stride(), 2560);
        assert_eq!(frame.format(), PixelFormat::Rgb32);
    }

    #[test]
    fn bottom_up_rows_are_flipped() {
        let data = two_by_two();
        let frame = FrameBuffer::new(&data, 2, 2, true).unwrap();
        assert_eq!(frame.row(0).unwrap()[0], 3);
        assert_eq!(frame.row(1).unwrap()[0], 1);
        assert!(frame.row(2).is_none());

        let top_down = FrameBuffer::new(&data, 2, 2, false).unwrap();
        assert_eq!(top_down.row(0).unwrap()[0], 1);
    }

    #[test]
    fn pixels_read_bgrx_order() {
        let data = vec![10, 20, 30, 0];
        let frame = FrameBuffer::new(&data, 1, 1, true).unwrap();
        assert_eq!(frame.pixels().collect::<Vec<_>>(), vec![(30, 20, 10)]);
    }

    #[test]
    fn owned_copy_round_trips_the_view() {
        let data = two_by_two();
        let frame = FrameBuffer::new(&data, 2, 2, true).unwrap();
        let owned = Frame::copy_from(&frame, 7);
        assert_eq!(owned.meta.sequence, 7);
        let view = owned.view();
        assert_eq!(view.row(0), frame.row(0));
        assert!(view.is_bottom_up());
    }

    #[test]
    fn compressed_formats_have_no_depth() {
        assert_eq!(VideoFormat::new(PixelFormat::Mjpeg, 1920, 1080).bit_depth, 0);
        assert_eq!(VideoFormat::new(PixelFormat::Rgb24, 640, 480).bit_depth, 24);
    }
}

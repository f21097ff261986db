//! Grayscale histogram of a captured frame

use crate::capture::frame::FrameBuffer;

pub const GRAPH_BOTTOM: i32 = 440;
pub const GRAPH_HEIGHT: u32 = 400;
pub const BAR_WIDTH: u32 = 2;

/// One bar of the rendered graph, in window coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bar {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
    /// Gray level the bar counts, also its fill color
    pub gray: u8,
}

#[derive(Debug, Clone)]
pub struct Histogram {
    bins: [u64; 256],
}

impl Histogram {
    /// Count `(r + g + b) / 3` over every pixel
    pub fn from_frame(frame: &FrameBuffer<'_>) -> Self {
        let mut bins = [0u64; 256];
        for (r, g, b) in frame.pixels() {
            let gray = (r as u16 + g as u16 + b as u16) / 3;
            bins[gray as usize] += 1;
        }
        Self { bins }
    }

    pub fn bins(&self) -> &[u64; 256] {
        &self.bins
    }

    pub fn max(&self) -> u64 {
        self.bins.iter().copied().max().unwrap_or(0)
    }

    /// Bars scaled so the fullest bin reaches the graph height. Dark levels
    /// are drawn on the right.
    pub fn bars(&self) -> impl Iterator<Item = Bar> + '_ {
        let max = self.max();
        self.bins
            .iter()
            .enumerate()
            .filter(move |(_, count)| max > 0 && **count > 0)
            .map(move |(i, &count)| {
                let scaled = count as f64 / max as f64;
                let height = (GRAPH_HEIGHT as f64 * scaled) as u32;
                Bar {
                    left: (255 - i as i32) * BAR_WIDTH as i32,
                    top: GRAPH_BOTTOM - height as i32,
                    width: BAR_WIDTH,
                    height,
                    gray: i as u8,
                }
            })
    }
}

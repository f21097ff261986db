pub mod histogram;

#[cfg(feature = "preview-window")]
pub mod app;
#[cfg(feature = "preview-window")]
pub mod window;

#[cfg(feature = "preview-window")]
pub use window::PreviewWindow;

/// Placeholder image shown while no camera delivers frames, 32-bit BGRx
/// rows top first
pub fn background_pattern(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            data.extend_from_slice(&[
                x.min(255) as u8,
                y.min(255) as u8,
                (x + y).min(255) as u8,
                0xff,
            ]);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_saturates_at_white() {
        let data = background_pattern(300, 2);
        assert_eq!(data.len(), 300 * 2 * 4);
        let last = &data[data.len() - 4..];
        assert_eq!(last, &[255, 1, 255, 0xff]);
    }
}

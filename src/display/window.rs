//! SDL2 preview window
//! Draws captured frames, the background pattern and histograms.
//! Uses the sdl2 crate for window management and rendering.

use color_eyre::{eyre::eyre, Result};
use sdl2::pixels::{Color, PixelFormatEnum};
use sdl2::rect::Rect;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};

use super::background_pattern;
use super::histogram::Histogram;
use crate::capture::frame::Frame;

/// One demo window
pub struct PreviewWindow {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    background: Vec<u8>,
    width: u32,
    height: u32,
}

impl PreviewWindow {
    pub fn new(
        video: &sdl2::VideoSubsystem,
        title: &str,
        position: (i32, i32),
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let window = video
            .window(title, width, height)
            .position(position.0, position.1)
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            background: background_pattern(width, height),
            width,
            height,
        })
    }

    pub fn id(&self) -> u32 {
        self.canvas.window().id()
    }

    pub fn set_title(&mut self, title: &str) -> Result<()> {
        self.canvas.window_mut().set_title(title)?;
        Ok(())
    }

    fn blit(&mut self, data: &[u8], width: u32, height: u32, pitch: usize, flip: bool) -> Result<()> {
        // RGB888 is XRGB8888, laid out B, G, R, X in memory
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB888, width, height)
            .map_err(|e| eyre!(e))?;

        texture.update(None, data, pitch).map_err(|e| eyre!(e))?;

        let target = Rect::new(0, 0, width, height);
        self.canvas
            .copy_ex(&texture, None, Some(target), 0.0, None, false, flip)
            .map_err(|e| eyre!(e))
    }

    fn draw_background(&mut self) -> Result<()> {
        let background = std::mem::take(&mut self.background);
        let result = self.blit(&background, self.width, self.height, self.width as usize * 4, false);
        self.background = background;
        result
    }

    pub fn show_background(&mut self) -> Result<()> {
        self.canvas.clear();
        self.draw_background()?;
        self.canvas.present();
        Ok(())
    }

    /// Draw a frame at its native size over the background
    pub fn show_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.meta.width == 0 || frame.meta.height == 0 {
            return Ok(());
        }
        self.canvas.clear();
        self.draw_background()?;
        self.blit(
            &frame.data,
            frame.meta.width,
            frame.meta.height,
            frame.meta.stride,
            frame.meta.bottom_up,
        )?;
        self.canvas.present();
        Ok(())
    }

    /// Draw the histogram bars over the background
    pub fn show_histogram(&mut self, histogram: &Histogram) -> Result<()> {
        self.canvas.clear();
        self.draw_background()?;
        for bar in histogram.bars() {
            self.canvas
                .set_draw_color(Color::RGB(bar.gray, bar.gray, bar.gray));
            self.canvas
                .fill_rect(Rect::new(bar.left, bar.top, bar.width, bar.height))
                .map_err(|e| eyre!(e))?;
        }
        self.canvas.present();
        Ok(())
    }
}

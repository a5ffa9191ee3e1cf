use anyhow::{Context, Result};
use minifb::{Key, Window, WindowOptions};

use crate::render::overlay::{OverlayCanvas, OverlaySurface};

/// 骨格オーバーレイを表示する minifb ウィンドウ
pub struct OverlayWindow {
    window: Window,
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl OverlayWindow {
    pub fn new(title: &str, width: usize, height: usize) -> Result<Self> {
        let window = Window::new(
            title,
            width,
            height,
            WindowOptions {
                resize: false,
                ..WindowOptions::default()
            },
        )
        .context("failed to open preview window")?;

        Ok(Self {
            window,
            buffer: vec![0u32; width * height],
            width,
            height,
        })
    }

    pub fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }
}

impl OverlaySurface for OverlayWindow {
    /// 不透明ピクセルだけを黒背景に描く (ARGB -> 0RGB)
    fn present(&mut self, overlay: &OverlayCanvas) -> Result<()> {
        self.buffer.fill(0);
        let w = self.width.min(overlay.width());
        let h = self.height.min(overlay.height());
        for y in 0..h {
            for x in 0..w {
                if let Some(p) = overlay.pixel(x, y).filter(|p| p >> 24 != 0) {
                    self.buffer[y * self.width + x] = p & 0x00FF_FFFF;
                }
            }
        }
        self.window
            .update_with_buffer(&self.buffer, self.width, self.height)
            .context("failed to update preview window")?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        OverlayWindow::is_open(self)
    }
}

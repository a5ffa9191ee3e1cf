//! Skeleton overlay rasterizer.
//!
//! Each call to [`OverlayRenderer::render`] is a full, independent redraw of
//! one landmark set: clear, edges, then joints on top. No smoothing between
//! successive sets.

use anyhow::Result;

use crate::pose::{landmark_at, Landmark, VISIBILITY_THRESHOLD};
use crate::render::skeleton::{CLEAR_COLOR, JOINT_COLOR, SKELETON_COLOR, SKELETON_CONNECTIONS};

/// ARGB pixel buffer the overlay is drawn into.
pub struct OverlayCanvas {
    buffer: Vec<u32>,
    width: usize,
    height: usize,
}

impl OverlayCanvas {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            buffer: vec![CLEAR_COLOR; width * height],
            width,
            height,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[u32] {
        &self.buffer
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        (x < self.width && y < self.height).then(|| self.buffer[y * self.width + x])
    }

    /// Match the video surface size, clearing on change.
    pub fn resize(&mut self, width: usize, height: usize) {
        if width != self.width || height != self.height {
            self.width = width;
            self.height = height;
            self.buffer = vec![CLEAR_COLOR; width * height];
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(CLEAR_COLOR);
    }

    /// Bresenham line, stamped with a square brush for thickness.
    pub fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, width: i32, color: u32) {
        let half = (width.max(1) - 1) / 2;
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;

        let mut x = x0;
        let mut y = y0;

        loop {
            for oy in -half..=half {
                for ox in -half..=half {
                    self.set_pixel(x + ox, y + oy, color);
                }
            }

            if x == x1 && y == y1 {
                break;
            }

            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    pub fn fill_circle(&mut self, cx: i32, cy: i32, radius: i32, color: u32) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy <= radius * radius {
                    self.set_pixel(cx + dx, cy + dy, color);
                }
            }
        }
    }

    /// Out-of-bounds writes are dropped.
    pub fn set_pixel(&mut self, x: i32, y: i32, color: u32) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            self.buffer[y as usize * self.width + x as usize] = color;
        }
    }
}

/// Somewhere a finished overlay can be shown.
pub trait OverlaySurface {
    fn present(&mut self, canvas: &OverlayCanvas) -> Result<()>;

    /// False once the user closed it.
    fn is_open(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawStats {
    pub edges: usize,
    pub joints: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayStyle {
    pub visibility_threshold: f32,
    pub line_width: i32,
    pub joint_radius: i32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            visibility_threshold: VISIBILITY_THRESHOLD,
            line_width: 4,
            joint_radius: 6,
        }
    }
}

pub struct OverlayRenderer {
    canvas: OverlayCanvas,
    style: OverlayStyle,
    redraws: u64,
}

impl OverlayRenderer {
    pub fn new(width: usize, height: usize, style: OverlayStyle) -> Self {
        Self {
            canvas: OverlayCanvas::new(width, height),
            style,
            redraws: 0,
        }
    }

    pub fn canvas(&self) -> &OverlayCanvas {
        &self.canvas
    }

    pub fn redraws(&self) -> u64 {
        self.redraws
    }

    /// Redraw the overlay for one landmark set at the given surface size.
    pub fn render(&mut self, landmarks: &[Landmark], surface: (u32, u32)) -> DrawStats {
        let (w, h) = surface;
        self.canvas.resize(w as usize, h as usize);
        self.canvas.clear();
        self.redraws += 1;

        let th = self.style.visibility_threshold;
        let mut stats = DrawStats::default();

        for (start_idx, end_idx) in SKELETON_CONNECTIONS.iter() {
            let (Some(start), Some(end)) =
                (landmark_at(landmarks, *start_idx), landmark_at(landmarks, *end_idx))
            else {
                continue;
            };
            if start.is_visible(th) && end.is_visible(th) {
                let (x1, y1) = start.to_pixel(w, h);
                let (x2, y2) = end.to_pixel(w, h);
                self.canvas
                    .draw_line(x1, y1, x2, y2, self.style.line_width, SKELETON_COLOR);
                stats.edges += 1;
            }
        }

        for lm in landmarks.iter().filter(|lm| lm.is_visible(th)) {
            let (px, py) = lm.to_pixel(w, h);
            self.canvas
                .fill_circle(px, py, self.style.joint_radius, JOINT_COLOR);
            stats.joints += 1;
        }

        stats
    }
}

//! RGBA raster implementation of [`Canvas`], used for still output.

use std::path::Path;

use ab_glyph::{Font, PxScale, ScaleFont};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::canvas::Canvas;
use crate::palette::Color;
use crate::{CanvasSize, PointF, RectF};

pub use ab_glyph::FontArc;

/// Advance per character, relative to text size, when no font is loaded.
const FALLBACK_ADVANCE: f32 = 0.5;

pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
    FontArc::try_from_vec(bytes).map_err(|e| anyhow::anyhow!("parse font {}: {}", path.display(), e))
}

pub struct RasterCanvas {
    image: RgbaImage,
    font: Option<FontArc>,
}

impl RasterCanvas {
    pub fn new(size: CanvasSize) -> Self {
        Self::from_image(RgbaImage::new(size.width, size.height))
    }

    /// Draw over an existing picture (e.g. the still the detections came from).
    pub fn from_image(image: RgbaImage) -> Self {
        Self { image, font: None }
    }

    /// Without a font, text is measured with a fixed advance and not drawn.
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.image.save(path).with_context(|| format!("write {}", path.display()))
    }
}

fn rgba(c: Color) -> Rgba<u8> {
    Rgba([c.r, c.g, c.b, c.a])
}

fn rect_at(left: f32, top: f32, right: f32, bottom: f32) -> Rect {
    let x = left.round() as i32;
    let y = top.round() as i32;
    let w = (right.round() as i32 - x).max(1) as u32;
    let h = (bottom.round() as i32 - y).max(1) as u32;
    Rect::at(x, y).of_size(w, h)
}

impl Canvas for RasterCanvas {
    fn size(&self) -> CanvasSize {
        CanvasSize::new(self.image.width(), self.image.height())
    }

    fn measure_text(&self, text: &str, text_size_px: f32) -> f32 {
        match &self.font {
            Some(font) => text_size(PxScale::from(text_size_px), font, text).0 as f32,
            None => text.chars().count() as f32 * text_size_px * FALLBACK_ADVANCE,
        }
    }

    fn stroke_rect(&mut self, rect: RectF, color: Color, stroke_width: f32) {
        // centered on the outline, one pixel ring per step
        let n = stroke_width.round().max(1.0) as i32;
        let half = n / 2;
        for k in 0..n {
            let d = (k - half) as f32;
            let r = rect_at(rect.left - d, rect.top - d, rect.right + d, rect.bottom + d);
            draw_hollow_rect_mut(&mut self.image, r, rgba(color));
        }
    }

    fn fill_rect(&mut self, rect: RectF, color: Color) {
        let r = rect.normalized();
        draw_filled_rect_mut(&mut self.image, rect_at(r.left, r.top, r.right, r.bottom), rgba(color));
    }

    fn draw_text(&mut self, text: &str, origin: PointF, color: Color, text_size_px: f32) {
        let Some(font) = &self.font else { return };
        let scale = PxScale::from(text_size_px);
        let ascent = font.as_scaled(scale).ascent();
        draw_text_mut(
            &mut self.image,
            rgba(color),
            origin.x.round() as i32,
            (origin.y - ascent).round() as i32,
            scale,
            font,
            text,
        );
    }

    fn draw_line(&mut self, from: PointF, to: PointF, color: Color, stroke_width: f32) {
        let (dx, dy) = (to.x - from.x, to.y - from.y);
        let len = (dx * dx + dy * dy).sqrt();
        let (nx, ny) = if len > 0.0 { (-dy / len, dx / len) } else { (0.0, 0.0) };
        let n = stroke_width.round().max(1.0) as i32;
        let half = (n - 1) as f32 / 2.0;
        for k in 0..n {
            let o = k as f32 - half;
            draw_line_segment_mut(
                &mut self.image,
                (from.x + nx * o, from.y + ny * o),
                (to.x + nx * o, to.y + ny * o),
                rgba(color),
            );
        }
    }
}

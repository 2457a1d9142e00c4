//! Drawing surface supplied by the renderer host.

use crate::palette::Color;
use crate::{CanvasSize, PointF, RectF};

pub trait Canvas {
    fn size(&self) -> CanvasSize;

    /// Advance width of `text` at `text_size` pixels.
    fn measure_text(&self, text: &str, text_size: f32) -> f32;

    fn stroke_rect(&mut self, rect: RectF, color: Color, stroke_width: f32);

    fn fill_rect(&mut self, rect: RectF, color: Color);

    /// `origin` is the left end of the text baseline.
    fn draw_text(&mut self, text: &str, origin: PointF, color: Color, text_size: f32);

    fn draw_line(&mut self, from: PointF, to: PointF, color: Color, stroke_width: f32);
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    StrokeRect { rect: RectF, color: Color, stroke_width: f32 },
    FillRect { rect: RectF, color: Color },
    Text { text: String, origin: PointF, color: Color, text_size: f32 },
    Line { from: PointF, to: PointF, color: Color, stroke_width: f32 },
}

/// Records draw calls instead of rasterizing them. Text is measured with a
/// fixed advance of half the text size per character.
#[derive(Debug, Clone)]
pub struct RecordingCanvas {
    size: CanvasSize,
    ops: Vec<DrawOp>,
}

impl RecordingCanvas {
    pub fn new(size: CanvasSize) -> Self {
        Self { size, ops: Vec::new() }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    pub fn lines(&self) -> impl Iterator<Item = (PointF, PointF, Color)> + '_ {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Line { from, to, color, .. } => Some((*from, *to, *color)),
            _ => None,
        })
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> + '_ {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

impl Canvas for RecordingCanvas {
    fn size(&self) -> CanvasSize {
        self.size
    }

    fn measure_text(&self, text: &str, text_size: f32) -> f32 {
        text.chars().count() as f32 * text_size * 0.5
    }

    fn stroke_rect(&mut self, rect: RectF, color: Color, stroke_width: f32) {
        self.ops.push(DrawOp::StrokeRect { rect, color, stroke_width });
    }

    fn fill_rect(&mut self, rect: RectF, color: Color) {
        self.ops.push(DrawOp::FillRect { rect, color });
    }

    fn draw_text(&mut self, text: &str, origin: PointF, color: Color, text_size: f32) {
        self.ops.push(DrawOp::Text { text: text.to_string(), origin, color, text_size });
    }

    fn draw_line(&mut self, from: PointF, to: PointF, color: Color, stroke_width: f32) {
        self.ops.push(DrawOp::Line { from, to, color, stroke_width });
    }
}

//! Image space to canvas space.
//!
//! Each axis is scaled independently (the preview is stretched to the canvas,
//! not letterboxed). Quarter-turn rotations swap which sensor dimension feeds
//! which axis, and a mirrored source reflects the horizontal coordinate.

use crate::frame::SourceImageGeometry;
use crate::{CanvasSize, PointF, RectF};

pub fn scale_factors(geometry: &SourceImageGeometry, canvas: CanvasSize) -> (f32, f32) {
    let (w, h) = geometry.effective_dimensions();
    (canvas.width as f32 / w as f32, canvas.height as f32 / h as f32)
}

pub fn to_canvas_x(x: f32, geometry: &SourceImageGeometry, canvas: CanvasSize) -> f32 {
    let (sx, _) = scale_factors(geometry, canvas);
    let scaled = x * sx;
    if geometry.is_mirrored {
        canvas.width as f32 - scaled
    } else {
        scaled
    }
}

pub fn to_canvas_y(y: f32, geometry: &SourceImageGeometry, canvas: CanvasSize) -> f32 {
    let (_, sy) = scale_factors(geometry, canvas);
    y * sy
}

pub fn to_canvas_point(p: PointF, geometry: &SourceImageGeometry, canvas: CanvasSize) -> PointF {
    PointF::new(to_canvas_x(p.x, geometry, canvas), to_canvas_y(p.y, geometry, canvas))
}

/// Corners are mapped independently, then re-ordered: mirroring turns the
/// left edge into the right one.
pub fn to_canvas_rect(r: RectF, geometry: &SourceImageGeometry, canvas: CanvasSize) -> RectF {
    let a = to_canvas_point(PointF::new(r.left, r.top), geometry, canvas);
    let b = to_canvas_point(PointF::new(r.right, r.bottom), geometry, canvas);
    RectF::new(a.x, a.y, b.x, b.y).normalized()
}

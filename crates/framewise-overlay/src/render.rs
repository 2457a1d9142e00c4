//! Draws one overlay frame: detection boxes with their label blocks, the
//! rule-of-thirds grid, and a guidance line for the primary detection.

use serde::Deserialize;

use crate::canvas::Canvas;
use crate::grid::{self, CompositionSuggestion, Quadrant};
use crate::palette::{self, PaletteEntry, PALETTE};
use crate::state::OverlayState;
use crate::{transform, CanvasSize, Detection, Label, PointF, RectF};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderStyle {
    pub text_size: f32,
    pub stroke_width: f32,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self { text_size: 54.0, stroke_width: 4.0 }
    }
}

impl RenderStyle {
    fn line_height(&self) -> f32 {
        self.text_size + self.stroke_width
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOutcome {
    pub boxes: Vec<RectF>,
    pub suggestion: Option<CompositionSuggestion>,
}

pub fn tracking_id_line(tracking_id: Option<i32>) -> String {
    match tracking_id {
        Some(id) => format!("Tracking ID: {id}"),
        None => "Tracking ID: none".to_string(),
    }
}

pub fn label_line(label: &Label) -> String {
    format!("{} (index: {})", label.text, label.index)
}

pub fn confidence_line(label: &Label) -> String {
    format!("{:.2}% confidence (index: {})", label.confidence * 100.0, label.index)
}

fn guidance_entry(corner: Quadrant) -> &'static PaletteEntry {
    match corner {
        Quadrant::NorthWest => &PALETTE[2],
        Quadrant::SouthWest => &PALETTE[3],
        Quadrant::NorthEast => &PALETTE[4],
        Quadrant::SouthEast => &PALETTE[5],
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: RenderStyle,
}

impl OverlayRenderer {
    pub fn new(style: RenderStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// `None` means nothing has been published yet; the grid is drawn anyway.
    pub fn render<C: Canvas + ?Sized>(&self, state: Option<&OverlayState>, canvas: &mut C) -> RenderOutcome {
        let size = canvas.size();
        let mut outcome = RenderOutcome::default();

        if let Some(state) = state {
            for det in &state.detections {
                let rect = transform::to_canvas_rect(det.bounding_box(), &state.geometry, size);
                self.draw_detection(canvas, det, rect);
                outcome.boxes.push(rect);
            }
        }

        self.draw_grid(canvas, size);

        if let Some(primary) = outcome.boxes.first() {
            let s = grid::suggest(primary.center(), size);
            let entry = guidance_entry(s.to_corner);
            canvas.draw_line(s.from, s.target, entry.stroke, self.style.stroke_width);
            outcome.suggestion = Some(s);
        }

        outcome
    }

    /// Label block width over every line it will hold.
    pub fn label_block_width<C: Canvas + ?Sized>(&self, canvas: &C, det: &Detection) -> f32 {
        let ts = self.style.text_size;
        det.labels().iter().fold(
            canvas.measure_text(&tracking_id_line(det.tracking_id()), ts),
            |w, label| {
                w.max(canvas.measure_text(&label.text, ts))
                    .max(canvas.measure_text(&confidence_line(label), ts))
            },
        )
    }

    fn draw_detection<C: Canvas + ?Sized>(&self, canvas: &mut C, det: &Detection, rect: RectF) {
        let entry = palette::entry_for(det.tracking_id());
        let stroke = self.style.stroke_width;
        let line_h = self.style.line_height();

        let text_w = self.label_block_width(canvas, det);
        let mut y = -line_h - 2.0 * line_h * det.labels().len() as f32;

        canvas.stroke_rect(rect, entry.stroke, stroke);
        canvas.fill_rect(
            RectF::new(rect.left - stroke, rect.top + y, rect.left + text_w + 2.0 * stroke, rect.top),
            entry.fill,
        );

        y += self.style.text_size;
        let ts = self.style.text_size;
        canvas.draw_text(&tracking_id_line(det.tracking_id()), PointF::new(rect.left, rect.top + y), entry.text, ts);
        y += line_h;
        for label in det.labels() {
            canvas.draw_text(&label_line(label), PointF::new(rect.left, rect.top + y), entry.text, ts);
            y += line_h;
            canvas.draw_text(&confidence_line(label), PointF::new(rect.left, rect.top + y), entry.text, ts);
            y += line_h;
        }
    }

    fn draw_grid<C: Canvas + ?Sized>(&self, canvas: &mut C, size: CanvasSize) {
        let g = grid::grid_for(size);
        let color = PALETTE[0].stroke;
        let stroke = self.style.stroke_width;
        let (w, h) = (size.width as f32, size.height as f32);
        canvas.draw_line(PointF::new(0.0, g.top as f32), PointF::new(w, g.top as f32), color, stroke);
        canvas.draw_line(PointF::new(0.0, g.bottom as f32), PointF::new(w, g.bottom as f32), color, stroke);
        canvas.draw_line(PointF::new(g.left as f32, 0.0), PointF::new(g.left as f32, h), color, stroke);
        canvas.draw_line(PointF::new(g.right as f32, 0.0), PointF::new(g.right as f32, h), color, stroke);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{DrawOp, RecordingCanvas};
    use crate::frame::SourceImageGeometry;
    use std::time::Duration;

    fn state(detections: Vec<Detection>, mirrored: bool) -> OverlayState {
        OverlayState {
            geometry: SourceImageGeometry::new(640, 480, 0, mirrored).unwrap(),
            detections,
            canvas: CanvasSize::new(640, 480),
            frame_timestamp: Duration::ZERO,
            sequence: 1,
        }
    }

    fn label(text: &str, confidence: f32, index: i32) -> Label {
        Label { text: text.into(), confidence, index }
    }

    #[test]
    fn no_state_draws_grid_only() {
        let mut canvas = RecordingCanvas::new(CanvasSize::new(900, 900));
        let out = OverlayRenderer::default().render(None, &mut canvas);
        assert!(out.suggestion.is_none());
        assert_eq!(canvas.ops().len(), 4);
        let lines: Vec<_> = canvas.lines().collect();
        assert_eq!(lines[0].0, PointF::new(0.0, 300.0));
        assert_eq!(lines[0].1, PointF::new(900.0, 300.0));
        assert_eq!(lines[3].0, PointF::new(600.0, 0.0));
        assert!(lines.iter().all(|l| l.2 == PALETTE[0].stroke));
    }

    #[test]
    fn empty_detection_list_has_no_guidance() {
        let mut canvas = RecordingCanvas::new(CanvasSize::new(640, 480));
        let out = OverlayRenderer::default().render(Some(&state(vec![], false)), &mut canvas);
        assert!(out.suggestion.is_none());
        assert_eq!(canvas.lines().count(), 4);
    }

    #[test]
    fn label_lines_stack_above_box() {
        let det = Detection::new(
            Some(3),
            RectF::new(100.0, 300.0, 200.0, 400.0),
            vec![label("Food", 0.5, 2)],
        );
        let style = RenderStyle { text_size: 10.0, stroke_width: 2.0 };
        let mut canvas = RecordingCanvas::new(CanvasSize::new(640, 480));
        OverlayRenderer::new(style).render(Some(&state(vec![det], false)), &mut canvas);

        let ops = canvas.ops();
        assert_eq!(
            ops[0],
            DrawOp::StrokeRect { rect: RectF::new(100.0, 300.0, 200.0, 400.0), color: PALETTE[3].stroke, stroke_width: 2.0 }
        );
        // widest line is "50.00% confidence (index: 2)", 28 chars at 5px
        let line_h = 12.0;
        assert_eq!(
            ops[1],
            DrawOp::FillRect { rect: RectF::new(98.0, 300.0 - 3.0 * line_h, 100.0 + 140.0 + 4.0, 300.0), color: PALETTE[3].fill }
        );
        let texts: Vec<_> = canvas.texts().collect();
        assert_eq!(texts, vec!["Tracking ID: 3", "Food (index: 2)", "50.00% confidence (index: 2)"]);
        let ys: Vec<f32> = ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { origin, .. } => Some(origin.y),
                _ => None,
            })
            .collect();
        assert_eq!(ys, vec![300.0 - 36.0 + 10.0, 300.0 - 36.0 + 22.0, 300.0 - 36.0 + 34.0]);
    }

    #[test]
    fn untracked_detection_uses_entry_zero() {
        let det = Detection::new(None, RectF::new(10.0, 10.0, 20.0, 20.0), vec![]);
        let mut canvas = RecordingCanvas::new(CanvasSize::new(640, 480));
        OverlayRenderer::default().render(Some(&state(vec![det], false)), &mut canvas);
        assert!(matches!(canvas.ops()[0], DrawOp::StrokeRect { color, .. } if color == PALETTE[0].stroke));
        assert_eq!(canvas.texts().next(), Some("Tracking ID: none"));
    }

    #[test]
    fn guidance_follows_primary_detection_only() {
        let primary = Detection::new(Some(1), RectF::new(500.0, 350.0, 600.0, 450.0), vec![]);
        let other = Detection::new(Some(2), RectF::new(10.0, 10.0, 50.0, 50.0), vec![]);
        let mut canvas = RecordingCanvas::new(CanvasSize::new(640, 480));
        let out = OverlayRenderer::default().render(Some(&state(vec![primary, other], false)), &mut canvas);

        let s = out.suggestion.unwrap();
        assert_eq!(s.to_corner, Quadrant::SouthEast);
        assert_eq!(s.from, PointF::new(550.0, 400.0));
        assert_eq!(s.target, PointF::new(426.0, 320.0));
        // 4 grid lines + 1 guidance line
        let lines: Vec<_> = canvas.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[4], (s.from, s.target, PALETTE[5].stroke));
    }

    #[test]
    fn mirrored_source_flips_guidance_side() {
        let det = Detection::new(Some(1), RectF::new(500.0, 50.0, 600.0, 150.0), vec![]);
        let mut canvas = RecordingCanvas::new(CanvasSize::new(640, 480));
        let out = OverlayRenderer::default().render(Some(&state(vec![det], true)), &mut canvas);
        assert_eq!(out.boxes[0], RectF::new(40.0, 50.0, 140.0, 150.0));
        assert_eq!(out.suggestion.unwrap().to_corner, Quadrant::NorthWest);
    }

    #[test]
    fn confidence_formatting() {
        assert_eq!(confidence_line(&label("x", 0.8765, 4)), "87.65% confidence (index: 4)");
    }
}

mod error;
pub mod canvas;
pub mod frame;
pub mod grid;
pub mod palette;
pub mod pipeline;
#[cfg(feature = "raster")]
pub mod raster;
pub mod render;
pub mod replay;
pub mod state;
pub mod tracker;
pub mod transform;

pub use error::{Advisory, FrameError, GeometryError};

use anyhow::Result;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle. Image-space boxes come straight from the detector,
/// canvas-space boxes from [`transform::to_canvas_rect`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectF {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RectF {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Reorders edges so that `left <= right` and `top <= bottom`.
    pub fn normalized(self) -> Self {
        Self {
            left: self.left.min(self.right),
            top: self.top.min(self.bottom),
            right: self.left.max(self.right),
            bottom: self.top.max(self.bottom),
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> PointF {
        PointF::new((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }

    pub fn iou(&self, other: &RectF) -> f32 {
        let a = self.normalized();
        let b = other.normalized();
        let iw = (a.right.min(b.right) - a.left.max(b.left)).max(0.0);
        let ih = (a.bottom.min(b.bottom) - a.top.max(b.top)).max(0.0);
        let inter = iw * ih;
        let union = a.width() * a.height() + b.width() * b.height() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Center used for quadrant classification (integer halves).
    pub fn center(&self) -> PointF {
        PointF::new((self.width / 2) as f32, (self.height / 2) as f32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub text: String,
    /// 0..1
    pub confidence: f32,
    pub index: i32,
}

/// Detector output for one object, in image space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(default)]
    pub tracking_id: Option<i32>,
    pub bounding_box: RectF,
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// A detection as published to the overlay. Built once per analyzed frame and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    tracking_id: Option<i32>,
    bounding_box: RectF,
    labels: Vec<Label>,
}

impl Detection {
    pub fn new(tracking_id: Option<i32>, bounding_box: RectF, labels: Vec<Label>) -> Self {
        Self { tracking_id, bounding_box, labels }
    }

    /// Confidence is clamped into 0..1 and the box normalized; order of labels is kept.
    pub fn from_raw(raw: RawDetection) -> Self {
        let labels = raw
            .labels
            .into_iter()
            .map(|l| Label { confidence: l.confidence.clamp(0.0, 1.0), ..l })
            .collect();
        Self {
            tracking_id: raw.tracking_id,
            bounding_box: raw.bounding_box.normalized(),
            labels,
        }
    }

    pub fn tracking_id(&self) -> Option<i32> {
        self.tracking_id
    }

    pub fn bounding_box(&self) -> RectF {
        self.bounding_box
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }
}

/// Tightly packed RGB8 pixels handed to the detector.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Object detection capability. Calls may block for an arbitrary time; the
/// pipeline runs them on the blocking pool.
pub trait Detector: Send + 'static {
    fn detect(&mut self, pixels: &PixelBuffer) -> Result<Vec<RawDetection>>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn detect(&mut self, pixels: &PixelBuffer) -> Result<Vec<RawDetection>> {
        (**self).detect(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_normalizes_box_and_clamps_confidence() {
        let raw = RawDetection {
            tracking_id: Some(3),
            bounding_box: RectF::new(50.0, 40.0, 10.0, 20.0),
            labels: vec![
                Label { text: "Home good".into(), confidence: 1.4, index: 0 },
                Label { text: "Plant".into(), confidence: -0.2, index: 4 },
            ],
        };
        let det = Detection::from_raw(raw);
        assert_eq!(det.bounding_box(), RectF::new(10.0, 20.0, 50.0, 40.0));
        assert_eq!(det.labels()[0].confidence, 1.0);
        assert_eq!(det.labels()[1].confidence, 0.0);
        assert_eq!(det.labels()[1].text, "Plant");
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = RectF::new(0.0, 0.0, 10.0, 10.0);
        let b = RectF::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn raw_detection_parses_without_optional_fields() {
        let raw: RawDetection =
            serde_json::from_str(r#"{"bounding_box":{"left":1,"top":2,"right":3,"bottom":4}}"#)
                .unwrap();
        assert_eq!(raw.tracking_id, None);
        assert!(raw.labels.is_empty());
    }
}

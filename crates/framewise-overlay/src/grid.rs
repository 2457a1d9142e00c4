//! Rule-of-thirds grid and the corner a subject should be steered towards.

use serde::Serialize;

use crate::{CanvasSize, PointF};

/// Grid line positions in canvas pixels. `left`/`right` are the vertical lines
/// at 1/3 and 2/3 of the width, `top`/`bottom` the horizontal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThirdsGrid {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Quadrant {
    NorthWest,
    NorthEast,
    SouthWest,
    SouthEast,
}

/// Where the primary subject is and which grid intersection to move it to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompositionSuggestion {
    pub from: PointF,
    pub to_corner: Quadrant,
    pub target: PointF,
}

/// Lines sit on whole pixels: the thirds are taken with integer division.
pub fn grid_for(canvas: CanvasSize) -> ThirdsGrid {
    let w = i64::from(canvas.width);
    let h = i64::from(canvas.height);
    ThirdsGrid {
        left: (w / 3) as i32,
        top: (h / 3) as i32,
        right: (w * 2 / 3) as i32,
        bottom: (h * 2 / 3) as i32,
    }
}

/// West when `x < center.x`, south when `y > center.y`. A point exactly on
/// the center therefore lands in the north-east quadrant.
pub fn quadrant_of(point: PointF, center: PointF) -> Quadrant {
    let west = point.x < center.x;
    let south = point.y > center.y;
    match (west, south) {
        (true, false) => Quadrant::NorthWest,
        (true, true) => Quadrant::SouthWest,
        (false, false) => Quadrant::NorthEast,
        (false, true) => Quadrant::SouthEast,
    }
}

pub fn target_corner(quadrant: Quadrant, grid: &ThirdsGrid) -> PointF {
    let (x, y) = match quadrant {
        Quadrant::NorthWest => (grid.left, grid.top),
        Quadrant::NorthEast => (grid.right, grid.top),
        Quadrant::SouthWest => (grid.left, grid.bottom),
        Quadrant::SouthEast => (grid.right, grid.bottom),
    };
    PointF::new(x as f32, y as f32)
}

pub fn suggest(subject_center: PointF, canvas: CanvasSize) -> CompositionSuggestion {
    let grid = grid_for(canvas);
    let quadrant = quadrant_of(subject_center, canvas.center());
    CompositionSuggestion {
        from: subject_center,
        to_corner: quadrant,
        target: target_corner(quadrant, &grid),
    }
}

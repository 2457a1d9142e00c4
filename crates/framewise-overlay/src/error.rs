use std::fmt;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("invalid frame dimensions: {width}x{height}")]
    InvalidDimensions { width: i32, height: i32 },

    #[error("unsupported rotation: {0} degrees")]
    UnsupportedRotation(i32),
}

/// Per-frame failure. Contained inside the pipeline: the frame is skipped and
/// released, the previous overlay stays up.
#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("object detection failed: {0:#}")]
    Detection(anyhow::Error),

    #[error("frame rejected: {0}")]
    Geometry(#[from] GeometryError),
}

impl FrameError {
    pub fn advisory(&self) -> Advisory {
        Advisory { message: self.to_string() }
    }
}

/// Human-readable message for the user-facing error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub message: String,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

//! Frames as delivered by a frame source, and the geometry derived from them.
//!
//! A [`Frame`] owns a [`FrameLease`]. Dropping the frame (or calling
//! [`Frame::release`]) hands it back to its source, exactly once, whatever
//! path the consumer leaves by.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{GeometryError, PixelBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    #[default]
    Back,
    Front,
}

impl LensFacing {
    /// Front lens previews are shown mirror-like.
    pub fn is_mirrored(self) -> bool {
        matches!(self, LensFacing::Front)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Quarter turns exchange the sensor's width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

impl TryFrom<i32> for Rotation {
    type Error = GeometryError;

    fn try_from(deg: i32) -> Result<Self, Self::Error> {
        match deg {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(GeometryError::UnsupportedRotation(other)),
        }
    }
}

/// Raw sensor dimensions plus the rotation/mirror needed to display them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceImageGeometry {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub is_mirrored: bool,
}

impl SourceImageGeometry {
    pub fn new(width: i32, height: i32, rotation_degrees: i32, is_mirrored: bool) -> Result<Self, GeometryError> {
        if width <= 0 || height <= 0 {
            return Err(GeometryError::InvalidDimensions { width, height });
        }
        Ok(Self {
            width: width as u32,
            height: height as u32,
            rotation: Rotation::try_from(rotation_degrees)?,
            is_mirrored,
        })
    }

    pub fn from_frame(frame: &Frame, lens: LensFacing) -> Result<Self, GeometryError> {
        Self::new(frame.width, frame.height, frame.rotation_degrees, lens.is_mirrored())
    }

    /// Width and height of the image as displayed, after rotation.
    pub fn effective_dimensions(&self) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

pub type FrameId = u64;

type ReleaseHook = Box<dyn FnOnce(FrameId) + Send>;

/// Ownership token for a frame borrowed from a source.
pub struct FrameLease {
    id: FrameId,
    hook: Option<ReleaseHook>,
}

impl FrameLease {
    pub fn new(id: FrameId, on_release: impl FnOnce(FrameId) + Send + 'static) -> Self {
        Self { id, hook: Some(Box::new(on_release)) }
    }

    /// A lease with nobody waiting for the frame back (stills, tests).
    pub fn detached(id: FrameId) -> Self {
        Self { id, hook: None }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook(self.id);
        }
    }
}

impl fmt::Debug for FrameLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLease")
            .field("id", &self.id)
            .field("pending", &self.hook.is_some())
            .finish()
    }
}

/// One camera frame. Dimensions are kept as reported so that malformed
/// metadata can be rejected by [`SourceImageGeometry::new`].
#[derive(Debug)]
pub struct Frame {
    pub pixels: Bytes,
    pub width: i32,
    pub height: i32,
    pub rotation_degrees: i32,
    /// Capture time relative to the start of the session.
    pub timestamp: Duration,
    lease: FrameLease,
}

impl Frame {
    pub fn new(
        pixels: Bytes,
        width: i32,
        height: i32,
        rotation_degrees: i32,
        timestamp: Duration,
        lease: FrameLease,
    ) -> Self {
        Self { pixels, width, height, rotation_degrees, timestamp, lease }
    }

    pub fn id(&self) -> FrameId {
        self.lease.id()
    }

    /// Pixel view for the detector, valid only for a validated geometry.
    pub fn pixel_buffer(&self, geometry: &SourceImageGeometry) -> PixelBuffer {
        PixelBuffer {
            data: self.pixels.clone(),
            width: geometry.width,
            height: geometry.height,
        }
    }

    /// Hands the frame back to its source.
    pub fn release(self) {
        drop(self);
    }
}

//! Frame sources for the overlay pipeline.

pub mod capture;
pub mod lease;
pub mod source;

use std::path::PathBuf;

use anyhow::Result;
use framewise_overlay::frame::{LensFacing, Rotation};
use serde::Deserialize;

pub use lease::LeaseTracker;
pub use source::{FrameSource, SourceStats};

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub mode: String, // "libcamera-jpeg" | "v4l2-mjpeg" | "directory"
    #[serde(default = "default_device")]
    pub device: String, // /dev/video0 (v4l2)
    #[serde(default)]
    pub directory: Option<PathBuf>, // stills, replayed in name order
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default)]
    pub rotation_degrees: i32,
    #[serde(default)]
    pub lens: LensFacing,
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding_frames: usize,
}

fn default_device() -> String {
    "/dev/video0".to_string()
}

fn default_max_outstanding() -> usize {
    2
}

pub const MAX_FPS: u32 = 120;

impl CameraConfig {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            matches!(self.mode.as_str(), "libcamera-jpeg" | "v4l2-mjpeg" | "directory"),
            "unknown camera.mode: {}",
            self.mode
        );
        anyhow::ensure!(self.width > 0 && self.height > 0, "camera.width/height must be positive");
        anyhow::ensure!((1..=MAX_FPS).contains(&self.fps), "camera.fps must be in 1..={}", MAX_FPS);
        anyhow::ensure!(self.max_outstanding_frames > 0, "camera.max_outstanding_frames must be at least 1");
        Rotation::try_from(self.rotation_degrees)?;
        if self.mode == "directory" {
            let dir = self.directory.as_ref().ok_or_else(|| anyhow::anyhow!("camera.directory missing (mode=directory)"))?;
            anyhow::ensure!(dir.is_dir(), "camera.directory {} is not a directory", dir.display());
        } else if self.mode == "v4l2-mjpeg" {
            anyhow::ensure!(!self.device.is_empty(), "camera.device missing");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(mode: &str) -> CameraConfig {
    CameraConfig {
        mode: mode.to_string(),
        device: default_device(),
        directory: None,
        width: 640,
        height: 480,
        fps: 30,
        rotation_degrees: 0,
        lens: LensFacing::Back,
        max_outstanding_frames: 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_bad_values() {
        assert!(test_config("libcamera-jpeg").validate().is_ok());
        assert!(test_config("gstreamer").validate().is_err());

        let mut cfg = test_config("v4l2-mjpeg");
        cfg.fps = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = test_config("v4l2-mjpeg");
        cfg.rotation_degrees = 45;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.to_string(), "unsupported rotation: 45 degrees");

        assert!(test_config("directory").validate().is_err());
    }
}

//! Paced frame delivery into the analysis pipeline.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use framewise_overlay::frame::Frame;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::capture::capture_jpeg;
use crate::{CameraConfig, LeaseTracker};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub delivered: u64,
    /// Ticks skipped because every lease was out.
    pub skipped_at_cap: u64,
    /// Frames dropped because the consumer's queue was full.
    pub discarded: u64,
    pub capture_errors: u64,
}

pub struct FrameSource {
    cfg: CameraConfig,
    leases: LeaseTracker,
    stills: Vec<PathBuf>,
    cursor: usize,
    epoch: Instant,
}

impl FrameSource {
    pub fn new(cfg: CameraConfig) -> Result<Self> {
        cfg.validate()?;
        let stills = match (&cfg.directory, cfg.mode.as_str()) {
            (Some(dir), "directory") => list_stills(dir)?,
            _ => Vec::new(),
        };
        Ok(Self {
            leases: LeaseTracker::new(cfg.max_outstanding_frames),
            cfg,
            stills,
            cursor: 0,
            epoch: Instant::now(),
        })
    }

    pub fn config(&self) -> &CameraConfig {
        &self.cfg
    }

    pub fn leases(&self) -> LeaseTracker {
        self.leases.clone()
    }

    /// `None` once a directory source has run out of stills.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        let encoded = if self.cfg.mode == "directory" {
            let Some(path) = self.stills.get(self.cursor).cloned() else {
                return Ok(None);
            };
            self.cursor += 1;
            tokio::fs::read(&path).await.with_context(|| format!("read still {}", path.display()))?
        } else {
            capture_jpeg(&self.cfg).await?
        };
        let timestamp = self.epoch.elapsed();

        let (rgb, width, height) = tokio::task::spawn_blocking(move || decode_rgb(&encoded))
            .await
            .context("decode task")??;
        let lease = self
            .leases
            .try_acquire()
            .ok_or_else(|| anyhow::anyhow!("all {} frame leases are out", self.cfg.max_outstanding_frames))?;

        Ok(Some(Frame::new(
            Bytes::from(rgb),
            i32::try_from(width).context("frame width")?,
            i32::try_from(height).context("frame height")?,
            self.cfg.rotation_degrees,
            timestamp,
            lease,
        )))
    }

    /// Delivers frames at `camera.fps` until stopped, the consumer goes away,
    /// or a directory source is exhausted.
    pub async fn run(mut self, tx: mpsc::Sender<Frame>, mut stop: watch::Receiver<bool>) -> Result<SourceStats> {
        let mut tick = tokio::time::interval(Duration::from_secs_f64(1.0 / f64::from(self.cfg.fps)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut stats = SourceStats::default();
        info!(mode = %self.cfg.mode, fps = self.cfg.fps, "camera: streaming");

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                r = stop.changed() => {
                    if r.is_err() || *stop.borrow() { break; }
                    continue;
                }
            }
            if *stop.borrow() {
                break;
            }
            if self.leases.at_capacity() {
                stats.skipped_at_cap += 1;
                debug!(outstanding = self.leases.outstanding(), "camera: lease cap reached, skipping capture");
                continue;
            }

            let frame = match self.next_frame().await {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => {
                    stats.capture_errors += 1;
                    warn!("camera: capture failed: {:#}", e);
                    continue;
                }
            };

            match tx.try_send(frame) {
                Ok(()) => stats.delivered += 1,
                Err(TrySendError::Full(frame)) => {
                    stats.discarded += 1;
                    debug!(frame = frame.id(), "camera: consumer queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }

        info!(
            delivered = stats.delivered,
            skipped = stats.skipped_at_cap,
            errors = stats.capture_errors,
            released = self.leases.released(),
            "camera: stopped"
        );
        Ok(stats)
    }
}

fn decode_rgb(encoded: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let img = image::load_from_memory(encoded).context("decode frame")?.to_rgb8();
    let (w, h) = img.dimensions();
    Ok((img.into_raw(), w, h))
}

fn list_stills(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        let is_still = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
            .unwrap_or(false);
        if is_still {
            out.push(path);
        }
    }
    out.sort();
    anyhow::ensure!(!out.is_empty(), "no png/jpg stills in {}", dir.display());
    Ok(out)
}

use serde::Deserialize;

use crate::{RawDetection, RectF};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub enable: bool,
    pub iou_match_threshold: f32,
    pub max_age_frames: u32,
    pub max_tracks: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enable: true,
            iou_match_threshold: 0.3,
            max_age_frames: 15,
            max_tracks: 64,
        }
    }
}

#[derive(Debug, Clone)]
struct Track {
    id: i32,
    bbox: RectF,
    // velocity of the box center (simple constant-velocity model)
    vx: f32,
    vy: f32,
    miss: u32,
}

/// Gives track ids to detections that arrive without one, for detectors that
/// run single-shot. Ids the detector already assigned are left alone.
#[derive(Debug, Clone)]
pub struct TrackAssigner {
    cfg: TrackingConfig,
    next_id: i32,
    tracks: Vec<Track>,
}

impl TrackAssigner {
    pub fn new(cfg: TrackingConfig) -> Self {
        Self { cfg, next_id: 1, tracks: vec![] }
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Forget all tracks; ids keep counting up.
    pub fn reset(&mut self) {
        self.tracks.clear();
    }

    pub fn assign(&mut self, dets: &mut [RawDetection]) {
        if !self.cfg.enable {
            return;
        }

        // Predict step
        for t in &mut self.tracks {
            t.bbox = shift(t.bbox, t.vx, t.vy);
            t.miss += 1;
        }

        // Greedy association by IOU, detector order
        let mut used_track = vec![false; self.tracks.len()];
        let mut unmatched = Vec::new();
        for (i, d) in dets.iter_mut().enumerate() {
            if d.tracking_id.is_some() {
                continue;
            }
            let mut best = None;
            let mut best_iou = 0.0;
            for (ti, t) in self.tracks.iter().enumerate() {
                if used_track[ti] { continue; }
                let iou = t.bbox.iou(&d.bounding_box);
                if iou > best_iou {
                    best_iou = iou;
                    best = Some(ti);
                }
            }
            match best {
                Some(ti) if best_iou >= self.cfg.iou_match_threshold => {
                    used_track[ti] = true;
                    let t = &mut self.tracks[ti];
                    let prev = t.bbox.center();
                    let now = d.bounding_box.center();
                    t.vx = 0.7 * t.vx + 0.3 * (now.x - prev.x);
                    t.vy = 0.7 * t.vy + 0.3 * (now.y - prev.y);
                    t.bbox = d.bounding_box;
                    t.miss = 0;
                    d.tracking_id = Some(t.id);
                }
                _ => unmatched.push(i),
            }
        }

        // New tracks for the rest
        for i in unmatched {
            if self.tracks.len() >= self.cfg.max_tracks { break; }
            let id = self.next_id;
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            self.tracks.push(Track { id, bbox: dets[i].bounding_box, vx: 0.0, vy: 0.0, miss: 0 });
            dets[i].tracking_id = Some(id);
        }

        // Prune old tracks
        let max_age = self.cfg.max_age_frames;
        self.tracks.retain(|t| t.miss <= max_age);
    }
}

fn shift(r: RectF, dx: f32, dy: f32) -> RectF {
    RectF::new(r.left + dx, r.top + dy, r.right + dx, r.bottom + dy)
}

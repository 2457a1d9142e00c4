//! Detector that plays back recorded results, one JSON line per frame.
//!
//! ```text
//! [{"tracking_id": 7, "bounding_box": {"left": 10, "top": 20, "right": 110, "bottom": 220}, "labels": []}]
//! {"error": "unsupported image format"}
//! []
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::{Detector, PixelBuffer, RawDetection};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReplayStep {
    Detections(Vec<RawDetection>),
    Failure { error: String },
}

#[derive(Debug, Clone)]
pub struct ReplayDetector {
    steps: Vec<ReplayStep>,
    cursor: usize,
    looping: bool,
}

impl ReplayDetector {
    pub fn new(steps: Vec<ReplayStep>, looping: bool) -> Self {
        Self { steps, cursor: 0, looping }
    }

    pub fn from_jsonl(text: &str, looping: bool) -> Result<Self> {
        let mut steps = Vec::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') { continue; }
            let step: ReplayStep = serde_json::from_str(line)
                .with_context(|| format!("parse replay line {}", n + 1))?;
            steps.push(step);
        }
        Ok(Self::new(steps, looping))
    }

    pub fn from_path(path: impl AsRef<Path>, looping: bool) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read replay file {}", path.display()))?;
        let det = Self::from_jsonl(&text, looping)?;
        debug!(steps = det.steps.len(), path = %path.display(), "replay detector loaded");
        Ok(det)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn next_step(&mut self) -> Option<&ReplayStep> {
        if self.steps.is_empty() { return None; }
        if self.cursor >= self.steps.len() {
            if !self.looping { return None; }
            self.cursor = 0;
        }
        let step = &self.steps[self.cursor];
        self.cursor += 1;
        Some(step)
    }
}

impl Detector for ReplayDetector {
    fn detect(&mut self, _pixels: &PixelBuffer) -> Result<Vec<RawDetection>> {
        match self.next_step() {
            Some(ReplayStep::Detections(d)) => Ok(d.clone()),
            Some(ReplayStep::Failure { error }) => anyhow::bail!("{}", error),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const SCRIPT: &str = r#"
# two frames, then a failure
[{"tracking_id": 7, "bounding_box": {"left": 10, "top": 20, "right": 110, "bottom": 220}, "labels": [{"text": "Fashion good", "confidence": 0.91, "index": 0}]}]
[]
{"error": "model not ready"}
"#;

    fn pixels() -> PixelBuffer {
        PixelBuffer { data: Bytes::new(), width: 1, height: 1 }
    }

    #[test]
    fn plays_steps_in_order() {
        let mut det = ReplayDetector::from_jsonl(SCRIPT, false).unwrap();
        assert_eq!(det.len(), 3);

        let first = det.detect(&pixels()).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].tracking_id, Some(7));
        assert_eq!(first[0].labels[0].text, "Fashion good");

        assert!(det.detect(&pixels()).unwrap().is_empty());
        let err = det.detect(&pixels()).unwrap_err();
        assert_eq!(err.to_string(), "model not ready");

        // exhausted, not looping
        assert!(det.detect(&pixels()).unwrap().is_empty());
    }

    #[test]
    fn looping_wraps_around() {
        let mut det = ReplayDetector::from_jsonl(SCRIPT, true).unwrap();
        for _ in 0..3 {
            let _ = det.detect(&pixels());
        }
        assert_eq!(det.detect(&pixels()).unwrap()[0].tracking_id, Some(7));
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = ReplayDetector::from_jsonl("[]\n{not json}\n", false).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }
}

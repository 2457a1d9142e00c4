//! Frame analysis: frames in, overlay states out.
//!
//! ```text
//! Idle -> AwaitingFrame -> Detecting -> Publishing -> AwaitingFrame ...
//!                \______________\____________\______-> Stopped
//! ```
//!
//! One detection runs at a time, on the blocking pool. Frames that arrive
//! meanwhile are released unprocessed. A failed frame never replaces the
//! published overlay; it becomes an [`Advisory`] instead.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::frame::{Frame, LensFacing, SourceImageGeometry};
use crate::state::OverlayStore;
use crate::tracker::TrackAssigner;
use crate::{Advisory, Detection, Detector, FrameError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    AwaitingFrame,
    Detecting,
    Publishing,
    Stopped,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    analyzed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineCounters {
    /// Frames whose detections were published.
    pub analyzed: u64,
    /// Frames released unprocessed because a detection was in flight.
    pub dropped: u64,
    /// Detector failures.
    pub failed: u64,
    /// Frames with unusable geometry.
    pub rejected: u64,
}

impl PipelineStats {
    pub fn counters(&self) -> PipelineCounters {
        PipelineCounters {
            analyzed: self.analyzed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Control side of a running pipeline: state observation, lens selection,
/// teardown.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    state: watch::Receiver<PipelineState>,
    stop: Arc<watch::Sender<bool>>,
    lens: Arc<watch::Sender<LensFacing>>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Resolves once the pipeline reaches `want`; false if it went away first.
    pub async fn wait_for_state(&self, want: PipelineState) -> bool {
        let mut rx = self.state.clone();
        let ok = rx.wait_for(|s| *s == want).await.is_ok();
        ok
    }

    pub fn lens(&self) -> LensFacing {
        *self.lens.borrow()
    }

    /// Switching lens restarts the analysis cycle; selecting the active lens
    /// is a no-op.
    pub fn select_lens(&self, lens: LensFacing) {
        self.lens.send_if_modified(|current| {
            if *current == lens {
                false
            } else {
                *current = lens;
                true
            }
        });
    }

    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn counters(&self) -> PipelineCounters {
        self.stats.counters()
    }
}

pub struct FrameAnalysisPipeline<D: Detector> {
    detector: Option<D>,
    store: OverlayStore,
    tracker: Option<TrackAssigner>,
    advisories: Option<mpsc::Sender<Advisory>>,
    state_tx: watch::Sender<PipelineState>,
    stop_rx: watch::Receiver<bool>,
    lens_rx: watch::Receiver<LensFacing>,
    stats: Arc<PipelineStats>,
    prof_detect: Duration,
}

impl<D: Detector> FrameAnalysisPipeline<D> {
    pub fn new(detector: D, store: OverlayStore, lens: LensFacing) -> (Self, PipelineHandle) {
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (lens_tx, lens_rx) = watch::channel(lens);
        let stats = Arc::new(PipelineStats::default());
        let handle = PipelineHandle {
            state: state_rx,
            stop: Arc::new(stop_tx),
            lens: Arc::new(lens_tx),
            stats: stats.clone(),
        };
        let pipeline = Self {
            detector: Some(detector),
            store,
            tracker: None,
            advisories: None,
            state_tx,
            stop_rx,
            lens_rx,
            stats,
            prof_detect: Duration::ZERO,
        };
        (pipeline, handle)
    }

    /// Fill in track ids for detections that come without one.
    pub fn with_tracker(mut self, tracker: TrackAssigner) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// User-facing error channel. Messages are dropped rather than waited on
    /// when the channel is full.
    pub fn with_advisories(mut self, tx: mpsc::Sender<Advisory>) -> Self {
        self.advisories = Some(tx);
        self
    }

    pub async fn run(mut self, mut frames: mpsc::Receiver<Frame>) -> PipelineCounters {
        let mut stop_rx = self.stop_rx.clone();
        let mut lens_rx = self.lens_rx.clone();
        let mut stop_live = true;
        let mut lens_live = true;
        let mut lens = *lens_rx.borrow_and_update();

        self.set_state(PipelineState::AwaitingFrame);
        info!(?lens, "pipeline: awaiting frames");

        loop {
            if *stop_rx.borrow() {
                break;
            }

            let frame = tokio::select! {
                biased;
                r = stop_rx.changed(), if stop_live => {
                    if r.is_err() { stop_live = false; }
                    continue;
                }
                r = lens_rx.changed(), if lens_live => {
                    match r {
                        Ok(()) => {
                            lens = *lens_rx.borrow_and_update();
                            self.reinitialize(lens);
                        }
                        Err(_) => lens_live = false,
                    }
                    continue;
                }
                f = frames.recv() => match f {
                    Some(f) => f,
                    None => break,
                },
            };

            let geometry = match SourceImageGeometry::from_frame(&frame, lens) {
                Ok(g) => g,
                Err(e) => {
                    PipelineStats::bump(&self.stats.rejected);
                    self.report(FrameError::from(e));
                    frame.release();
                    continue;
                }
            };

            let Some(mut detector) = self.detector.take() else {
                frame.release();
                break;
            };

            self.set_state(PipelineState::Detecting);
            let pixels = frame.pixel_buffer(&geometry);
            let started = Instant::now();
            let mut job = tokio::task::spawn_blocking(move || {
                let out = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(&pixels)))
                    .unwrap_or_else(|payload| Err(anyhow::anyhow!("detector panicked: {}", panic_message(&*payload))));
                (detector, out)
            });

            let mut stopping = false;
            let mut lens_switched = false;
            let mut frames_open = true;
            let joined = loop {
                tokio::select! {
                    biased;
                    r = stop_rx.changed(), if stop_live => match r {
                        Ok(()) => stopping |= *stop_rx.borrow(),
                        Err(_) => stop_live = false,
                    },
                    r = lens_rx.changed(), if lens_live => match r {
                        Ok(()) => lens_switched = true,
                        Err(_) => lens_live = false,
                    },
                    res = &mut job => break res,
                    late = frames.recv(), if frames_open && !stopping => match late {
                        Some(late) => {
                            let dropped = PipelineStats::bump(&self.stats.dropped);
                            debug!(frame = late.id(), dropped, "detection in flight, dropping frame");
                            late.release();
                        }
                        None => frames_open = false,
                    },
                }
            };
            let elapsed = started.elapsed();

            let (detector, outcome) = match joined {
                Ok(v) => v,
                Err(e) => {
                    // only reachable when the runtime cancels the blocking task
                    error!("pipeline: detector task died: {}", e);
                    PipelineStats::bump(&self.stats.failed);
                    self.report(FrameError::Detection(anyhow::anyhow!("detector task died: {}", e)));
                    frame.release();
                    break;
                }
            };
            self.detector = Some(detector);
            self.prof_detect += elapsed;

            if lens_switched {
                frame.release();
                lens = *lens_rx.borrow_and_update();
                self.reinitialize(lens);
                continue;
            }

            match outcome {
                Ok(raw) if !stopping => {
                    self.set_state(PipelineState::Publishing);
                    let mut raw = raw;
                    if let Some(tr) = self.tracker.as_mut() {
                        tr.assign(&mut raw);
                    }
                    let detections: Vec<Detection> = raw.into_iter().map(Detection::from_raw).collect();
                    let state = self.store.publish(geometry, detections, frame.timestamp);
                    frame.release();
                    debug!(
                        seq = state.sequence,
                        detections = state.detections.len(),
                        detect_ms = elapsed.as_secs_f64() * 1000.0,
                        "overlay published"
                    );
                    self.log_timings();
                }
                Ok(_) => frame.release(),
                Err(e) => {
                    PipelineStats::bump(&self.stats.failed);
                    frame.release();
                    self.report(FrameError::Detection(e));
                }
            }

            if stopping {
                break;
            }
            if !frames_open {
                break;
            }
            self.set_state(PipelineState::AwaitingFrame);
        }

        frames.close();
        self.set_state(PipelineState::Stopped);
        let counters = self.stats.counters();
        info!(
            analyzed = counters.analyzed,
            dropped = counters.dropped,
            failed = counters.failed,
            rejected = counters.rejected,
            "pipeline: stopped"
        );
        counters
    }

    fn set_state(&self, state: PipelineState) {
        self.state_tx.send_replace(state);
    }

    fn reinitialize(&mut self, lens: LensFacing) {
        if let Some(tr) = self.tracker.as_mut() {
            tr.reset();
        }
        self.store.clear();
        info!(?lens, "pipeline: lens switched, re-initialized");
        self.set_state(PipelineState::AwaitingFrame);
    }

    fn report(&self, err: FrameError) {
        warn!("frame skipped: {}", err);
        if let Some(tx) = &self.advisories {
            if tx.try_send(err.advisory()).is_err() {
                debug!("advisory channel full or closed, message dropped");
            }
        }
    }

    fn log_timings(&self) {
        let counters = self.stats.counters();
        let analyzed = PipelineStats::bump(&self.stats.analyzed);
        if analyzed % 300 == 0 {
            info!(
                frames = analyzed,
                detect_ms_per_frame = format!(
                    "{:.2}",
                    self.prof_detect.as_secs_f64() * 1000.0 / (analyzed + counters.failed) as f64
                ),
                dropped = counters.dropped,
                "pipeline timings"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameLease;
    use crate::replay::{ReplayDetector, ReplayStep};
    use crate::tracker::TrackingConfig;
    use crate::{CanvasSize, Label, PixelBuffer, RawDetection, RectF};
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    type Released = Arc<Mutex<Vec<u64>>>;

    fn frame(id: u64, rotation: i32, released: &Released) -> Frame {
        let sink = released.clone();
        Frame::new(
            Bytes::from(vec![0u8; 640 * 480 * 3]),
            640,
            480,
            rotation,
            Duration::from_millis(id * 33),
            FrameLease::new(id, move |id| sink.lock().unwrap().push(id)),
        )
    }

    fn raw(id: Option<i32>, left: f32) -> RawDetection {
        RawDetection {
            tracking_id: id,
            bounding_box: RectF::new(left, 100.0, left + 80.0, 180.0),
            labels: vec![Label { text: "Place".into(), confidence: 0.7, index: 3 }],
        }
    }

    /// Blocks in `detect` until the test hands it a result.
    struct GatedDetector {
        gate: std::sync::mpsc::Receiver<anyhow::Result<Vec<RawDetection>>>,
        calls: Arc<AtomicUsize>,
    }

    impl Detector for GatedDetector {
        fn detect(&mut self, pixels: &PixelBuffer) -> anyhow::Result<Vec<RawDetection>> {
            assert_eq!((pixels.width, pixels.height), (640, 480));
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.recv().unwrap_or_else(|_| Ok(vec![]))
        }
    }

    fn gated() -> (GatedDetector, std::sync::mpsc::Sender<anyhow::Result<Vec<RawDetection>>>, Arc<AtomicUsize>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let calls = Arc::new(AtomicUsize::new(0));
        (GatedDetector { gate: rx, calls: calls.clone() }, tx, calls)
    }

    async fn wait_released(released: &Released, id: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !released.lock().unwrap().contains(&id) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("frame was never released");
    }

    fn store() -> OverlayStore {
        OverlayStore::new(CanvasSize::new(640, 480))
    }

    #[tokio::test]
    async fn publishes_detections_in_detector_order() {
        let det = ReplayDetector::new(
            vec![ReplayStep::Detections(vec![raw(Some(5), 300.0), raw(Some(2), 10.0)])],
            false,
        );
        let store = store();
        let (pipeline, handle) = FrameAnalysisPipeline::new(det, store.clone(), LensFacing::Back);
        assert_eq!(handle.state(), PipelineState::Idle);

        let released = Released::default();
        let (tx, rx) = mpsc::channel(4);
        tx.send(frame(1, 0, &released)).await.unwrap();
        drop(tx);
        let counters = pipeline.run(rx).await;

        assert_eq!(counters.analyzed, 1);
        assert_eq!(handle.state(), PipelineState::Stopped);
        let snap = store.snapshot().unwrap();
        let ids: Vec<_> = snap.detections.iter().map(|d| d.tracking_id()).collect();
        assert_eq!(ids, vec![Some(5), Some(2)]);
        assert_eq!(snap.frame_timestamp, Duration::from_millis(33));
        assert!(!snap.geometry.is_mirrored);
        assert_eq!(*released.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn frames_arriving_mid_detection_are_dropped() {
        let (det, gate, calls) = gated();
        let store = store();
        let (pipeline, handle) = FrameAnalysisPipeline::new(det, store.clone(), LensFacing::Back);
        let released = Released::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(pipeline.run(rx));

        tx.send(frame(1, 0, &released)).await.unwrap();
        assert!(handle.wait_for_state(PipelineState::Detecting).await);

        tx.send(frame(2, 0, &released)).await.unwrap();
        wait_released(&released, 2).await;
        assert_eq!(handle.state(), PipelineState::Detecting);
        assert!(store.snapshot().is_none());

        gate.send(Ok(vec![raw(Some(7), 40.0)])).unwrap();
        assert!(handle.wait_for_state(PipelineState::AwaitingFrame).await);
        wait_released(&released, 1).await;
        assert_eq!(store.snapshot().unwrap().detections[0].tracking_id(), Some(7));

        drop(tx);
        let counters = task.await.unwrap();
        assert_eq!(counters.dropped, 1);
        assert_eq!(counters.analyzed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let mut all = released.lock().unwrap().clone();
        all.sort();
        assert_eq!(all, vec![1, 2]);
    }

    #[tokio::test]
    async fn failure_keeps_previous_overlay() {
        let det = ReplayDetector::new(
            vec![
                ReplayStep::Detections(vec![raw(Some(1), 10.0)]),
                ReplayStep::Failure { error: "unsupported image format".into() },
            ],
            false,
        );
        let store = store();
        let (adv_tx, mut adv_rx) = mpsc::channel(4);
        let (pipeline, _handle) = FrameAnalysisPipeline::new(det, store.clone(), LensFacing::Back);
        let pipeline = pipeline.with_advisories(adv_tx);

        let released = Released::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(pipeline.run(rx));

        tx.send(frame(1, 0, &released)).await.unwrap();
        wait_released(&released, 1).await;
        let s1 = store.snapshot().unwrap();

        tx.send(frame(2, 0, &released)).await.unwrap();
        let advisory = adv_rx.recv().await.unwrap();
        assert_eq!(advisory.message, "object detection failed: unsupported image format");
        wait_released(&released, 2).await;

        let after = store.snapshot().unwrap();
        assert!(Arc::ptr_eq(&s1, &after));

        drop(tx);
        let counters = task.await.unwrap();
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.analyzed, 1);
    }

    /// Panics on its first call, then reports one box per frame.
    struct FlakyDetector {
        calls: usize,
    }

    impl Detector for FlakyDetector {
        fn detect(&mut self, _pixels: &PixelBuffer) -> anyhow::Result<Vec<RawDetection>> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("tensor shape mismatch");
            }
            Ok(vec![raw(Some(self.calls as i32), 10.0)])
        }
    }

    #[tokio::test]
    async fn detector_panic_is_a_frame_failure() {
        let store = store();
        let (adv_tx, mut adv_rx) = mpsc::channel(4);
        let (pipeline, handle) = FrameAnalysisPipeline::new(FlakyDetector { calls: 0 }, store.clone(), LensFacing::Back);
        let pipeline = pipeline.with_advisories(adv_tx);

        let released = Released::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(pipeline.run(rx));

        tx.send(frame(1, 0, &released)).await.unwrap();
        let advisory = adv_rx.recv().await.unwrap();
        assert_eq!(advisory.message, "object detection failed: detector panicked: tensor shape mismatch");
        wait_released(&released, 1).await;
        assert!(store.snapshot().is_none());
        assert!(handle.wait_for_state(PipelineState::AwaitingFrame).await);

        for id in 2..=3 {
            tx.send(frame(id, 0, &released)).await.unwrap();
            wait_released(&released, id).await;
        }
        assert_eq!(store.snapshot().unwrap().detections[0].tracking_id(), Some(3));

        drop(tx);
        let counters = task.await.unwrap();
        assert_eq!(counters.failed, 1);
        assert_eq!(counters.analyzed, 2);
    }

    #[tokio::test]
    async fn bad_geometry_is_rejected_without_detecting() {
        let (det, _gate, calls) = gated();
        let (adv_tx, mut adv_rx) = mpsc::channel(4);
        let (pipeline, _handle) = FrameAnalysisPipeline::new(det, store(), LensFacing::Back);
        let pipeline = pipeline.with_advisories(adv_tx);

        let released = Released::default();
        let (tx, rx) = mpsc::channel(4);
        tx.send(frame(1, 45, &released)).await.unwrap();
        drop(tx);
        let counters = pipeline.run(rx).await;

        assert_eq!(counters.rejected, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(*released.lock().unwrap(), vec![1]);
        assert_eq!(adv_rx.recv().await.unwrap().message, "frame rejected: unsupported rotation: 45 degrees");
    }

    #[tokio::test]
    async fn stop_during_detection_releases_and_acquires_nothing_more() {
        let (det, gate, calls) = gated();
        let store = store();
        let (pipeline, handle) = FrameAnalysisPipeline::new(det, store.clone(), LensFacing::Back);
        let released = Released::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(pipeline.run(rx));

        tx.send(frame(1, 0, &released)).await.unwrap();
        assert!(handle.wait_for_state(PipelineState::Detecting).await);
        handle.stop();
        tx.send(frame(2, 0, &released)).await.unwrap();
        gate.send(Ok(vec![raw(Some(3), 10.0)])).unwrap();

        let counters = task.await.unwrap();
        assert_eq!(handle.state(), PipelineState::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.analyzed, 0);
        assert!(store.snapshot().is_none());
        assert!(released.lock().unwrap().contains(&1));
        assert!(tx.send(frame(3, 0, &released)).await.is_err());
    }

    #[tokio::test]
    async fn lens_switch_mirrors_later_frames_and_clears_overlay() {
        let det = ReplayDetector::new(vec![ReplayStep::Detections(vec![raw(None, 10.0)])], true);
        let store = store();
        let (pipeline, handle) = FrameAnalysisPipeline::new(det, store.clone(), LensFacing::Back);
        let pipeline = pipeline.with_tracker(TrackAssigner::new(TrackingConfig::default()));
        let released = Released::default();
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(pipeline.run(rx));

        tx.send(frame(1, 0, &released)).await.unwrap();
        wait_released(&released, 1).await;
        let first = store.snapshot().unwrap();
        assert!(!first.geometry.is_mirrored);
        assert_eq!(first.detections[0].tracking_id(), Some(1));

        let mut snaps = store.subscribe();
        snaps.borrow_and_update();
        handle.select_lens(LensFacing::Front);
        snaps.changed().await.unwrap();
        assert!(store.snapshot().is_none());

        tx.send(frame(2, 0, &released)).await.unwrap();
        wait_released(&released, 2).await;
        let second = store.snapshot().unwrap();
        assert!(second.geometry.is_mirrored);
        // tracker was reset, so the same box starts a fresh track
        assert_eq!(second.detections[0].tracking_id(), Some(2));

        drop(tx);
        task.await.unwrap();
    }
}

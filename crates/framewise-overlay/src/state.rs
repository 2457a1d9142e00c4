//! Single-slot hand-off between the analysis side and the render side.
//!
//! Every publish builds a complete [`OverlayState`] and swaps it in behind an
//! `Arc`. Readers clone the `Arc` out and render from it without holding any
//! lock, so geometry and detections seen together always come from the same
//! frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::frame::SourceImageGeometry;
use crate::{CanvasSize, Detection};

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayState {
    pub geometry: SourceImageGeometry,
    pub detections: Vec<Detection>,
    /// Canvas size known to the store when this state was published.
    pub canvas: CanvasSize,
    pub frame_timestamp: Duration,
    /// Monotonic per store, starting at 1.
    pub sequence: u64,
}

impl OverlayState {
    /// The detection that drives composition guidance.
    pub fn primary(&self) -> Option<&Detection> {
        self.detections.first()
    }
}

/// `None` until the first successful publish.
pub type Snapshot = Option<Arc<OverlayState>>;

#[derive(Debug, Clone)]
pub struct OverlayStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    slot: watch::Sender<Snapshot>,
    canvas: AtomicU64,
    sequence: AtomicU64,
}

fn pack(c: CanvasSize) -> u64 {
    (u64::from(c.width) << 32) | u64::from(c.height)
}

fn unpack(v: u64) -> CanvasSize {
    CanvasSize::new((v >> 32) as u32, v as u32)
}

impl OverlayStore {
    pub fn new(canvas: CanvasSize) -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                slot,
                canvas: AtomicU64::new(pack(canvas)),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn canvas_size(&self) -> CanvasSize {
        unpack(self.inner.canvas.load(Ordering::Acquire))
    }

    /// Later publishes carry the new size; the current snapshot is re-issued
    /// with it so readers never pair a stale size with fresh detections.
    pub fn resize(&self, canvas: CanvasSize) {
        self.inner.canvas.store(pack(canvas), Ordering::Release);
        self.reissue_with_current_canvas();
    }

    /// Builds the next state and replaces whatever was there.
    pub fn publish(
        &self,
        geometry: SourceImageGeometry,
        detections: Vec<Detection>,
        frame_timestamp: Duration,
    ) -> Arc<OverlayState> {
        let state = Arc::new(OverlayState {
            geometry,
            detections,
            canvas: self.canvas_size(),
            frame_timestamp,
            sequence: self.inner.sequence.fetch_add(1, Ordering::AcqRel) + 1,
        });
        self.inner.slot.send_replace(Some(state.clone()));
        // a resize may have landed between reading the size and the swap
        if self.canvas_size() != state.canvas {
            self.reissue_with_current_canvas();
        }
        state
    }

    // The size is read under the slot's write lock, so the last writer always
    // leaves the latest size in the slot.
    fn reissue_with_current_canvas(&self) {
        self.inner.slot.send_if_modified(|slot| {
            let canvas = self.canvas_size();
            match slot {
                Some(state) if state.canvas != canvas => {
                    let mut next = OverlayState::clone(state);
                    next.canvas = canvas;
                    *slot = Some(Arc::new(next));
                    true
                }
                _ => false,
            }
        });
    }

    /// Back to the "nothing detected yet" sentinel.
    pub fn clear(&self) {
        self.inner.slot.send_replace(None);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.slot.borrow().clone()
    }

    /// Change notifications for hosts that redraw on demand.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.slot.subscribe()
    }
}

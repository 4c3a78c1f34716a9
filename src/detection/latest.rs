// src/detection/latest.rs
//
// Single-slot "latest detection result" channel. The detector overwrites the
// slot whenever it finishes a cycle; the frame loop reads it without blocking
// and applies whatever is newest. Nothing queues up behind a slow consumer.

use super::types::DetectionBatch;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

pub fn latest_slot(max_staleness_frames: u64) -> (DetectionPublisher, DetectionReader) {
    let (tx, rx) = watch::channel(None);
    (
        DetectionPublisher { tx },
        DetectionReader {
            rx,
            last_consumed: None,
            max_staleness_frames,
        },
    )
}

#[derive(Debug, Clone)]
pub struct DetectionPublisher {
    tx: watch::Sender<Option<Arc<DetectionBatch>>>,
}

impl DetectionPublisher {
    /// Replaces whatever batch is waiting. Never blocks and never fails,
    /// even when the reader has gone away.
    pub fn publish(&self, batch: DetectionBatch) {
        self.tx.send_replace(Some(Arc::new(batch)));
    }
}

/// What the frame loop got from the slot on this frame.
#[derive(Debug, Clone)]
pub enum Fetch {
    /// A batch not seen before, within the staleness bound.
    Fresh {
        batch: Arc<DetectionBatch>,
        staleness: u64,
    },
    /// A new batch that arrived too late to be trusted; it is consumed and dropped.
    Stale { batch_frame: u64, staleness: u64 },
    /// Nothing new since the last read.
    Nothing,
}

#[derive(Debug)]
pub struct DetectionReader {
    rx: watch::Receiver<Option<Arc<DetectionBatch>>>,
    last_consumed: Option<u64>,
    max_staleness_frames: u64,
}

impl DetectionReader {
    pub fn poll(&mut self, frame_index: u64) -> Fetch {
        let current = self.rx.borrow_and_update().clone();
        let batch = match current {
            Some(b) => b,
            None => return Fetch::Nothing,
        };

        if self.last_consumed.is_some_and(|f| batch.frame_index <= f) {
            return Fetch::Nothing;
        }
        if batch.frame_index > frame_index {
            debug!(
                "Detection batch for frame {} is ahead of frame {}, holding",
                batch.frame_index, frame_index
            );
            return Fetch::Nothing;
        }

        self.last_consumed = Some(batch.frame_index);
        let staleness = frame_index - batch.frame_index;
        if staleness > self.max_staleness_frames {
            debug!(
                "Dropping detection batch from frame {} at frame {} ({} frames stale, max {})",
                batch.frame_index, frame_index, staleness, self.max_staleness_frames
            );
            return Fetch::Stale {
                batch_frame: batch.frame_index,
                staleness,
            };
        }
        Fetch::Fresh { batch, staleness }
    }
}

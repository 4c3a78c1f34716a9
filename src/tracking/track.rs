// src/tracking/track.rs

use super::motion::{MotionConfig, MotionModel};
use crate::detection::Detection;
use crate::geometry::BBox;
use std::collections::{BTreeSet, VecDeque};
use tracing::debug;

pub type TrackId = u64;

/// Lifecycle states. Ordered: a track only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum TrackState {
    New,
    Tracked,
    Lost,
    Removed,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Tracked => "TRACKED",
            Self::Lost => "LOST",
            Self::Removed => "REMOVED",
        }
    }

    /// Eligible for association and rule evaluation.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::New | Self::Tracked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxObservation {
    pub frame_index: u64,
    pub bbox: BBox,
    /// false when the box came from prediction alone
    pub observed: bool,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub state: TrackState,
    pub class_label: String,
    /// Current estimate: the matched detection's box, or the prediction on missed frames.
    pub bbox: BBox,
    pub confidence: f32,
    pub attributes: BTreeSet<String>,
    pub hits: u32,
    pub hit_streak: u32,
    pub miss_count: u32,
    pub first_seen_frame: u64,
    pub last_seen_frame: u64,
    pub last_seen_ms: f64,
    pub lost_since_frame: Option<u64>,
    /// Frames since the detection cycle the tracker last consumed.
    pub detection_staleness: u64,
    pub history: VecDeque<BoxObservation>,
    motion: MotionModel,
    predicted: BBox,
    history_len: usize,
}

impl Track {
    pub(crate) fn spawn(
        id: TrackId,
        det: &Detection,
        frame_index: u64,
        timestamp_ms: f64,
        motion_cfg: &MotionConfig,
        history_len: usize,
    ) -> Self {
        let mut history = VecDeque::with_capacity(history_len);
        history.push_back(BoxObservation {
            frame_index,
            bbox: det.bbox,
            observed: true,
        });
        Self {
            id,
            state: TrackState::New,
            class_label: det.class_label.clone(),
            bbox: det.bbox,
            confidence: det.confidence,
            attributes: det.attributes.clone(),
            hits: 1,
            hit_streak: 1,
            miss_count: 0,
            first_seen_frame: frame_index,
            last_seen_frame: frame_index,
            last_seen_ms: timestamp_ms,
            lost_since_frame: None,
            detection_staleness: 0,
            history,
            motion: MotionModel::new(&det.bbox, motion_cfg),
            predicted: det.bbox,
            history_len,
        }
    }

    /// Box the tracker associates against on the current frame.
    pub fn predicted_bbox(&self) -> BBox {
        self.predicted
    }

    pub fn velocity(&self) -> (f32, f32) {
        self.motion.velocity()
    }

    pub(crate) fn predict(&mut self) {
        self.predicted = self.motion.predict();
    }

    pub(crate) fn apply_detection(&mut self, det: &Detection, frame_index: u64, timestamp_ms: f64) {
        self.motion.correct(&det.bbox);
        self.bbox = det.bbox;
        self.confidence = det.confidence;
        self.attributes = det.attributes.clone();
        self.hits += 1;
        self.hit_streak += 1;
        self.miss_count = 0;
        self.last_seen_frame = frame_index;
        self.last_seen_ms = timestamp_ms;
        if self.state == TrackState::New {
            self.state = TrackState::Tracked;
            debug!("Track {} ({}) now TRACKED", self.id, self.class_label);
        }
        self.record(frame_index, det.bbox, true);
    }

    pub(crate) fn mark_missed(&mut self, frame_index: u64) {
        self.miss_count += 1;
        self.hit_streak = 0;
        self.bbox = self.predicted;
        self.record(frame_index, self.predicted, false);
    }

    pub(crate) fn advance_state(&mut self, next: TrackState, frame_index: u64) {
        if next <= self.state {
            return;
        }
        if next == TrackState::Lost {
            self.lost_since_frame = Some(frame_index);
        }
        self.state = next;
    }

    fn record(&mut self, frame_index: u64, bbox: BBox, observed: bool) {
        if self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        self.history.push_back(BoxObservation {
            frame_index,
            bbox,
            observed,
        });
    }
}

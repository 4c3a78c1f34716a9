// src/recording/session.rs
//
// One clip in progress: pre-event frames replayed from the ring buffer, then
// live frames until the post-event window after resolution runs out or the
// clip hits its length cap.

use super::ring_buffer::SharedFrame;
use crate::tracking::TrackId;
use serde::Serialize;

/// Clip metadata, written next to the frames as `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClipRecord {
    pub event_id: String,
    pub rule_id: String,
    pub track_ids: Vec<TrackId>,
    pub desired_start_frame: u64,
    pub start_frame: u64,
    pub end_frame: u64,
    pub start_ts: f64,
    pub end_ts: f64,
    pub frame_count: usize,
    pub snapshot_frame: Option<u64>,
    /// History did not reach back to the desired start
    pub truncated: bool,
    /// Stopped at the maximum clip length
    pub capped: bool,
    /// Finalized at shutdown before the post-event window elapsed
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct FinishedClip {
    pub record: ClipRecord,
    pub frames: Vec<SharedFrame>,
    pub snapshot: Option<SharedFrame>,
}

pub struct RecordingSession {
    pub event_id: String,
    pub rule_id: String,
    pub track_ids: Vec<TrackId>,
    desired_start: u64,
    truncated: bool,
    capped: bool,
    frames: Vec<SharedFrame>,
    snapshot: Option<SharedFrame>,
    max_frames: usize,
    post_frames: usize,
    /// Frames still to append once resolved; `None` while the incident is open
    post_remaining: Option<usize>,
}

impl RecordingSession {
    pub fn new(
        event_id: String,
        rule_id: String,
        track_ids: Vec<TrackId>,
        desired_start: u64,
        pre_frames: Vec<SharedFrame>,
        snapshot: Option<SharedFrame>,
        max_frames: usize,
        post_frames: usize,
    ) -> Self {
        let truncated = pre_frames
            .first()
            .map_or(true, |f| f.index > desired_start);
        let mut session = Self {
            event_id,
            rule_id,
            track_ids,
            desired_start,
            truncated,
            capped: false,
            frames: Vec::with_capacity(pre_frames.len()),
            snapshot,
            max_frames: max_frames.max(1),
            post_frames,
            post_remaining: None,
        };
        for frame in pre_frames {
            if !session.append(frame) {
                break;
            }
        }
        session
    }

    /// Returns whether the session still wants frames.
    pub fn append(&mut self, frame: SharedFrame) -> bool {
        if self.is_complete() {
            return false;
        }
        self.frames.push(frame);
        if self.frames.len() >= self.max_frames {
            self.capped = true;
        }
        if let Some(remaining) = self.post_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        !self.is_complete()
    }

    pub fn mark_resolved(&mut self) {
        if self.post_remaining.is_none() {
            self.post_remaining = Some(self.post_frames);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.capped || self.post_remaining == Some(0)
    }

    pub fn start_frame(&self) -> Option<u64> {
        self.frames.first().map(|f| f.index)
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// `interrupted` marks a clip closed early by shutdown.
    pub fn finish(self, interrupted: bool) -> FinishedClip {
        let first = self.frames.first();
        let last = self.frames.last();
        let record = ClipRecord {
            event_id: self.event_id,
            rule_id: self.rule_id,
            track_ids: self.track_ids,
            desired_start_frame: self.desired_start,
            start_frame: first.map_or(self.desired_start, |f| f.index),
            end_frame: last.map_or(self.desired_start, |f| f.index),
            start_ts: first.map_or(0.0, |f| f.timestamp_ms),
            end_ts: last.map_or(0.0, |f| f.timestamp_ms),
            frame_count: self.frames.len(),
            snapshot_frame: self.snapshot.as_ref().map(|f| f.index),
            truncated: self.truncated,
            capped: self.capped,
            interrupted,
        };
        FinishedClip {
            record,
            frames: self.frames,
            snapshot: self.snapshot,
        }
    }
}

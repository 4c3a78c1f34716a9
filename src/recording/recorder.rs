// src/recording/recorder.rs
//
// Owns the ring buffer (single writer) and every open recording session.
//
// Ordering within a frame: sessions for incidents confirmed on frame N are
// opened before frame N is pushed, so N is the first live frame of the clip
// and the pre-event replay ends at N-1.

use super::ring_buffer::{RingBuffer, SharedFrame};
use super::session::{FinishedClip, RecordingSession};
use crate::tracking::TrackId;
use crate::types::Frame;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub frame_rate: f64,
    /// History kept in the ring buffer
    pub pre_event_seconds: f64,
    /// Recording continues this long after resolution
    pub post_event_seconds: f64,
    /// Hard cap on clip length, pre-event frames included
    pub max_clip_seconds: f64,
    pub output_dir: String,
    pub jpeg_quality: u8,
    pub write_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frame_rate: 30.0,
            pre_event_seconds: 5.0,
            post_event_seconds: 5.0,
            max_clip_seconds: 60.0,
            output_dir: "output/clips".into(),
            jpeg_quality: 85,
            write_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Finalize open sessions as interrupted clips
    Flush,
    /// Drop open sessions
    Discard,
}

/// What `open_session` decided about the pre-event window.
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub desired_start: u64,
    pub start_frame: u64,
    pub truncated: bool,
    pub snapshot: Option<SharedFrame>,
}

#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub flushed: Vec<FinishedClip>,
    pub discarded: Vec<String>,
}

pub struct Recorder {
    buffer: RingBuffer,
    sessions: BTreeMap<String, RecordingSession>,
    post_frames: usize,
    max_frames: usize,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        let capacity = RingBuffer::capacity_for(config.pre_event_seconds, config.frame_rate);
        let post_frames = (config.post_event_seconds * config.frame_rate).ceil().max(0.0) as usize;
        let max_frames = RingBuffer::capacity_for(config.max_clip_seconds, config.frame_rate);
        info!(
            "Recorder: buffer {} frames ({:.1}s @ {:.1} fps), post {} frames, cap {} frames",
            capacity, config.pre_event_seconds, config.frame_rate, post_frames, max_frames
        );
        Self {
            buffer: RingBuffer::new(capacity),
            sessions: BTreeMap::new(),
            post_frames,
            max_frames,
        }
    }

    /// Open a clip for a confirmed incident. The clip wants history from
    /// `min(tentative_frame, confirmed_frame - capacity)`; whatever the buffer
    /// no longer holds is reported as truncation.
    pub fn open_session(
        &mut self,
        event_id: &str,
        rule_id: &str,
        track_ids: Vec<TrackId>,
        tentative_frame: u64,
        confirmed_frame: u64,
    ) -> SessionStart {
        let capacity = self.buffer.capacity() as u64;
        let desired_start = tentative_frame.min(confirmed_frame.saturating_sub(capacity));
        let pre_frames: Vec<SharedFrame> = self
            .buffer
            .since(desired_start)
            .into_iter()
            .filter(|f| f.index < confirmed_frame)
            .collect();
        let snapshot = self.buffer.newest().cloned();

        let session = RecordingSession::new(
            event_id.to_string(),
            rule_id.to_string(),
            track_ids,
            desired_start,
            pre_frames,
            snapshot.clone(),
            self.max_frames,
            self.post_frames,
        );
        let start = SessionStart {
            desired_start,
            start_frame: session.start_frame().unwrap_or(confirmed_frame),
            truncated: session.truncated(),
            snapshot,
        };
        if start.truncated {
            warn!(
                "Recording {}: history starts at {} but clip wanted {}, clip truncated",
                event_id, start.start_frame, desired_start
            );
        } else {
            debug!("Recording {} opened from frame {}", event_id, start.start_frame);
        }
        if self.sessions.insert(event_id.to_string(), session).is_some() {
            warn!("Recording {} reopened, previous session replaced", event_id);
        }
        start
    }

    pub fn mark_resolved(&mut self, event_id: &str) {
        match self.sessions.get_mut(event_id) {
            Some(session) => session.mark_resolved(),
            None => debug!("No open recording for {}", event_id),
        }
    }

    /// Push a live frame into the buffer and every open session. Sessions
    /// that completed on this frame are returned finalized.
    pub fn push(&mut self, frame: Frame) -> Vec<FinishedClip> {
        let shared = self.buffer.push(frame);
        let mut done = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            if !session.append(Arc::clone(&shared)) {
                done.push(id.clone());
            }
        }
        done.into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .map(|s| s.finish(false))
            .collect()
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn shutdown(&mut self, mode: ShutdownMode) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for (id, session) in std::mem::take(&mut self.sessions) {
            match mode {
                ShutdownMode::Flush => {
                    info!("Recording {} flushed at shutdown ({} frames)", id, session.len());
                    report.flushed.push(session.finish(true));
                }
                ShutdownMode::Discard => {
                    info!("Recording {} discarded at shutdown", id);
                    report.discarded.push(id);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Recorder {
        Recorder::new(RecorderConfig {
            frame_rate: 30.0,
            pre_event_seconds: 5.0,
            post_event_seconds: 1.0,
            max_clip_seconds: 60.0,
            ..RecorderConfig::default()
        })
    }

    fn feed(rec: &mut Recorder, range: std::ops::Range<u64>) -> Vec<FinishedClip> {
        range
            .flat_map(|i| rec.push(Frame::metadata_only(i, i as f64 * 1000.0 / 30.0)))
            .collect()
    }

    #[test]
    fn test_clip_starts_at_desired_frame_when_retained() {
        let mut rec = recorder();
        feed(&mut rec, 0..1000);
        let start = rec.open_session("e", "r", vec![1], 950, 1000);
        assert_eq!(start.desired_start, 850);
        assert_eq!(start.start_frame, 850);
        assert!(!start.truncated);
        assert_eq!(start.snapshot.map(|f| f.index), Some(999));
    }

    #[test]
    fn test_clip_truncated_when_history_is_short() {
        let mut rec = recorder();
        feed(&mut rec, 900..1000);
        let start = rec.open_session("e", "r", vec![1], 950, 1000);
        assert_eq!(start.start_frame, 900);
        assert!(start.truncated);
    }

    #[test]
    fn test_session_runs_post_window_after_resolution() {
        let mut rec = recorder();
        feed(&mut rec, 0..1000);
        rec.open_session("e", "r", vec![1], 950, 1000);
        assert!(feed(&mut rec, 1000..1100).is_empty());
        rec.mark_resolved("e");
        // 30 post frames: 1100..=1129
        let clips = feed(&mut rec, 1100..1200);
        assert_eq!(clips.len(), 1);
        let r = &clips[0].record;
        assert_eq!((r.start_frame, r.end_frame), (850, 1129));
        assert_eq!(r.frame_count, 280);
        assert!(!r.truncated && !r.capped && !r.interrupted);
        assert_eq!(rec.open_sessions(), 0);
    }

    #[test]
    fn test_session_capped_at_max_length() {
        let mut rec = Recorder::new(RecorderConfig {
            max_clip_seconds: 10.0,
            ..RecorderConfig::default()
        });
        feed(&mut rec, 0..200);
        rec.open_session("e", "r", vec![1], 190, 200);
        let clips = feed(&mut rec, 200..1000);
        assert_eq!(clips.len(), 1);
        assert!(clips[0].record.capped);
        assert_eq!(clips[0].record.frame_count, 300);
    }

    #[test]
    fn test_concurrent_sessions_and_shutdown_modes() {
        let mut rec = recorder();
        feed(&mut rec, 0..100);
        rec.open_session("a", "r", vec![1], 90, 100);
        rec.open_session("b", "r", vec![2], 95, 100);
        feed(&mut rec, 100..110);
        assert_eq!(rec.open_sessions(), 2);

        let report = rec.shutdown(ShutdownMode::Flush);
        assert_eq!(report.flushed.len(), 2);
        assert!(report.flushed.iter().all(|c| c.record.interrupted));

        rec.open_session("c", "r", vec![3], 105, 110);
        let report = rec.shutdown(ShutdownMode::Discard);
        assert_eq!(report.discarded, vec!["c".to_string()]);
        assert!(report.flushed.is_empty());
    }
}

// src/tracking/tracker.rs
//
// Two-stage multi-object tracker.
//
// Design:
//   - Every frame each track is predicted one frame ahead (constant velocity)
//   - Stage 1: confident detections vs live tracks, 1-IoU cost, optimal assignment
//   - Stage 2: weak detections vs tracks still unmatched; weak detections
//     recover existing identities but never create new ones
//   - Tracks live in a dense slot arena; a freed slot cools down before reuse
//     and track ids are never reused
//   - States only move forward: New -> Tracked -> Lost -> Removed

use super::assignment::{gated_assignment, GATED};
use super::motion::MotionConfig;
use super::track::{Track, TrackId, TrackState};
use crate::detection::{sanitize, Detection};
use crate::error::TrackerError;
use crate::geometry::iou;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Detections at or above this confidence take part in stage 1 and may spawn tracks
    pub high_threshold: f32,
    /// Detections in [low, high) only take part in stage 2; below low they are ignored
    pub low_threshold: f32,
    /// Minimum IoU between prediction and detection in stage 1
    pub min_iou_high: f32,
    /// Minimum IoU in stage 2
    pub min_iou_low: f32,
    /// Refuse matches between different class labels
    pub class_aware: bool,
    /// A New track missed more than this many frames is removed
    pub new_track_max_misses: u32,
    /// A Tracked track missed more than this many frames becomes Lost
    pub max_misses: u32,
    /// Frames a track stays Lost before it is removed
    pub lost_horizon_frames: u32,
    /// Frames a freed arena slot waits before it can hold a new track
    pub slot_cooldown_frames: u32,
    /// Bounded per-track box history
    pub history_len: usize,
    /// Kalman noise terms for the per-track motion estimate
    pub motion: MotionConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            high_threshold: 0.5,
            low_threshold: 0.1,
            min_iou_high: 0.2,
            min_iou_low: 0.5,
            class_aware: true,
            new_track_max_misses: 30, // 1s at 30fps, survives one sparse detection gap
            max_misses: 30,
            lost_horizon_frames: 90,
            slot_cooldown_frames: 90,
            history_len: 30,
            motion: MotionConfig::default(),
        }
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum MatchStage {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    pub track_id: TrackId,
    /// Index into the detection slice passed to `update`
    pub detection_index: usize,
    pub stage: MatchStage,
    pub iou: f32,
}

/// What changed during one `update`.
#[derive(Debug, Clone, Default)]
pub struct TrackerOutput {
    pub frame_index: u64,
    pub matches: Vec<Assignment>,
    pub spawned: Vec<TrackId>,
    pub lost: Vec<TrackId>,
    pub removed: Vec<TrackId>,
    pub malformed: usize,
    pub below_low: usize,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TrackerStats {
    pub frames: u64,
    pub tracks_created: u64,
    pub tracks_removed: u64,
    pub malformed_discarded: u64,
    pub below_low_discarded: u64,
    pub high_matches: u64,
    pub low_matches: u64,
}

// ============================================================================
// MAIN TRACKER
// ============================================================================

#[derive(Debug)]
enum Slot {
    Occupied(Track),
    Cooling { until_frame: u64 },
    Free,
}

pub struct Tracker {
    pub config: TrackerConfig,
    slots: Vec<Slot>,
    free: Vec<usize>,
    /// track id -> slot, ordered so iteration is deterministic
    index: BTreeMap<TrackId, usize>,
    next_id: TrackId,
    last_frame: Option<u64>,
    last_cycle_frame: Option<u64>,
    pending_cycle: Option<u64>,
    stats: TrackerStats,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            slots: Vec::with_capacity(64),
            free: Vec::new(),
            index: BTreeMap::new(),
            next_id: 1,
            last_frame: None,
            last_cycle_frame: None,
            pending_cycle: None,
            stats: TrackerStats::default(),
        }
    }

    /// Tell the tracker that the detections passed to the next `update`
    /// came from a detector run on `batch_frame`. Without this call a
    /// non-empty detection set counts as a fresh cycle on the current frame.
    pub fn observe_detection_cycle(&mut self, batch_frame: u64) {
        self.pending_cycle = Some(batch_frame);
    }

    /// Advance one frame. `detections` may be empty; every track then ages
    /// by one miss and relies on its prediction.
    pub fn update(
        &mut self,
        detections: &[Detection],
        frame_index: u64,
        timestamp_ms: f64,
    ) -> Result<TrackerOutput, TrackerError> {
        if let Some(last) = self.last_frame {
            if frame_index <= last {
                return Err(TrackerError::FrameRegression {
                    last,
                    got: frame_index,
                });
            }
        }
        self.last_frame = Some(frame_index);
        self.stats.frames += 1;
        self.release_cooled_slots(frame_index);

        match self.pending_cycle.take() {
            Some(f) => self.last_cycle_frame = Some(f),
            None if !detections.is_empty() => self.last_cycle_frame = Some(frame_index),
            None => {}
        }

        let mut out = TrackerOutput {
            frame_index,
            ..Default::default()
        };

        let (valid, malformed) = sanitize(detections, frame_index);
        out.malformed = malformed;
        self.stats.malformed_discarded += malformed as u64;

        let mut high: Vec<(usize, &Detection)> = Vec::new();
        let mut low: Vec<(usize, &Detection)> = Vec::new();
        for (i, d) in valid {
            if d.confidence >= self.config.high_threshold {
                high.push((i, d));
            } else if d.confidence >= self.config.low_threshold {
                low.push((i, d));
            } else {
                out.below_low += 1;
            }
        }
        self.stats.below_low_discarded += out.below_low as u64;

        for slot in &mut self.slots {
            if let Slot::Occupied(track) = slot {
                track.predict();
            }
        }

        // Live candidates in id order
        let live: Vec<usize> = self
            .index
            .values()
            .copied()
            .filter(|&s| matches!(&self.slots[s], Slot::Occupied(t) if t.state.is_live()))
            .collect();
        let mut track_matched = vec![false; live.len()];

        // ════════════════════════════════════════════════════════════════════
        // STAGE 1: confident detections
        // ════════════════════════════════════════════════════════════════════
        let mut high_matched = vec![false; high.len()];
        let pairs = self.associate(&live, &high, self.config.min_iou_high);
        for (row, col, overlap) in pairs {
            track_matched[row] = true;
            high_matched[col] = true;
            let (det_index, det) = high[col];
            let track_id = self.apply_match(live[row], det, frame_index, timestamp_ms);
            out.matches.push(Assignment {
                track_id,
                detection_index: det_index,
                stage: MatchStage::High,
                iou: overlap,
            });
        }

        // ════════════════════════════════════════════════════════════════════
        // STAGE 2: weak detections vs tracks left over from stage 1
        // ════════════════════════════════════════════════════════════════════
        let remaining: Vec<usize> = (0..live.len()).filter(|&r| !track_matched[r]).collect();
        let remaining_slots: Vec<usize> = remaining.iter().map(|&r| live[r]).collect();
        let pairs = self.associate(&remaining_slots, &low, self.config.min_iou_low);
        for (row, col, overlap) in pairs {
            track_matched[remaining[row]] = true;
            let (det_index, det) = low[col];
            let track_id = self.apply_match(remaining_slots[row], det, frame_index, timestamp_ms);
            out.matches.push(Assignment {
                track_id,
                detection_index: det_index,
                stage: MatchStage::Low,
                iou: overlap,
            });
        }
        for m in &out.matches {
            match m.stage {
                MatchStage::High => self.stats.high_matches += 1,
                MatchStage::Low => self.stats.low_matches += 1,
            }
        }

        // ════════════════════════════════════════════════════════════════════
        // UNMATCHED TRACKS → MISS, LIFECYCLE
        // ════════════════════════════════════════════════════════════════════
        let matched_slots: Vec<usize> = live
            .iter()
            .zip(&track_matched)
            .filter(|(_, &m)| m)
            .map(|(&s, _)| s)
            .collect();
        let occupied: Vec<usize> = self.index.values().copied().collect();
        for slot_idx in occupied {
            if matched_slots.contains(&slot_idx) {
                continue;
            }
            let Slot::Occupied(track) = &mut self.slots[slot_idx] else {
                continue;
            };
            track.mark_missed(frame_index);
            let next = match track.state {
                TrackState::New if track.miss_count > self.config.new_track_max_misses => {
                    Some(TrackState::Removed)
                }
                TrackState::Tracked if track.miss_count > self.config.max_misses => {
                    Some(TrackState::Lost)
                }
                TrackState::Lost => {
                    let since = track.lost_since_frame.unwrap_or(frame_index);
                    (frame_index - since >= u64::from(self.config.lost_horizon_frames))
                        .then_some(TrackState::Removed)
                }
                _ => None,
            };
            match next {
                Some(TrackState::Lost) => {
                    track.advance_state(TrackState::Lost, frame_index);
                    debug!(
                        "Track {} ({}) LOST after {} misses",
                        track.id, track.class_label, track.miss_count
                    );
                    out.lost.push(track.id);
                }
                Some(TrackState::Removed) => {
                    out.removed.push(track.id);
                }
                _ => {}
            }
        }
        for &id in &out.removed {
            self.retire(id, frame_index);
        }

        // ════════════════════════════════════════════════════════════════════
        // UNMATCHED CONFIDENT DETECTIONS → NEW TRACKS
        // ════════════════════════════════════════════════════════════════════
        for (col, (_, det)) in high.iter().enumerate() {
            if high_matched[col] {
                continue;
            }
            let id = self.spawn(det, frame_index, timestamp_ms);
            out.spawned.push(id);
        }

        let staleness = self
            .last_cycle_frame
            .map(|f| frame_index.saturating_sub(f))
            .unwrap_or(0);
        for slot in &mut self.slots {
            if let Slot::Occupied(track) = slot {
                track.detection_staleness = staleness;
            }
        }

        Ok(out)
    }

    /// Optimal matching between the tracks in `slots` and `dets`.
    /// Returns (row, col, iou) for accepted pairs.
    fn associate(
        &self,
        slots: &[usize],
        dets: &[(usize, &Detection)],
        min_iou: f32,
    ) -> Vec<(usize, usize, f32)> {
        if slots.is_empty() || dets.is_empty() {
            return Vec::new();
        }
        let mut overlaps = vec![vec![0.0_f32; dets.len()]; slots.len()];
        let mut cost = vec![vec![GATED; dets.len()]; slots.len()];
        for (r, &s) in slots.iter().enumerate() {
            let Slot::Occupied(track) = &self.slots[s] else {
                continue;
            };
            let predicted = track.predicted_bbox();
            for (c, (_, d)) in dets.iter().enumerate() {
                if self.config.class_aware && d.class_label != track.class_label {
                    continue;
                }
                let o = iou(&predicted, &d.bbox);
                overlaps[r][c] = o;
                cost[r][c] = 1.0 - o;
            }
        }

        gated_assignment(&cost, 1.0 - min_iou)
            .into_iter()
            .map(|(r, c)| (r, c, overlaps[r][c]))
            .collect()
    }

    fn apply_match(
        &mut self,
        slot_idx: usize,
        det: &Detection,
        frame_index: u64,
        timestamp_ms: f64,
    ) -> TrackId {
        match &mut self.slots[slot_idx] {
            Slot::Occupied(track) => {
                track.apply_detection(det, frame_index, timestamp_ms);
                track.id
            }
            // associate() only yields occupied slots
            _ => 0,
        }
    }

    fn spawn(&mut self, det: &Detection, frame_index: u64, timestamp_ms: f64) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;
        let track = Track::spawn(
            id,
            det,
            frame_index,
            timestamp_ms,
            &self.config.motion,
            self.config.history_len.max(1),
        );
        info!(
            "New track T{} created: class={}, conf={:.2}, bbox=[{:.0},{:.0},{:.0},{:.0}]",
            id, det.class_label, det.confidence, det.bbox.x1, det.bbox.y1, det.bbox.x2, det.bbox.y2
        );
        let slot_idx = match self.free.pop() {
            Some(i) => {
                self.slots[i] = Slot::Occupied(track);
                i
            }
            None => {
                self.slots.push(Slot::Occupied(track));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot_idx);
        self.stats.tracks_created += 1;
        id
    }

    fn retire(&mut self, id: TrackId, frame_index: u64) {
        let Some(slot_idx) = self.index.remove(&id) else {
            return;
        };
        if let Slot::Occupied(track) = &self.slots[slot_idx] {
            info!(
                "Track {} ({}) removed: state={}, hits={}, misses={}",
                id,
                track.class_label,
                track.state.as_str(),
                track.hits,
                track.miss_count
            );
        }
        self.slots[slot_idx] = Slot::Cooling {
            until_frame: frame_index + u64::from(self.config.slot_cooldown_frames),
        };
        self.stats.tracks_removed += 1;
    }

    fn release_cooled_slots(&mut self, frame_index: u64) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Slot::Cooling { until_frame } = slot {
                if *until_frame <= frame_index {
                    *slot = Slot::Free;
                    self.free.push(i);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Every track not yet removed, ordered by id.
    pub fn tracks(&self) -> Vec<&Track> {
        self.index
            .values()
            .filter_map(|&s| match &self.slots[s] {
                Slot::Occupied(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// New and Tracked tracks, ordered by id.
    pub fn active_tracks(&self) -> Vec<&Track> {
        self.tracks()
            .into_iter()
            .filter(|t| t.state.is_live())
            .collect()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        match self.index.get(&id).map(|&s| &self.slots[s]) {
            Some(Slot::Occupied(t)) => Some(t),
            _ => None,
        }
    }

    /// Removed (or never seen) ids report `Removed`.
    pub fn state_of(&self, id: TrackId) -> TrackState {
        self.get(id).map(|t| t.state).unwrap_or(TrackState::Removed)
    }

    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use std::collections::HashSet;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32, conf: f32) -> Detection {
        Detection::new(BBox::new(x1, y1, x2, y2), conf, "person")
    }

    fn quick_config() -> TrackerConfig {
        TrackerConfig {
            new_track_max_misses: 2,
            max_misses: 3,
            lost_horizon_frames: 4,
            slot_cooldown_frames: 5,
            ..TrackerConfig::default()
        }
    }

    #[test]
    fn test_empty_tracker_spawns_directly() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let out = tracker
            .update(&[det(0.0, 0.0, 10.0, 20.0, 0.9), det(50.0, 0.0, 60.0, 20.0, 0.8)], 1, 0.0)
            .unwrap();
        assert_eq!(out.spawned, vec![1, 2]);
        assert!(out.matches.is_empty());
        assert_eq!(tracker.tracks().len(), 2);
        assert!(tracker.tracks().iter().all(|t| t.state == TrackState::New));
    }

    #[test]
    fn test_identity_kept_across_frames() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        for f in 1..=10 {
            let x = f as f32 * 2.0;
            tracker
                .update(&[det(x, 0.0, x + 20.0, 40.0, 0.9)], f, f as f64 * 33.3)
                .unwrap();
        }
        let tracks = tracker.tracks();
        assert_eq!(tracks.len(), 1, "one object, one identity");
        assert_eq!(tracks[0].id, 1);
        assert_eq!(tracks[0].state, TrackState::Tracked);
        assert_eq!(tracks[0].hits, 10);
    }

    #[test]
    fn test_low_confidence_never_spawns() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let out = tracker.update(&[det(0.0, 0.0, 10.0, 10.0, 0.3)], 1, 0.0).unwrap();
        assert!(out.spawned.is_empty());
        assert!(tracker.tracks().is_empty());
    }

    #[test]
    fn test_low_confidence_recovers_existing_track() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 1, 0.0).unwrap();
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 2, 33.3).unwrap();
        // Occluded: detector only reports 0.3
        let out = tracker.update(&[det(1.0, 0.0, 21.0, 40.0, 0.3)], 3, 66.6).unwrap();
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].stage, MatchStage::Low);
        assert_eq!(out.matches[0].track_id, 1);
        assert_eq!(tracker.get(1).map(|t| t.miss_count), Some(0));
    }

    #[test]
    fn test_below_low_threshold_ignored() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let out = tracker.update(&[det(0.0, 0.0, 10.0, 10.0, 0.05)], 1, 0.0).unwrap();
        assert_eq!(out.below_low, 1);
        assert_eq!(tracker.stats().below_low_discarded, 1);
    }

    #[test]
    fn test_assignment_bijective_per_stage() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        // Five overlapping people
        let frame1: Vec<Detection> = (0..5)
            .map(|i| det(i as f32 * 8.0, 0.0, i as f32 * 8.0 + 20.0, 50.0, 0.9))
            .collect();
        tracker.update(&frame1, 1, 0.0).unwrap();

        // Seven candidates crowding the same region, mixed confidence
        let frame2: Vec<Detection> = (0..7)
            .map(|i| {
                let conf = if i % 2 == 0 { 0.9 } else { 0.3 };
                det(i as f32 * 6.0, 1.0, i as f32 * 6.0 + 20.0, 51.0, conf)
            })
            .collect();
        let out = tracker.update(&frame2, 2, 33.3).unwrap();

        for stage in [MatchStage::High, MatchStage::Low] {
            let in_stage: Vec<_> = out.matches.iter().filter(|m| m.stage == stage).collect();
            let tracks: HashSet<_> = in_stage.iter().map(|m| m.track_id).collect();
            let dets: HashSet<_> = in_stage.iter().map(|m| m.detection_index).collect();
            assert_eq!(tracks.len(), in_stage.len(), "track matched twice in {:?}", stage);
            assert_eq!(dets.len(), in_stage.len(), "detection matched twice in {:?}", stage);
        }
        let all_tracks: HashSet<_> = out.matches.iter().map(|m| m.track_id).collect();
        assert_eq!(all_tracks.len(), out.matches.len(), "no track matched in both stages");
        for m in out.matches.iter().filter(|m| m.stage == MatchStage::Low) {
            assert!(frame2[m.detection_index].confidence < 0.5);
        }
    }

    #[test]
    fn test_class_aware_matching() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 1, 0.0).unwrap();
        let forklift = Detection::new(BBox::new(0.0, 0.0, 20.0, 40.0), 0.9, "forklift");
        let out = tracker.update(&[forklift], 2, 33.3).unwrap();
        assert!(out.matches.is_empty());
        assert_eq!(out.spawned, vec![2]);
    }

    #[test]
    fn test_empty_frame_ages_without_creating() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 1, 0.0).unwrap();
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 2, 33.3).unwrap();
        let out = tracker.update(&[], 3, 66.6).unwrap();
        assert!(out.spawned.is_empty() && out.removed.is_empty());
        let t = tracker.get(1).unwrap();
        assert_eq!(t.miss_count, 1);
        assert_eq!(t.state, TrackState::Tracked);
    }

    #[test]
    fn test_lifecycle_tracked_lost_removed() {
        let mut tracker = Tracker::new(quick_config());
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 1, 0.0).unwrap();
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 2, 0.0).unwrap();

        let mut lost_at = None;
        let mut removed_at = None;
        for f in 3..20 {
            let out = tracker.update(&[], f, 0.0).unwrap();
            if out.lost.contains(&1) {
                lost_at = Some(f);
            }
            if out.removed.contains(&1) {
                removed_at = Some(f);
                break;
            }
        }
        // miss 4 (> max_misses 3) at frame 6, then 4 frames in Lost
        assert_eq!(lost_at, Some(6));
        assert_eq!(removed_at, Some(10));
        assert!(tracker.get(1).is_none());
        assert_eq!(tracker.state_of(1), TrackState::Removed);
    }

    #[test]
    fn test_lost_track_not_reassociated() {
        let mut tracker = Tracker::new(quick_config());
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 1, 0.0).unwrap();
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 2, 0.0).unwrap();
        for f in 3..=6 {
            tracker.update(&[], f, 0.0).unwrap();
        }
        assert_eq!(tracker.state_of(1), TrackState::Lost);
        let out = tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 7, 0.0).unwrap();
        assert_eq!(out.spawned, vec![2], "re-appearance gets a fresh identity");
        assert_eq!(tracker.state_of(1), TrackState::Lost);
    }

    #[test]
    fn test_unconfirmed_track_removed_quickly() {
        let mut tracker = Tracker::new(quick_config());
        tracker.update(&[det(0.0, 0.0, 20.0, 40.0, 0.9)], 1, 0.0).unwrap();
        let mut removed = Vec::new();
        for f in 2..=4 {
            removed.extend(tracker.update(&[], f, 0.0).unwrap().removed);
        }
        assert_eq!(removed, vec![1]);
    }

    #[test]
    fn test_ids_unique_and_slots_cool_down() {
        let mut tracker = Tracker::new(quick_config());
        let mut seen = HashSet::new();
        let mut frame = 0;
        for round in 0..6 {
            frame += 1;
            let x = round as f32 * 100.0;
            let out = tracker.update(&[det(x, 0.0, x + 20.0, 40.0, 0.9)], frame, 0.0).unwrap();
            for id in out.spawned {
                assert!(seen.insert(id), "track id {} reused", id);
            }
            for _ in 0..3 {
                frame += 1;
                tracker.update(&[], frame, 0.0).unwrap();
            }
            let live: Vec<TrackId> = tracker.tracks().iter().map(|t| t.id).collect();
            let unique: HashSet<_> = live.iter().collect();
            assert_eq!(unique.len(), live.len());
        }
        // Every track was removed after 3 misses; slots were recycled only after cooling
        assert!(tracker.slot_count() <= 3, "slots={}", tracker.slot_count());
    }

    #[test]
    fn test_frame_regression_is_fatal() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(&[], 10, 0.0).unwrap();
        assert!(matches!(
            tracker.update(&[], 10, 0.0),
            Err(TrackerError::FrameRegression { last: 10, got: 10 })
        ));
        assert!(matches!(
            tracker.update(&[], 4, 0.0),
            Err(TrackerError::FrameRegression { last: 10, got: 4 })
        ));
    }

    #[test]
    fn test_malformed_never_reach_state() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let out = tracker
            .update(&[det(f32::NAN, 0.0, 10.0, 10.0, 0.9), det(5.0, 5.0, 5.0, 9.0, 0.9)], 1, 0.0)
            .unwrap();
        assert_eq!(out.malformed, 2);
        assert!(tracker.tracks().is_empty());
        assert_eq!(tracker.stats().malformed_discarded, 2);
    }

    #[test]
    fn test_prediction_bridges_sparse_detections() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        // Object moving 2 px/frame, detector runs every 5 frames
        let mut f = 0;
        for cycle in 0..8 {
            for k in 0..5 {
                f += 1;
                if k == 0 {
                    let x = f as f32 * 2.0;
                    tracker.observe_detection_cycle(f);
                    tracker.update(&[det(x, 0.0, x + 30.0, 60.0, 0.9)], f, 0.0).unwrap();
                } else {
                    tracker.update(&[], f, 0.0).unwrap();
                }
            }
            assert_eq!(tracker.tracks().len(), 1, "identity lost at cycle {}", cycle);
        }
        let t = tracker.get(1).unwrap();
        assert_eq!(t.detection_staleness, 4);
        assert!(t.velocity().0 > 1.0, "vx={}", t.velocity().0);
    }
}

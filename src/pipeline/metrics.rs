// src/pipeline/metrics.rs
//
// Counters and last-frame timings for every stage. Cheap to clone; the
// binary keeps one handle for the notifier side and logs the summary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_processed: Arc<AtomicU64>,
    pub detection_cycles: Arc<AtomicU64>,
    pub stale_batches: Arc<AtomicU64>,
    pub malformed_detections: Arc<AtomicU64>,
    pub tracks_created: Arc<AtomicU64>,
    pub tracks_removed: Arc<AtomicU64>,
    pub match_signals: Arc<AtomicU64>,
    pub incidents_opened: Arc<AtomicU64>,
    pub incidents_confirmed: Arc<AtomicU64>,
    pub incidents_resolved: Arc<AtomicU64>,
    pub incidents_discarded: Arc<AtomicU64>,
    pub clips_written: Arc<AtomicU64>,
    pub recording_failures: Arc<AtomicU64>,
    pub notifications_sent: Arc<AtomicU64>,
    pub notifications_failed: Arc<AtomicU64>,
    pub notifications_suppressed: Arc<AtomicU64>,
    pub tracker_time_us: Arc<AtomicU64>,
    pub rules_time_us: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_processed: Arc::new(AtomicU64::new(0)),
            detection_cycles: Arc::new(AtomicU64::new(0)),
            stale_batches: Arc::new(AtomicU64::new(0)),
            malformed_detections: Arc::new(AtomicU64::new(0)),
            tracks_created: Arc::new(AtomicU64::new(0)),
            tracks_removed: Arc::new(AtomicU64::new(0)),
            match_signals: Arc::new(AtomicU64::new(0)),
            incidents_opened: Arc::new(AtomicU64::new(0)),
            incidents_confirmed: Arc::new(AtomicU64::new(0)),
            incidents_resolved: Arc::new(AtomicU64::new(0)),
            incidents_discarded: Arc::new(AtomicU64::new(0)),
            clips_written: Arc::new(AtomicU64::new(0)),
            recording_failures: Arc::new(AtomicU64::new(0)),
            notifications_sent: Arc::new(AtomicU64::new(0)),
            notifications_failed: Arc::new(AtomicU64::new(0)),
            notifications_suppressed: Arc::new(AtomicU64::new(0)),
            tracker_time_us: Arc::new(AtomicU64::new(0)),
            rules_time_us: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSummary {
            frames_processed: get(&self.frames_processed),
            fps: self.fps(),
            detection_cycles: get(&self.detection_cycles),
            stale_batches: get(&self.stale_batches),
            malformed_detections: get(&self.malformed_detections),
            tracks_created: get(&self.tracks_created),
            tracks_removed: get(&self.tracks_removed),
            match_signals: get(&self.match_signals),
            incidents_opened: get(&self.incidents_opened),
            incidents_confirmed: get(&self.incidents_confirmed),
            incidents_resolved: get(&self.incidents_resolved),
            incidents_discarded: get(&self.incidents_discarded),
            clips_written: get(&self.clips_written),
            recording_failures: get(&self.recording_failures),
            notifications_sent: get(&self.notifications_sent),
            notifications_failed: get(&self.notifications_failed),
            notifications_suppressed: get(&self.notifications_suppressed),
            last_tracker_us: get(&self.tracker_time_us),
            last_rules_us: get(&self.rules_time_us),
            last_frame_us: get(&self.frame_time_us),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_processed: u64,
    pub fps: f64,
    pub detection_cycles: u64,
    pub stale_batches: u64,
    pub malformed_detections: u64,
    pub tracks_created: u64,
    pub tracks_removed: u64,
    pub match_signals: u64,
    pub incidents_opened: u64,
    pub incidents_confirmed: u64,
    pub incidents_resolved: u64,
    pub incidents_discarded: u64,
    pub clips_written: u64,
    pub recording_failures: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub notifications_suppressed: u64,
    pub last_tracker_us: u64,
    pub last_rules_us: u64,
    pub last_frame_us: u64,
    pub elapsed_secs: f64,
}

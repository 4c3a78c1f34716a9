// src/pipeline/orchestrator.rs
//
// Per-frame flow, strictly sequential by frame index:
//
//   latest detection slot ─► Tracker ─► attribute derivation ─► RuleEngine
//        ─► EventLifecycleManager ─► Recorder (open/resolve, then push frame)
//        ─► ClipWriter outcomes ─► evidence ledger + event bus
//
// The pipeline never waits on storage while processing frames; clip writes
// are handed to the writer thread and their outcomes collected on later
// frames (or at shutdown).

use super::event_bus::{EventBus, PipelineEvent};
use super::metrics::PipelineMetrics;
use crate::detection::{DetectionReader, Fetch};
use crate::error::PipelineError;
use crate::incidents::{
    EventLifecycleManager, Evidence, IncidentPayload, LifecycleEvent, TransitionKind,
    TransitionRecord,
};
use crate::recording::{ClipSink, ClipWriter, FinishedClip, Recorder, RecordingOutcome, ShutdownMode};
use crate::rules::{AttributeDeriver, Rule, RuleEngine, RuleId};
use crate::tracking::Tracker;
use crate::types::{Config, Frame};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info};

/// What one `process_frame` call did.
#[derive(Debug, Clone, Default)]
pub struct FrameSummary {
    pub frame_index: u64,
    pub live_tracks: usize,
    pub signals: usize,
    pub matched: usize,
    pub confirmed: usize,
    pub resolved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownSummary {
    pub flushed: usize,
    pub discarded: usize,
    pub clips_written: usize,
    pub recording_failures: usize,
}

pub struct Pipeline {
    tracker: Tracker,
    attributes: AttributeDeriver,
    engine: RuleEngine,
    lifecycle: EventLifecycleManager,
    recorder: Option<Recorder>,
    writer: Option<ClipWriter>,
    reader: DetectionReader,
    bus: EventBus,
    metrics: PipelineMetrics,
    rules: HashMap<RuleId, Rule>,
    /// event id -> snapshot frame chosen at confirmation
    snapshots: HashMap<String, u64>,
    log_cursor: usize,
    diagnostics_interval: u64,
}

impl Pipeline {
    /// `sink` is required when recording is enabled; without one the
    /// recorder is off regardless of configuration.
    pub fn new(
        config: &Config,
        rules: Vec<Rule>,
        reader: DetectionReader,
        sink: Option<Box<dyn ClipSink>>,
        metrics: PipelineMetrics,
    ) -> Result<Self, PipelineError> {
        let (recorder, writer) = match sink {
            Some(sink) if config.recorder.enabled => {
                let writer = ClipWriter::spawn(
                    sink,
                    config.recorder.write_attempts,
                    config.recorder.retry_backoff_ms,
                )?;
                (Some(Recorder::new(config.recorder.clone())), Some(writer))
            }
            _ => {
                info!("Recording disabled");
                (None, None)
            }
        };

        info!(
            "Pipeline ready: {} rule(s), tracker thresholds high={:.2} low={:.2}",
            rules.len(),
            config.tracker.high_threshold,
            config.tracker.low_threshold
        );

        Ok(Self {
            tracker: Tracker::new(config.tracker.clone()),
            attributes: AttributeDeriver::new(config.attributes.clone()),
            lifecycle: EventLifecycleManager::new(&rules),
            rules: rules.iter().map(|r| (r.rule_id.clone(), r.clone())).collect(),
            engine: RuleEngine::new(rules),
            recorder,
            writer,
            reader,
            bus: EventBus::new(config.pipeline.event_bus_capacity),
            metrics,
            snapshots: HashMap::new(),
            log_cursor: 0,
            diagnostics_interval: config.pipeline.diagnostics_interval_frames,
        })
    }

    pub fn process_frame(&mut self, frame: Frame) -> Result<FrameSummary, PipelineError> {
        let frame_start = Instant::now();
        let frame_index = frame.index;
        let timestamp_ms = frame.timestamp_ms;

        // 1. Newest detection cycle, if any
        let batch = match self.reader.poll(frame_index) {
            Fetch::Fresh { batch, staleness } => {
                self.metrics.inc(&self.metrics.detection_cycles);
                self.tracker.observe_detection_cycle(batch.frame_index);
                debug!(
                    "Frame {}: {} detection(s) from frame {} ({} stale)",
                    frame_index,
                    batch.detections.len(),
                    batch.frame_index,
                    staleness
                );
                Some(batch)
            }
            Fetch::Stale {
                batch_frame,
                staleness,
            } => {
                self.metrics.inc(&self.metrics.stale_batches);
                self.bus.publish(PipelineEvent::StaleDetections {
                    batch_frame,
                    frame_index,
                    staleness,
                });
                None
            }
            Fetch::Nothing => None,
        };
        let detections = batch.as_ref().map(|b| b.detections.as_slice()).unwrap_or(&[]);

        // 2. Tracking
        let t0 = Instant::now();
        let output = self.tracker.update(detections, frame_index, timestamp_ms)?;
        self.metrics
            .set_timing(&self.metrics.tracker_time_us, t0.elapsed().as_micros() as u64);
        self.metrics
            .add(&self.metrics.malformed_detections, output.malformed as u64);
        self.metrics
            .add(&self.metrics.tracks_created, output.spawned.len() as u64);
        self.metrics
            .add(&self.metrics.tracks_removed, output.removed.len() as u64);

        // 3. Attributes and rules
        let t1 = Instant::now();
        let tracks = self.tracker.tracks();
        let live_tracks = self.tracker.active_tracks().len();
        let table = self.attributes.update(&tracks);
        let signals = self.engine.evaluate(&tracks, table, frame_index);
        self.engine.forget_tracks(&output.removed);
        self.attributes.forget(&output.removed);
        self.metrics
            .set_timing(&self.metrics.rules_time_us, t1.elapsed().as_micros() as u64);
        self.metrics
            .add(&self.metrics.match_signals, signals.len() as u64);

        // 4. Incident lifecycle
        let tracker = &self.tracker;
        let events = self
            .lifecycle
            .process(frame_index, timestamp_ms, &signals, |id| tracker.state_of(id));
        self.count_transitions();

        let mut summary = FrameSummary {
            frame_index,
            live_tracks,
            signals: signals.len(),
            matched: signals.iter().filter(|s| s.matched).count(),
            ..FrameSummary::default()
        };

        // 5. Side effects; sessions open before this frame is pushed
        for event in events {
            match event {
                LifecycleEvent::Confirmed(incident) => {
                    summary.confirmed += 1;
                    let Some(rule) = self.rules.get(&incident.rule_id) else {
                        continue;
                    };
                    let mut snapshot = None;
                    let mut clip_start = None;
                    let mut truncated = false;
                    if let Some(recorder) = self.recorder.as_mut().filter(|_| rule.record) {
                        let start = recorder.open_session(
                            &incident.event_id,
                            &incident.rule_id,
                            incident.track_ids.iter().copied().collect(),
                            incident.tentative_at.frame_index,
                            frame_index,
                        );
                        debug!(
                            "Incident {}: clip wanted from frame {}, starts at {}",
                            incident.event_id, start.desired_start, start.start_frame
                        );
                        clip_start = Some(start.start_frame);
                        truncated = start.truncated;
                        snapshot = start.snapshot;
                    }
                    let snapshot_frame = snapshot.as_ref().map(|f| f.index);
                    if let Some(f) = snapshot_frame {
                        self.snapshots.insert(incident.event_id.clone(), f);
                    }
                    self.bus.publish(PipelineEvent::IncidentConfirmed {
                        payload: IncidentPayload::new(&incident, rule, snapshot_frame),
                        snapshot,
                        clip_start,
                        truncated,
                    });
                }
                LifecycleEvent::Resolved(incident) => {
                    summary.resolved += 1;
                    if let Some(recorder) = self.recorder.as_mut() {
                        recorder.mark_resolved(&incident.event_id);
                    }
                    let Some(rule) = self.rules.get(&incident.rule_id) else {
                        continue;
                    };
                    let snapshot_frame = self.snapshots.remove(&incident.event_id);
                    self.bus.publish(PipelineEvent::IncidentResolved {
                        payload: IncidentPayload::new(&incident, rule, snapshot_frame),
                    });
                }
            }
        }

        // 6. Recording
        if let Some(recorder) = self.recorder.as_mut() {
            let finished = recorder.push(frame);
            for clip in finished {
                self.submit_clip(clip, frame_index);
            }
        }
        self.collect_outcomes(frame_index);

        self.metrics.inc(&self.metrics.frames_processed);
        self.metrics
            .set_timing(&self.metrics.frame_time_us, frame_start.elapsed().as_micros() as u64);

        if self.diagnostics_interval > 0 && frame_index % self.diagnostics_interval == 0 {
            let stats = self.tracker.stats();
            info!(
                "Frame {}: {} live track(s), {} created, {} removed | {} counter(s), {}/{} signal(s) matched | {} open incident(s), {} closed | {} recording(s) open",
                frame_index,
                summary.live_tracks,
                stats.tracks_created,
                stats.tracks_removed,
                self.engine.counter_count(),
                summary.matched,
                summary.signals,
                self.lifecycle.open_incidents().count(),
                self.lifecycle.closed_incidents().len(),
                self.recorder.as_ref().map_or(0, |r| r.open_sessions()),
            );
        }

        Ok(summary)
    }

    /// Finalize or drop every open recording, then wait for the writer.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> ShutdownSummary {
        let mut summary = ShutdownSummary::default();
        let last_frame = self
            .transitions()
            .last()
            .map(|t| t.frame_index)
            .unwrap_or(0);

        if let Some(recorder) = self.recorder.as_mut() {
            let report = recorder.shutdown(mode);
            summary.flushed = report.flushed.len();
            summary.discarded = report.discarded.len();
            for clip in report.flushed {
                self.submit_clip(clip, last_frame);
            }
            for event_id in report.discarded {
                self.lifecycle
                    .record_evidence(&event_id, last_frame, Evidence::RecordingDiscarded);
                self.bus
                    .publish(PipelineEvent::RecordingDiscarded { event_id });
            }
        }

        let outcomes = match self.writer.as_mut() {
            Some(writer) => writer.finish(),
            None => Vec::new(),
        };
        for outcome in outcomes {
            match &outcome {
                RecordingOutcome::Written { .. } => summary.clips_written += 1,
                RecordingOutcome::Failed { .. } => summary.recording_failures += 1,
            }
            self.handle_outcome(outcome, last_frame);
        }
        info!(
            "Pipeline shutdown ({:?}): {} flushed, {} discarded, {} written, {} failed",
            mode, summary.flushed, summary.discarded, summary.clips_written, summary.recording_failures
        );
        summary
    }

    fn submit_clip(&mut self, clip: FinishedClip, frame_index: u64) {
        let event_id = clip.record.event_id.clone();
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        if let Err(e) = writer.submit(clip) {
            error!("Clip {} could not be queued: {}", event_id, e);
            self.handle_outcome(
                RecordingOutcome::Failed {
                    event_id,
                    attempts: 0,
                    reason: e.to_string(),
                    end_frame: frame_index,
                },
                frame_index,
            );
        }
    }

    fn collect_outcomes(&mut self, frame_index: u64) {
        let outcomes = match self.writer.as_mut() {
            Some(writer) => writer.poll_outcomes(),
            None => return,
        };
        for outcome in outcomes {
            self.handle_outcome(outcome, frame_index);
        }
    }

    fn handle_outcome(&mut self, outcome: RecordingOutcome, frame_index: u64) {
        match outcome {
            RecordingOutcome::Written {
                event_id,
                location,
                frames,
                truncated,
                capped,
                interrupted,
                ..
            } => {
                self.metrics.inc(&self.metrics.clips_written);
                self.lifecycle.record_evidence(
                    &event_id,
                    frame_index,
                    Evidence::ClipWritten {
                        location: location.clone(),
                        frames,
                        truncated,
                        capped,
                        interrupted,
                    },
                );
                self.bus.publish(PipelineEvent::ClipWritten {
                    event_id,
                    location,
                    frames,
                    truncated,
                });
            }
            RecordingOutcome::Failed {
                event_id,
                attempts,
                reason,
                ..
            } => {
                self.metrics.inc(&self.metrics.recording_failures);
                self.lifecycle.record_evidence(
                    &event_id,
                    frame_index,
                    Evidence::RecordingFailed {
                        attempts,
                        reason: reason.clone(),
                    },
                );
                self.bus.publish(PipelineEvent::RecordingFailed {
                    event_id,
                    attempts,
                    reason,
                });
            }
        }
    }

    fn count_transitions(&mut self) {
        let log = self.lifecycle.transitions();
        for record in &log[self.log_cursor..] {
            let counter = match record.kind {
                TransitionKind::Opened => &self.metrics.incidents_opened,
                TransitionKind::Confirmed => &self.metrics.incidents_confirmed,
                TransitionKind::Resolved => &self.metrics.incidents_resolved,
                TransitionKind::Discarded => &self.metrics.incidents_discarded,
            };
            self.metrics.inc(counter);
        }
        self.log_cursor = log.len();
    }

    pub fn drain_events(&mut self) -> Vec<PipelineEvent> {
        self.bus.drain()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        self.lifecycle.transitions()
    }

    pub fn lifecycle(&self) -> &EventLifecycleManager {
        &self.lifecycle
    }
}

// ============================================================================
// TESTS
// ============================================================================

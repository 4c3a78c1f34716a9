// src/pipeline/event_bus.rs
//
// Decoupled event system. The frame loop publishes what happened; the
// binary drains the bus after every frame and feeds notifiers and logs.

use crate::incidents::IncidentPayload;
use crate::recording::SharedFrame;
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    IncidentConfirmed {
        payload: IncidentPayload,
        snapshot: Option<SharedFrame>,
        /// First frame of the clip, when a recording was opened
        clip_start: Option<u64>,
        truncated: bool,
    },

    IncidentResolved {
        payload: IncidentPayload,
    },

    ClipWritten {
        event_id: String,
        location: String,
        frames: usize,
        truncated: bool,
    },

    RecordingFailed {
        event_id: String,
        attempts: u32,
        reason: String,
    },

    RecordingDiscarded {
        event_id: String,
    },

    StaleDetections {
        batch_frame: u64,
        frame_index: u64,
        staleness: u64,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IncidentConfirmed { .. } => "incident_confirmed",
            Self::IncidentResolved { .. } => "incident_resolved",
            Self::ClipWritten { .. } => "clip_written",
            Self::RecordingFailed { .. } => "recording_failed",
            Self::RecordingDiscarded { .. } => "recording_discarded",
            Self::StaleDetections { .. } => "stale_detections",
        }
    }
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        let max_pending = max_pending.max(1);
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_bus_drops_oldest() {
        let mut bus = EventBus::new(2);
        for id in ["a", "b", "c"] {
            bus.publish(PipelineEvent::RecordingDiscarded {
                event_id: id.into(),
            });
        }
        let ids: Vec<String> = bus
            .drain()
            .into_iter()
            .map(|e| match e {
                PipelineEvent::RecordingDiscarded { event_id } => event_id,
                other => panic!("unexpected {}", other.kind()),
            })
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(bus.drain().is_empty(), "drain empties the bus");
    }
}

// src/incidents/model.rs
//
// Incident records, the append-only decision log and evidence ledger entries,
// and the payload handed to notification channels.

use crate::rules::{Rule, RuleId, Severity};
use crate::tracking::TrackId;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentState {
    Tentative,
    Confirmed,
    Resolved,
}

impl IncidentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tentative => "TENTATIVE",
            Self::Confirmed => "CONFIRMED",
            Self::Resolved => "RESOLVED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    /// No match for `resolve_cooldown_frames` consecutive frames
    Cooldown,
    /// Every involved track is Lost or Removed
    TracksLost,
    /// Tentative incident whose persistence reset, kept because the rule asks for it
    Unconfirmed,
}

impl ResolutionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cooldown => "COOLDOWN",
            Self::TracksLost => "TRACKS_LOST",
            Self::Unconfirmed => "UNCONFIRMED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stamp {
    pub frame_index: u64,
    pub timestamp_ms: f64,
}

impl Stamp {
    pub fn new(frame_index: u64, timestamp_ms: f64) -> Self {
        Self {
            frame_index,
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub event_id: String,
    pub rule_id: RuleId,
    /// Subject track the rule fired for
    pub track_id: TrackId,
    /// Subject plus every partner seen while the incident was open
    pub track_ids: BTreeSet<TrackId>,
    pub state: IncidentState,
    pub tentative_at: Stamp,
    pub confirmed_at: Option<Stamp>,
    pub resolved_at: Option<Stamp>,
    pub last_matched: Stamp,
    pub peak_persistence: u32,
    pub resolution: Option<ResolutionReason>,
    #[serde(skip)]
    pub(crate) unmatched_streak: u32,
}

impl Incident {
    pub fn duration_ms(&self) -> f64 {
        let end = self.resolved_at.unwrap_or(self.last_matched);
        (end.timestamp_ms - self.tentative_at.timestamp_ms).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Opened,
    Confirmed,
    Resolved,
    /// Tentative incident dropped without a record
    Discarded,
}

/// One line of the decision log. Never rewritten once appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub seq: u64,
    pub frame_index: u64,
    pub timestamp_ms: f64,
    pub event_id: String,
    pub rule_id: RuleId,
    pub track_id: TrackId,
    pub from: Option<IncidentState>,
    pub kind: TransitionKind,
    pub persistence: u32,
    pub reason: Option<ResolutionReason>,
}

/// Facts about an incident's recording, appended as they arrive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "fact", rename_all = "snake_case")]
pub enum Evidence {
    ClipWritten {
        location: String,
        frames: usize,
        truncated: bool,
        capped: bool,
        interrupted: bool,
    },
    RecordingFailed {
        attempts: u32,
        reason: String,
    },
    RecordingDiscarded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceEntry {
    pub event_id: String,
    pub frame_index: u64,
    #[serde(flatten)]
    pub evidence: Evidence,
}

/// Side effects of one `process` call, for the pipeline to act on.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Confirmed(Incident),
    Resolved(Incident),
}

/// What notification channels receive on Confirmed and again on Resolved.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentPayload {
    pub event_id: String,
    pub rule_id: RuleId,
    pub description: String,
    pub severity: Severity,
    pub area: Option<String>,
    pub track_ids: Vec<TrackId>,
    pub state: IncidentState,
    /// Frame chosen as the representative snapshot, if any was buffered
    pub snapshot_frame: Option<u64>,
    pub tentative_ms: f64,
    pub confirmed_ms: Option<f64>,
    pub resolved_ms: Option<f64>,
    pub resolution: Option<ResolutionReason>,
    pub peak_persistence: u32,
}

impl IncidentPayload {
    pub fn new(incident: &Incident, rule: &Rule, snapshot_frame: Option<u64>) -> Self {
        Self {
            event_id: incident.event_id.clone(),
            rule_id: incident.rule_id.clone(),
            description: rule.description.clone(),
            severity: rule.severity,
            area: rule.area.clone(),
            track_ids: incident.track_ids.iter().copied().collect(),
            state: incident.state,
            snapshot_frame,
            tentative_ms: incident.tentative_at.timestamp_ms,
            confirmed_ms: incident.confirmed_at.map(|s| s.timestamp_ms),
            resolved_ms: incident.resolved_at.map(|s| s.timestamp_ms),
            resolution: incident.resolution,
            peak_persistence: incident.peak_persistence,
        }
    }

    pub fn headline(&self) -> String {
        let what = if self.description.is_empty() {
            self.rule_id.as_str()
        } else {
            self.description.as_str()
        };
        format!(
            "[{}] {} {} (tracks {:?})",
            self.severity.as_str(),
            self.state.as_str(),
            what,
            self.track_ids
        )
    }
}

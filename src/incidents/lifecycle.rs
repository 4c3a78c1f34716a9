// src/incidents/lifecycle.rs
//
// INCIDENT STATE MACHINE
//
// One open incident per (rule, subject track):
//
//   none ──matched──► TENTATIVE ──persistence ≥ confirm──► CONFIRMED
//                        │                                     │
//                        └─reset─► discarded                   └─cooldown / tracks lost─► RESOLVED
//
// Signals are consumed in the order the engine emits them (rules in load
// order, tracks by id); the end-of-frame sweep walks open incidents by key.
// Every transition lands in the decision log before its side effect is
// returned, and nothing in the log is ever edited.

use super::model::{
    Evidence, EvidenceEntry, Incident, IncidentState, LifecycleEvent, ResolutionReason, Stamp,
    TransitionKind, TransitionRecord,
};
use crate::rules::{MatchSignal, Rule, RuleId, Thresholds};
use crate::tracking::{TrackId, TrackState};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

type IncidentKey = (RuleId, TrackId);

pub struct EventLifecycleManager {
    thresholds: HashMap<RuleId, Thresholds>,
    open: BTreeMap<IncidentKey, Incident>,
    closed: Vec<Incident>,
    log: Vec<TransitionRecord>,
    evidence: Vec<EvidenceEntry>,
    next_event: u64,
}

impl EventLifecycleManager {
    pub fn new(rules: &[Rule]) -> Self {
        Self {
            thresholds: rules
                .iter()
                .map(|r| (r.rule_id.clone(), r.thresholds))
                .collect(),
            open: BTreeMap::new(),
            closed: Vec::new(),
            log: Vec::new(),
            evidence: Vec::new(),
            next_event: 1,
        }
    }

    /// Apply one frame of signals. `state_of` reports the tracker's view of
    /// a track; unknown ids must map to `Removed`.
    pub fn process<F>(
        &mut self,
        frame_index: u64,
        timestamp_ms: f64,
        signals: &[MatchSignal],
        state_of: F,
    ) -> Vec<LifecycleEvent>
    where
        F: Fn(TrackId) -> TrackState,
    {
        let now = Stamp::new(frame_index, timestamp_ms);
        let mut events = Vec::new();
        // Keys whose predicate held this frame, matched or still rebuilding
        // persistence after a reset. The sweep leaves them alone.
        let mut held_now: BTreeSet<IncidentKey> = BTreeSet::new();

        for signal in signals {
            let Some(thresholds) = self.thresholds.get(&signal.rule_id).copied() else {
                warn!("Signal for unknown rule {}, ignoring", signal.rule_id);
                continue;
            };
            let key = (signal.rule_id.clone(), signal.track_id);

            if signal.holds {
                held_now.insert(key.clone());
                if let Some(incident) = self.open.get_mut(&key) {
                    incident.unmatched_streak = 0;
                }
            }

            if signal.matched {
                if !self.open.contains_key(&key) {
                    if signal.persistence_count < thresholds.tentative_frames {
                        continue;
                    }
                    self.open_incident(key.clone(), signal, now);
                }
                let confirm = match self.open.get_mut(&key) {
                    Some(incident) => {
                        incident.last_matched = now;
                        incident.unmatched_streak = 0;
                        incident.track_ids.extend(signal.track_ids.iter().copied());
                        incident.peak_persistence =
                            incident.peak_persistence.max(signal.persistence_count);
                        incident.state == IncidentState::Tentative
                            && signal.persistence_count >= thresholds.confirm_frames
                    }
                    None => false,
                };
                if confirm {
                    if let Some(ev) = self.confirm(&key, now, signal.persistence_count) {
                        events.push(ev);
                    }
                }
            } else if signal.persistence_count == 0 {
                let tentative = self
                    .open
                    .get(&key)
                    .is_some_and(|i| i.state == IncidentState::Tentative);
                if tentative {
                    if thresholds.allow_unconfirmed_resolution {
                        events.extend(self.resolve(&key, now, ResolutionReason::Unconfirmed));
                    } else {
                        self.discard(&key, now);
                    }
                }
            }
        }

        self.sweep(now, &held_now, &state_of, &mut events);
        events
    }

    /// End-of-frame pass over every open incident whose predicate did not
    /// hold this frame. Only those frames count toward the cooldown.
    fn sweep<F>(
        &mut self,
        now: Stamp,
        held_now: &BTreeSet<IncidentKey>,
        state_of: &F,
        events: &mut Vec<LifecycleEvent>,
    ) where
        F: Fn(TrackId) -> TrackState,
    {
        let keys: Vec<IncidentKey> = self
            .open
            .keys()
            .filter(|k| !held_now.contains(*k))
            .cloned()
            .collect();

        for key in keys {
            let Some(incident) = self.open.get_mut(&key) else {
                continue;
            };
            let all_gone = incident
                .track_ids
                .iter()
                .all(|&id| matches!(state_of(id), TrackState::Lost | TrackState::Removed));
            let cooldown = self
                .thresholds
                .get(&key.0)
                .map(|t| t.resolve_cooldown_frames)
                .unwrap_or(u32::MAX);
            let allow_unconfirmed = self
                .thresholds
                .get(&key.0)
                .is_some_and(|t| t.allow_unconfirmed_resolution);

            match incident.state {
                IncidentState::Confirmed => {
                    incident.unmatched_streak += 1;
                    if all_gone {
                        events.extend(self.resolve(&key, now, ResolutionReason::TracksLost));
                    } else if incident.unmatched_streak >= cooldown {
                        events.extend(self.resolve(&key, now, ResolutionReason::Cooldown));
                    }
                }
                IncidentState::Tentative if all_gone => {
                    if allow_unconfirmed {
                        events.extend(self.resolve(&key, now, ResolutionReason::Unconfirmed));
                    } else {
                        self.discard(&key, now);
                    }
                }
                _ => {}
            }
        }
    }

    fn open_incident(&mut self, key: IncidentKey, signal: &MatchSignal, now: Stamp) {
        let event_id = format!("evt-{:06}-{}-t{}", self.next_event, signal.rule_id, signal.track_id);
        self.next_event += 1;
        let incident = Incident {
            event_id,
            rule_id: signal.rule_id.clone(),
            track_id: signal.track_id,
            track_ids: signal.track_ids.iter().copied().collect(),
            state: IncidentState::Tentative,
            tentative_at: now,
            confirmed_at: None,
            resolved_at: None,
            last_matched: now,
            peak_persistence: signal.persistence_count,
            resolution: None,
            unmatched_streak: 0,
        };
        debug!(
            "Incident {} TENTATIVE at frame {} (persistence {})",
            incident.event_id, now.frame_index, signal.persistence_count
        );
        self.append(&incident, now, None, TransitionKind::Opened, signal.persistence_count);
        self.open.insert(key, incident);
    }

    fn confirm(&mut self, key: &IncidentKey, now: Stamp, persistence: u32) -> Option<LifecycleEvent> {
        let incident = self.open.get_mut(key)?;
        incident.state = IncidentState::Confirmed;
        incident.confirmed_at = Some(now);
        let snapshot = incident.clone();
        info!(
            "Incident {} CONFIRMED: rule {} track {} at frame {}",
            snapshot.event_id, snapshot.rule_id, snapshot.track_id, now.frame_index
        );
        self.append(
            &snapshot,
            now,
            Some(IncidentState::Tentative),
            TransitionKind::Confirmed,
            persistence,
        );
        Some(LifecycleEvent::Confirmed(snapshot))
    }

    fn resolve(&mut self, key: &IncidentKey, now: Stamp, reason: ResolutionReason) -> Option<LifecycleEvent> {
        let mut incident = self.open.remove(key)?;
        let from = incident.state;
        incident.state = IncidentState::Resolved;
        incident.resolved_at = Some(now);
        incident.resolution = Some(reason);
        info!(
            "Incident {} RESOLVED ({}) after {:.1}s",
            incident.event_id,
            reason.as_str(),
            incident.duration_ms() / 1000.0
        );
        self.append(
            &incident,
            now,
            Some(from),
            TransitionKind::Resolved,
            incident.peak_persistence,
        );
        self.closed.push(incident.clone());
        Some(LifecycleEvent::Resolved(incident))
    }

    fn discard(&mut self, key: &IncidentKey, now: Stamp) {
        if let Some(incident) = self.open.remove(key) {
            debug!(
                "Incident {} discarded before confirmation at frame {}",
                incident.event_id, now.frame_index
            );
            self.append(
                &incident,
                now,
                Some(IncidentState::Tentative),
                TransitionKind::Discarded,
                0,
            );
        }
    }

    fn append(
        &mut self,
        incident: &Incident,
        now: Stamp,
        from: Option<IncidentState>,
        kind: TransitionKind,
        persistence: u32,
    ) {
        self.log.push(TransitionRecord {
            seq: self.log.len() as u64,
            frame_index: now.frame_index,
            timestamp_ms: now.timestamp_ms,
            event_id: incident.event_id.clone(),
            rule_id: incident.rule_id.clone(),
            track_id: incident.track_id,
            from,
            kind,
            persistence,
            reason: incident.resolution,
        });
    }

    /// Append a recording fact. Incident state is never touched.
    pub fn record_evidence(&mut self, event_id: &str, frame_index: u64, evidence: Evidence) {
        if self.incident(event_id).is_none() {
            warn!("Evidence for unknown incident {}", event_id);
        }
        if let Evidence::RecordingFailed { attempts, reason } = &evidence {
            warn!(
                "Incident {}: recording_failed after {} attempt(s): {}",
                event_id, attempts, reason
            );
        }
        self.evidence.push(EvidenceEntry {
            event_id: event_id.to_string(),
            frame_index,
            evidence,
        });
    }

    pub fn incident(&self, event_id: &str) -> Option<&Incident> {
        self.open
            .values()
            .find(|i| i.event_id == event_id)
            .or_else(|| self.closed.iter().find(|i| i.event_id == event_id))
    }

    #[cfg(test)]
    pub fn open_incident_for(&self, rule_id: &str, track_id: TrackId) -> Option<&Incident> {
        self.open.get(&(rule_id.to_string(), track_id))
    }

    pub fn open_incidents(&self) -> impl Iterator<Item = &Incident> {
        self.open.values()
    }

    pub fn closed_incidents(&self) -> &[Incident] {
        &self.closed
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.log
    }

    pub fn evidence(&self) -> &[EvidenceEntry] {
        &self.evidence
    }

    #[cfg(test)]
    pub fn evidence_for<'a>(&'a self, event_id: &'a str) -> impl Iterator<Item = &'a Evidence> + 'a {
        self.evidence
            .iter()
            .filter(move |e| e.event_id == event_id)
            .map(|e| &e.evidence)
    }
}

// ============================================================================
// TESTS
// ============================================================================

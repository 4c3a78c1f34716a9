// src/rules/engine.rs
//
// Evaluates every rule against every live track each frame and keeps one
// persistence counter per (rule, track). The counter is what debounces a
// predicate into a match signal; the lifecycle manager decides what the
// signal means for incidents.

use super::attributes::AttributeTable;
use super::model::{Predicate, Relation, ResetPolicy, Rule, RuleId};
use crate::geometry::{coverage, iou};
use crate::tracking::{Track, TrackId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Outcome of one rule for one subject track on one frame.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct MatchSignal {
    pub rule_id: RuleId,
    /// Subject track the counter belongs to
    pub track_id: TrackId,
    /// Subject first, then partners of pairwise relations in id order
    pub track_ids: Vec<TrackId>,
    /// Predicate held this frame, whatever the counter says
    pub holds: bool,
    /// Predicate held this frame and the counter reached the tentative threshold
    pub matched: bool,
    pub persistence_count: u32,
    pub frame_index: u64,
}

#[derive(Debug, Clone, Default)]
struct Counter {
    count: u32,
    gap: u32,
    partners: BTreeSet<TrackId>,
}

#[derive(Debug, Default)]
struct Eval {
    holds: bool,
    partners: BTreeSet<TrackId>,
}

impl Eval {
    fn with(holds: bool) -> Self {
        Self {
            holds,
            partners: BTreeSet::new(),
        }
    }
}

pub struct RuleEngine {
    rules: Vec<Rule>,
    /// (rule index, subject track) -> counter
    counters: BTreeMap<(usize, TrackId), Counter>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            counters: BTreeMap::new(),
        }
    }

    /// One signal per counter entry, in rule order then track id order.
    /// An entry that resets emits a final signal with `persistence_count == 0`
    /// and is dropped.
    pub fn evaluate(
        &mut self,
        tracks: &[&Track],
        attributes: &AttributeTable,
        frame_index: u64,
    ) -> Vec<MatchSignal> {
        let mut live: Vec<&Track> = tracks.iter().copied().filter(|t| t.state.is_live()).collect();
        live.sort_by_key(|t| t.id);

        let mut signals = Vec::new();
        for (ri, rule) in self.rules.iter().enumerate() {
            let mut holding: BTreeMap<TrackId, BTreeSet<TrackId>> = BTreeMap::new();
            for subject in &live {
                let ev = eval(&rule.predicate, subject, &live, attributes);
                if ev.holds {
                    holding.insert(subject.id, ev.partners);
                }
            }

            let mut subjects: BTreeSet<TrackId> = self
                .counters
                .range((ri, TrackId::MIN)..=(ri, TrackId::MAX))
                .map(|(&(_, tid), _)| tid)
                .collect();
            subjects.extend(holding.keys().copied());

            for tid in subjects {
                let counter = self.counters.entry((ri, tid)).or_default();
                let holds = match holding.remove(&tid) {
                    Some(partners) => {
                        counter.count += 1;
                        counter.gap = 0;
                        counter.partners = partners;
                        true
                    }
                    None => {
                        match rule.thresholds.reset {
                            ResetPolicy::Instant => counter.count = 0,
                            ResetPolicy::GapTolerant { max_gap_frames } => {
                                counter.gap += 1;
                                if counter.gap > max_gap_frames {
                                    counter.count = 0;
                                }
                            }
                        }
                        false
                    }
                };

                let mut track_ids = Vec::with_capacity(1 + counter.partners.len());
                track_ids.push(tid);
                track_ids.extend(counter.partners.iter().copied().filter(|&p| p != tid));

                let signal = MatchSignal {
                    rule_id: rule.rule_id.clone(),
                    track_id: tid,
                    track_ids,
                    holds,
                    matched: holds && counter.count >= rule.thresholds.tentative_frames,
                    persistence_count: counter.count,
                    frame_index,
                };
                if counter.count == 0 {
                    debug!("Rule {} track {} persistence reset", rule.rule_id, tid);
                    self.counters.remove(&(ri, tid));
                }
                signals.push(signal);
            }
        }
        signals
    }

    /// Drop every counter that belongs to a removed track.
    pub fn forget_tracks(&mut self, removed: &[TrackId]) {
        if removed.is_empty() {
            return;
        }
        self.counters.retain(|&(_, tid), _| !removed.contains(&tid));
    }

    #[cfg(test)]
    pub fn persistence(&self, rule_id: &str, track_id: TrackId) -> u32 {
        self.rules
            .iter()
            .position(|r| r.rule_id == rule_id)
            .and_then(|ri| self.counters.get(&(ri, track_id)))
            .map(|c| c.count)
            .unwrap_or(0)
    }

    /// Live persistence counters across all rules.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }
}

fn eval(pred: &Predicate, subject: &Track, live: &[&Track], attrs: &AttributeTable) -> Eval {
    match pred {
        Predicate::Class(labels) => Eval::with(
            labels
                .iter()
                .any(|l| l.eq_ignore_ascii_case(&subject.class_label)),
        ),
        Predicate::Zone {
            polygon, anchor, ..
        } => Eval::with(polygon.contains(subject.bbox.anchor(*anchor))),
        Predicate::Attribute { name, expected } => {
            let present =
                subject.attributes.contains(name.as_str()) || attrs.has(subject.id, name);
            Eval::with(present == *expected)
        }
        Predicate::MinConfidence(min) => Eval::with(subject.confidence >= *min),
        Predicate::Pair {
            partner,
            relation,
            anchor,
        } => {
            let mut out = Eval::default();
            for other in live.iter().filter(|o| o.id != subject.id) {
                if !relation_holds(relation, *anchor, subject, other) {
                    continue;
                }
                if eval(partner, other, live, attrs).holds {
                    out.partners.insert(other.id);
                }
            }
            out.holds = !out.partners.is_empty();
            out
        }
        Predicate::And(children) => {
            let mut out = Eval::with(true);
            for child in children {
                let ev = eval(child, subject, live, attrs);
                if !ev.holds {
                    return Eval::with(false);
                }
                out.partners.extend(ev.partners);
            }
            out
        }
        Predicate::Or(children) => {
            let mut out = Eval::default();
            for child in children {
                let ev = eval(child, subject, live, attrs);
                if ev.holds {
                    out.holds = true;
                    out.partners.extend(ev.partners);
                }
            }
            out
        }
        Predicate::Not(child) => Eval::with(!eval(child, subject, live, attrs).holds),
    }
}

fn relation_holds(relation: &Relation, anchor: crate::geometry::Anchor, a: &Track, b: &Track) -> bool {
    match *relation {
        Relation::Near { max_distance } => {
            a.bbox.anchor(anchor).distance(&b.bbox.anchor(anchor)) <= max_distance
        }
        Relation::Overlaps { min_iou } => iou(&a.bbox, &b.bbox) >= min_iou,
        Relation::Inside { min_coverage } => coverage(&a.bbox, &b.bbox) >= min_coverage,
    }
}

// ============================================================================
// TESTS
// ============================================================================

// src/rules/attributes.rs
//
// Attributes derived by composing tracks, for detectors that report protective
// equipment as separate objects rather than as a property of the person.
//
// A person's head region (top slice of the box) is compared against every
// equipment track; the raw per-frame verdict is smoothed by a majority vote
// over a short window and only published when the vote is clear enough.
// Only tracks matched on the current frame vote; predicted boxes between
// detector cycles carry no evidence either way.

use crate::geometry::iou;
use crate::tracking::{Track, TrackId};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompositionConfig {
    pub enabled: bool,
    /// Exact class labels (case-insensitive) of the tracks that receive the attribute
    pub subject_classes: Vec<String>,
    /// Substrings identifying equipment class labels
    pub equipment_keywords: Vec<String>,
    /// Top share of the subject box treated as the head region
    pub head_ratio: f32,
    /// IoU between head region and equipment box counted as "wearing"
    pub min_iou: f32,
    pub min_equipment_confidence: f32,
    /// Majority vote window in frames
    pub window: usize,
    /// Share of the window the majority needs before anything is published
    pub min_agreement: f32,
    pub present_attribute: String,
    pub absent_attribute: String,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            subject_classes: vec!["person".into(), "worker".into(), "human".into()],
            equipment_keywords: vec!["helmet".into(), "hard hat".into(), "hardhat".into()],
            head_ratio: 0.40,
            min_iou: 0.15,
            min_equipment_confidence: 0.28,
            window: 5,
            min_agreement: 0.6,
            present_attribute: "helmet".into(),
            absent_attribute: "no-helmet".into(),
        }
    }
}

/// Per-track attributes that do not come straight from a detection.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    entries: HashMap<TrackId, BTreeSet<String>>,
}

impl AttributeTable {
    pub fn has(&self, track_id: TrackId, name: &str) -> bool {
        self.entries
            .get(&track_id)
            .is_some_and(|set| set.contains(name))
    }

    pub fn get(&self, track_id: TrackId) -> Option<&BTreeSet<String>> {
        self.entries.get(&track_id)
    }

    fn replace(&mut self, track_id: TrackId, attrs: BTreeSet<String>) {
        if attrs.is_empty() {
            self.entries.remove(&track_id);
        } else {
            self.entries.insert(track_id, attrs);
        }
    }

    pub fn forget(&mut self, removed: &[TrackId]) {
        for id in removed {
            self.entries.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct AttributeDeriver {
    config: CompositionConfig,
    votes: HashMap<TrackId, VecDeque<bool>>,
    table: AttributeTable,
}

impl AttributeDeriver {
    pub fn new(config: CompositionConfig) -> Self {
        Self {
            config,
            votes: HashMap::new(),
            table: AttributeTable::default(),
        }
    }

    pub fn table(&self) -> &AttributeTable {
        &self.table
    }

    /// Vote once per freshly observed subject track and refresh the table.
    pub fn update(&mut self, tracks: &[&Track]) -> &AttributeTable {
        if !self.config.enabled {
            return &self.table;
        }
        let equipment: Vec<&Track> = tracks
            .iter()
            .copied()
            .filter(|t| t.state.is_live() && t.miss_count == 0)
            .filter(|t| t.confidence >= self.config.min_equipment_confidence)
            .filter(|t| self.is_equipment(&t.class_label))
            .collect();

        for subject in tracks
            .iter()
            .filter(|t| t.state.is_live() && t.miss_count == 0)
        {
            if !self.is_subject(&subject.class_label) {
                continue;
            }
            let head = subject.bbox.top_fraction(self.config.head_ratio);
            let best = equipment
                .iter()
                .map(|e| iou(&head, &e.bbox))
                .fold(0.0_f32, f32::max);
            let wearing = best >= self.config.min_iou;

            let window = self.config.window.max(1);
            let votes = self.votes.entry(subject.id).or_default();
            votes.push_back(wearing);
            while votes.len() > window {
                votes.pop_front();
            }
            let yes = votes.iter().filter(|&&v| v).count();
            let no = votes.len() - yes;
            let (majority, count) = if yes >= no { (true, yes) } else { (false, no) };
            let agreement = count as f32 / votes.len() as f32;

            let mut attrs = BTreeSet::new();
            if agreement >= self.config.min_agreement {
                attrs.insert(if majority {
                    self.config.present_attribute.clone()
                } else {
                    self.config.absent_attribute.clone()
                });
            }
            debug!(
                "Track {} head check: best_iou={:.2}, votes {}/{}, published={:?}",
                subject.id,
                best,
                yes,
                votes.len(),
                attrs
            );
            self.table.replace(subject.id, attrs);
        }
        &self.table
    }

    pub fn forget(&mut self, removed: &[TrackId]) {
        for id in removed {
            self.votes.remove(id);
        }
        self.table.forget(removed);
    }

    fn is_subject(&self, label: &str) -> bool {
        self.config
            .subject_classes
            .iter()
            .any(|c| c.eq_ignore_ascii_case(label))
    }

    fn is_equipment(&self, label: &str) -> bool {
        let label = label.to_lowercase();
        self.config
            .equipment_keywords
            .iter()
            .any(|k| label.contains(&k.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::geometry::BBox;
    use crate::tracking::{Tracker, TrackerConfig};

    fn enabled() -> CompositionConfig {
        CompositionConfig {
            enabled: true,
            ..CompositionConfig::default()
        }
    }

    fn person() -> Detection {
        Detection::new(BBox::new(100.0, 100.0, 140.0, 200.0), 0.9, "person")
    }

    fn helmet() -> Detection {
        // Sits on the top of the person box
        Detection::new(BBox::new(105.0, 95.0, 135.0, 125.0), 0.6, "yellow helmet")
    }

    #[test]
    fn test_helmet_detected_by_composition() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let mut deriver = AttributeDeriver::new(enabled());
        for f in 1..=3 {
            tracker.update(&[person(), helmet()], f, 0.0).unwrap();
            deriver.update(&tracker.tracks());
        }
        assert!(deriver.table().has(1, "helmet"));
        assert!(!deriver.table().has(1, "no-helmet"));
        assert!(deriver.table().get(2).is_none(), "equipment gets no attribute");
    }

    #[test]
    fn test_majority_vote_smooths_flicker() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let mut deriver = AttributeDeriver::new(enabled());
        // 4 frames without helmet, then a single frame with one
        for f in 1..=4 {
            tracker.update(&[person()], f, 0.0).unwrap();
            deriver.update(&tracker.tracks());
        }
        assert!(deriver.table().has(1, "no-helmet"));
        tracker.update(&[person(), helmet()], 5, 0.0).unwrap();
        deriver.update(&tracker.tracks());
        assert!(deriver.table().has(1, "no-helmet"), "one frame does not flip the vote");
    }

    #[test]
    fn test_split_vote_publishes_nothing() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let mut deriver = AttributeDeriver::new(CompositionConfig {
            window: 4,
            min_agreement: 0.75,
            ..enabled()
        });
        for f in 1..=4 {
            let dets = if f % 2 == 0 { vec![person(), helmet()] } else { vec![person()] };
            tracker.update(&dets, f, 0.0).unwrap();
            deriver.update(&tracker.tracks());
        }
        assert!(deriver.table().get(1).is_none());
    }

    #[test]
    fn test_disabled_and_forget() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(&[person()], 1, 0.0).unwrap();
        let mut off = AttributeDeriver::new(CompositionConfig::default());
        assert_eq!(off.update(&tracker.tracks()).len(), 0);

        let mut on = AttributeDeriver::new(enabled());
        on.update(&tracker.tracks());
        assert_eq!(on.table().len(), 1);
        on.forget(&[1]);
        assert_eq!(on.table().len(), 0);
    }
}

// src/detection/types.rs

use crate::geometry::BBox;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// One object reported by the detector for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub frame_index: u64,
    #[serde(default)]
    pub timestamp_ms: f64,
    pub bbox: BBox,
    pub confidence: f32,
    #[serde(alias = "class")]
    pub class_label: String,
    /// Attributes the detector already attached (e.g. `no-helmet`).
    #[serde(default)]
    pub attributes: BTreeSet<String>,
}

impl Detection {
    #[cfg(test)]
    pub fn new(bbox: BBox, confidence: f32, class_label: &str) -> Self {
        Self {
            frame_index: 0,
            timestamp_ms: 0.0,
            bbox,
            confidence,
            class_label: class_label.to_string(),
            attributes: BTreeSet::new(),
        }
    }

    #[cfg(test)]
    pub fn with_attribute(mut self, attribute: &str) -> Self {
        self.attributes.insert(attribute.to_string());
        self
    }

    /// Boxes must be finite with positive area and confidence must lie in [0, 1].
    pub fn is_well_formed(&self) -> bool {
        self.bbox.is_well_formed()
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Output of one detector cycle. `frame_index` is the frame the detector ran on,
/// which may be older than the frame the pipeline is processing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionBatch {
    pub frame_index: u64,
    pub timestamp_ms: f64,
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(frame_index: u64, timestamp_ms: f64, mut detections: Vec<Detection>) -> Self {
        for d in &mut detections {
            d.frame_index = frame_index;
            d.timestamp_ms = timestamp_ms;
        }
        Self {
            frame_index,
            timestamp_ms,
            detections,
        }
    }
}

/// Split detections into usable `(input index, detection)` pairs and a count
/// of discarded ones.
pub fn sanitize(detections: &[Detection], frame_index: u64) -> (Vec<(usize, &Detection)>, usize) {
    let mut kept = Vec::with_capacity(detections.len());
    let mut discarded = 0;
    for (i, d) in detections.iter().enumerate() {
        if d.is_well_formed() {
            kept.push((i, d));
        } else {
            discarded += 1;
        }
    }
    if discarded > 0 {
        warn!(
            "Frame {}: discarded {} malformed detection(s) of {}",
            frame_index,
            discarded,
            detections.len()
        );
    }
    (kept, discarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_counts_malformed() {
        let dets = vec![
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), 0.9, "person"),
            Detection::new(BBox::new(f32::NAN, 0.0, 10.0, 10.0), 0.9, "person"),
            Detection::new(BBox::new(10.0, 10.0, 10.0, 20.0), 0.9, "person"),
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), f32::NAN, "person"),
            Detection::new(BBox::new(0.0, 0.0, 10.0, 10.0), 1.5, "person"),
        ];
        let (kept, discarded) = sanitize(&dets, 7);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].0, 0);
        assert_eq!(discarded, 4);
    }

    #[test]
    fn test_batch_stamps_detections() {
        let batch = DetectionBatch::new(
            42,
            1400.0,
            vec![Detection::new(BBox::new(0.0, 0.0, 1.0, 1.0), 0.5, "forklift")],
        );
        assert_eq!(batch.detections[0].frame_index, 42);
        assert_eq!(batch.detections[0].timestamp_ms, 1400.0);
    }

    #[test]
    fn test_deserialize_with_class_alias() {
        let json = r#"{"bbox":[1,2,3,4],"confidence":0.7,"class":"person","attributes":["no-helmet"]}"#;
        let d: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(d.class_label, "person");
        assert!(d.attributes.contains("no-helmet"));
    }
}

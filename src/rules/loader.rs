// src/rules/loader.rs
//
// Rule documents (YAML, or JSON by extension) are deserialized into plain
// document structs and then compiled: zone references resolved, thresholds and
// relation parameters checked. Any structural problem rejects the whole
// document before a single frame is processed.

use super::model::{Predicate, Relation, Rule, Severity, Thresholds};
use crate::error::RuleError;
use crate::geometry::{Anchor, Point, Polygon};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

// ============================================================================
// DOCUMENT FORMAT
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub zones: Vec<ZoneDoc>,
    pub rules: Vec<RuleDoc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneDoc {
    pub id: String,
    #[serde(default)]
    pub polygon: Option<Vec<Point>>,
    /// Two opposite corners
    #[serde(default)]
    pub rectangle: Option<[Point; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDoc {
    pub rule_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    pub predicate: PredicateDoc,
    #[serde(default)]
    pub persistence: Thresholds,
    #[serde(default)]
    pub notify_channels: Vec<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default = "default_true")]
    pub record: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PredicateDoc {
    Class {
        labels: Vec<String>,
    },
    Zone {
        zone: String,
        #[serde(default)]
        anchor: Anchor,
    },
    Attribute {
        name: String,
        #[serde(default = "default_true")]
        expected: bool,
    },
    MinConfidence {
        min: f32,
    },
    Pair {
        partner: Box<PredicateDoc>,
        relation: RelationDoc,
        #[serde(default)]
        anchor: Anchor,
    },
    #[serde(alias = "all")]
    And {
        of: Vec<PredicateDoc>,
    },
    #[serde(alias = "any")]
    Or {
        of: Vec<PredicateDoc>,
    },
    Not {
        predicate: Box<PredicateDoc>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationDoc {
    Near { max_distance: f32 },
    Overlaps { min_iou: f32 },
    Inside { min_coverage: f32 },
}

fn default_true() -> bool {
    true
}

// ============================================================================
// RULE SET
// ============================================================================

#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    zones: BTreeMap<String, Polygon>,
}

impl RuleSet {
    pub fn load(path: &str) -> Result<Self, RuleError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RuleError::Parse(format!("cannot read {}: {}", path, e)))?;
        let is_json = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let set = if is_json {
            let doc: RuleDocument =
                serde_json::from_str(&contents).map_err(|e| RuleError::Parse(e.to_string()))?;
            Self::compile(doc)?
        } else {
            Self::from_yaml_str(&contents)?
        };
        info!("Loaded {} rule(s) and {} zone(s) from {}", set.rules.len(), set.zones.len(), path);
        Ok(set)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, RuleError> {
        let doc: RuleDocument =
            serde_yaml::from_str(contents).map_err(|e| RuleError::Parse(e.to_string()))?;
        Self::compile(doc)
    }

    pub fn compile(doc: RuleDocument) -> Result<Self, RuleError> {
        let mut zones = BTreeMap::new();
        for z in doc.zones {
            let polygon = compile_zone(&z)?;
            if zones.insert(z.id.clone(), polygon).is_some() {
                return Err(RuleError::DuplicateZone(z.id));
            }
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(doc.rules.len());
        for (index, entry) in doc.rules.into_iter().enumerate() {
            let rule_id = entry.rule_id.trim().to_string();
            if rule_id.is_empty() {
                return Err(RuleError::MissingId { index });
            }
            if !seen.insert(rule_id.clone()) {
                return Err(RuleError::DuplicateRule(rule_id));
            }
            check_thresholds(&rule_id, &entry.persistence)?;
            let predicate = compile_predicate(&rule_id, &entry.predicate, &zones)?;
            if !entry.enabled {
                warn!("Rule {} is disabled, skipping", rule_id);
                continue;
            }
            rules.push(Rule {
                rule_id,
                description: entry.description,
                severity: entry.severity,
                predicate,
                thresholds: entry.persistence,
                notify_channels: entry.notify_channels,
                area: entry.area,
                record: entry.record,
            });
        }
        if rules.is_empty() {
            return Err(RuleError::Empty);
        }
        Ok(Self { rules, zones })
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[cfg(test)]
    pub fn get(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    #[cfg(test)]
    pub fn zone(&self, id: &str) -> Option<&Polygon> {
        self.zones.get(id)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[cfg(test)]
    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
    }
}

fn compile_zone(z: &ZoneDoc) -> Result<Polygon, RuleError> {
    let invalid = |reason: &str| RuleError::InvalidZone {
        zone: z.id.clone(),
        reason: reason.to_string(),
    };
    let polygon = match (&z.polygon, &z.rectangle) {
        (Some(points), None) => {
            if points.len() < 3 {
                return Err(invalid("polygon needs at least 3 points"));
            }
            Polygon::new(points.clone())
        }
        (None, Some([a, b])) => Polygon::rectangle(*a, *b),
        (Some(_), Some(_)) => return Err(invalid("give either polygon or rectangle, not both")),
        (None, None) => return Err(invalid("missing polygon or rectangle")),
    };
    if polygon
        .vertices()
        .iter()
        .any(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return Err(invalid("non-finite coordinate"));
    }
    if polygon.doubled_area().abs() <= f32::EPSILON {
        return Err(invalid("zero area"));
    }
    Ok(polygon)
}

fn check_thresholds(rule_id: &str, t: &Thresholds) -> Result<(), RuleError> {
    let fail = |reason: String| {
        Err(RuleError::InvalidThresholds {
            rule_id: rule_id.to_string(),
            reason,
        })
    };
    if t.tentative_frames == 0 {
        return fail("tentative_frames must be at least 1".into());
    }
    if t.confirm_frames < t.tentative_frames {
        return fail(format!(
            "confirm_frames ({}) below tentative_frames ({})",
            t.confirm_frames, t.tentative_frames
        ));
    }
    if t.resolve_cooldown_frames == 0 {
        return fail("resolve_cooldown_frames must be at least 1".into());
    }
    Ok(())
}

fn compile_predicate(
    rule_id: &str,
    entry: &PredicateDoc,
    zones: &BTreeMap<String, Polygon>,
) -> Result<Predicate, RuleError> {
    let invalid = |reason: String| RuleError::InvalidPredicate {
        rule_id: rule_id.to_string(),
        reason,
    };
    let compiled = match entry {
        PredicateDoc::Class { labels } => {
            let labels: Vec<String> = labels
                .iter()
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect();
            if labels.is_empty() {
                return Err(invalid("class predicate without labels".into()));
            }
            Predicate::Class(labels)
        }
        PredicateDoc::Zone { zone, anchor } => {
            let polygon = zones.get(zone).ok_or_else(|| RuleError::UnknownZone {
                rule_id: rule_id.to_string(),
                zone: zone.clone(),
            })?;
            Predicate::Zone {
                zone_id: zone.clone(),
                polygon: polygon.clone(),
                anchor: *anchor,
            }
        }
        PredicateDoc::Attribute { name, expected } => {
            if name.trim().is_empty() {
                return Err(invalid("attribute predicate without name".into()));
            }
            Predicate::Attribute {
                name: name.trim().to_string(),
                expected: *expected,
            }
        }
        PredicateDoc::MinConfidence { min } => {
            if !(0.0..=1.0).contains(min) {
                return Err(invalid(format!("min_confidence {} outside [0, 1]", min)));
            }
            Predicate::MinConfidence(*min)
        }
        PredicateDoc::Pair {
            partner,
            relation,
            anchor,
        } => {
            let relation = match *relation {
                RelationDoc::Near { max_distance } if max_distance.is_finite() && max_distance > 0.0 => {
                    Relation::Near { max_distance }
                }
                RelationDoc::Overlaps { min_iou } if min_iou > 0.0 && min_iou <= 1.0 => {
                    Relation::Overlaps { min_iou }
                }
                RelationDoc::Inside { min_coverage } if min_coverage > 0.0 && min_coverage <= 1.0 => {
                    Relation::Inside { min_coverage }
                }
                ref other => return Err(invalid(format!("relation parameter out of range: {:?}", other))),
            };
            Predicate::Pair {
                partner: Box::new(compile_predicate(rule_id, partner, zones)?),
                relation,
                anchor: *anchor,
            }
        }
        PredicateDoc::And { of } | PredicateDoc::Or { of } => {
            if of.is_empty() {
                return Err(invalid("empty and/or group".into()));
            }
            let children = of
                .iter()
                .map(|p| compile_predicate(rule_id, p, zones))
                .collect::<Result<Vec<_>, _>>()?;
            if matches!(entry, PredicateDoc::And { .. }) {
                Predicate::And(children)
            } else {
                Predicate::Or(children)
            }
        }
        PredicateDoc::Not { predicate } => {
            Predicate::Not(Box::new(compile_predicate(rule_id, predicate, zones)?))
        }
    };
    Ok(compiled)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::ResetPolicy;

    const SAMPLE: &str = r#"
zones:
  - id: dock
    polygon: [[0, 0], [100, 0], [100, 100], [0, 100]]
  - id: aisle
    rectangle: [[200, 0], [300, 50]]
rules:
  - rule_id: helmetless_in_dock
    description: Person without helmet in the loading dock
    severity: high
    predicate:
      type: and
      of:
        - { type: class, labels: [Person, worker] }
        - { type: zone, zone: dock }
        - { type: attribute, name: no-helmet }
    persistence:
      tentative_frames: 5
      confirm_frames: 10
      resolve_cooldown_frames: 15
      reset: { policy: gap_tolerant, max_gap_frames: 3 }
    notify_channels: [console, webhook]
  - rule_id: person_near_forklift
    predicate:
      type: and
      of:
        - { type: class, labels: [person] }
        - type: pair
          relation: { kind: near, max_distance: 80 }
          partner: { type: class, labels: [forklift] }
"#;

    #[test]
    fn test_compiles_sample_document() {
        let set = RuleSet::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(set.len(), 2);
        let r = set.get("helmetless_in_dock").unwrap();
        assert_eq!(r.severity, Severity::High);
        assert_eq!(r.thresholds.reset, ResetPolicy::GapTolerant { max_gap_frames: 3 });
        match &r.predicate {
            Predicate::And(children) => {
                assert_eq!(children[0], Predicate::Class(vec!["person".into(), "worker".into()]));
            }
            other => panic!("expected and, got {:?}", other),
        }
        assert!(set.get("person_near_forklift").unwrap().predicate.is_pairwise());
        assert!(set.zone("aisle").unwrap().contains(Point::new(250.0, 25.0)));
    }

    #[test]
    fn test_unknown_predicate_type_rejected() {
        let doc = "rules:\n  - rule_id: r\n    predicate: { type: teleport, where: mars }\n";
        let err = RuleSet::from_yaml_str(doc).unwrap_err();
        assert!(matches!(err, RuleError::Parse(_)), "got {:?}", err);
        assert!(err.to_string().contains("teleport"), "message: {}", err);
    }

    #[test]
    fn test_missing_zone_reference_rejected() {
        let doc = "rules:\n  - rule_id: r\n    predicate: { type: zone, zone: nowhere }\n";
        match RuleSet::from_yaml_str(doc) {
            Err(RuleError::UnknownZone { rule_id, zone }) => {
                assert_eq!(rule_id, "r");
                assert_eq!(zone, "nowhere");
            }
            other => panic!("expected UnknownZone, got {:?}", other),
        }
    }

    #[test]
    fn test_incoherent_thresholds_rejected() {
        let doc = r#"
rules:
  - rule_id: r
    predicate: { type: class, labels: [person] }
    persistence: { tentative_frames: 10, confirm_frames: 5 }
"#;
        assert!(matches!(
            RuleSet::from_yaml_str(doc),
            Err(RuleError::InvalidThresholds { .. })
        ));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let doc = r#"
rules:
  - rule_id: r
    predicate: { type: class, labels: [person] }
  - rule_id: r
    predicate: { type: class, labels: [forklift] }
"#;
        assert!(matches!(RuleSet::from_yaml_str(doc), Err(RuleError::DuplicateRule(_))));
    }

    #[test]
    fn test_degenerate_zone_rejected() {
        let doc = r#"
zones:
  - id: line
    polygon: [[0, 0], [10, 10], [20, 20]]
rules:
  - rule_id: r
    predicate: { type: zone, zone: line }
"#;
        assert!(matches!(RuleSet::from_yaml_str(doc), Err(RuleError::InvalidZone { .. })));
    }

    #[test]
    fn test_empty_group_and_bad_relation_rejected() {
        let empty = "rules:\n  - rule_id: r\n    predicate: { type: or, of: [] }\n";
        assert!(matches!(
            RuleSet::from_yaml_str(empty),
            Err(RuleError::InvalidPredicate { .. })
        ));
        let bad = r#"
rules:
  - rule_id: r
    predicate:
      type: pair
      relation: { kind: overlaps, min_iou: 1.5 }
      partner: { type: class, labels: [forklift] }
"#;
        assert!(matches!(
            RuleSet::from_yaml_str(bad),
            Err(RuleError::InvalidPredicate { .. })
        ));
    }

    #[test]
    fn test_disabled_rules_skipped_but_validated() {
        let doc = r#"
rules:
  - rule_id: on
    predicate: { type: class, labels: [person] }
  - rule_id: off
    enabled: false
    predicate: { type: class, labels: [person] }
"#;
        let set = RuleSet::from_yaml_str(doc).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.get("off").is_none());
    }

    #[test]
    fn test_load_json_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"rules":[{"rule_id":"r","predicate":{"type":"min_confidence","min":0.4}}]}"#,
        )
        .unwrap();
        let set = RuleSet::load(path.to_str().unwrap()).unwrap();
        assert_eq!(set.rules()[0].predicate, Predicate::MinConfidence(0.4));
    }
}

// src/rules/model.rs
//
// Compiled, immutable rules. Built once by the loader; the engine only reads them.

use crate::geometry::{Anchor, Polygon};
use serde::{Deserialize, Serialize};

pub type RuleId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// What a false frame does to a persistence counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ResetPolicy {
    /// First false frame resets the count to zero.
    #[default]
    Instant,
    /// The count is frozen across up to `max_gap_frames` false frames and
    /// reset on the next one.
    GapTolerant { max_gap_frames: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Consecutive frames before a Tentative incident opens
    pub tentative_frames: u32,
    /// Persistence needed to confirm
    pub confirm_frames: u32,
    /// Consecutive non-matching frames before a Confirmed incident resolves
    pub resolve_cooldown_frames: u32,
    pub reset: ResetPolicy,
    /// Resolve (instead of discard) a Tentative incident whose persistence resets
    pub allow_unconfirmed_resolution: bool,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            tentative_frames: 5,
            confirm_frames: 15,
            resolve_cooldown_frames: 30,
            reset: ResetPolicy::Instant,
            allow_unconfirmed_resolution: false,
        }
    }
}

/// Spatial relation between the subject track and a partner track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Relation {
    /// Anchor distance in pixels at most `max_distance`
    Near { max_distance: f32 },
    /// Box IoU at least `min_iou`
    Overlaps { min_iou: f32 },
    /// Share of the subject's box covered by the partner at least `min_coverage`
    Inside { min_coverage: f32 },
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Near { .. } => "near",
            Self::Overlaps { .. } => "overlaps",
            Self::Inside { .. } => "inside",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Track class is one of these (lowercase) labels
    Class(Vec<String>),
    Zone {
        zone_id: String,
        polygon: Polygon,
        anchor: Anchor,
    },
    Attribute {
        name: String,
        expected: bool,
    },
    MinConfidence(f32),
    /// Some other live track satisfies `partner` and `relation`
    Pair {
        partner: Box<Predicate>,
        relation: Relation,
        anchor: Anchor,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn is_pairwise(&self) -> bool {
        match self {
            Self::Pair { .. } => true,
            Self::And(ps) | Self::Or(ps) => ps.iter().any(Predicate::is_pairwise),
            Self::Not(p) => p.is_pairwise(),
            _ => false,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::Pair { partner, .. } => 1 + partner.depth(),
            Self::And(ps) | Self::Or(ps) => 1 + ps.iter().map(Predicate::depth).max().unwrap_or(0),
            Self::Not(p) => 1 + p.depth(),
            _ => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub rule_id: RuleId,
    pub description: String,
    pub severity: Severity,
    pub predicate: Predicate,
    pub thresholds: Thresholds,
    pub notify_channels: Vec<String>,
    /// Camera or site area the rule watches, passed through to notifications
    pub area: Option<String>,
    /// Open a recording session on confirmation
    pub record: bool,
}

/// Serializable view of a rule for incident metadata.
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub rule_id: RuleId,
    pub description: String,
    pub severity: Severity,
    pub thresholds: Thresholds,
    pub pairwise: bool,
}

impl Rule {
    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            rule_id: self.rule_id.clone(),
            description: self.description.clone(),
            severity: self.severity,
            thresholds: self.thresholds,
            pairwise: self.predicate.is_pairwise(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairwise_detection_through_nesting() {
        let pair = Predicate::Pair {
            partner: Box::new(Predicate::Class(vec!["forklift".into()])),
            relation: Relation::Near { max_distance: 50.0 },
            anchor: Anchor::BottomCenter,
        };
        let tree = Predicate::And(vec![
            Predicate::Class(vec!["person".into()]),
            Predicate::Not(Box::new(pair)),
        ]);
        assert!(tree.is_pairwise());
        assert_eq!(tree.depth(), 4);
        assert!(!Predicate::Class(vec!["person".into()]).is_pairwise());
    }

    #[test]
    fn test_reset_policy_serde() {
        let p: ResetPolicy = serde_yaml::from_str("policy: gap_tolerant\nmax_gap_frames: 3").unwrap();
        assert_eq!(p, ResetPolicy::GapTolerant { max_gap_frames: 3 });
        let t: Thresholds = serde_yaml::from_str("tentative_frames: 2").unwrap();
        assert_eq!(t.tentative_frames, 2);
        assert_eq!(t.confirm_frames, 15);
        assert_eq!(t.reset, ResetPolicy::Instant);
    }
}

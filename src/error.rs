// src/error.rs
//
// Domain errors. Binary-level plumbing uses anyhow; anything a caller may
// want to match on lives here.

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Frame index regression: last processed {last}, got {got}")]
    FrameRegression { last: u64, got: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Failed to parse rule document: {0}")]
    Parse(String),

    #[error("Rule document contains no rules")]
    Empty,

    #[error("Rule at position {index} has an empty rule_id")]
    MissingId { index: usize },

    #[error("Duplicate rule_id: {0}")]
    DuplicateRule(String),

    #[error("Duplicate zone id: {0}")]
    DuplicateZone(String),

    #[error("Rule {rule_id}: unknown zone reference '{zone}'")]
    UnknownZone { rule_id: String, zone: String },

    #[error("Zone {zone}: {reason}")]
    InvalidZone { zone: String, reason: String },

    #[error("Rule {rule_id}: invalid thresholds: {reason}")]
    InvalidThresholds { rule_id: String, reason: String },

    #[error("Rule {rule_id}: invalid predicate: {reason}")]
    InvalidPredicate { rule_id: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize clip metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Failed to encode frame {frame_index}: {reason}")]
    Encode { frame_index: u64, reason: String },

    #[error("Clip writer is no longer running")]
    WriterClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Recording(#[from] RecordingError),
}

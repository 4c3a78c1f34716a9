// src/rules/mod.rs

pub mod attributes;
pub mod engine;
pub mod loader;
pub mod model;

pub use attributes::{AttributeDeriver, CompositionConfig};
pub use engine::{MatchSignal, RuleEngine};
pub use loader::RuleSet;
pub use model::{Rule, RuleId, Severity, Thresholds};

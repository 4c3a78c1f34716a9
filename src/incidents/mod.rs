// src/incidents/mod.rs

pub mod lifecycle;
pub mod model;

pub use lifecycle::EventLifecycleManager;
pub use model::{
    Evidence, IncidentPayload, IncidentState, LifecycleEvent, TransitionKind, TransitionRecord,
};

// src/tracking/mod.rs

pub mod assignment;
pub mod motion;
pub mod track;
pub mod tracker;

pub use track::{Track, TrackId, TrackState};
pub use tracker::{Tracker, TrackerConfig};

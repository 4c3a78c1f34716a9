// src/detection/mod.rs

pub mod latest;
pub mod replay;
pub mod types;

pub use latest::{latest_slot, DetectionReader, Fetch};
pub use types::{sanitize, Detection};

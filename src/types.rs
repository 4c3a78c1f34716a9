use crate::notify::NotifyConfig;
use crate::recording::RecorderConfig;
use crate::rules::CompositionConfig;
use crate::tracking::TrackerConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub detection: DetectionConfig,
    pub attributes: CompositionConfig,
    pub recorder: RecorderConfig,
    pub notify: NotifyConfig,
    pub io: IoConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Batches older than this many frames are dropped instead of consumed
    pub max_staleness_frames: u64,
    /// Run the detector every N frames when replaying (1 = every frame)
    pub detect_every_n_frames: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_staleness_frames: 15,
            detect_every_n_frames: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Directory scanned for `*.jsonl` detection streams
    pub input_dir: String,
    /// Rule document, YAML or JSON
    pub rules_path: String,
    /// Incidents and transitions are appended here as JSON lines
    pub incident_log: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input_dir: "streams".into(),
            rules_path: "rules.yaml".into(),
            incident_log: "output/incidents.jsonl".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub event_bus_capacity: usize,
    /// Log a diagnostics line every N frames (0 disables)
    pub diagnostics_interval_frames: u64,
    /// Finalize open recordings on shutdown instead of discarding them
    pub flush_on_shutdown: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: 256,
            diagnostics_interval_frames: 300,
            flush_on_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

/// One video frame as the recorder sees it. Pixels are optional: detection
/// replays carry only the index and timestamp.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub timestamp_ms: f64,
    pub width: usize,
    pub height: usize,
    /// Packed RGB8, `width * height * 3` bytes
    pub pixels: Option<Vec<u8>>,
}

impl Frame {
    pub fn metadata_only(index: u64, timestamp_ms: f64) -> Self {
        Self {
            index,
            timestamp_ms,
            width: 0,
            height: 0,
            pixels: None,
        }
    }

    #[cfg(test)]
    pub fn rgb(index: u64, timestamp_ms: f64, width: usize, height: usize, pixels: Vec<u8>) -> Self {
        Self {
            index,
            timestamp_ms,
            width,
            height,
            pixels: Some(pixels),
        }
    }

    pub fn has_pixels(&self) -> bool {
        self.pixels
            .as_ref()
            .is_some_and(|p| self.width > 0 && self.height > 0 && p.len() >= self.width * self.height * 3)
    }
}

// src/detection/replay.rs
//
// Recorded detection streams. One JSON object per line, one line per frame:
//   {"frame_index": 12, "timestamp_ms": 400.0, "detections": [...]}
// `detections` is omitted (or null) on frames where the detector did not run,
// and an empty list on frames where it ran and found nothing.

use super::types::{Detection, DetectionBatch};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

#[derive(Debug, Clone, Deserialize)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub timestamp_ms: f64,
    #[serde(default)]
    pub detections: Option<Vec<Detection>>,
}

impl FrameRecord {
    /// The detector cycle carried by this frame, if any.
    pub fn into_batch(self) -> Option<DetectionBatch> {
        let (frame_index, timestamp_ms) = (self.frame_index, self.timestamp_ms);
        self.detections
            .map(|dets| DetectionBatch::new(frame_index, timestamp_ms, dets))
    }
}

pub struct ReplayReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl ReplayReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open detection stream {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }
}

impl Iterator for ReplayReader {
    type Item = Result<FrameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    return Some(Err(e).with_context(|| {
                        format!("{}:{}: read failed", self.path.display(), self.line_no)
                    }))
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).with_context(|| {
                format!("{}:{}: invalid frame record", self.path.display(), self.line_no)
            }));
        }
    }
}

/// All `.jsonl` streams under `dir`, in path order.
pub fn find_streams(dir: &str) -> Result<Vec<PathBuf>> {
    if !Path::new(dir).is_dir() {
        anyhow::bail!("Input directory {} does not exist", dir);
    }
    let mut streams: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
        })
        .collect();
    streams.sort();
    info!("Found {} detection stream(s) in {}", streams.len(), dir);
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_records_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cam1.jsonl");
        let mut f = File::create(&path).unwrap();
        writeln!(f, r#"{{"frame_index":1,"timestamp_ms":0.0,"detections":[{{"bbox":[0,0,10,20],"confidence":0.9,"class_label":"person"}}]}}"#).unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"frame_index":2,"timestamp_ms":33.3}}"#).unwrap();
        writeln!(f, r#"{{"frame_index":3,"timestamp_ms":66.6,"detections":[]}}"#).unwrap();
        drop(f);

        let records: Vec<FrameRecord> = ReplayReader::open(&path)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records.len(), 3);

        let batch = records[0].clone().into_batch().expect("frame 1 ran the detector");
        assert_eq!(batch.detections.len(), 1);
        assert_eq!(batch.detections[0].frame_index, 1);
        assert!(records[1].clone().into_batch().is_none());
        assert_eq!(records[2].clone().into_batch().map(|b| b.detections.len()), Some(0));
    }

    #[test]
    fn test_invalid_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.jsonl");
        std::fs::write(&path, "{\"frame_index\":1,\"timestamp_ms\":0}\nnot json\n").unwrap();
        let mut reader = ReplayReader::open(&path).unwrap();
        assert!(reader.next().unwrap().is_ok());
        let err = reader.next().unwrap().unwrap_err();
        assert!(format!("{:#}", err).contains(":2:"), "got {:#}", err);
    }

    #[test]
    fn test_find_streams_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("nested/a.JSONL"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let found = find_streams(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(find_streams("/definitely/not/here").is_err());
    }
}

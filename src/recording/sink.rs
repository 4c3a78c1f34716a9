// src/recording/sink.rs
//
// Where finished clips end up. The writer thread owns the sink; nothing on
// the decision path calls it directly.

use super::session::FinishedClip;
use crate::error::RecordingError;
use crate::types::Frame;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub trait ClipSink: Send {
    /// Persist one clip and return where it went.
    fn write(&mut self, clip: &FinishedClip) -> Result<String, RecordingError>;
}

/// `<root>/<event_id>/frame_<index>.jpg`, `snapshot.jpg` and `metadata.json`.
pub struct FsClipSink {
    root: PathBuf,
    jpeg_quality: u8,
}

impl FsClipSink {
    pub fn new(root: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            root: root.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }
}

impl ClipSink for FsClipSink {
    fn write(&mut self, clip: &FinishedClip) -> Result<String, RecordingError> {
        let dir = self.root.join(&clip.record.event_id);
        fs::create_dir_all(&dir)?;

        let mut encoded = 0usize;
        for frame in clip.frames.iter().filter(|f| f.has_pixels()) {
            let jpeg = encode_jpeg(frame, self.jpeg_quality)?;
            fs::write(dir.join(format!("frame_{:06}.jpg", frame.index)), jpeg)?;
            encoded += 1;
        }
        if let Some(snapshot) = clip.snapshot.as_ref().filter(|f| f.has_pixels()) {
            fs::write(dir.join("snapshot.jpg"), encode_jpeg(snapshot, self.jpeg_quality)?)?;
        }
        fs::write(
            dir.join("metadata.json"),
            serde_json::to_vec_pretty(&clip.record)?,
        )?;

        debug!(
            "Clip {} written to {} ({} of {} frames with pixels)",
            clip.record.event_id,
            dir.display(),
            encoded,
            clip.frames.len()
        );
        Ok(dir.display().to_string())
    }
}

/// Encode an RGB8 frame as JPEG.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, RecordingError> {
    use image::{ImageBuffer, RgbImage};
    use std::io::Cursor;

    let fail = |reason: &str| RecordingError::Encode {
        frame_index: frame.index,
        reason: reason.to_string(),
    };
    let pixels = frame.pixels.as_ref().ok_or_else(|| fail("frame has no pixels"))?;
    let expected_len = frame.width * frame.height * 3;
    if pixels.len() < expected_len {
        return Err(fail("pixel buffer shorter than width * height * 3"));
    }

    let img: RgbImage = ImageBuffer::from_raw(
        frame.width as u32,
        frame.height as u32,
        pixels[..expected_len].to_vec(),
    )
    .ok_or_else(|| fail("invalid dimensions"))?;

    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)
        .map_err(|e| fail(&e.to_string()))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::session::ClipRecord;
    use std::sync::Arc;

    fn clip(frames: Vec<Frame>) -> FinishedClip {
        let frames: Vec<_> = frames.into_iter().map(Arc::new).collect();
        FinishedClip {
            record: ClipRecord {
                event_id: "evt-000001-r-t1".into(),
                rule_id: "r".into(),
                track_ids: vec![1],
                desired_start_frame: 0,
                start_frame: frames[0].index,
                end_frame: frames[frames.len() - 1].index,
                start_ts: 0.0,
                end_ts: 0.0,
                frame_count: frames.len(),
                snapshot_frame: Some(frames[0].index),
                truncated: false,
                capped: false,
                interrupted: false,
            },
            snapshot: Some(Arc::clone(&frames[0])),
            frames,
        }
    }

    #[test]
    fn test_writes_frames_snapshot_and_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FsClipSink::new(dir.path(), 80);
        let frames = vec![
            Frame::rgb(3, 100.0, 4, 4, vec![128; 48]),
            Frame::metadata_only(4, 133.0),
        ];
        let location = sink.write(&clip(frames)).unwrap();
        let out = dir.path().join("evt-000001-r-t1");
        assert_eq!(location, out.display().to_string());
        assert!(out.join("frame_000003.jpg").exists());
        assert!(!out.join("frame_000004.jpg").exists(), "metadata-only frame has no image");
        assert!(out.join("snapshot.jpg").exists());
        let meta: serde_json::Value =
            serde_json::from_slice(&fs::read(out.join("metadata.json")).unwrap()).unwrap();
        assert_eq!(meta["rule_id"], "r");
        assert_eq!(meta["truncated"], false);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let frame = Frame::rgb(7, 0.0, 10, 10, vec![0; 12]);
        match encode_jpeg(&frame, 80) {
            Err(RecordingError::Encode { frame_index, .. }) => assert_eq!(frame_index, 7),
            other => panic!("expected encode error, got {:?}", other.map(|b| b.len())),
        }
    }
}

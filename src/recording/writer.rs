// src/recording/writer.rs
//
// Dedicated clip writer thread. The pipeline submits finished clips and
// collects outcomes without waiting; only `finish` blocks, at shutdown.

use super::session::FinishedClip;
use super::sink::ClipSink;
use crate::error::RecordingError;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordingOutcome {
    Written {
        event_id: String,
        location: String,
        frames: usize,
        truncated: bool,
        capped: bool,
        interrupted: bool,
        end_frame: u64,
    },
    Failed {
        event_id: String,
        attempts: u32,
        reason: String,
        end_frame: u64,
    },
}

pub struct ClipWriter {
    jobs: Option<UnboundedSender<FinishedClip>>,
    outcomes: UnboundedReceiver<RecordingOutcome>,
    handle: Option<JoinHandle<()>>,
}

impl ClipWriter {
    pub fn spawn(mut sink: Box<dyn ClipSink>, write_attempts: u32, retry_backoff_ms: u64) -> Result<Self, RecordingError> {
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<FinishedClip>();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let attempts = write_attempts.max(1);

        let handle = std::thread::Builder::new()
            .name("clip-writer".into())
            .spawn(move || {
                while let Some(clip) = job_rx.blocking_recv() {
                    let outcome = write_with_retry(sink.as_mut(), &clip, attempts, retry_backoff_ms);
                    if out_tx.send(outcome).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            jobs: Some(job_tx),
            outcomes: out_rx,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, clip: FinishedClip) -> Result<(), RecordingError> {
        let jobs = self.jobs.as_ref().ok_or(RecordingError::WriterClosed)?;
        jobs.send(clip).map_err(|_| RecordingError::WriterClosed)
    }

    /// Outcomes that are ready, without blocking.
    pub fn poll_outcomes(&mut self) -> Vec<RecordingOutcome> {
        let mut ready = Vec::new();
        while let Ok(outcome) = self.outcomes.try_recv() {
            ready.push(outcome);
        }
        ready
    }

    /// Close the queue, wait for every pending clip, return remaining outcomes.
    pub fn finish(&mut self) -> Vec<RecordingOutcome> {
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Clip writer thread panicked");
            }
        }
        self.poll_outcomes()
    }
}

impl Drop for ClipWriter {
    fn drop(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn write_with_retry(
    sink: &mut dyn ClipSink,
    clip: &FinishedClip,
    attempts: u32,
    backoff_ms: u64,
) -> RecordingOutcome {
    let record = &clip.record;
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match sink.write(clip) {
            Ok(location) => {
                info!(
                    "Clip {} saved: frames {}..{} ({} frames{}{}) -> {}",
                    record.event_id,
                    record.start_frame,
                    record.end_frame,
                    record.frame_count,
                    if record.truncated { ", truncated" } else { "" },
                    if record.capped { ", capped" } else { "" },
                    location
                );
                return RecordingOutcome::Written {
                    event_id: record.event_id.clone(),
                    location,
                    frames: record.frame_count,
                    truncated: record.truncated,
                    capped: record.capped,
                    interrupted: record.interrupted,
                    end_frame: record.end_frame,
                };
            }
            Err(e) => {
                warn!(
                    "Clip {} write attempt {}/{} failed: {}",
                    record.event_id, attempt, attempts, e
                );
                last_error = e.to_string();
                if attempt < attempts {
                    std::thread::sleep(Duration::from_millis(backoff_ms * attempt as u64));
                }
            }
        }
    }
    RecordingOutcome::Failed {
        event_id: record.event_id.clone(),
        attempts,
        reason: last_error,
        end_frame: record.end_frame,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::session::RecordingSession;
    use crate::types::Frame;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakySink {
        fail_first: u32,
        calls: Arc<AtomicU32>,
    }

    impl ClipSink for FlakySink {
        fn write(&mut self, clip: &FinishedClip) -> Result<String, RecordingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(RecordingError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            Ok(format!("mem://{}", clip.record.event_id))
        }
    }

    fn clip(id: &str) -> FinishedClip {
        let frames = vec![Arc::new(Frame::metadata_only(10, 0.0))];
        RecordingSession::new(id.into(), "r".into(), vec![1], 10, frames, None, 100, 0).finish(false)
    }

    #[test]
    fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let sink = FlakySink {
            fail_first: 2,
            calls: Arc::clone(&calls),
        };
        let mut writer = ClipWriter::spawn(Box::new(sink), 3, 1).unwrap();
        writer.submit(clip("a")).unwrap();
        let outcomes = writer.finish();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(&outcomes[..], [RecordingOutcome::Written { location, .. }] if location == "mem://a"));
    }

    #[test]
    fn test_exhausted_retries_report_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let sink = FlakySink {
            fail_first: u32::MAX,
            calls: Arc::clone(&calls),
        };
        let mut writer = ClipWriter::spawn(Box::new(sink), 2, 1).unwrap();
        writer.submit(clip("b")).unwrap();
        let outcomes = writer.finish();
        match &outcomes[..] {
            [RecordingOutcome::Failed { event_id, attempts, reason, .. }] => {
                assert_eq!(event_id, "b");
                assert_eq!(*attempts, 2);
                assert!(reason.contains("disk full"), "reason: {}", reason);
            }
            other => panic!("expected one failure, got {:?}", other),
        }
        assert!(matches!(writer.submit(clip("c")), Err(RecordingError::WriterClosed)));
    }
}

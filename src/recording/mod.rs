// src/recording/mod.rs

pub mod recorder;
pub mod ring_buffer;
pub mod session;
pub mod sink;
pub mod writer;

pub use recorder::{Recorder, RecorderConfig, ShutdownMode};
pub use ring_buffer::SharedFrame;
pub use session::FinishedClip;
pub use sink::{encode_jpeg, ClipSink, FsClipSink};
pub use writer::{ClipWriter, RecordingOutcome};

//! lookout-engine — Live recognition loop over a video source.
//!
//! Ties the gallery store and matcher from `lookout-core` to a frame source
//! and a detection/embedding backend, publishing per-frame annotations and a
//! coarse status for whatever renders them.

pub mod config;
pub mod recognition;
pub mod source;

pub use config::{Config, ConfigError};
pub use recognition::{
    Annotation, FailureReason, LoopSettings, LoopStatus, RecognitionLoop, TickOutcome,
};
pub use source::{CaptureError, FrameFeed, PlaybackStatus, VideoSource};

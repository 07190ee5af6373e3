//! Display capture providers
//!
//! This module provides the capture traits and the providers implementing
//! them: ffmpeg for real screens and a scripted in-memory provider.

pub mod ffmpeg;
pub mod scripted;
pub mod traits;

// Re-export traits
pub use traits::{
    CaptureConstraints, CaptureError, CaptureResult, CaptureStream, DisplayMediaSource,
    MediaEvent, MediaEventReceiver, MediaEventSender, MediaRecorder, SessionId, TrackInfo,
    TrackKind,
};

pub use ffmpeg::{FfmpegDisplaySource, FfmpegSettings};
pub use scripted::ScriptedDisplaySource;

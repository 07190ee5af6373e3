//! Capture trait definitions
//!
//! Platform-agnostic traits for display capture providers, the streams they
//! hand out, and the recording controllers bound to those streams.

use crate::recorder::state::ControllerState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capture-level errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture not supported: {0}")]
    Unsupported(String),

    #[error("Capture denied: {0}")]
    Denied(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Identifier of one capture session
///
/// Allocated by the recorder before the platform is asked for a stream and
/// carried by every media event, so that events of a torn-down session can be
/// told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What to request from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub video: bool,
    pub audio: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Information about a single track of a capture stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    /// Track ID, unique within the stream
    pub id: String,

    /// Media kind
    pub kind: TrackKind,

    /// Human readable source label (display name, audio device)
    pub label: String,

    /// False once the track has been stopped
    pub live: bool,
}

/// Notifications fired by the platform while a session exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// The recording controller has a fragment ready (may be empty)
    DataAvailable { session: SessionId, data: Vec<u8> },

    /// The recording controller has flushed its last fragment
    RecorderStopped { session: SessionId },

    /// The capture stream ended outside of our control
    StreamEnded { session: SessionId },
}

pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

/// A provider of screen capture streams
#[async_trait]
pub trait DisplayMediaSource: Send + Sync {
    /// Short provider name used in logs
    fn name(&self) -> &str;

    /// Whether this environment can capture the screen at all
    fn is_supported(&self) -> bool;

    /// Request a capture stream
    ///
    /// Resolves once the platform has granted or refused access. Media events
    /// of the returned stream, and of any recorder created from it, are sent
    /// to `events` tagged with `session`.
    async fn get_display_media(
        &self,
        constraints: CaptureConstraints,
        session: SessionId,
        events: MediaEventSender,
    ) -> CaptureResult<Box<dyn CaptureStream>>;
}

/// A live capture stream owned by the recorder
pub trait CaptureStream: Send {
    /// Current tracks of the stream
    fn tracks(&self) -> Vec<TrackInfo>;

    /// Stop every track and release the underlying capture
    fn stop_tracks(&mut self);

    /// Bind a recording controller encoding into `mime_type`
    fn create_recorder(&mut self, mime_type: &str) -> CaptureResult<Box<dyn MediaRecorder>>;
}

/// Encodes a capture stream into container fragments
pub trait MediaRecorder: Send {
    fn state(&self) -> ControllerState;

    /// Start emitting `DataAvailable` events
    fn start(&mut self) -> CaptureResult<()>;

    /// Stop recording; the remaining data is flushed asynchronously and
    /// followed by `RecorderStopped`
    fn stop(&mut self);
}

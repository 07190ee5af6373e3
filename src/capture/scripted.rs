//! Scripted capture provider
//!
//! An in-memory stand-in for a platform capture provider. Every stream it
//! opens is recorded so that callers can push fragments, end the stream, and
//! inspect track state. With a fragment interval configured, recorders emit
//! synthetic fragments on their own while recording.

use super::traits::{
    CaptureConstraints, CaptureError, CaptureResult, CaptureStream, DisplayMediaSource,
    MediaEvent, MediaEventSender, MediaRecorder, SessionId, TrackInfo, TrackKind,
};
use crate::recorder::state::ControllerState;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Capture provider driven by the caller
pub struct ScriptedDisplaySource {
    supported: bool,
    denial: Mutex<Option<String>>,
    response_delay: Option<Duration>,
    fragment_interval: Option<Duration>,
    flush_fragment: Option<Vec<u8>>,
    opened: Mutex<Vec<ScriptedStreamHandle>>,
}

impl ScriptedDisplaySource {
    /// A provider that grants every request
    pub fn new() -> Self {
        Self {
            supported: true,
            denial: Mutex::new(None),
            response_delay: None,
            fragment_interval: None,
            flush_fragment: None,
            opened: Mutex::new(Vec::new()),
        }
    }

    /// A provider reporting that screen capture is unavailable
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Refuse the next requests with the given reason
    pub fn deny_with(self, reason: impl Into<String>) -> Self {
        *self.denial.lock() = Some(reason.into());
        self
    }

    /// Stop refusing requests
    pub fn grant(&self) {
        *self.denial.lock() = None;
    }

    /// Simulate the time the user spends in the platform picker
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = Some(delay);
        self
    }

    /// Emit a synthetic fragment every `interval` while recording
    pub fn with_fragment_interval(mut self, interval: Duration) -> Self {
        self.fragment_interval = Some(interval);
        self
    }

    /// Fragment delivered between `stop()` and `RecorderStopped`
    pub fn with_flush_fragment(mut self, data: Vec<u8>) -> Self {
        self.flush_fragment = Some(data);
        self
    }

    /// Streams opened so far, oldest first
    pub fn opened(&self) -> Vec<ScriptedStreamHandle> {
        self.opened.lock().clone()
    }

    /// The most recently opened stream
    pub fn last_opened(&self) -> Option<ScriptedStreamHandle> {
        self.opened.lock().last().cloned()
    }
}

impl Default for ScriptedDisplaySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DisplayMediaSource for ScriptedDisplaySource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn get_display_media(
        &self,
        constraints: CaptureConstraints,
        session: SessionId,
        events: MediaEventSender,
    ) -> CaptureResult<Box<dyn CaptureStream>> {
        if !self.supported {
            return Err(CaptureError::Unsupported(
                "scripted provider has capture disabled".to_string(),
            ));
        }

        if let Some(delay) = self.response_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(reason) = self.denial.lock().clone() {
            return Err(CaptureError::Denied(reason));
        }

        let mut tracks = Vec::new();
        if constraints.video {
            tracks.push(TrackInfo {
                id: format!("{}-video", session),
                kind: TrackKind::Video,
                label: "Scripted display".to_string(),
                live: true,
            });
        }
        if constraints.audio {
            tracks.push(TrackInfo {
                id: format!("{}-audio", session),
                kind: TrackKind::Audio,
                label: "Scripted audio".to_string(),
                live: true,
            });
        }

        let handle = ScriptedStreamHandle {
            session,
            tracks: Arc::new(Mutex::new(tracks)),
            recorder_state: Arc::new(Mutex::new(None)),
            events,
        };
        self.opened.lock().push(handle.clone());

        Ok(Box::new(ScriptedStream {
            handle,
            fragment_interval: self.fragment_interval,
            flush_fragment: self.flush_fragment.clone(),
        }))
    }
}

/// Caller-side view of a scripted stream
#[derive(Clone)]
pub struct ScriptedStreamHandle {
    session: SessionId,
    tracks: Arc<Mutex<Vec<TrackInfo>>>,
    recorder_state: Arc<Mutex<Option<ControllerState>>>,
    events: MediaEventSender,
}

impl ScriptedStreamHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Deliver a fragment as if the recorder produced it
    pub fn emit(&self, data: impl Into<Vec<u8>>) {
        let _ = self.events.send(MediaEvent::DataAvailable {
            session: self.session,
            data: data.into(),
        });
    }

    /// Simulate the platform revoking the capture
    pub fn end_stream(&self) {
        for track in self.tracks.lock().iter_mut() {
            track.live = false;
        }
        let _ = self.events.send(MediaEvent::StreamEnded {
            session: self.session,
        });
    }

    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.lock().clone()
    }

    pub fn all_tracks_stopped(&self) -> bool {
        self.tracks.lock().iter().all(|t| !t.live)
    }

    /// State of the recorder bound to this stream, if one was created
    pub fn recorder_state(&self) -> Option<ControllerState> {
        *self.recorder_state.lock()
    }
}

struct ScriptedStream {
    handle: ScriptedStreamHandle,
    fragment_interval: Option<Duration>,
    flush_fragment: Option<Vec<u8>>,
}

impl CaptureStream for ScriptedStream {
    fn tracks(&self) -> Vec<TrackInfo> {
        self.handle.tracks()
    }

    fn stop_tracks(&mut self) {
        for track in self.handle.tracks.lock().iter_mut() {
            track.live = false;
        }
    }

    fn create_recorder(&mut self, mime_type: &str) -> CaptureResult<Box<dyn MediaRecorder>> {
        if !mime_type.starts_with("video/") {
            return Err(CaptureError::Platform(format!(
                "unsupported mime type: {}",
                mime_type
            )));
        }
        *self.handle.recorder_state.lock() = Some(ControllerState::Inactive);
        Ok(Box::new(ScriptedRecorder {
            handle: self.handle.clone(),
            fragment_interval: self.fragment_interval,
            flush_fragment: self.flush_fragment.clone(),
        }))
    }
}

struct ScriptedRecorder {
    handle: ScriptedStreamHandle,
    fragment_interval: Option<Duration>,
    flush_fragment: Option<Vec<u8>>,
}

impl ScriptedRecorder {
    fn set_state(&self, state: ControllerState) {
        *self.handle.recorder_state.lock() = Some(state);
    }
}

impl MediaRecorder for ScriptedRecorder {
    fn state(&self) -> ControllerState {
        self.handle
            .recorder_state()
            .unwrap_or(ControllerState::Inactive)
    }

    fn start(&mut self) -> CaptureResult<()> {
        if self.state() != ControllerState::Inactive {
            return Err(CaptureError::Platform(format!(
                "recorder cannot start from state {:?}",
                self.state()
            )));
        }
        if !self.handle.tracks.lock().iter().any(|t| t.live) {
            return Err(CaptureError::Platform("stream has no live tracks".to_string()));
        }
        self.set_state(ControllerState::Recording);

        if let Some(interval) = self.fragment_interval {
            let handle = self.handle.clone();
            tokio::spawn(async move {
                let mut sequence = 0u64;
                loop {
                    tokio::time::sleep(interval).await;
                    if handle.recorder_state() != Some(ControllerState::Recording) {
                        break;
                    }
                    sequence += 1;
                    handle.emit(format!("{}:fragment-{:06}\n", handle.session, sequence));
                }
            });
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.state() != ControllerState::Recording {
            return;
        }
        self.set_state(ControllerState::Stopped);
        if let Some(data) = &self.flush_fragment {
            self.handle.emit(data.clone());
        }
        let _ = self.handle.events.send(MediaEvent::RecorderStopped {
            session: self.handle.session,
        });
    }
}

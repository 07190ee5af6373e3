//! Recorder state machine
//!
//! Owns the capture session, its recording controller, the fragment buffer,
//! the countdown and the preview binding. All transitions go through the
//! methods below; each one checks the current state first so that late or
//! repeated calls are harmless, and each one ends by re-deriving the artifact
//! and preview.

use super::artifact::{save_artifact, ArtifactStore};
use super::buffer::FragmentBuffer;
use super::state::{ArtifactUrl, ControllerState, Countdown, Preview, PreviewSource, Tick};
use crate::capture::{
    CaptureConstraints, CaptureResult, CaptureStream, DisplayMediaSource, MediaEvent,
    MediaEventSender, MediaRecorder, SessionId,
};
use crate::config::RecorderConfig;
use crate::utils::error::{AppError, AppResult, ErrorResponse};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Events emitted by the recorder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// A capture stream was requested from the platform
    CaptureRequested(SessionId),
    /// The platform granted the stream; the countdown is running
    CountdownStarted { session: SessionId, value: u32 },
    /// Countdown value after a tick
    CountdownTick(u32),
    /// The controller started recording
    RecordingStarted(SessionId),
    /// The session was torn down
    SessionClosed(SessionId),
    /// The platform ended the capture on its own
    StreamLost(SessionId),
    /// A new artifact was assembled
    ArtifactReady {
        url: ArtifactUrl,
        size: usize,
        fragments: usize,
    },
    /// The controller flushed its last fragment
    Finalized {
        session: SessionId,
        artifact: Option<ArtifactUrl>,
    },
    /// An artifact was written to disk
    Saved(PathBuf),
    /// Something failed
    Error(ErrorResponse),
}

/// Point-in-time view of the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderSnapshot {
    pub supported: bool,
    pub session: Option<SessionId>,
    pub controller: Option<ControllerState>,
    pub request_pending: bool,
    pub countdown: Countdown,
    pub fragment_count: usize,
    pub buffered_bytes: usize,
    pub artifact: Option<ArtifactUrl>,
    pub preview: Preview,
}

impl RecorderSnapshot {
    pub fn is_recording(&self) -> bool {
        self.controller == Some(ControllerState::Recording)
    }
}

/// A bound capture stream and its controller
struct ActiveSession {
    id: SessionId,
    stream: Box<dyn CaptureStream>,
    controller: Box<dyn MediaRecorder>,
    controller_state: ControllerState,
}

/// The screen recorder
pub struct Recorder {
    mime_type: String,
    filename: String,
    supported: bool,
    next_session: u64,
    pending: Option<SessionId>,
    session: Option<ActiveSession>,
    countdown: Countdown,
    buffer: FragmentBuffer,
    /// Session whose fragments are still being buffered
    accepting: Option<SessionId>,
    artifacts: ArtifactStore,
    artifact: Option<ArtifactUrl>,
    assembled_fragments: usize,
    preview: Preview,
    recordings_started: u64,
    outbox: Vec<RecorderEvent>,
}

impl Recorder {
    /// Create a recorder; `supported` is the platform capability probe
    pub fn new(config: &RecorderConfig, supported: bool) -> Self {
        if !supported {
            tracing::error!("Screen recording is not supported in this environment");
        }
        Self {
            mime_type: config.mime_type.clone(),
            filename: config.filename.clone(),
            supported,
            next_session: 0,
            pending: None,
            session: None,
            countdown: Countdown::new(config.countdown_seconds),
            buffer: FragmentBuffer::new(),
            accepting: None,
            artifacts: ArtifactStore::new(),
            artifact: None,
            assembled_fragments: 0,
            preview: Preview::cleared(),
            recordings_started: 0,
            outbox: Vec::new(),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn is_recording(&self) -> bool {
        self.controller_state() == Some(ControllerState::Recording)
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn controller_state(&self) -> Option<ControllerState> {
        self.session.as_ref().map(|s| s.controller_state)
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn preview(&self) -> &Preview {
        &self.preview
    }

    pub fn buffer(&self) -> &FragmentBuffer {
        &self.buffer
    }

    /// URL of the current artifact, if one has been assembled
    pub fn artifact(&self) -> Option<&ArtifactUrl> {
        self.artifact.as_ref()
    }

    pub fn artifact_data(&self, url: &ArtifactUrl) -> Option<Vec<u8>> {
        self.artifacts.get(url).map(|a| a.data.clone())
    }

    /// How many times recording actually began
    pub fn recordings_started(&self) -> u64 {
        self.recordings_started
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        RecorderSnapshot {
            supported: self.supported,
            session: self.session_id(),
            controller: self.controller_state(),
            request_pending: self.pending.is_some(),
            countdown: self.countdown.clone(),
            fragment_count: self.buffer.len(),
            buffered_bytes: self.buffer.total_bytes(),
            artifact: self.artifact.clone(),
            preview: self.preview.clone(),
        }
    }

    /// Take the events emitted since the last call
    pub fn drain_events(&mut self) -> Vec<RecorderEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Request and bind a capture stream in one go
    ///
    /// Holds the recorder for the whole platform round trip; event loops that
    /// must keep ticking meanwhile use [`request_capture`](Self::request_capture)
    /// and [`complete_capture`](Self::complete_capture) instead.
    pub async fn start_capture(
        &mut self,
        source: &dyn DisplayMediaSource,
        constraints: CaptureConstraints,
        events: MediaEventSender,
    ) -> AppResult<SessionId> {
        let session = self.request_capture()?;
        let result = source.get_display_media(constraints, session, events).await;
        self.complete_capture(session, result)?;
        Ok(session)
    }

    /// First half of a capture start: allocate a session and mark it pending
    pub fn request_capture(&mut self) -> AppResult<SessionId> {
        if !self.supported {
            let err = AppError::CapabilityUnsupported(
                "no screen capture provider available".to_string(),
            );
            self.report(&err);
            return Err(err);
        }
        if self.session.is_some() || self.pending.is_some() {
            tracing::warn!("Ignoring capture request: a session is already active");
            return Err(AppError::SessionActive);
        }

        self.next_session += 1;
        let session = SessionId(self.next_session);
        self.pending = Some(session);

        tracing::info!("Requesting capture stream for {}", session);
        self.outbox.push(RecorderEvent::CaptureRequested(session));
        Ok(session)
    }

    /// Second half of a capture start: bind the granted stream or record the failure
    pub fn complete_capture(
        &mut self,
        session: SessionId,
        result: CaptureResult<Box<dyn CaptureStream>>,
    ) -> AppResult<()> {
        if self.pending != Some(session) {
            tracing::debug!("Ignoring stale capture completion for {}", session);
            if let Ok(mut stream) = result {
                stream.stop_tracks();
            }
            return Err(AppError::CaptureRequestFailed(format!(
                "capture request for {} was cancelled",
                session
            )));
        }
        self.pending = None;

        let mut stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                let err = AppError::from(e);
                tracing::warn!("Capture request for {} failed: {}", session, err);
                self.report(&err);
                return Err(err);
            }
        };

        let controller = match stream.create_recorder(&self.mime_type) {
            Ok(controller) => controller,
            Err(e) => {
                stream.stop_tracks();
                let err = AppError::CaptureRequestFailed(e.to_string());
                tracing::warn!("Cannot record {} as {}: {}", session, self.mime_type, err);
                self.report(&err);
                return Err(err);
            }
        };

        // A new session starts from an empty buffer
        self.buffer.clear();
        self.accepting = None;
        self.assembled_fragments = 0;
        if let Some(url) = self.artifact.take() {
            self.artifacts.revoke(&url);
        }

        tracing::info!(
            "Capture granted for {} with {} track(s)",
            session,
            stream.tracks().len()
        );

        self.session = Some(ActiveSession {
            id: session,
            stream,
            controller,
            controller_state: ControllerState::Inactive,
        });
        self.countdown.arm();
        self.preview = Preview::hidden_live(session);
        self.outbox.push(RecorderEvent::CountdownStarted {
            session,
            value: self.countdown.value(),
        });

        self.after_transition();
        Ok(())
    }

    /// Advance the countdown by one period
    pub fn tick(&mut self) -> Tick {
        if self.session.is_none() {
            tracing::debug!("Ignoring countdown tick without a session");
            return Tick::Ignored;
        }

        let tick = self.countdown.tick();
        match tick {
            Tick::Ignored => tracing::debug!("Ignoring countdown tick, countdown not running"),
            Tick::Remaining(value) => {
                tracing::debug!("Countdown: {}", value);
                self.outbox.push(RecorderEvent::CountdownTick(value));
            }
            Tick::Expired => {
                if self.is_recording() {
                    tracing::debug!("Countdown expired while already recording");
                } else if let Err(e) = self.begin_recording() {
                    tracing::error!("Failed to begin recording: {}", e);
                }
            }
        }

        self.after_transition();
        tick
    }

    /// Start the controller of the bound session
    ///
    /// Returns whether recording began. Without a session, or with a
    /// controller that already started, nothing happens.
    pub fn begin_recording(&mut self) -> AppResult<bool> {
        let Some(active) = self.session.as_mut() else {
            tracing::debug!("begin_recording without a capture session");
            return Ok(false);
        };
        if active.controller_state != ControllerState::Inactive {
            tracing::debug!(
                "begin_recording ignored, controller is {:?}",
                active.controller_state
            );
            return Ok(false);
        }

        if let Err(e) = active.controller.start() {
            let err = AppError::Recording(e.to_string());
            self.report(&err);
            self.teardown();
            self.after_transition();
            return Err(err);
        }

        active.controller_state = ControllerState::Recording;
        let session = active.id;
        self.accepting = Some(session);
        self.countdown.finish();
        self.preview = Preview::live(session);
        self.recordings_started += 1;

        tracing::info!("Recording started for {}", session);
        self.outbox.push(RecorderEvent::RecordingStarted(session));

        self.after_transition();
        Ok(true)
    }

    /// Stop recording and release the capture
    ///
    /// Returns false when there was no session to stop.
    pub fn stop_and_save(&mut self) -> bool {
        let stopped = self.teardown().is_some();
        self.after_transition();
        stopped
    }

    /// Best-effort release when the host is going away
    ///
    /// Same teardown as [`stop_and_save`](Self::stop_and_save); in addition a
    /// pending capture request is cancelled and fragments still in flight are
    /// no longer accepted.
    pub fn window_close(&mut self) -> bool {
        if let Some(session) = self.pending.take() {
            tracing::info!("Cancelling pending capture request {}", session);
        }
        let closed = self.teardown().is_some();
        self.accepting = None;
        self.after_transition();
        closed
    }

    /// Feed a notification from the capture provider
    pub fn on_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::DataAvailable { session, data } => {
                if data.is_empty() {
                    tracing::debug!("Dropping empty fragment from {}", session);
                    return;
                }
                if self.accepting != Some(session) {
                    tracing::debug!(
                        "Ignoring {} byte fragment from inactive {}",
                        data.len(),
                        session
                    );
                    return;
                }
                self.buffer.push(data);
            }
            MediaEvent::RecorderStopped { session } => {
                if self.accepting != Some(session) {
                    tracing::debug!("Ignoring recorder stop from inactive {}", session);
                    return;
                }
                if self.session_id() == Some(session) {
                    tracing::warn!("Recorder for {} stopped on its own", session);
                    self.teardown();
                }
                self.accepting = None;
                self.after_transition();
                tracing::info!(
                    "Recording {} finalized with {} fragment(s)",
                    session,
                    self.buffer.len()
                );
                self.outbox.push(RecorderEvent::Finalized {
                    session,
                    artifact: self.artifact.clone(),
                });
                return;
            }
            MediaEvent::StreamEnded { session } => {
                if self.session_id() != Some(session) {
                    tracing::debug!("Ignoring stream end from inactive {}", session);
                    return;
                }
                tracing::warn!("Capture stream {} ended by the platform", session);
                self.outbox.push(RecorderEvent::StreamLost(session));
                self.teardown();
            }
        }
        self.after_transition();
    }

    /// Save the artifact behind `url` into `dir`
    pub fn download(&self, url: &ArtifactUrl, dir: &Path) -> AppResult<PathBuf> {
        let artifact = self
            .artifacts
            .get(url)
            .ok_or_else(|| AppError::ArtifactNotFound(url.to_string()))?;
        save_artifact(&artifact, dir, &self.filename)
    }

    /// Release the session: stop the controller, stop every track, reset
    /// the countdown and clear the live preview
    fn teardown(&mut self) -> Option<SessionId> {
        let mut active = self.session.take()?;

        if active.controller_state == ControllerState::Recording {
            active.controller.stop();
        }
        active.controller_state = ControllerState::Stopped;
        active.stream.stop_tracks();

        self.countdown.reset();
        self.preview = Preview::cleared();

        tracing::info!("Capture session {} closed", active.id);
        self.outbox.push(RecorderEvent::SessionClosed(active.id));
        Some(active.id)
    }

    /// Re-derive the artifact and preview from the current state
    fn after_transition(&mut self) {
        if self.is_recording() || self.buffer.is_empty() {
            return;
        }

        if self.artifact.is_none() || self.assembled_fragments != self.buffer.len() {
            let url = self
                .artifacts
                .create(self.buffer.concat(), &self.mime_type, self.buffer.len());
            if let Some(previous) = self.artifact.replace(url.clone()) {
                self.artifacts.revoke(&previous);
            }
            self.assembled_fragments = self.buffer.len();

            tracing::info!(
                "Assembled {} fragment(s), {} bytes into {}",
                self.buffer.len(),
                self.buffer.total_bytes(),
                url
            );
            self.outbox.push(RecorderEvent::ArtifactReady {
                url,
                size: self.buffer.total_bytes(),
                fragments: self.buffer.len(),
            });
        }

        if self.session.is_none() {
            if let Some(url) = &self.artifact {
                if self.preview.source != PreviewSource::Artifact(url.clone()) {
                    self.preview = Preview::artifact(url.clone());
                }
            }
        }
    }

    fn report(&mut self, err: &AppError) {
        self.outbox.push(RecorderEvent::Error(ErrorResponse::from(err)));
    }
}

//! Recording coordinator
//!
//! Runs the recorder on a single task. User commands, capture request
//! completions, countdown ticks and media events are handled one at a time,
//! and every event the recorder emits is broadcast to subscribers.

use super::machine::{Recorder, RecorderEvent, RecorderSnapshot};
use super::state::ArtifactUrl;
use crate::capture::{
    CaptureResult, CaptureStream, DisplayMediaSource, MediaEventReceiver, MediaEventSender,
    SessionId,
};
use crate::config::RecorderConfig;
use crate::utils::error::{AppError, AppResult, ErrorResponse};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Requests accepted by the coordinator
#[derive(Debug)]
pub enum Command {
    /// Ask the platform for a stream and arm the countdown
    StartCapture(oneshot::Sender<AppResult<SessionId>>),
    /// Skip the rest of the countdown
    BeginRecording(oneshot::Sender<AppResult<bool>>),
    StopAndSave(oneshot::Sender<bool>),
    /// Save an artifact; the output directory defaults to the configured one
    Download {
        url: ArtifactUrl,
        dir: Option<PathBuf>,
        reply: oneshot::Sender<AppResult<PathBuf>>,
    },
    Snapshot(oneshot::Sender<RecorderSnapshot>),
    /// The host is going away: tear down and exit the loop
    WindowClose,
}

/// Cloneable handle to a running coordinator
#[derive(Clone)]
pub struct RecorderHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<RecorderEvent>,
}

impl RecorderHandle {
    /// Subscribe to recorder events
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }

    pub async fn start_capture(&self) -> AppResult<SessionId> {
        self.request(Command::StartCapture).await?
    }

    pub async fn begin_recording(&self) -> AppResult<bool> {
        self.request(Command::BeginRecording).await?
    }

    pub async fn stop_and_save(&self) -> AppResult<bool> {
        self.request(Command::StopAndSave).await
    }

    pub async fn download(&self, url: ArtifactUrl, dir: Option<PathBuf>) -> AppResult<PathBuf> {
        self.request(|reply| Command::Download { url, dir, reply })
            .await?
    }

    pub async fn snapshot(&self) -> AppResult<RecorderSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Best-effort teardown; the coordinator exits afterwards
    pub async fn window_close(&self) {
        if self.commands.send(Command::WindowClose).await.is_err() {
            tracing::debug!("Coordinator already gone");
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| AppError::Recording("recorder is not running".to_string()))?;
        rx.await
            .map_err(|_| AppError::Recording("recorder dropped the request".to_string()))
    }
}

/// Default grace period for the last fragments after a stop
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

type CaptureCompletion = (SessionId, CaptureResult<Box<dyn CaptureStream>>);

/// Owns the recorder and drives it from its inputs
pub struct RecordingCoordinator {
    recorder: Recorder,
    config: RecorderConfig,
    source: Arc<dyn DisplayMediaSource>,
    commands: mpsc::Receiver<Command>,
    media_tx: MediaEventSender,
    media_rx: MediaEventReceiver,
    capture_tx: mpsc::UnboundedSender<CaptureCompletion>,
    capture_rx: mpsc::UnboundedReceiver<CaptureCompletion>,
    pending_reply: Option<(SessionId, oneshot::Sender<AppResult<SessionId>>)>,
    ticker: Option<Interval>,
    event_tx: broadcast::Sender<RecorderEvent>,
}

impl RecordingCoordinator {
    /// Create a coordinator and the handle that controls it
    pub fn new(config: RecorderConfig, source: Arc<dyn DisplayMediaSource>) -> (Self, RecorderHandle) {
        let supported = source.is_supported();
        tracing::info!(
            "Using capture provider '{}' (supported: {})",
            source.name(),
            supported
        );

        let (command_tx, commands) = mpsc::channel(32);
        let (event_tx, _) = broadcast::channel(100);
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let (capture_tx, capture_rx) = mpsc::unbounded_channel();

        let coordinator = Self {
            recorder: Recorder::new(&config, supported),
            config,
            source,
            commands,
            media_tx,
            media_rx,
            capture_tx,
            capture_rx,
            pending_reply: None,
            ticker: None,
            event_tx: event_tx.clone(),
        };
        let handle = RecorderHandle {
            commands: command_tx,
            events: event_tx,
        };
        (coordinator, handle)
    }

    /// Run on a new task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process inputs until a window close or until every handle is dropped
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::WindowClose) | None => {
                        self.recorder.window_close();
                        self.ticker = None;
                        self.publish();
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                Some((session, result)) = self.capture_rx.recv() => {
                    self.complete_capture(session, result);
                }
                Some(event) = self.media_rx.recv() => {
                    self.recorder.on_media_event(event);
                }
                _ = next_tick(&mut self.ticker) => {
                    self.recorder.tick();
                }
            }

            self.sync_ticker();
            self.publish();
        }

        // Grants that already arrived would be dropped with live tracks
        self.capture_rx.close();
        while let Ok((session, result)) = self.capture_rx.try_recv() {
            self.complete_capture(session, result);
        }
        if let Some((session, reply)) = self.pending_reply.take() {
            let _ = reply.send(Err(AppError::CaptureRequestFailed(format!(
                "capture request for {} was cancelled",
                session
            ))));
        }

        tracing::info!("Recording coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartCapture(reply) => match self.recorder.request_capture() {
                Ok(session) => {
                    let source = self.source.clone();
                    let constraints = self.config.constraints;
                    let events = self.media_tx.clone();
                    let done = self.capture_tx.clone();
                    tokio::spawn(async move {
                        let result = source.get_display_media(constraints, session, events).await;
                        if let Err(mpsc::error::SendError((session, Ok(mut stream)))) =
                            done.send((session, result))
                        {
                            tracing::info!("Coordinator gone, releasing capture for {}", session);
                            stream.stop_tracks();
                        }
                    });
                    self.pending_reply = Some((session, reply));
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::BeginRecording(reply) => {
                let _ = reply.send(self.recorder.begin_recording());
            }
            Command::StopAndSave(reply) => {
                let _ = reply.send(self.recorder.stop_and_save());
            }
            Command::Download { url, dir, reply } => {
                let dir = dir.unwrap_or_else(|| self.config.output_dir.clone());
                let _ = reply.send(self.recorder.download(&url, &dir));
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.recorder.snapshot());
            }
            Command::WindowClose => {}
        }
    }

    fn complete_capture(&mut self, session: SessionId, result: CaptureResult<Box<dyn CaptureStream>>) {
        let outcome = self.recorder.complete_capture(session, result).map(|_| session);
        match self.pending_reply.take() {
            Some((pending, reply)) if pending == session => {
                let _ = reply.send(outcome);
            }
            other => self.pending_reply = other,
        }
    }

    /// Keep an interval only while the countdown runs
    fn sync_ticker(&mut self) {
        let running = self.recorder.countdown().is_running();
        match (running, self.ticker.is_some()) {
            (true, false) => {
                let period = self.config.tick_interval();
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
            }
            (false, true) => self.ticker = None,
            _ => {}
        }
    }

    /// Broadcast pending events, saving finalized artifacts when configured
    fn publish(&mut self) {
        loop {
            let events = self.recorder.drain_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                if let RecorderEvent::Finalized {
                    artifact: Some(url),
                    ..
                } = &event
                {
                    if self.config.auto_download {
                        self.auto_download(url);
                    }
                }
                let _ = self.event_tx.send(event);
            }
        }
    }

    fn auto_download(&mut self, url: &ArtifactUrl) {
        let event = match self.recorder.download(url, &self.config.output_dir) {
            Ok(path) => RecorderEvent::Saved(path),
            Err(e) => {
                tracing::error!("Failed to save {}: {}", url, e);
                RecorderEvent::Error(ErrorResponse::from(e))
            }
        };
        let _ = self.event_tx.send(event);
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ScriptedDisplaySource;
    use crate::recorder::state::{ControllerState, PreviewSource};

    fn config(dir: &std::path::Path) -> RecorderConfig {
        RecorderConfig {
            output_dir: dir.to_path_buf(),
            ..RecorderConfig::default()
        }
    }

    async fn wait_for<F>(events: &mut broadcast::Receiver<RecorderEvent>, mut pred: F) -> RecorderEvent
    where
        F: FnMut(&RecorderEvent) -> bool,
    {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_recording_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            ScriptedDisplaySource::new().with_fragment_interval(Duration::from_millis(250)),
        );
        let (coordinator, handle) = RecordingCoordinator::new(config(dir.path()), source.clone());
        let task = coordinator.spawn();
        let mut events = handle.subscribe();

        let session = handle.start_capture().await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.countdown.is_running());
        assert!(!snapshot.preview.visible);

        wait_for(&mut events, |e| matches!(e, RecorderEvent::RecordingStarted(_))).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.controller, Some(ControllerState::Recording));
        assert!(snapshot.preview.visible);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handle.stop_and_save().await.unwrap());

        let saved = wait_for(&mut events, |e| matches!(e, RecorderEvent::Saved(_))).await;
        let RecorderEvent::Saved(path) = saved else {
            unreachable!()
        };
        assert_eq!(path, dir.path().join("stream.webm"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with(&format!("{}:fragment-000001", session)));

        let snapshot = handle.snapshot().await.unwrap();
        assert!(matches!(snapshot.preview.source, PreviewSource::Artifact(_)));
        assert!(snapshot.preview.controls);
        assert!(source.last_opened().unwrap().all_tracks_stopped());

        handle.window_close().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_ticks_once_per_second() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedDisplaySource::new());
        let (coordinator, handle) = RecordingCoordinator::new(config(dir.path()), source);
        let task = coordinator.spawn();
        let mut events = handle.subscribe();

        let started = Instant::now();
        handle.start_capture().await.unwrap();
        assert_eq!(
            wait_for(&mut events, |e| matches!(e, RecorderEvent::CountdownTick(_))).await,
            RecorderEvent::CountdownTick(2)
        );
        assert_eq!(
            wait_for(&mut events, |e| matches!(e, RecorderEvent::CountdownTick(_))).await,
            RecorderEvent::CountdownTick(1)
        );
        wait_for(&mut events, |e| matches!(e, RecorderEvent::RecordingStarted(_))).await;
        assert!(started.elapsed() >= Duration::from_secs(3));

        handle.window_close().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_served_while_request_pending() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            ScriptedDisplaySource::new().with_response_delay(Duration::from_secs(10)),
        );
        let (coordinator, handle) = RecordingCoordinator::new(config(dir.path()), source);
        let task = coordinator.spawn();

        let starter = handle.clone();
        let pending = tokio::spawn(async move { starter.start_capture().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.request_pending);
        assert!(matches!(handle.start_capture().await, Err(AppError::SessionActive)));

        assert!(pending.await.unwrap().is_ok());
        handle.window_close().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_close_releases_late_capture() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(
            ScriptedDisplaySource::new().with_response_delay(Duration::from_secs(10)),
        );
        let (coordinator, handle) = RecordingCoordinator::new(config(dir.path()), source.clone());
        let task = coordinator.spawn();

        let starter = handle.clone();
        let pending = tokio::spawn(async move { starter.start_capture().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.window_close().await;
        task.await.unwrap();
        assert!(matches!(
            pending.await.unwrap(),
            Err(AppError::CaptureRequestFailed(_))
        ));

        tokio::time::sleep(Duration::from_secs(20)).await;
        let stream = source.last_opened().unwrap();
        assert_eq!(stream.session(), SessionId(1));
        assert!(stream.all_tracks_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_recording_during_countdown() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedDisplaySource::new());
        let (coordinator, handle) = RecordingCoordinator::new(config(dir.path()), source.clone());
        let task = coordinator.spawn();
        let mut events = handle.subscribe();

        let session = handle.start_capture().await.unwrap();
        assert!(handle.snapshot().await.unwrap().countdown.is_running());

        assert!(handle.begin_recording().await.unwrap());
        assert!(!handle.begin_recording().await.unwrap());
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.is_recording());
        assert!(!snapshot.countdown.is_running());
        assert!(snapshot.preview.visible);

        // The countdown period passes without further ticks or starts
        tokio::time::sleep(Duration::from_secs(5)).await;
        let mut started = 0;
        while let Ok(event) = events.try_recv() {
            assert!(!matches!(event, RecorderEvent::CountdownTick(_)));
            if event == RecorderEvent::RecordingStarted(session) {
                started += 1;
            }
        }
        assert_eq!(started, 1);
        assert_eq!(
            source.last_opened().unwrap().recorder_state(),
            Some(ControllerState::Recording)
        );

        handle.window_close().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_source_rejects_start() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedDisplaySource::unsupported());
        let (coordinator, handle) = RecordingCoordinator::new(config(dir.path()), source);
        let task = coordinator.spawn();

        assert!(!handle.snapshot().await.unwrap().supported);
        assert!(matches!(
            handle.start_capture().await,
            Err(AppError::CapabilityUnsupported(_))
        ));

        handle.window_close().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_close_releases_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(ScriptedDisplaySource::new());
        let (coordinator, handle) = RecordingCoordinator::new(config(dir.path()), source.clone());
        let task = coordinator.spawn();

        handle.start_capture().await.unwrap();
        handle.window_close().await;
        task.await.unwrap();

        assert!(source.last_opened().unwrap().all_tracks_stopped());
        assert!(handle.snapshot().await.is_err());
    }
}

//! FFmpeg-backed display capture
//!
//! Captures the screen (and optionally an audio device) with an `ffmpeg`
//! child process that encodes straight to webm on stdout. Every read from
//! stdout becomes one fragment.

use super::traits::{
    CaptureConstraints, CaptureError, CaptureResult, CaptureStream, DisplayMediaSource,
    MediaEvent, MediaEventSender, MediaRecorder, SessionId, TrackInfo, TrackKind,
};
use crate::recorder::state::ControllerState;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;

/// Bytes read from ffmpeg per fragment at most
const FRAGMENT_CHUNK_SIZE: usize = 64 * 1024;

/// How long the capture probe may take before the request is considered failed
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// An ffmpeg input: demuxer name plus device string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    pub format: String,
    pub device: String,
}

impl InputSpec {
    pub fn new(format: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            device: device.into(),
        }
    }
}

/// FFmpeg capture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FfmpegSettings {
    /// ffmpeg executable, looked up on PATH when it is a bare name
    pub binary: PathBuf,

    /// Screen input; the platform default is used when unset
    pub video_input: Option<InputSpec>,

    /// Audio input; the platform default is used when unset
    pub audio_input: Option<InputSpec>,

    pub framerate: u32,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            video_input: None,
            audio_input: None,
            framerate: 30,
            video_codec: "libvpx".to_string(),
            audio_codec: "libopus".to_string(),
        }
    }
}

impl FfmpegSettings {
    fn video(&self) -> Option<InputSpec> {
        self.video_input.clone().or_else(default_video_input)
    }

    fn audio(&self) -> Option<InputSpec> {
        self.audio_input.clone().or_else(default_audio_input)
    }
}

/// Default screen grabber for the current platform
fn default_video_input() -> Option<InputSpec> {
    #[cfg(target_os = "linux")]
    {
        let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0.0".to_string());
        Some(InputSpec::new("x11grab", display))
    }

    #[cfg(target_os = "macos")]
    {
        Some(InputSpec::new("avfoundation", "Capture screen 0"))
    }

    #[cfg(target_os = "windows")]
    {
        Some(InputSpec::new("gdigrab", "desktop"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Default audio source for the current platform
///
/// Only PulseAudio has a usable default device name; elsewhere audio has to
/// be configured explicitly.
fn default_audio_input() -> Option<InputSpec> {
    #[cfg(target_os = "linux")]
    {
        Some(InputSpec::new("pulse", "default"))
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Resolve the ffmpeg executable
///
/// Bare names are looked up on PATH; anything with a directory part must
/// point at an existing file.
pub fn find_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    which::which(binary).ok()
}

/// Build the arguments of the recording process
pub fn build_record_args(
    settings: &FfmpegSettings,
    video: &InputSpec,
    audio: Option<&InputSpec>,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        video.format.clone(),
        "-framerate".to_string(),
        settings.framerate.to_string(),
        "-i".to_string(),
        video.device.clone(),
    ];

    if let Some(audio) = audio {
        args.extend([
            "-f".to_string(),
            audio.format.clone(),
            "-i".to_string(),
            audio.device.clone(),
        ]);
    }

    args.extend([
        "-c:v".to_string(),
        settings.video_codec.clone(),
        "-deadline".to_string(),
        "realtime".to_string(),
        "-cpu-used".to_string(),
        "8".to_string(),
        "-b:v".to_string(),
        "2M".to_string(),
    ]);

    if audio.is_some() {
        args.extend(["-c:a".to_string(), settings.audio_codec.clone()]);
    } else {
        args.push("-an".to_string());
    }

    args.extend(["-f".to_string(), "webm".to_string(), "pipe:1".to_string()]);
    args
}

/// Build the arguments that check the screen input can be opened
fn build_probe_args(video: &InputSpec) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        video.format.clone(),
        "-i".to_string(),
        video.device.clone(),
        "-frames:v".to_string(),
        "1".to_string(),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]
}

/// Display capture through ffmpeg
pub struct FfmpegDisplaySource {
    settings: FfmpegSettings,
}

impl FfmpegDisplaySource {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DisplayMediaSource for FfmpegDisplaySource {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_supported(&self) -> bool {
        self.settings.video().is_some() && find_binary(&self.settings.binary).is_some()
    }

    async fn get_display_media(
        &self,
        constraints: CaptureConstraints,
        session: SessionId,
        events: MediaEventSender,
    ) -> CaptureResult<Box<dyn CaptureStream>> {
        let binary = find_binary(&self.settings.binary).ok_or_else(|| {
            CaptureError::Unsupported(format!("{} not found", self.settings.binary.display()))
        })?;
        let video = self.settings.video().ok_or_else(|| {
            CaptureError::Unsupported("no screen grabber for this platform".to_string())
        })?;
        if !constraints.video {
            return Err(CaptureError::Platform(
                "display capture requires a video track".to_string(),
            ));
        }

        let audio = if constraints.audio {
            let audio = self.settings.audio();
            if audio.is_none() {
                tracing::warn!("No audio input configured, recording video only");
            }
            audio
        } else {
            None
        };

        tracing::info!("Probing screen input {:?} for {}", video, session);

        let probe = Command::new(&binary)
            .args(build_probe_args(&video))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(PROBE_TIMEOUT, probe)
            .await
            .map_err(|_| CaptureError::Platform("screen input probe timed out".to_string()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CaptureError::Denied(format!(
                "cannot open {} {}: {}",
                video.format,
                video.device,
                stderr.trim()
            )));
        }

        let mut tracks = vec![TrackInfo {
            id: format!("{}-video", session),
            kind: TrackKind::Video,
            label: format!("{} {}", video.format, video.device),
            live: true,
        }];
        if let Some(audio) = &audio {
            tracks.push(TrackInfo {
                id: format!("{}-audio", session),
                kind: TrackKind::Audio,
                label: format!("{} {}", audio.format, audio.device),
                live: true,
            });
        }

        let (control, _) = watch::channel(Control::Run);

        Ok(Box::new(FfmpegStream {
            session,
            binary,
            settings: self.settings.clone(),
            video,
            audio,
            tracks: Arc::new(Mutex::new(tracks)),
            control: Arc::new(control),
            events,
        }))
    }
}

/// Instruction for the process pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    /// Ask ffmpeg to finish the container and exit
    Finish,
    /// Tear the process down immediately
    Kill,
}

struct FfmpegStream {
    session: SessionId,
    binary: PathBuf,
    settings: FfmpegSettings,
    video: InputSpec,
    audio: Option<InputSpec>,
    tracks: Arc<Mutex<Vec<TrackInfo>>>,
    control: Arc<watch::Sender<Control>>,
    events: MediaEventSender,
}

impl CaptureStream for FfmpegStream {
    fn tracks(&self) -> Vec<TrackInfo> {
        self.tracks.lock().clone()
    }

    fn stop_tracks(&mut self) {
        // A recorder that is still finishing keeps running until ffmpeg exits
        if *self.control.borrow() == Control::Run {
            self.control.send_replace(Control::Kill);
        }
        for track in self.tracks.lock().iter_mut() {
            track.live = false;
        }
    }

    fn create_recorder(&mut self, mime_type: &str) -> CaptureResult<Box<dyn MediaRecorder>> {
        if !mime_type.starts_with("video/webm") {
            return Err(CaptureError::Platform(format!(
                "ffmpeg recorder only produces video/webm, not {}",
                mime_type
            )));
        }

        Ok(Box::new(FfmpegRecorder {
            session: self.session,
            binary: self.binary.clone(),
            args: build_record_args(&self.settings, &self.video, self.audio.as_ref()),
            tracks: self.tracks.clone(),
            control: self.control.clone(),
            state: Arc::new(Mutex::new(ControllerState::Inactive)),
            events: self.events.clone(),
        }))
    }
}

struct FfmpegRecorder {
    session: SessionId,
    binary: PathBuf,
    args: Vec<String>,
    tracks: Arc<Mutex<Vec<TrackInfo>>>,
    control: Arc<watch::Sender<Control>>,
    state: Arc<Mutex<ControllerState>>,
    events: MediaEventSender,
}

impl MediaRecorder for FfmpegRecorder {
    fn state(&self) -> ControllerState {
        *self.state.lock()
    }

    fn start(&mut self) -> CaptureResult<()> {
        if self.state() != ControllerState::Inactive {
            return Err(CaptureError::Platform(format!(
                "recorder cannot start from state {:?}",
                self.state()
            )));
        }
        if *self.control.borrow() != Control::Run {
            return Err(CaptureError::Platform("capture stream already stopped".to_string()));
        }

        tracing::info!("Starting FFmpeg recorder: {:?}", self.args);

        let child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CaptureError::Platform(format!("Failed to start FFmpeg: {}", e)))?;

        *self.state.lock() = ControllerState::Recording;

        tokio::spawn(pump(
            child,
            self.control.subscribe(),
            self.session,
            self.events.clone(),
            self.state.clone(),
            self.tracks.clone(),
        ));
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        if *state != ControllerState::Recording {
            return;
        }
        *state = ControllerState::Stopped;
        self.control.send_replace(Control::Finish);
    }
}

/// Forward ffmpeg output as fragments until the process exits
async fn pump(
    mut child: Child,
    mut control: watch::Receiver<Control>,
    session: SessionId,
    events: MediaEventSender,
    state: Arc<Mutex<ControllerState>>,
    tracks: Arc<Mutex<Vec<TrackInfo>>>,
) {
    let Some(mut stdout) = child.stdout.take() else {
        tracing::error!("FFmpeg stdout unavailable for {}", session);
        let _ = child.start_kill();
        *state.lock() = ControllerState::Stopped;
        let _ = events.send(MediaEvent::StreamEnded { session });
        let _ = events.send(MediaEvent::RecorderStopped { session });
        return;
    };
    let mut stdin = child.stdin.take();
    let mut buffer = vec![0u8; FRAGMENT_CHUNK_SIZE];
    let mut requested_exit = false;
    let mut control_open = true;

    loop {
        tokio::select! {
            read = stdout.read(&mut buffer) => match read {
                Ok(0) => break,
                Ok(n) => {
                    let _ = events.send(MediaEvent::DataAvailable {
                        session,
                        data: buffer[..n].to_vec(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to read FFmpeg output for {}: {}", session, e);
                    break;
                }
            },
            changed = control.changed(), if control_open => {
                if changed.is_err() {
                    control_open = false;
                    continue;
                }
                let instruction = *control.borrow_and_update();
                match instruction {
                    Control::Run => {}
                    Control::Finish => {
                        requested_exit = true;
                        if let Some(mut pipe) = stdin.take() {
                            let _ = pipe.write_all(b"q").await;
                            let _ = pipe.flush().await;
                        }
                    }
                    Control::Kill => {
                        requested_exit = true;
                        if let Err(e) = child.start_kill() {
                            tracing::debug!("FFmpeg already gone for {}: {}", session, e);
                        }
                    }
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) => tracing::info!("FFmpeg recorder for {} exited with {}", session, status),
        Err(e) => tracing::warn!("Failed to wait for FFmpeg for {}: {}", session, e),
    }

    *state.lock() = ControllerState::Stopped;
    if !requested_exit {
        for track in tracks.lock().iter_mut() {
            track.live = false;
        }
        let _ = events.send(MediaEvent::StreamEnded { session });
    }
    let _ = events.send(MediaEvent::RecorderStopped { session });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_args_with_audio() {
        let settings = FfmpegSettings::default();
        let video = InputSpec::new("x11grab", ":1.0");
        let audio = InputSpec::new("pulse", "default");
        let args = build_record_args(&settings, &video, Some(&audio));

        let joined = args.join(" ");
        assert!(joined.contains("-f x11grab -framerate 30 -i :1.0"));
        assert!(joined.contains("-f pulse -i default"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.ends_with("-f webm pipe:1"));
    }

    #[test]
    fn test_record_args_video_only() {
        let settings = FfmpegSettings {
            framerate: 15,
            ..FfmpegSettings::default()
        };
        let video = InputSpec::new("gdigrab", "desktop");
        let args = build_record_args(&settings, &video, None);

        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-c:a".to_string()));
        assert!(args.join(" ").contains("-framerate 15"));
    }

    #[test]
    fn test_probe_args_grab_single_frame() {
        let args = build_probe_args(&InputSpec::new("x11grab", ":0.0"));
        assert_eq!(args.join(" "), "-hide_banner -loglevel error -f x11grab -i :0.0 -frames:v 1 -f null -");
    }

    #[test]
    fn test_find_binary_missing_path() {
        assert!(find_binary(Path::new("/nonexistent/dir/ffmpeg")).is_none());
    }

    #[test]
    fn test_find_binary_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("ffmpeg");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(find_binary(&fake), Some(fake));
    }

    #[test]
    fn test_unresolvable_binary_is_unsupported() {
        let source = FfmpegDisplaySource::new(FfmpegSettings {
            binary: PathBuf::from("/nonexistent/dir/ffmpeg"),
            ..FfmpegSettings::default()
        });
        assert!(!source.is_supported());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_binary_bare_name_on_path() {
        let found = find_binary(Path::new("sh")).unwrap();
        assert!(found.is_absolute());
        assert!(find_binary(Path::new("no-such-ffmpeg-binary")).is_none());
    }

    /// Stand-in for ffmpeg: the probe always succeeds and a recording runs
    /// `record` in place of the encoder
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, record: &str) -> FfmpegSettings {
        use std::os::unix::fs::PermissionsExt;

        let binary = dir.join("ffmpeg");
        let script = format!(
            "#!/bin/sh\ncase \"$*\" in *-frames:v*) exit 0 ;; esac\n{}\n",
            record
        );
        std::fs::write(&binary, script).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        FfmpegSettings {
            binary,
            video_input: Some(InputSpec::new("lavfi", "testsrc")),
            ..FfmpegSettings::default()
        }
    }

    #[cfg(unix)]
    async fn open_stream(
        settings: FfmpegSettings,
    ) -> (Box<dyn CaptureStream>, tokio::sync::mpsc::UnboundedReceiver<MediaEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let constraints = CaptureConstraints {
            video: true,
            audio: false,
        };
        let stream = FfmpegDisplaySource::new(settings)
            .get_display_media(constraints, SessionId(1), tx)
            .await
            .unwrap();
        (stream, rx)
    }

    #[cfg(unix)]
    async fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<MediaEvent>) -> MediaEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("no media event in time")
            .unwrap()
    }

    #[cfg(unix)]
    fn fragment(data: &str) -> MediaEvent {
        MediaEvent::DataAvailable {
            session: SessionId(1),
            data: data.as_bytes().to_vec(),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_asks_ffmpeg_to_finish() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fake_ffmpeg(dir.path(), "printf head\nread -r reply\nprintf tail");
        let (mut stream, mut rx) = open_stream(settings).await;
        assert_eq!(stream.tracks().len(), 1);

        let mut recorder = stream.create_recorder("video/webm").unwrap();
        recorder.start().unwrap();
        assert_eq!(recorder.state(), ControllerState::Recording);
        assert_eq!(next_event(&mut rx).await, fragment("head"));

        recorder.stop();
        assert_eq!(recorder.state(), ControllerState::Stopped);
        assert_eq!(next_event(&mut rx).await, fragment("tail"));
        assert_eq!(
            next_event(&mut rx).await,
            MediaEvent::RecorderStopped {
                session: SessionId(1)
            }
        );
        assert!(stream.tracks().iter().all(|t| t.live));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unexpected_exit_ends_stream() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fake_ffmpeg(dir.path(), "printf head\nexit 3");
        let (mut stream, mut rx) = open_stream(settings).await;

        let mut recorder = stream.create_recorder("video/webm").unwrap();
        recorder.start().unwrap();

        assert_eq!(next_event(&mut rx).await, fragment("head"));
        assert_eq!(
            next_event(&mut rx).await,
            MediaEvent::StreamEnded {
                session: SessionId(1)
            }
        );
        assert_eq!(
            next_event(&mut rx).await,
            MediaEvent::RecorderStopped {
                session: SessionId(1)
            }
        );
        assert_eq!(recorder.state(), ControllerState::Stopped);
        assert!(stream.tracks().iter().all(|t| !t.live));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_tracks_kills_running_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fake_ffmpeg(dir.path(), "printf head\nexec sleep 30");
        let (mut stream, mut rx) = open_stream(settings).await;

        let mut recorder = stream.create_recorder("video/webm").unwrap();
        recorder.start().unwrap();
        assert_eq!(next_event(&mut rx).await, fragment("head"));

        stream.stop_tracks();
        assert!(stream.tracks().iter().all(|t| !t.live));
        assert_eq!(
            next_event(&mut rx).await,
            MediaEvent::RecorderStopped {
                session: SessionId(1)
            }
        );
        assert_eq!(recorder.state(), ControllerState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_recorder_needs_live_stream_and_webm() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fake_ffmpeg(dir.path(), "exec sleep 30");
        let (mut stream, _rx) = open_stream(settings).await;

        assert!(stream.create_recorder("video/mp4").is_err());

        let mut recorder = stream.create_recorder("video/webm;codecs=vp8").unwrap();
        stream.stop_tracks();
        assert!(recorder.start().is_err());
        assert_eq!(recorder.state(), ControllerState::Inactive);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_probe_denies_capture() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("ffmpeg");
        std::fs::write(&binary, "#!/bin/sh\necho 'cannot open display' >&2\nexit 1\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = FfmpegDisplaySource::new(FfmpegSettings {
            binary,
            video_input: Some(InputSpec::new("lavfi", "testsrc")),
            ..FfmpegSettings::default()
        })
        .get_display_media(CaptureConstraints::default(), SessionId(1), tx)
        .await;

        match result {
            Err(CaptureError::Denied(reason)) => assert!(reason.contains("cannot open display")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("probe failure should deny the capture"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crashed_capture_is_finalized_once() {
        use crate::config::RecorderConfig;
        use crate::recorder::{RecorderEvent, RecordingCoordinator};

        let dir = tempfile::tempdir().unwrap();
        let config = RecorderConfig {
            countdown_seconds: 1,
            tick_interval_ms: 10,
            output_dir: dir.path().to_path_buf(),
            constraints: CaptureConstraints {
                video: true,
                audio: false,
            },
            ffmpeg: fake_ffmpeg(dir.path(), "printf head\nexit 1"),
            ..RecorderConfig::default()
        };
        let source = Arc::new(FfmpegDisplaySource::new(config.ffmpeg.clone()));
        let (coordinator, handle) = RecordingCoordinator::new(config, source);
        let task = coordinator.spawn();
        let mut events = handle.subscribe();

        let session = handle.start_capture().await.unwrap();
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("recording never finalized")
                .unwrap();
            let done = matches!(event, RecorderEvent::Finalized { .. });
            seen.push(event);
            if done {
                break;
            }
        }

        assert!(seen.contains(&RecorderEvent::RecordingStarted(session)));
        assert!(seen.contains(&RecorderEvent::StreamLost(session)));
        let saved = dir.path().join("stream.webm");
        assert!(seen.contains(&RecorderEvent::Saved(saved.clone())));
        assert_eq!(std::fs::read(&saved).unwrap(), b"head");

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.session, None);
        assert_eq!(snapshot.fragment_count, 1);
        assert!(snapshot.artifact.is_some());
        assert!(!handle.stop_and_save().await.unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(event) = events.try_recv() {
            assert!(
                !matches!(event, RecorderEvent::Finalized { .. }),
                "recording finalized twice"
            );
        }

        handle.window_close().await;
        task.await.unwrap();
    }
}

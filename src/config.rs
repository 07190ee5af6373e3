//! Recorder configuration
//!
//! Every field has a default, so a configuration file only needs the values it
//! changes. Files are JSON with camelCase keys.

use crate::capture::{CaptureConstraints, FfmpegSettings};
use crate::utils::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecorderConfig {
    /// Countdown start value, in ticks
    pub countdown_seconds: u32,

    /// Countdown tick period in milliseconds
    pub tick_interval_ms: u64,

    /// Container format requested from the recording controller
    pub mime_type: String,

    /// Name of the saved file
    pub filename: String,

    /// Directory downloads are saved to
    pub output_dir: PathBuf,

    /// Save the artifact as soon as the recording has been flushed
    pub auto_download: bool,

    /// What to request from the capture provider
    pub constraints: CaptureConstraints,

    pub ffmpeg: FfmpegSettings,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            countdown_seconds: 3,
            tick_interval_ms: 1000,
            mime_type: "video/webm".to_string(),
            filename: "stream.webm".to_string(),
            output_dir: PathBuf::from("."),
            auto_download: true,
            constraints: CaptureConstraints::default(),
            ffmpeg: FfmpegSettings::default(),
        }
    }
}

impl RecorderConfig {
    /// Load a configuration file
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: RecorderConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded recorder configuration from {:?}", path);
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.countdown_seconds == 0 {
            return Err(AppError::Config("countdownSeconds must be at least 1".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(AppError::Config("tickIntervalMs must be at least 1".to_string()));
        }
        if self.mime_type.is_empty() {
            return Err(AppError::Config("mimeType must not be empty".to_string()));
        }
        if self.filename.is_empty() || Path::new(&self.filename).file_name().is_none() {
            return Err(AppError::Config(format!("invalid filename: {:?}", self.filename)));
        }
        if !self.constraints.video {
            return Err(AppError::Config("screen capture requires video".to_string()));
        }
        Ok(())
    }
}

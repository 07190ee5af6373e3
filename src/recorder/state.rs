//! Recording state management
//!
//! Defines the controller state, the pre-roll countdown and the preview
//! binding.

use crate::capture::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the recording controller bound to a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    /// Created but not started
    #[default]
    Inactive,
    /// Emitting fragments
    Recording,
    /// Stopped; may still flush its last fragment
    Stopped,
}

/// Lifecycle of the countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountdownStatus {
    #[default]
    Idle,
    Running,
    Expired,
}

/// Result of one countdown tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// The countdown was not running
    Ignored,
    /// Still counting, with the value now shown
    Remaining(u32),
    /// The terminal tick; fires once per arming
    Expired,
}

/// Pre-roll countdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    initial: u32,
    value: u32,
    status: CountdownStatus,
}

impl Countdown {
    /// Create an idle countdown starting at `initial` (at least 1)
    pub fn new(initial: u32) -> Self {
        let initial = initial.max(1);
        Self {
            initial,
            value: initial,
            status: CountdownStatus::Idle,
        }
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn status(&self) -> CountdownStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == CountdownStatus::Running
    }

    /// Start counting down from the initial value
    pub fn arm(&mut self) {
        self.value = self.initial;
        self.status = CountdownStatus::Running;
    }

    /// Advance by one period
    pub fn tick(&mut self) -> Tick {
        if self.status != CountdownStatus::Running {
            return Tick::Ignored;
        }
        if self.value > 1 {
            self.value -= 1;
            Tick::Remaining(self.value)
        } else {
            self.status = CountdownStatus::Expired;
            self.value = self.initial;
            Tick::Expired
        }
    }

    /// End a running countdown early, as when recording is started by hand
    pub fn finish(&mut self) {
        if self.status == CountdownStatus::Running {
            self.status = CountdownStatus::Expired;
            self.value = self.initial;
        }
    }

    /// Back to idle at the initial value
    pub fn reset(&mut self) {
        self.value = self.initial;
        self.status = CountdownStatus::Idle;
    }
}

/// Temporary, revocable reference to an assembled artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactUrl(pub String);

impl fmt::Display for ArtifactUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the preview surface is showing
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "source", rename_all = "lowercase")]
pub enum PreviewSource {
    #[default]
    None,
    /// Passthrough of the live capture stream
    Live(SessionId),
    /// Playback of an assembled artifact
    Artifact(ArtifactUrl),
}

/// Preview binding and presentation flags
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub source: PreviewSource,
    /// Zero opacity while false
    pub visible: bool,
    pub autoplay: bool,
    /// Scrubbing/playback controls
    pub controls: bool,
}

impl Preview {
    /// Live stream bound but hidden, as during the countdown
    pub fn hidden_live(session: SessionId) -> Self {
        Self {
            source: PreviewSource::Live(session),
            visible: false,
            autoplay: true,
            controls: false,
        }
    }

    pub fn live(session: SessionId) -> Self {
        Self {
            visible: true,
            ..Self::hidden_live(session)
        }
    }

    pub fn artifact(url: ArtifactUrl) -> Self {
        Self {
            source: PreviewSource::Artifact(url),
            visible: true,
            autoplay: false,
            controls: true,
        }
    }

    /// Nothing bound
    pub fn cleared() -> Self {
        Self {
            visible: true,
            ..Self::default()
        }
    }
}

//! Derived view of the recorder
//!
//! Nothing here holds state: every view is computed from a
//! [`RecorderSnapshot`] after each transition.

use super::footer::Footer;
use crate::recorder::state::{ArtifactUrl, Preview, PreviewSource};
use crate::recorder::RecorderSnapshot;
use serde::Serialize;
use std::fmt;

pub const TITLE: &str = "Screen Recorder";
pub const UNSUPPORTED_NOTICE: &str = "Screen recording is not supported in this environment";

/// The single toggle button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryAction {
    Start,
    Save,
}

impl PrimaryAction {
    pub fn label(&self) -> &'static str {
        match self {
            PrimaryAction::Start => "Start Recording",
            PrimaryAction::Save => "Save Recording",
        }
    }
}

/// The interactive panel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    pub title: &'static str,
    pub primary: PrimaryAction,
    pub preview: Preview,
    /// Value shown over the preview while the countdown runs
    pub countdown_overlay: Option<u32>,
    /// Artifact offered for download
    pub download: Option<ArtifactUrl>,
}

/// What the recorder surface shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "view", rename_all = "camelCase")]
pub enum RecorderView {
    /// Capture is not available; no controls at all
    Unsupported { notice: &'static str },
    Interactive(Panel),
}

impl RecorderView {
    pub fn derive(snapshot: &RecorderSnapshot) -> Self {
        if !snapshot.supported {
            return RecorderView::Unsupported {
                notice: UNSUPPORTED_NOTICE,
            };
        }

        let recording = snapshot.is_recording();
        let countdown_running = snapshot.countdown.is_running();

        let mut preview = snapshot.preview.clone();
        if countdown_running {
            preview.visible = false;
        }

        RecorderView::Interactive(Panel {
            title: TITLE,
            primary: if recording {
                PrimaryAction::Save
            } else {
                PrimaryAction::Start
            },
            preview,
            countdown_overlay: (countdown_running && snapshot.countdown.value() > 0)
                .then(|| snapshot.countdown.value()),
            download: if recording {
                None
            } else {
                snapshot.artifact.clone()
            },
        })
    }

    pub fn panel(&self) -> Option<&Panel> {
        match self {
            RecorderView::Interactive(panel) => Some(panel),
            RecorderView::Unsupported { .. } => None,
        }
    }

    /// Actions the user can trigger from this view
    pub fn controls(&self) -> Vec<&'static str> {
        match self.panel() {
            None => Vec::new(),
            Some(panel) => {
                let mut controls = vec![panel.primary.label()];
                if panel.download.is_some() {
                    controls.push("Download");
                }
                controls
            }
        }
    }
}

impl fmt::Display for RecorderView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let panel = match self {
            RecorderView::Unsupported { notice } => return writeln!(f, "{}", notice),
            RecorderView::Interactive(panel) => panel,
        };

        writeln!(f, "{}", panel.title)?;
        writeln!(f, "[ {} ]", panel.primary.label())?;

        let source = match &panel.preview.source {
            PreviewSource::None => "nothing".to_string(),
            PreviewSource::Live(session) => format!("live {}", session),
            PreviewSource::Artifact(url) => format!("recording {}", url),
        };
        let visibility = if panel.preview.visible { "" } else { " (hidden)" };
        writeln!(f, "preview: {}{}", source, visibility)?;

        if let Some(value) = panel.countdown_overlay {
            writeln!(f, "recording in {}...", value)?;
        }
        if let Some(url) = &panel.download {
            writeln!(f, "[ Download ] {}", url)?;
        }
        Ok(())
    }
}

/// Full page text: the recorder followed by the footer
///
/// When capture is unsupported only the notice is rendered.
pub fn render_page(snapshot: &RecorderSnapshot, footer: &Footer) -> String {
    let view = RecorderView::derive(snapshot);
    match view {
        RecorderView::Unsupported { .. } => view.to_string(),
        RecorderView::Interactive(_) => format!("{}\n{}", view, footer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SessionId;
    use crate::recorder::state::{ControllerState, Countdown};

    fn idle() -> RecorderSnapshot {
        RecorderSnapshot {
            supported: true,
            session: None,
            controller: None,
            request_pending: false,
            countdown: Countdown::new(3),
            fragment_count: 0,
            buffered_bytes: 0,
            artifact: None,
            preview: Preview::cleared(),
        }
    }

    #[test]
    fn test_unsupported_shows_only_notice() {
        let snapshot = RecorderSnapshot {
            supported: false,
            ..idle()
        };
        let view = RecorderView::derive(&snapshot);
        assert_eq!(
            view,
            RecorderView::Unsupported {
                notice: UNSUPPORTED_NOTICE
            }
        );
        assert!(view.controls().is_empty());
        assert_eq!(render_page(&snapshot, &Footer::default()), format!("{}\n", UNSUPPORTED_NOTICE));
    }

    #[test]
    fn test_countdown_hides_preview_and_shows_overlay() {
        let mut countdown = Countdown::new(3);
        countdown.arm();
        let snapshot = RecorderSnapshot {
            session: Some(SessionId(1)),
            controller: Some(ControllerState::Inactive),
            countdown,
            preview: Preview::hidden_live(SessionId(1)),
            ..idle()
        };

        let view = RecorderView::derive(&snapshot);
        let panel = view.panel().unwrap();
        assert_eq!(panel.primary, PrimaryAction::Start);
        assert_eq!(panel.countdown_overlay, Some(3));
        assert!(!panel.preview.visible);
        assert!(view.to_string().contains("recording in 3..."));
    }

    #[test]
    fn test_recording_offers_save_without_download() {
        let snapshot = RecorderSnapshot {
            session: Some(SessionId(1)),
            controller: Some(ControllerState::Recording),
            preview: Preview::live(SessionId(1)),
            fragment_count: 2,
            ..idle()
        };
        let view = RecorderView::derive(&snapshot);
        let panel = view.panel().unwrap();
        assert_eq!(panel.primary, PrimaryAction::Save);
        assert_eq!(panel.countdown_overlay, None);
        assert!(panel.preview.visible);
        assert_eq!(view.controls(), vec!["Save Recording"]);
    }

    #[test]
    fn test_download_visible_only_with_artifact() {
        assert_eq!(RecorderView::derive(&idle()).controls(), vec!["Start Recording"]);

        let url = ArtifactUrl("blob:screen-recorder/abc".into());
        let snapshot = RecorderSnapshot {
            artifact: Some(url.clone()),
            preview: Preview::artifact(url.clone()),
            ..idle()
        };
        let view = RecorderView::derive(&snapshot);
        assert_eq!(view.panel().unwrap().download, Some(url));
        assert_eq!(view.controls(), vec!["Start Recording", "Download"]);

        let page = render_page(&snapshot, &Footer::default());
        assert!(page.contains("[ Download ] blob:screen-recorder/abc"));
        assert!(page.contains(env!("CARGO_PKG_NAME")));
    }
}

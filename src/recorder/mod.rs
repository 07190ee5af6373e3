//! Recording system module
//!
//! - Recorder state machine owning the session, countdown and fragment buffer
//! - RecordingCoordinator driving the recorder from a single task
//! - Artifact assembly and saving

pub mod artifact;
pub mod buffer;
pub mod coordinator;
pub mod machine;
pub mod state;

pub use coordinator::{Command, RecorderHandle, RecordingCoordinator};
pub use machine::{Recorder, RecorderEvent, RecorderSnapshot};
pub use state::{ArtifactUrl, ControllerState, Countdown, CountdownStatus, Preview, PreviewSource};

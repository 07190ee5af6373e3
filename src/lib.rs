//! Screen Recorder - capture the screen, count down, record, save as webm.
//!
//! This is the library crate behind the `screen-recorder` binary. It provides
//! the capture providers, the recorder state machine and its coordinator, and
//! the derived view.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod ui;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "screen_recorder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting Screen Recorder v{}", env!("CARGO_PKG_VERSION"));
}

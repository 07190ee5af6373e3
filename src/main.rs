use anyhow::{bail, Context};
use clap::Parser;
use screen_recorder::capture::{DisplayMediaSource, FfmpegDisplaySource, ScriptedDisplaySource};
use screen_recorder::config::RecorderConfig;
use screen_recorder::recorder::coordinator::FLUSH_TIMEOUT;
use screen_recorder::recorder::{RecorderEvent, RecorderHandle, RecordingCoordinator};
use screen_recorder::ui::{render_page, Footer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Parser)]
#[command(name = "screen-recorder")]
#[command(version)]
#[command(about = "Record the screen to a webm file after a short countdown")]
struct Args {
    /// JSON configuration file
    #[arg(long, env = "SCREEN_RECORDER_CONFIG")]
    config: Option<PathBuf>,

    /// Directory the recording is saved to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Countdown length in seconds
    #[arg(long)]
    countdown: Option<u32>,

    /// Stop and save after this many seconds of recording
    #[arg(long)]
    duration: Option<u64>,

    /// Do not capture audio
    #[arg(long)]
    no_audio: bool,

    /// Record synthetic fragments instead of the screen
    #[arg(long)]
    simulate: bool,
}

fn load_config(args: &Args) -> anyhow::Result<RecorderConfig> {
    let mut config = match &args.config {
        Some(path) => RecorderConfig::from_file(path)
            .with_context(|| format!("Unable to import configuration from {:?}", path))?,
        None => RecorderConfig::default(),
    };

    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(countdown) = args.countdown {
        config.countdown_seconds = countdown;
    }
    if args.no_audio {
        config.constraints.audio = false;
    }
    config.validate()?;
    Ok(config)
}

/// Wait for the first event matching `pred`
async fn wait_for<F>(events: &mut broadcast::Receiver<RecorderEvent>, mut pred: F) -> Option<RecorderEvent>
where
    F: FnMut(&RecorderEvent) -> bool,
{
    loop {
        match events.recv().await {
            Ok(event) if pred(&event) => return Some(event),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {} recorder events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn shutdown(handle: &RecorderHandle, task: tokio::task::JoinHandle<()>) -> anyhow::Result<()> {
    handle.window_close().await;
    task.await.context("Recording coordinator panicked")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    screen_recorder::init_tracing();

    let args = Args::parse();
    let config = load_config(&args)?;

    let source: Arc<dyn DisplayMediaSource> = if args.simulate {
        Arc::new(ScriptedDisplaySource::new().with_fragment_interval(Duration::from_millis(500)))
    } else {
        Arc::new(FfmpegDisplaySource::new(config.ffmpeg.clone()))
    };

    let footer = Footer::default();
    let (coordinator, handle) = RecordingCoordinator::new(config, source);
    let task = coordinator.spawn();
    let mut events = handle.subscribe();

    let snapshot = handle.snapshot().await?;
    if !snapshot.supported {
        eprint!("{}", render_page(&snapshot, &footer));
        shutdown(&handle, task).await?;
        bail!("screen recording is not supported here");
    }

    if let Err(e) = handle.start_capture().await {
        tracing::error!("{}", e);
        shutdown(&handle, task).await?;
        return Err(e.into());
    }
    print!("{}", render_page(&handle.snapshot().await?, &footer));

    // Countdown
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RecorderEvent::CountdownTick(value)) => println!("recording in {}...", value),
                Ok(RecorderEvent::RecordingStarted(session)) => {
                    println!("Recording {}, press Ctrl-C to save", session);
                    break;
                }
                Ok(RecorderEvent::SessionClosed(_)) | Err(broadcast::error::RecvError::Closed) => {
                    shutdown(&handle, task).await?;
                    bail!("capture ended before recording started");
                }
                _ => {}
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Cancelled during countdown");
                handle.stop_and_save().await?;
                return shutdown(&handle, task).await;
            }
        }
    }

    let limit = args.duration.map(Duration::from_secs);
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = async {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        } => {}
        _ = wait_for(&mut events, |e| matches!(e, RecorderEvent::StreamLost(_))) => {
            tracing::warn!("Capture ended by the platform");
        }
    }

    handle.stop_and_save().await?;

    // With auto download the coordinator saves before announcing the flush
    let mut saved: Option<PathBuf> = None;
    let finalized = tokio::time::timeout(
        FLUSH_TIMEOUT,
        wait_for(&mut events, |e| {
            if let RecorderEvent::Saved(path) = e {
                saved = Some(path.clone());
            }
            matches!(e, RecorderEvent::Finalized { .. })
        }),
    )
    .await;

    match finalized {
        Ok(Some(RecorderEvent::Finalized {
            artifact: Some(url),
            ..
        })) => {
            let path = match saved {
                Some(path) => path,
                None => handle.download(url, None).await?,
            };
            println!("Saved {}", path.display());
        }
        Ok(_) => println!("Nothing was recorded"),
        Err(_) => tracing::warn!("Recorder did not flush within {:?}", FLUSH_TIMEOUT),
    }

    print!("{}", render_page(&handle.snapshot().await?, &footer));
    shutdown(&handle, task).await
}

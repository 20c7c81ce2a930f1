//! # VisiFruit Engine Binary
//!
//! Captures frames, obtains detections from the remote GPU service (or the
//! local fallback), and schedules labeler activations for every fruit
//! cluster.
//!
//! # Usage
//!
//! ```bash
//! # Camera frames from a directory, remote inference per config
//! visifruit_engine --config config/visifruit.toml --frames /var/lib/visifruit/frames
//!
//! # No GPU server, scripted detections
//! visifruit_engine --config config/visifruit.toml --simulate --replay demos/replay.json
//!
//! # Verbose JSON logs
//! visifruit_engine -c config/visifruit.toml -s -v --json
//! ```
//!
//! `SIGHUP` reloads the kinematics from the same config file; `Ctrl-C`
//! stops the engine and prints a final telemetry snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use visifruit::config::{EngineConfig, LogLevel};
use visifruit::kinematics::SharedKinematics;
use visifruit_engine::capture::run_capture;
use visifruit_engine::{
    DirectoryFrameSource, Engine, EngineError, FrameSlot, LogDispatcher, SyntheticFrameSource,
    Telemetry,
};
use visifruit_inference::{DefaultInferenceClient, LocalModelRegistry};

/// Synthetic frame size when no frame directory is given.
const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;

/// Interval between telemetry log lines.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// VisiFruit Engine - fruit position detection and labeler synchronization
#[derive(Parser, Debug)]
#[command(name = "visifruit_engine")]
#[command(version)]
#[command(about = "Fruit position detection and temporal synchronization engine")]
#[command(long_about = None)]
struct Args {
    /// Path to the engine configuration file.
    #[arg(short, long, default_value = "/etc/visifruit/visifruit.toml")]
    config: PathBuf,

    /// Directory of PNG/JPEG frames to cycle through as the camera.
    #[arg(short, long, value_name = "DIR")]
    frames: Option<PathBuf>,

    /// Disable the remote service and the configured local model; detections
    /// come from `--replay` or not at all.
    #[arg(short = 's', long)]
    simulate: bool,

    /// Replay script served by the local `replay` model.
    #[arg(short, long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("Engine startup failed: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = EngineConfig::load_validated(&args.config);
    let log_level = loaded
        .as_ref()
        .map(|c| c.shared.log_level)
        .unwrap_or_default();
    setup_tracing(&args, log_level);

    let mut config = loaded.map_err(|e| format!("{}: {e}", args.config.display()))?;
    apply_overrides(&args, &mut config);

    info!(
        "VisiFruit engine v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(args, config))?;

    info!("VisiFruit engine shutdown complete");
    Ok(())
}

/// Command-line switches that override the file.
fn apply_overrides(args: &Args, config: &mut EngineConfig) {
    if args.simulate {
        info!("Simulation mode: remote inference disabled");
        config.inference.remote_enabled = false;
        config.inference.local_model = Some("empty".to_string());
    }
    if let Some(script) = &args.replay {
        info!("Replaying detections from {}", script.display());
        config.inference.local_model = Some("replay".to_string());
        config.inference.local_model_path = Some(script.clone());
    }
}

async fn serve(args: Args, config: EngineConfig) -> Result<(), EngineError> {
    let kinematics = Arc::new(SharedKinematics::new(config.kinematics.clone())?);
    let registry = LocalModelRegistry::with_builtin();
    let client = Arc::new(DefaultInferenceClient::from_config(
        config.inference.clone(),
        &registry,
    )?);
    let telemetry = Arc::new(Telemetry::new(config.pipeline.history_size));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Capture.
    let (slot, mut frames) = FrameSlot::new();
    let fps = config.pipeline.capture_fps;
    let capture = match &args.frames {
        Some(dir) => {
            let source = DirectoryFrameSource::open(dir)?;
            tokio::spawn(run_capture(source, slot, fps, shutdown_rx.clone()))
        }
        None => {
            let source = SyntheticFrameSource::new(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT);
            tokio::spawn(run_capture(source, slot, fps, shutdown_rx.clone()))
        }
    };

    // Background health probe.
    let health = config.inference.remote_enabled.then(|| {
        let client = Arc::clone(&client);
        let interval = Duration::from_millis(config.inference.health.interval_ms);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { client.run_health_monitor(interval, rx).await })
    });

    // Configuration reload.
    let reload = tokio::spawn(reload_on_hangup(
        args.config.clone(),
        Arc::clone(&kinematics),
        shutdown_rx.clone(),
    ));

    let mut engine = Engine::new(kinematics, LogDispatcher, Arc::clone(&telemetry));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stats = tokio::time::interval(STATS_INTERVAL);
    stats.tick().await;
    let mut processed = 0u64;

    info!("Engine running");
    loop {
        tokio::select! {
            frame = frames.next() => {
                let Some(frame) = frame else {
                    warn!("Capture ended");
                    break;
                };
                let dropped = frames.take_dropped();
                if dropped > 0 {
                    debug!("{} frames overwritten before processing", dropped);
                    telemetry.record_frames_dropped(dropped);
                }
                match engine.process_frame(&*client, &frame).await {
                    Ok(_) => {}
                    Err(EngineError::Dispatch(e)) => {
                        error!("Dispatcher failed: {}", e);
                        break;
                    }
                    Err(e) => debug!("Frame {} produced no activations: {}", frame.sequence, e),
                }
                processed += 1;
                if args.max_frames.is_some_and(|max| processed >= max) {
                    info!("Processed {} frames, stopping", processed);
                    break;
                }
            }
            _ = stats.tick() => {
                let s = telemetry.snapshot(Some(client.stats()));
                info!(
                    "Frames {} (dropped {}, stale {}), triggers {}, activations {}, breaker {:?}",
                    s.frames_processed,
                    s.frames_dropped,
                    s.frames_stale,
                    s.triggers,
                    s.activations,
                    client.breaker().state()
                );
            }
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    drop(frames);
    for task in [Some(capture), health, Some(reload)].into_iter().flatten() {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {}", e);
        }
    }

    let snapshot = telemetry.snapshot(Some(client.stats()));
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => info!("Final telemetry:\n{}", json),
        Err(e) => warn!("Cannot serialize telemetry: {}", e),
    }
    Ok(())
}

/// Reload the kinematics section on `SIGHUP`. An invalid file leaves the
/// running calibration untouched.
#[cfg(unix)]
async fn reload_on_hangup(
    path: PathBuf,
    kinematics: Arc<SharedKinematics>,
    mut shutdown: watch::Receiver<bool>,
) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!("SIGHUP reload unavailable: {}", e);
            return;
        }
    };
    loop {
        tokio::select! {
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                reload_kinematics(&path, &kinematics);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn reload_on_hangup(
    _path: PathBuf,
    _kinematics: Arc<SharedKinematics>,
    mut shutdown: watch::Receiver<bool>,
) {
    while shutdown.changed().await.is_ok() && !*shutdown.borrow() {}
}

fn reload_kinematics(path: &Path, kinematics: &SharedKinematics) {
    let candidate = match EngineConfig::load_validated(path) {
        Ok(config) => config.kinematics,
        Err(e) => {
            warn!("Reload of {} rejected, keeping current kinematics: {}", path.display(), e);
            return;
        }
    };
    match kinematics.replace(candidate) {
        Ok(generation) => info!("Kinematics reloaded (generation {})", generation),
        Err(e) => warn!("Reload rejected, keeping current kinematics: {}", e),
    }
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
///
/// `--verbose` forces DEBUG; otherwise `RUST_LOG` wins over the file.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(configured.as_directive())
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

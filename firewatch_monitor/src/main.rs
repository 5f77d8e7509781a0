// THEORY:
// `firewatch_monitor` is the deployable process. Startup is strictly ordered and
// every step before the frame loop is fatal on failure:
//   1. logging, 2. config, 3. event store, 4. notifier, 5. alarm recovery,
//   6. dashboard bind.
// Only then does the frame loop start, on a blocking thread, with the dashboard
// serving alongside it on the async runtime. The process ends when the stream ends,
// the restart budget is spent, or Ctrl-C is pressed.

#[cfg(feature = "opencv")]
mod camera;

use anyhow::{Context, bail};
use clap::{ArgGroup, Parser};
use firewatch::alarm::{AlarmSettings, AlarmStateMachine};
use firewatch::config::MonitorConfig;
use firewatch::core_modules::color_detector::ColorFireDetector;
use firewatch::core_modules::image_renderer::JpegRenderer;
use firewatch::core_modules::image_sequence::ImageSequenceSource;
use firewatch::notifier::EmailNotifier;
use firewatch::pipeline::{FrameLoop, LoopSummary, PipelineError};
use firewatch::sqlite_sink::SqliteSink;
use firewatch::status::StatusQuery;
use firewatch_dashboard::{AppState, FrameBus, ServerConfig, start_server};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const FRAME_BUS_CAPACITY: usize = 8;

#[derive(Parser, Debug)]
#[command(version, about = "Fire surveillance monitor with a live dashboard")]
#[command(group(ArgGroup::new("input").required(true)))]
struct Args {
    /// TOML config file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of still images replayed in name order as the camera.
    #[arg(long, group = "input")]
    frames: Option<PathBuf>,

    /// Playback rate for --frames. Unpaced when omitted.
    #[arg(long, requires = "frames")]
    fps: Option<f64>,

    /// Replay --frames forever.
    #[arg(long = "loop", requires = "frames")]
    looping: bool,

    /// Camera device index.
    #[cfg(feature = "opencv")]
    #[arg(long, group = "input")]
    camera: Option<i32>,

    /// Video file.
    #[cfg(feature = "opencv")]
    #[arg(long, group = "input")]
    video: Option<PathBuf>,
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    // If FIREWATCH_LOG_PATH is set, append to that file
    if let Ok(path) = std::env::var("FIREWATCH_LOG_PATH") {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(file)
                .init();
            return;
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    // --- 1. Configuration ---
    let config = MonitorConfig::load(args.config.as_deref()).context("invalid configuration")?;
    info!(
        threshold = config.detection.consecutive_frames_threshold,
        location = %config.location,
        "configuration loaded"
    );

    // --- 2. Collaborators ---
    let sink = Arc::new(
        SqliteSink::open(&config.database_path)
            .with_context(|| format!("could not open event store {}", config.database_path.display()))?,
    );
    info!(path = %sink.path().display(), "event store ready");
    let notifier = Arc::new(EmailNotifier::new(&config.smtp).context("invalid alert email settings")?);

    // --- 3. Alarm recovery ---
    let machine = AlarmStateMachine::try_recover(
        AlarmSettings {
            threshold: config.detection.consecutive_frames_threshold,
            location: config.location.clone(),
        },
        sink.clone(),
        notifier,
        Handle::current(),
    )
    .context("could not restore alarm state from the event store")?;

    // --- 4. Dashboard ---
    let bus = FrameBus::new(FRAME_BUS_CAPACITY);
    let state = AppState {
        bus: bus.clone(),
        status: StatusQuery::new(machine.handle(), sink),
    };
    let server = start_server(
        state,
        ServerConfig {
            bind_addr: config.bind_addr.clone(),
        },
    )
    .await?;

    // --- 5. Frame loop ---
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut frame_loop = spawn_frame_loop(&args, &config, machine, bus, shutdown.clone())?;

    let outcome = tokio::select! {
        joined = &mut frame_loop => joined.context("frame loop panicked")?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping");
            shutdown.store(true, Ordering::Relaxed);
            frame_loop.await.context("frame loop panicked")?
        }
    };
    server.abort();

    match outcome {
        Ok(summary) => {
            info!(
                frames = summary.frames,
                activations = summary.activations,
                clearances = summary.clearances,
                restarts = summary.restarts,
                "monitor stopped"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "frame loop failed");
            Err(err).context("frame loop failed")
        }
    }
}

type LoopTask = tokio::task::JoinHandle<Result<LoopSummary, PipelineError>>;

fn spawn_frame_loop(
    args: &Args,
    config: &MonitorConfig,
    machine: AlarmStateMachine,
    bus: FrameBus,
    shutdown: Arc<AtomicBool>,
) -> anyhow::Result<LoopTask> {
    let flip = config.detection.flip_mode();
    let policy = config.restart;

    if let Some(dir) = &args.frames {
        let mut source = ImageSequenceSource::open(dir, flip)
            .with_context(|| format!("could not open frame directory {}", dir.display()))?
            .looping(args.looping);
        if let Some(fps) = args.fps {
            if !(fps > 0.0) {
                bail!("--fps must be positive, got {fps}");
            }
            source = source.with_frame_interval(Duration::from_secs_f64(1.0 / fps));
        }
        info!(dir = %dir.display(), frames = source.len(), "replaying image sequence");
        let detector = ColorFireDetector::from_config(&config.detection);
        let frame_loop = FrameLoop::new(source, detector, JpegRenderer::default(), bus, machine, policy)
            .with_shutdown(shutdown);
        return Ok(tokio::task::spawn_blocking(move || frame_loop.run()));
    }

    #[cfg(feature = "opencv")]
    {
        use camera::{CameraInput, CameraSource, CascadeDetector, OpenCvRenderer};

        let input = match (&args.camera, &args.video) {
            (Some(index), _) => Some(CameraInput::Device(*index)),
            (None, Some(path)) => Some(CameraInput::File(path.clone())),
            (None, None) => None,
        };
        if let Some(input) = input {
            let source = CameraSource::open(input, flip).context("could not open camera")?;
            let detector = CascadeDetector::from_config(&config.detection).context("could not load cascade model")?;
            let frame_loop = FrameLoop::new(source, detector, OpenCvRenderer, bus, machine, policy)
                .with_shutdown(shutdown);
            return Ok(tokio::task::spawn_blocking(move || frame_loop.run()));
        }
    }

    bail!("no frame input given")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn frames_input_with_pacing() {
        let args = Args::try_parse_from(["firewatch_monitor", "--frames", "clips/kitchen", "--fps", "5", "--loop"])
            .expect("valid arguments");
        assert_eq!(args.frames, Some(PathBuf::from("clips/kitchen")));
        assert_eq!(args.fps, Some(5.0));
        assert!(args.looping);
    }

    #[test]
    fn an_input_is_required() {
        assert!(Args::try_parse_from(["firewatch_monitor"]).is_err());
        assert!(Args::try_parse_from(["firewatch_monitor", "--fps", "5"]).is_err());
    }
}

// THEORY:
// The `pipeline` module is the top-level driver for one monitored stream. It owns
// the only loop that touches the alarm and wires the external collaborators around
// the `AlarmStateMachine`:
//
//     FrameSource -> Detector -> AlarmStateMachine -> FrameRenderer -> StreamOutlet
//
// Every collaborator is a trait so the loop can run against a camera, a folder of
// stills, or scripted fakes in tests without changing a line here.
//
// Failure model:
// - End of stream is a normal exit.
// - A source or detector error ends the current pass. The source is reopened after
//   an exponential backoff and the loop resumes, up to `RestartPolicy::max_restarts`
//   consecutive failures. A frame that goes through cleanly resets the budget.
// - A render failure only costs that frame's preview. Detection keeps going.

use crate::alarm::{AlarmStateMachine, DetectionSignal, Transition};
use crate::config::ConfigError;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Text drawn next to each detected region by backends that can draw text.
pub const REGION_LABEL: &str = "FIRE DETECTED!";

/// Longest stretch a restart backoff sleeps before checking for shutdown again.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not open frame source: {0}")]
    Open(String),
    #[error("could not read frame: {0}")]
    Read(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
#[error("detector failed: {0}")]
pub struct DetectError(pub String);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("could not render frame: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Detect(#[from] DetectError),
    #[error("gave up after {restarts} restart attempts: {last}")]
    RestartsExhausted {
        restarts: u32,
        #[source]
        last: Box<PipelineError>,
    },
}

/// An axis-aligned detection box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Frame mirroring, using OpenCV's flip-code convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipMode {
    /// Code 0: around the x axis.
    Vertical,
    /// Code 1 (any positive): around the y axis.
    Horizontal,
    /// Code -1 (any negative): both axes.
    Both,
}

impl FlipMode {
    /// Maps a flip code. Only -1, 0 and 1 are accepted.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(FlipMode::Vertical),
            1 => Some(FlipMode::Horizontal),
            -1 => Some(FlipMode::Both),
            _ => None,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            FlipMode::Vertical => 0,
            FlipMode::Horizontal => 1,
            FlipMode::Both => -1,
        }
    }
}

/// How the loop recovers from a failing source or detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive restart attempts before giving up. Zero ends the loop on the first error.
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_restarts: 5,
        }
    }
}

impl RestartPolicy {
    /// Delay before the `attempt`-th consecutive restart (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid {
                field: "restart.initial_backoff_ms",
                reason: format!(
                    "{} exceeds restart.max_backoff_ms {}",
                    self.initial_backoff_ms, self.max_backoff_ms
                ),
            });
        }
        Ok(())
    }
}

/// Produces frames until the stream ends.
pub trait FrameSource: Send {
    type Frame;

    /// The next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Self::Frame>, SourceError>;

    /// Re-establishes the stream after an error.
    fn reopen(&mut self) -> Result<(), SourceError>;
}

/// Finds fire in a frame. An empty result means no fire.
pub trait Detector<F>: Send {
    fn classify(&mut self, frame: &F) -> Result<Vec<Region>, DetectError>;
}

/// What a renderer overlays onto a frame.
#[derive(Debug, Clone, Copy)]
pub struct Annotation<'a> {
    pub regions: &'a [Region],
    pub consecutive_count: u32,
    pub threshold: u32,
}

impl Annotation<'_> {
    pub fn status_text(&self) -> String {
        format!("Fire Frames: {}/{}", self.consecutive_count, self.threshold)
    }

    /// True once the run of positive frames has reached the threshold.
    pub fn at_threshold(&self) -> bool {
        self.consecutive_count >= self.threshold
    }
}

/// Draws the annotation and encodes the frame as JPEG.
pub trait FrameRenderer<F>: Send {
    fn render(&mut self, frame: F, annotation: &Annotation<'_>) -> Result<Vec<u8>, RenderError>;
}

/// Hands encoded frames to whatever streams them to viewers. Must not block.
pub trait StreamOutlet: Send {
    fn publish(&self, jpeg: Vec<u8>);
}

/// An outlet for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutlet;

impl StreamOutlet for NullOutlet {
    fn publish(&self, _jpeg: Vec<u8>) {}
}

/// Counters reported when the loop exits cleanly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: u64,
    pub activations: u64,
    pub clearances: u64,
    pub restarts: u32,
}

enum Step {
    Processed,
    EndOfStream,
}

/// The frame-processing loop of one monitored stream.
pub struct FrameLoop<S, D, R, O> {
    source: S,
    detector: D,
    renderer: R,
    outlet: O,
    machine: AlarmStateMachine,
    policy: RestartPolicy,
    summary: LoopSummary,
    shutdown: Option<Arc<AtomicBool>>,
}

impl<S, D, R, O> FrameLoop<S, D, R, O>
where
    S: FrameSource,
    D: Detector<S::Frame>,
    R: FrameRenderer<S::Frame>,
    O: StreamOutlet,
{
    pub fn new(source: S, detector: D, renderer: R, outlet: O, machine: AlarmStateMachine, policy: RestartPolicy) -> Self {
        Self {
            source,
            detector,
            renderer,
            outlet,
            machine,
            policy,
            summary: LoopSummary::default(),
            shutdown: None,
        }
    }

    /// The loop exits cleanly before the next frame once `flag` is set.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Sleeps for `delay` in short slices. Returns false if shutdown cut it short.
    fn backoff_sleep(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.shutdown_requested() {
                return false;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            std::thread::sleep(left.min(SHUTDOWN_POLL));
        }
    }

    /// Runs until end of stream or until the restart budget is spent. Blocking;
    /// call it from a dedicated thread.
    pub fn run(mut self) -> Result<LoopSummary, PipelineError> {
        info!(threshold = self.machine.threshold(), "frame loop started");
        let mut failures = 0u32;

        loop {
            if self.shutdown_requested() {
                info!(frames = self.summary.frames, "shutdown requested, loop finished");
                return Ok(self.summary);
            }
            match self.step() {
                Ok(Step::Processed) => failures = 0,
                Ok(Step::EndOfStream) => {
                    info!(frames = self.summary.frames, "frame source exhausted, loop finished");
                    return Ok(self.summary);
                }
                Err(err) => {
                    if failures >= self.policy.max_restarts {
                        warn!(error = %err, restarts = failures, "restart budget spent, loop terminating");
                        return Err(PipelineError::RestartsExhausted {
                            restarts: failures,
                            last: Box::new(err),
                        });
                    }
                    failures += 1;
                    self.summary.restarts += 1;
                    let delay = self.policy.backoff(failures);
                    warn!(error = %err, attempt = failures, delay_ms = delay.as_millis() as u64, "stream failed, restarting");
                    if !self.backoff_sleep(delay) {
                        info!(frames = self.summary.frames, "shutdown requested during backoff, loop finished");
                        return Ok(self.summary);
                    }
                    if let Err(err) = self.source.reopen() {
                        warn!(error = %err, "could not reopen frame source");
                    }
                }
            }
        }
    }

    fn step(&mut self) -> Result<Step, PipelineError> {
        // --- 1. Acquire ---
        let Some(frame) = self.source.next_frame()? else {
            return Ok(Step::EndOfStream);
        };

        // --- 2. Classify ---
        let regions = self.detector.classify(&frame)?;

        // --- 3. Alarm ---
        // The notification handle is dropped here; the task runs detached.
        match self.machine.observe(DetectionSignal::from_region_count(regions.len())) {
            Transition::Unchanged => {}
            Transition::Activated { .. } => self.summary.activations += 1,
            Transition::Cleared { .. } => self.summary.clearances += 1,
        }
        self.summary.frames += 1;

        // --- 4. Render and hand off ---
        let annotation = Annotation {
            regions: &regions,
            consecutive_count: self.machine.state().consecutive_count,
            threshold: self.machine.threshold(),
        };
        match self.renderer.render(frame, &annotation) {
            Ok(jpeg) => self.outlet.publish(jpeg),
            Err(err) => debug!(error = %err, "frame not rendered"),
        }

        Ok(Step::Processed)
    }
}

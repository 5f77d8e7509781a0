// THEORY:
// The `alarm` module is the decision layer of the whole system. Upstream, a detector
// answers a narrow question for every frame: "is there fire in this picture?". The
// answer is noisy. A single bright reflection can say yes, and a flame flickering
// behind smoke can say no. The `AlarmStateMachine` turns that stream of per-frame
// answers into a small number of meaningful events.
//
// Key architectural principles:
// 1.  **Debounce Up, Fast Down**: The alarm is raised only after `threshold`
//     consecutive positive frames. It is lowered on the very first negative frame.
//     Any negative frame also resets the run of positives to zero.
// 2.  **Edges, Not Levels**: Exactly one `EventRecord` is produced per edge
//     (Idle -> Active, Active -> Idle). Frames that stay on the same side of the
//     threshold produce nothing.
// 3.  **Single Writer, Many Readers**: The machine is the only writer of
//     `AlarmState`. Everyone else observes it through a cloneable `AlarmHandle`,
//     which reads a copy under a short lock and never waits on storage or network.
// 4.  **Side Effects Never Veto State**: Persistence is synchronous and notification
//     is detached, but neither can undo a transition. If the store or the mail relay
//     fails, the live flag still tracks what the camera sees.
// 5.  **Recovery From The Log**: At construction the machine reads the newest
//     record in the store and resumes from it, so a restart during an active fire
//     does not forget the alarm or raise a duplicate one.

use crate::event::EventRecord;
use crate::notifier::Notifier;
use crate::sink::{EventSink, SinkError};
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Confidence reported the instant the threshold is first met with a zero ratio.
pub const CONFIDENCE_FLOOR: u8 = 67;
const CONFIDENCE_SPAN: f64 = 33.0;

/// Confidence attached to an activation after `count` consecutive positive frames.
///
/// `min(100, round(count / threshold * 33) + 67)`, non-decreasing in `count` and
/// saturating at 100. A zero threshold is treated as one.
pub fn activation_confidence(count: u32, threshold: u32) -> u8 {
    let ratio = f64::from(count) / f64::from(threshold.max(1));
    let score = (ratio * CONFIDENCE_SPAN).round() + f64::from(CONFIDENCE_FLOOR);
    score.min(100.0) as u8
}

/// What the detector saw in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSignal {
    pub present: bool,
    pub region_count: usize,
}

impl DetectionSignal {
    pub fn from_region_count(region_count: usize) -> Self {
        Self {
            present: region_count > 0,
            region_count,
        }
    }

    pub fn absent() -> Self {
        Self::from_region_count(0)
    }
}

/// Conceptual phase of the alarm, derived from [`AlarmState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmPhase {
    /// No recent positive frames.
    Idle,
    /// Counting positive frames, not yet surfaced externally.
    Confirming,
    /// Alarm raised.
    Active,
}

/// The mutable heart of the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlarmState {
    /// Run length of consecutive positive frames.
    pub consecutive_count: u32,
    pub active: bool,
}

impl AlarmState {
    pub fn phase(&self) -> AlarmPhase {
        match (self.active, self.consecutive_count) {
            (true, _) => AlarmPhase::Active,
            (false, 0) => AlarmPhase::Idle,
            (false, _) => AlarmPhase::Confirming,
        }
    }
}

/// Read-only view of the alarm shared with status readers.
#[derive(Debug, Clone)]
pub struct AlarmHandle {
    state: Arc<RwLock<AlarmState>>,
}

impl AlarmHandle {
    pub fn snapshot(&self) -> AlarmState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active
    }
}

/// Fixed inputs of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmSettings {
    /// Consecutive positive frames required to raise the alarm. Zero is treated as one.
    pub threshold: u32,
    /// Location written into activation records.
    pub location: String,
}

/// The outcome of feeding one frame to the machine.
#[derive(Debug)]
pub enum Transition {
    /// No edge crossed.
    Unchanged,
    /// The alarm was raised.
    Activated {
        record: EventRecord,
        /// Whether the record reached the store.
        persisted: bool,
        /// The detached notification task. Dropping it does not cancel it.
        notification: JoinHandle<()>,
    },
    /// The alarm was lowered.
    Cleared { record: EventRecord, persisted: bool },
}

impl Transition {
    pub fn record(&self) -> Option<&EventRecord> {
        match self {
            Transition::Unchanged => None,
            Transition::Activated { record, .. } | Transition::Cleared { record, .. } => Some(record),
        }
    }
}

/// Decision made under the state lock; side effects run after it is released.
fn normalized(settings: AlarmSettings) -> AlarmSettings {
    AlarmSettings {
        threshold: settings.threshold.max(1),
        ..settings
    }
}

fn initial_state(settings: &AlarmSettings, sink: &dyn EventSink) -> Result<AlarmState, SinkError> {
    match sink.most_recent()? {
        Some(last) if last.is_active() => {
            info!(since = %last.display_time(), "initial state: alarm is ON (last stored event is Active)");
            Ok(AlarmState {
                consecutive_count: settings.threshold,
                active: true,
            })
        }
        _ => {
            info!("initial state: alarm is OFF");
            Ok(AlarmState::default())
        }
    }
}

enum Edge {
    None,
    Raised { count: u32 },
    Lowered,
}

/// Debounced detection-to-alarm state machine for one monitored stream.
pub struct AlarmStateMachine {
    state: Arc<RwLock<AlarmState>>,
    settings: AlarmSettings,
    sink: Arc<dyn EventSink>,
    notifier: Arc<dyn Notifier>,
    runtime: Handle,
}

impl AlarmStateMachine {
    /// Builds the machine and restores its state from the newest stored record.
    ///
    /// A newest record of `Active` resumes with the alarm raised and the run length
    /// at the threshold. Anything else, including a failed read, starts idle.
    /// Nothing is written to the store here.
    pub fn recover(
        settings: AlarmSettings,
        sink: Arc<dyn EventSink>,
        notifier: Arc<dyn Notifier>,
        runtime: Handle,
    ) -> Self {
        let settings = normalized(settings);
        let initial = initial_state(&settings, sink.as_ref()).unwrap_or_else(|err| {
            warn!(error = %err, "could not read last event; starting with alarm OFF");
            AlarmState::default()
        });
        Self::with_state(initial, settings, sink, notifier, runtime)
    }

    /// Like [`recover`](Self::recover), but a store that cannot produce its newest
    /// record is an error instead of an idle start.
    pub fn try_recover(
        settings: AlarmSettings,
        sink: Arc<dyn EventSink>,
        notifier: Arc<dyn Notifier>,
        runtime: Handle,
    ) -> Result<Self, SinkError> {
        let settings = normalized(settings);
        let initial = initial_state(&settings, sink.as_ref())?;
        Ok(Self::with_state(initial, settings, sink, notifier, runtime))
    }

    fn with_state(
        initial: AlarmState,
        settings: AlarmSettings,
        sink: Arc<dyn EventSink>,
        notifier: Arc<dyn Notifier>,
        runtime: Handle,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            settings,
            sink,
            notifier,
            runtime,
        }
    }

    pub fn handle(&self) -> AlarmHandle {
        AlarmHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn state(&self) -> AlarmState {
        *self.state.read()
    }

    pub fn threshold(&self) -> u32 {
        self.settings.threshold
    }

    /// Feeds one frame's detection result through the machine.
    pub fn observe(&mut self, signal: DetectionSignal) -> Transition {
        // --- 1. Decide under the lock ---
        let edge = {
            let mut state = self.state.write();
            if signal.present {
                state.consecutive_count = state.consecutive_count.saturating_add(1);
                if state.consecutive_count >= self.settings.threshold && !state.active {
                    state.active = true;
                    Edge::Raised {
                        count: state.consecutive_count,
                    }
                } else {
                    Edge::None
                }
            } else {
                let was_active = state.active;
                state.active = false;
                state.consecutive_count = 0;
                if was_active { Edge::Lowered } else { Edge::None }
            }
        };

        // --- 2. Side effects, outside the lock ---
        match edge {
            Edge::None => Transition::Unchanged,
            Edge::Raised { count } => {
                let confidence = activation_confidence(count, self.settings.threshold);
                let record = EventRecord::activated(Utc::now(), confidence, self.settings.location.clone());
                info!(
                    confidence,
                    regions = signal.region_count,
                    frames = count,
                    "fire confirmed, alarm raised"
                );
                let persisted = self.persist(&record);
                let notification = self.spawn_notification();
                Transition::Activated {
                    record,
                    persisted,
                    notification,
                }
            }
            Edge::Lowered => {
                let record = EventRecord::cleared(Utc::now());
                info!("fire extinguished/cleared, alarm lowered");
                let persisted = self.persist(&record);
                Transition::Cleared { record, persisted }
            }
        }
    }

    fn persist(&self, record: &EventRecord) -> bool {
        match self.sink.append(record) {
            Ok(id) => {
                debug!(%id, status = %record.status(), "event saved");
                true
            }
            Err(err) => {
                warn!(error = %err, status = %record.status(), "could not save event; alarm state kept");
                false
            }
        }
    }

    /// Starts the alert on its own task. The frame loop never awaits it.
    fn spawn_notification(&self) -> JoinHandle<()> {
        let dispatch = self.notifier.dispatch();
        self.runtime.spawn(async move {
            if let Err(err) = dispatch.await {
                warn!(error = %err, "alert dispatch failed");
            }
        })
    }
}

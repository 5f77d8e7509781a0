// THEORY:
// `firewatch` is the engine of a fire-surveillance monitor. Its public surface is
// the debounced `AlarmStateMachine` and the seams around it: where events are
// stored (`EventSink`), who is told (`Notifier`), what feeds it (`FrameSource`,
// `Detector`) and who reads it (`StatusQuery`). `FrameLoop` ties them together.
//
// `core_modules` holds the built-in colour detector and the image-crate source and
// renderer. Camera and cascade backends live with the binary.

pub mod alarm;
pub mod config;
pub mod core_modules;
pub mod event;
pub mod notifier;
pub mod pipeline;
pub mod sink;
pub mod sqlite_sink;
pub mod status;

pub use alarm::{AlarmHandle, AlarmSettings, AlarmState, AlarmStateMachine, DetectionSignal, Transition};
pub use config::{ConfigError, MonitorConfig};
pub use event::{EventRecord, EventStatus, StoredEvent};
pub use notifier::{EmailNotifier, Notifier, NotifyError};
pub use pipeline::{FrameLoop, LoopSummary, PipelineError, RestartPolicy};
pub use sink::{EventSink, MemorySink, SinkError};
pub use sqlite_sink::SqliteSink;
pub use status::{StatusQuery, StatusReport};

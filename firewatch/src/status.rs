// THEORY:
// `StatusQuery` is the read side of the alarm. It pairs the live flag from the
// state machine with the stored history and shapes both into the document the
// dashboard consumes. It never fails: if history cannot be read, the caller still
// learns whether the alarm is up right now.

use crate::alarm::AlarmHandle;
use crate::event::{EventStatus, StoredEvent};
use crate::sink::EventSink;
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// One row of the status history, in the wire shape of the dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    #[serde(rename = "_id")]
    pub id: String,
    pub time: String,
    pub status: EventStatus,
    pub confidence: u8,
    pub gps: String,
}

impl From<&StoredEvent> for LogEntry {
    fn from(stored: &StoredEvent) -> Self {
        Self {
            id: stored.id.clone(),
            time: stored.record.display_time(),
            status: stored.record.status(),
            confidence: stored.record.confidence(),
            gps: stored.record.location().to_string(),
        }
    }
}

/// Current alarm flag plus the full history, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub alarm_active: bool,
    pub full_log: Vec<LogEntry>,
}

#[derive(Clone)]
pub struct StatusQuery {
    alarm: AlarmHandle,
    sink: Arc<dyn EventSink>,
}

impl StatusQuery {
    pub fn new(alarm: AlarmHandle, sink: Arc<dyn EventSink>) -> Self {
        Self { alarm, sink }
    }

    pub fn alarm_active(&self) -> bool {
        self.alarm.is_active()
    }

    /// Reads the flag and the history at call time. May block on storage, so
    /// async callers should run it on a blocking thread.
    pub fn status(&self) -> StatusReport {
        let full_log = match self.sink.all() {
            Ok(events) => events.iter().map(LogEntry::from).collect(),
            Err(err) => {
                warn!(error = %err, "could not read event history; reporting empty log");
                Vec::new()
            }
        };
        StatusReport {
            alarm_active: self.alarm.is_active(),
            full_log,
        }
    }
}

// THEORY:
// The `sink` module is the boundary between the alarm and its durable history.
// The alarm only ever needs three things from storage: append a record, look at
// the newest record (for cold-start recovery), and list everything newest first
// (for the status surface). `EventSink` captures exactly that.
//
// Calls are synchronous. The frame loop blocks on `append` so that every transition
// is durably ordered before the next frame is looked at.

use crate::event::{EventRecord, StoredEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("event store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt event row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Append-only store of alarm transitions.
pub trait EventSink: Send + Sync {
    /// Persists a record and returns the identifier the store assigned to it.
    fn append(&self, record: &EventRecord) -> Result<String, SinkError>;

    /// The record with the latest timestamp, if any.
    fn most_recent(&self) -> Result<Option<EventRecord>, SinkError>;

    /// Every record, latest timestamp first. Records sharing a timestamp are
    /// returned in reverse insertion order.
    fn all(&self) -> Result<Vec<StoredEvent>, SinkError>;
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn append(&self, record: &EventRecord) -> Result<String, SinkError> {
        (**self).append(record)
    }

    fn most_recent(&self) -> Result<Option<EventRecord>, SinkError> {
        (**self).most_recent()
    }

    fn all(&self) -> Result<Vec<StoredEvent>, SinkError> {
        (**self).all()
    }
}

/// A process-local sink. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<StoredEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the sink with history, as if it had been appended in order.
    pub fn with_history(records: impl IntoIterator<Item = EventRecord>) -> Self {
        let sink = Self::new();
        {
            let mut events = sink.events.lock();
            for record in records {
                let id = (events.len() + 1).to_string();
                events.push(StoredEvent { id, record });
            }
        }
        sink
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for MemorySink {
    fn append(&self, record: &EventRecord) -> Result<String, SinkError> {
        let mut events = self.events.lock();
        let id = (events.len() + 1).to_string();
        events.push(StoredEvent {
            id: id.clone(),
            record: record.clone(),
        });
        Ok(id)
    }

    fn most_recent(&self) -> Result<Option<EventRecord>, SinkError> {
        Ok(self.all()?.into_iter().next().map(|stored| stored.record))
    }

    fn all(&self) -> Result<Vec<StoredEvent>, SinkError> {
        let mut events: Vec<StoredEvent> = self.events.lock().iter().rev().cloned().collect();
        // Stable sort keeps reverse insertion order among equal timestamps.
        events.sort_by(|a, b| b.record.timestamp().cmp(&a.record.timestamp()));
        Ok(events)
    }
}

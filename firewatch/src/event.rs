// THEORY:
// The `event` module defines the audit trail of the alarm. An `EventRecord` is a
// single, immutable entry written at the exact moment the alarm changes side:
// either it was raised (`Active`) or it was lowered (`Cleared`). Records are never
// edited or removed; the history of the alarm is the ordered list of them.
//
// Key architectural principles:
// 1.  **Immutability**: Fields are private and only readable through accessors. The
//     only way to make a record is through the two named constructors, which encode
//     the rules for each status (a cleared record has no confidence and no location).
// 2.  **Storage Agnostic**: A record does not know its store identifier. The store
//     assigns one on append and hands it back wrapped in a `StoredEvent`.
// 3.  **Display Format**: Timestamps are kept in UTC and only rendered to local wall
//     clock time when presented to a human.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The location written into every cleared record.
pub const CLEARED_LOCATION: &str = "N/A";

/// Wall-clock format used by the status surface.
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Highest confidence an activation can carry.
pub const MAX_CONFIDENCE: u8 = 100;

/// Which side of the threshold the alarm moved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventStatus {
    Active,
    Cleared,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "Active",
            EventStatus::Cleared => "Cleared",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown event status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for EventStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(EventStatus::Active),
            "Cleared" => Ok(EventStatus::Cleared),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One persisted alarm transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    timestamp: DateTime<Utc>,
    status: EventStatus,
    confidence: u8,
    location: String,
}

impl EventRecord {
    /// An alarm activation. Confidence is capped at [`MAX_CONFIDENCE`].
    pub fn activated(timestamp: DateTime<Utc>, confidence: u8, location: impl Into<String>) -> Self {
        Self {
            timestamp,
            status: EventStatus::Active,
            confidence: confidence.min(MAX_CONFIDENCE),
            location: location.into(),
        }
    }

    /// An alarm clearance. Always zero confidence at [`CLEARED_LOCATION`].
    pub fn cleared(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            status: EventStatus::Cleared,
            confidence: 0,
            location: CLEARED_LOCATION.to_string(),
        }
    }

    /// Rebuilds a record read back from storage, enforcing the per-status rules.
    pub fn restore(timestamp: DateTime<Utc>, status: EventStatus, confidence: u8, location: String) -> Self {
        match status {
            EventStatus::Active => Self::activated(timestamp, confidence, location),
            EventStatus::Cleared => Self::cleared(timestamp),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn confidence(&self) -> u8 {
        self.confidence
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }

    /// The timestamp rendered in the host's local time zone.
    pub fn display_time(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format(DISPLAY_TIME_FORMAT)
            .to_string()
    }
}

/// A record together with the identifier its store assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: String,
    pub record: EventRecord,
}

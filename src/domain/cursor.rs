// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resumable pagination cursors over the event log
//!
//! Sync reads iterate the log in `(timestamp ASC, guid ASC)` order. A
//! cursor names the last emitted position; the next page resumes
//! strictly after it, so re-running a pull never re-emits an event.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::EngineError;

/// Position of the last emitted event in the stable iteration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCursor {
    /// Timestamp of the last emitted event
    pub timestamp: DateTime<Utc>,
    /// Guid of the last emitted event, tie-breaker within one timestamp
    pub guid: String,
}

impl EventCursor {
    /// Cursor for an event at the given position
    pub fn new(timestamp: DateTime<Utc>, guid: impl Into<String>) -> Self {
        Self {
            timestamp,
            guid: guid.into(),
        }
    }

    /// Whether an event at `(timestamp, guid)` lies strictly after this
    /// cursor in the stable iteration order
    pub fn precedes(&self, timestamp: DateTime<Utc>, guid: &str) -> bool {
        match timestamp.cmp(&self.timestamp) {
            Ordering::Greater => true,
            Ordering::Equal => guid > self.guid.as_str(),
            Ordering::Less => false,
        }
    }
}

impl PartialOrd for EventCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.timestamp, &self.guid).cmp(&(other.timestamp, &other.guid))
    }
}

impl fmt::Display for EventCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.guid
        )
    }
}

impl FromStr for EventCursor {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts, guid) = s
            .split_once('/')
            .ok_or_else(|| EngineError::Validation(format!("malformed cursor: {}", s)))?;
        let timestamp = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| EngineError::Validation(format!("malformed cursor timestamp: {}", e)))?
            .with_timezone(&Utc);
        Ok(Self::new(timestamp, guid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let cursor = EventCursor::new(ts("2026-01-19T12:00:00Z"), "form-7");
        let parsed: EventCursor = cursor.to_string().parse().unwrap();
        assert_eq!(parsed, cursor);
    }

    #[test]
    fn test_strictly_after() {
        let cursor = EventCursor::new(ts("2026-01-19T12:00:00Z"), "b");
        assert!(cursor.precedes(ts("2026-01-19T12:00:01Z"), "a"));
        assert!(cursor.precedes(ts("2026-01-19T12:00:00Z"), "c"));
        assert!(!cursor.precedes(ts("2026-01-19T12:00:00Z"), "b"));
        assert!(!cursor.precedes(ts("2026-01-19T11:59:59Z"), "z"));
    }

    #[test]
    fn test_order_is_timestamp_then_guid() {
        let a = EventCursor::new(ts("2026-01-19T12:00:00Z"), "b");
        let b = EventCursor::new(ts("2026-01-19T12:00:00Z"), "c");
        let c = EventCursor::new(ts("2026-01-19T12:01:00Z"), "a");
        assert!(a < b);
        assert!(b < c);
    }
}

// Copyright (c) 2025 - Cowboy AI, Inc.
//! Sync level of an event
//!
//! An event starts at [`SyncLevel::Local`] and is upgraded as it
//! propagates: to [`SyncLevel::Synced`] once the central server has
//! acknowledged it, and to [`SyncLevel::External`] once it has reached
//! the external system of record. Levels are monotonic per event; a
//! downgrade is rejected by the event store.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Propagation level of an event, ordered `Local < Synced < External`
///
/// Encoded as the bare integer 0/1/2 on the wire. The encoding is
/// frozen; independently implemented clients and servers rely on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum SyncLevel {
    /// Only present on this client
    Local = 0,
    /// Acknowledged by the central sync server
    Synced = 1,
    /// Propagated to the external system of record
    External = 2,
}

impl SyncLevel {
    /// Numeric wire value
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode from the numeric wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SyncLevel::Local),
            1 => Some(SyncLevel::Synced),
            2 => Some(SyncLevel::External),
            _ => None,
        }
    }

    /// Whether upgrading from `self` to `to` is a valid transition
    ///
    /// Equal levels are allowed (idempotent re-acknowledgement);
    /// downgrades are not.
    pub fn can_upgrade_to(self, to: SyncLevel) -> bool {
        to >= self
    }
}

impl fmt::Display for SyncLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncLevel::Local => write!(f, "LOCAL"),
            SyncLevel::Synced => write!(f, "SYNCED"),
            SyncLevel::External => write!(f, "EXTERNAL"),
        }
    }
}

impl Serialize for SyncLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for SyncLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        // Accept the frozen integer encoding, plus legacy name strings
        // from older peers ("REMOTE" is an alias of SYNCED).
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u8),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Num(n) => SyncLevel::from_u8(n)
                .ok_or_else(|| D::Error::custom(format!("invalid sync level {}", n))),
            Repr::Name(s) => match s.to_ascii_uppercase().as_str() {
                "LOCAL" => Ok(SyncLevel::Local),
                "SYNCED" | "REMOTE" => Ok(SyncLevel::Synced),
                "EXTERNAL" => Ok(SyncLevel::External),
                other => Err(D::Error::custom(format!("invalid sync level {:?}", other))),
            },
        }
    }
}

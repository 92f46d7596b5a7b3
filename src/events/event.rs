//! Event records published on the bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

const BROADCAST: &str = "broadcast";

/// Addressee of an event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Recipient {
    /// Every subscriber
    Broadcast,
    /// Subscribers registered under this id
    Id(String),
}

impl Recipient {
    pub fn id(id: impl Into<String>) -> Self {
        Recipient::Id(id.into())
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipient::Broadcast)
    }
}

impl From<String> for Recipient {
    fn from(value: String) -> Self {
        if value == BROADCAST {
            Recipient::Broadcast
        } else {
            Recipient::Id(value)
        }
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        match value {
            Recipient::Broadcast => BROADCAST.to_string(),
            Recipient::Id(id) => id,
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Broadcast => f.write_str(BROADCAST),
            Recipient::Id(id) => f.write_str(id),
        }
    }
}

/// Kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Task,
    Result,
    Error,
    Request,
    Status,
}

/// A logged event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub from: String,
    pub to: Recipient,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Whether a subscriber registered under `id` receives this event
    pub fn is_addressed_to(&self, id: &str) -> bool {
        match &self.to {
            Recipient::Broadcast => true,
            Recipient::Id(to) => to == id,
        }
    }
}

/// An event before the bus stamps its id and timestamp
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub from: String,
    pub to: Recipient,
    pub kind: EventKind,
    pub payload: Value,
}

impl EventDraft {
    pub fn new(from: impl Into<String>, to: Recipient, kind: EventKind, payload: Value) -> Self {
        Self {
            from: from.into(),
            to,
            kind,
            payload,
        }
    }

    /// Draft addressed to every subscriber
    pub fn broadcast(from: impl Into<String>, kind: EventKind, payload: Value) -> Self {
        Self::new(from, Recipient::Broadcast, kind, payload)
    }

    /// Draft addressed to a single id
    pub fn direct(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: EventKind,
        payload: Value,
    ) -> Self {
        Self::new(from, Recipient::id(to), kind, payload)
    }

    pub(crate) fn stamp(self) -> Event {
        Event {
            id: Uuid::new_v4(),
            from: self.from,
            to: self.to,
            kind: self.kind,
            payload: self.payload,
            timestamp: Utc::now(),
        }
    }
}

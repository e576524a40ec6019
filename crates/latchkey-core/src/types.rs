//! Shared presence types.
//!
//! Actors and events are ephemeral: built from a single radio callback,
//! consumed once by the event loop, never persisted.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A remote proximity-emitting identity (phone, tag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Radio address, e.g. `AA:BB:CC:DD:EE:FF`.
    pub identifier: String,
    /// Human-readable name.
    pub display_name: String,
}

impl Actor {
    /// Build an actor from a radio address, using the address as its name.
    #[must_use]
    pub fn from_identifier(identifier: impl Into<String>) -> Self {
        let identifier = identifier.into();
        Self {
            display_name: identifier.clone(),
            identifier,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name == self.identifier {
            write!(f, "{}", self.identifier)
        } else {
            write!(f, "{} ({})", self.display_name, self.identifier)
        }
    }
}

/// Direction of a presence transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// The actor connected.
    Entering,
    /// The actor disconnected.
    Exiting,
}

impl Action {
    /// Map a connection-state callback onto an action.
    #[must_use]
    pub const fn from_connected(connected: bool) -> Self {
        if connected {
            Self::Entering
        } else {
            Self::Exiting
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entering => f.write_str("Entering"),
            Self::Exiting => f.write_str("Exiting"),
        }
    }
}

/// A presence transition for a known actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Who moved.
    pub actor: Actor,
    /// Which way.
    pub action: Action,
    /// When the radio reported it.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn now(actor: Actor, action: Action) -> Self {
        Self {
            actor,
            action,
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} at {}",
            self.actor,
            self.action,
            self.timestamp.to_rfc3339()
        )
    }
}

/// An out-of-band message for a connected actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Target actor.
    pub recipient: Actor,
    /// Short header, sent first.
    pub header: String,
    /// Message body.
    pub message: String,
}

impl Payload {
    /// Wire form: `"<header> <message>"`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}", self.header, self.message).into_bytes()
    }
}

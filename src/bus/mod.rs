//! Command/state bus.
//!
//! Inbound: `LOCK` / `UNLOCK` on the set topic, anything on the check topic.
//! Outbound: one [`PublishedState`] per completed operation on the state
//! topic. The engine only sees the [`StatePublisher`] trait; [`mqtt`] is the
//! production transport.

pub mod mqtt;

pub use mqtt::{MqttBus, MqttListener};

use crate::classifier::LockState;
use crate::config::BusConfig;
use crate::error::Result;
use crate::reconciler::LockAction;
use async_trait::async_trait;
use std::fmt;

/// A state value published on the state topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishedState {
    /// The door was observed locked.
    Locked,
    /// The door was observed unlocked.
    Unlocked,
    /// The app has lost the lock hardware.
    Unlinked,
    /// The state could not be determined.
    Unknown,
    /// The device could not be driven.
    Error,
    /// The bridge is shutting down.
    Offline,
}

impl PublishedState {
    /// Wire payload.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "LOCKED",
            Self::Unlocked => "UNLOCKED",
            Self::Unlinked => "UNLINKED",
            Self::Unknown => "UNKNOWN",
            Self::Error => "ERROR",
            Self::Offline => "OFFLINE",
        }
    }
}

impl From<LockState> for PublishedState {
    fn from(state: LockState) -> Self {
        match state {
            LockState::Locked => Self::Locked,
            LockState::Unlocked => Self::Unlocked,
            LockState::Unlinked => Self::Unlinked,
            LockState::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for PublishedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command received from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCommand {
    /// Drive the lock to the action's target state.
    Apply(LockAction),
    /// Classify and publish the current state.
    Check,
}

impl BusCommand {
    /// Interpret a message. Returns `None` for unknown topics or payloads.
    pub fn parse(config: &BusConfig, topic: &str, payload: &[u8]) -> Option<Self> {
        if topic == config.check_topic {
            return Some(Self::Check);
        }
        if topic != config.set_topic {
            return None;
        }
        match payload {
            b"LOCK" => Some(Self::Apply(LockAction::Lock)),
            b"UNLOCK" => Some(Self::Apply(LockAction::Unlock)),
            _ => None,
        }
    }
}

/// Outbound half of the bus.
#[async_trait]
pub trait StatePublisher: Send + Sync {
    /// Publish `state` on the state topic.
    async fn publish(&self, state: PublishedState) -> Result<()>;
}

//! Client configuration.

use serde::{Deserialize, Serialize};

use murmur_sync::SessionConfig;

/// Catch-up behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatchUpConfig {
    /// Only resume from a checkpoint stamped on the current local day.
    ///
    /// Older gaps are left to explicit `fetch_after` calls.
    pub today_only: bool,
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self { today_only: true }
    }
}

/// Configuration for a [`ChatClient`](crate::ChatClient).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker session configuration.
    pub session: SessionConfig,
    /// Catch-up configuration.
    pub catch_up: CatchUpConfig,
    /// Event hub configuration.
    pub events: EventConfig,
}

/// Event broadcast configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Events buffered per subscriber before slow subscribers start lagging.
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

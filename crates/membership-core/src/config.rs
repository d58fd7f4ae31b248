//! Registry timing and policy configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How repeated announcements of the same node are handled while one is
/// already waiting to activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicatePending {
    /// Every announcement gets its own pending entry and activation.
    #[default]
    KeepAll,
    /// A new announcement supersedes earlier pending entries for the node.
    LatestWins,
    /// Announcements for a node that is already pending are ignored.
    FirstWins,
}

/// Configuration for the node registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipConfig {
    /// Delay between a join announcement and activation (default: 30s).
    /// Also the delay before a member-mode resync runs.
    #[serde(
        rename = "activationDelayMs",
        with = "duration_ms",
        default = "default_activation_delay"
    )]
    pub activation_delay: Duration,
    /// How long removed nodes stay in the recently removed set (default: 60s)
    #[serde(
        rename = "graceWindowMs",
        with = "duration_ms",
        default = "default_grace_window"
    )]
    pub grace_window: Duration,
    #[serde(default)]
    pub duplicate_pending: DuplicatePending,
}

fn default_activation_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_grace_window() -> Duration {
    Duration::from_secs(60)
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            activation_delay: default_activation_delay(),
            grace_window: default_grace_window(),
            duplicate_pending: DuplicatePending::default(),
        }
    }
}

impl MembershipConfig {
    pub(crate) fn activation_delay_ms(&self) -> u64 {
        self.activation_delay.as_millis() as u64
    }

    pub(crate) fn grace_window_ms(&self) -> u64 {
        self.grace_window.as_millis() as u64
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

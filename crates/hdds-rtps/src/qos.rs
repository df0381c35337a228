// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! QoS policies consumed by the reliability core.
//!
//! Only the policies that govern history retention, reliability and
//! ownership arbitration are interpreted here; the others (durability,
//! deadline, liveliness, partition, user data) are carried through the
//! discovery parameter list untouched.
//!
//! # Examples
//!
//! ```
//! use hdds_rtps::qos::{History, QosProfile, ResourceLimits};
//!
//! let qos = QosProfile {
//!     history: History::KeepLast(3),
//!     ..Default::default()
//! };
//! assert!(qos.validate().is_ok());
//!
//! let bad = QosProfile {
//!     history: History::KeepLast(0),
//!     ..Default::default()
//! };
//! assert!(bad.validate().is_err());
//! ```

use std::time::Duration;

use crate::config::DEFAULT_MAX_BLOCKING_TIME_MS;
use crate::dds::{Error, Result};

/// `LENGTH_UNLIMITED` for resource limits.
pub const LENGTH_UNLIMITED: i32 = -1;

/// Reliability kind (wire values: BEST_EFFORT = 1, RELIABLE = 2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReliabilityKind {
    BestEffort,
    #[default]
    Reliable,
}

impl ReliabilityKind {
    pub fn wire_value(self) -> u32 {
        match self {
            ReliabilityKind::BestEffort => 1,
            ReliabilityKind::Reliable => 2,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(ReliabilityKind::BestEffort),
            2 => Some(ReliabilityKind::Reliable),
            _ => None,
        }
    }
}

/// Reliability policy
///
/// `max_blocking_time` bounds `write` when a KEEP_ALL history is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reliability {
    pub kind: ReliabilityKind,
    pub max_blocking_time: Duration,
}

impl Default for Reliability {
    fn default() -> Self {
        Self {
            kind: ReliabilityKind::Reliable,
            max_blocking_time: Duration::from_millis(DEFAULT_MAX_BLOCKING_TIME_MS),
        }
    }
}

impl Reliability {
    pub fn reliable() -> Self {
        Self::default()
    }

    pub fn best_effort() -> Self {
        Self {
            kind: ReliabilityKind::BestEffort,
            ..Self::default()
        }
    }
}

/// History policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum History {
    /// Keep the last N samples per instance, evicting the oldest.
    KeepLast(u32),
    /// Keep everything within `ResourceLimits`; writers block when full.
    KeepAll,
}

impl Default for History {
    fn default() -> Self {
        Self::KeepLast(1)
    }
}

impl History {
    /// Wire kind (KEEP_LAST = 0, KEEP_ALL = 1).
    pub fn wire_kind(self) -> u32 {
        match self {
            History::KeepLast(_) => 0,
            History::KeepAll => 1,
        }
    }

    pub fn depth(self) -> u32 {
        match self {
            History::KeepLast(depth) => depth,
            History::KeepAll => 1,
        }
    }

    pub fn from_wire(kind: u32, depth: i32) -> Option<Self> {
        match kind {
            0 => Some(History::KeepLast(u32::try_from(depth).unwrap_or(0))),
            1 => Some(History::KeepAll),
            _ => None,
        }
    }
}

/// Durability policy. TRANSIENT_LOCAL and above make a writer replay its
/// history to late-joining readers; persistence itself is not provided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Durability {
    #[default]
    Volatile,
    TransientLocal,
    Transient,
    Persistent,
}

impl Durability {
    pub fn wire_value(self) -> u32 {
        match self {
            Durability::Volatile => 0,
            Durability::TransientLocal => 1,
            Durability::Transient => 2,
            Durability::Persistent => 3,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Durability::Volatile),
            1 => Some(Durability::TransientLocal),
            2 => Some(Durability::Transient),
            3 => Some(Durability::Persistent),
            _ => None,
        }
    }
}

/// Ownership kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OwnershipKind {
    #[default]
    Shared,
    /// Only the strongest live writer of an instance is authoritative.
    Exclusive,
}

impl OwnershipKind {
    pub fn wire_value(self) -> u32 {
        match self {
            OwnershipKind::Shared => 0,
            OwnershipKind::Exclusive => 1,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(OwnershipKind::Shared),
            1 => Some(OwnershipKind::Exclusive),
            _ => None,
        }
    }
}

/// Liveliness kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LivelinessKind {
    #[default]
    Automatic,
    ManualByParticipant,
    ManualByTopic,
}

/// Liveliness policy. A reader with a finite lease marks writers silent for
/// longer than their offered lease as not alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Liveliness {
    pub kind: LivelinessKind,
    /// `Duration::MAX` means infinite.
    pub lease_duration: Duration,
}

impl Default for Liveliness {
    fn default() -> Self {
        Self {
            kind: LivelinessKind::Automatic,
            lease_duration: Duration::MAX,
        }
    }
}

impl LivelinessKind {
    pub fn wire_value(self) -> u32 {
        match self {
            LivelinessKind::Automatic => 0,
            LivelinessKind::ManualByParticipant => 1,
            LivelinessKind::ManualByTopic => 2,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(LivelinessKind::Automatic),
            1 => Some(LivelinessKind::ManualByParticipant),
            2 => Some(LivelinessKind::ManualByTopic),
            _ => None,
        }
    }
}

/// Resource limits
///
/// Values `<= 0` mean unlimited (`LENGTH_UNLIMITED`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_samples: i32,
    pub max_instances: i32,
    pub max_samples_per_instance: i32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_samples: 5000,
            max_instances: 10,
            max_samples_per_instance: 400,
        }
    }
}

impl ResourceLimits {
    pub fn unlimited() -> Self {
        Self {
            max_samples: LENGTH_UNLIMITED,
            max_instances: LENGTH_UNLIMITED,
            max_samples_per_instance: LENGTH_UNLIMITED,
        }
    }
}

/// Normalise a resource limit: `None` when unlimited.
pub fn limit(value: i32) -> Option<usize> {
    if value <= 0 {
        None
    } else {
        usize::try_from(value).ok()
    }
}

/// QoS Profile - policies of one writer or reader.
///
/// Validated when the endpoint is created (fail-fast on invalid config).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct QosProfile {
    pub reliability: Reliability,
    pub history: History,
    pub durability: Durability,
    pub resource_limits: ResourceLimits,
    pub ownership: OwnershipKind,
    /// Writer side only.
    pub ownership_strength: i32,
    /// `None` means infinite.
    pub deadline: Option<Duration>,
    pub liveliness: Liveliness,
    pub partitions: Vec<String>,
    pub user_data: Vec<u8>,
}

impl QosProfile {
    pub fn reliable_keep_last(depth: u32) -> Self {
        Self {
            history: History::KeepLast(depth),
            ..Default::default()
        }
    }

    pub fn reliable_keep_all(limits: ResourceLimits) -> Self {
        Self {
            history: History::KeepAll,
            resource_limits: limits,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_ownership(mut self, kind: OwnershipKind, strength: i32) -> Self {
        self.ownership = kind;
        self.ownership_strength = strength;
        self
    }

    /// Validate QoS configuration
    ///
    /// - `KeepLast(n)` requires n > 0
    /// - `KeepLast(n)` requires n <= max_samples_per_instance when both bounded
    /// - `max_samples >= max_samples_per_instance` when both bounded
    pub fn validate(&self) -> Result<()> {
        let rl = &self.resource_limits;
        if let History::KeepLast(depth) = self.history {
            if depth == 0 {
                return Err(Error::BadParameter(
                    "History::KeepLast(n) requires n > 0".to_string(),
                ));
            }
            if let Some(per_instance) = limit(rl.max_samples_per_instance) {
                if depth as usize > per_instance {
                    return Err(Error::BadParameter(format!(
                        "history depth ({}) exceeds max_samples_per_instance ({})",
                        depth, per_instance
                    )));
                }
            }
        }
        if let (Some(max), Some(per_instance)) =
            (limit(rl.max_samples), limit(rl.max_samples_per_instance))
        {
            if max < per_instance {
                return Err(Error::BadParameter(format!(
                    "max_samples ({}) must be >= max_samples_per_instance ({})",
                    max, per_instance
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid_reliable_keep_last() {
        let qos = QosProfile::default();
        qos.validate().expect("default QoS should validate");
        assert_eq!(qos.reliability.kind, ReliabilityKind::Reliable);
        assert_eq!(qos.reliability.max_blocking_time, Duration::from_millis(100));
        assert_eq!(qos.history, History::KeepLast(1));
    }

    #[test]
    fn test_depth_above_per_instance_limit_rejected() {
        let qos = QosProfile {
            history: History::KeepLast(500),
            ..Default::default()
        };
        assert!(qos.validate().is_err());

        let unlimited = QosProfile {
            history: History::KeepLast(500),
            resource_limits: ResourceLimits::unlimited(),
            ..Default::default()
        };
        assert!(unlimited.validate().is_ok());
    }

    #[test]
    fn test_max_samples_below_per_instance_rejected() {
        let qos = QosProfile::reliable_keep_all(ResourceLimits {
            max_samples: 5,
            max_instances: 1,
            max_samples_per_instance: 10,
        });
        assert!(qos.validate().is_err());
    }

    #[test]
    fn test_limit_normalisation() {
        assert_eq!(limit(0), None);
        assert_eq!(limit(LENGTH_UNLIMITED), None);
        assert_eq!(limit(7), Some(7));
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(ReliabilityKind::Reliable.wire_value(), 2);
        assert_eq!(ReliabilityKind::from_wire(1), Some(ReliabilityKind::BestEffort));
        assert_eq!(History::KeepAll.wire_kind(), 1);
        assert_eq!(History::from_wire(0, 4), Some(History::KeepLast(4)));
        assert_eq!(Durability::from_wire(3), Some(Durability::Persistent));
        assert_eq!(OwnershipKind::from_wire(1), Some(OwnershipKind::Exclusive));
        assert_eq!(LivelinessKind::from_wire(9), None);
    }
}

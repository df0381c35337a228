// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cache changes and the per-sample metadata handed to applications.

use super::seq::SequenceNumber;
use crate::core::guid::Guid;
use crate::core::pool::SerializedPayload;
use crate::core::time::Time;

/// Kind of a cache change (carried on the wire as PID_STATUS_INFO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChangeKind {
    #[default]
    Alive,
    NotAliveDisposed,
    NotAliveUnregistered,
    NotAliveDisposedUnregistered,
}

impl ChangeKind {
    pub const STATUS_DISPOSED: u8 = 0x01;
    pub const STATUS_UNREGISTERED: u8 = 0x02;

    /// Decode the low octet of PID_STATUS_INFO.
    pub fn from_status_info(flags: u8) -> Self {
        match (
            flags & Self::STATUS_DISPOSED != 0,
            flags & Self::STATUS_UNREGISTERED != 0,
        ) {
            (false, false) => ChangeKind::Alive,
            (true, false) => ChangeKind::NotAliveDisposed,
            (false, true) => ChangeKind::NotAliveUnregistered,
            (true, true) => ChangeKind::NotAliveDisposedUnregistered,
        }
    }

    pub fn status_info(self) -> u8 {
        match self {
            ChangeKind::Alive => 0,
            ChangeKind::NotAliveDisposed => Self::STATUS_DISPOSED,
            ChangeKind::NotAliveUnregistered => Self::STATUS_UNREGISTERED,
            ChangeKind::NotAliveDisposedUnregistered => {
                Self::STATUS_DISPOSED | Self::STATUS_UNREGISTERED
            }
        }
    }

    pub fn is_alive(self) -> bool {
        self == ChangeKind::Alive
    }

    pub fn is_disposed(self) -> bool {
        matches!(
            self,
            ChangeKind::NotAliveDisposed | ChangeKind::NotAliveDisposedUnregistered
        )
    }

    pub fn is_unregistered(self) -> bool {
        matches!(
            self,
            ChangeKind::NotAliveUnregistered | ChangeKind::NotAliveDisposedUnregistered
        )
    }
}

/// 16-byte key hash identifying an instance.
///
/// NO_KEY topics use [`InstanceHandle::NIL`] for every change.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct InstanceHandle(pub [u8; 16]);

impl InstanceHandle {
    pub const NIL: InstanceHandle = InstanceHandle([0; 16]);

    pub fn is_defined(&self) -> bool {
        *self != Self::NIL
    }

    /// Convenience for tests and small integer keys: big-endian in the last 4 bytes.
    pub fn from_u32(key: u32) -> Self {
        let mut bytes = [0u8; 16];
        bytes[12..16].copy_from_slice(&key.to_be_bytes());
        Self(bytes)
    }
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.is_defined() {
            return write!(f, "Instance(NIL)");
        }
        write!(f, "Instance(")?;
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        write!(f, ")")
    }
}

/// `(writer GUID, sequence number)` naming one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SampleIdentity {
    pub writer_guid: Guid,
    pub sequence_number: SequenceNumber,
}

/// Optional per-write parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteParams {
    /// Overrides the wall-clock source timestamp.
    pub source_timestamp: Option<Time>,
    /// Filled in by the writer with the identity assigned to the sample.
    pub sample_identity: Option<SampleIdentity>,
}

/// One versioned sample or instance-lifecycle event.
#[derive(Debug, Clone)]
pub struct CacheChange {
    pub kind: ChangeKind,
    pub writer_guid: Guid,
    pub instance_handle: InstanceHandle,
    pub sequence_number: SequenceNumber,
    pub source_timestamp: Time,
    pub reception_timestamp: Time,
    pub payload: SerializedPayload,
}

impl CacheChange {
    /// New change with an unassigned sequence number.
    pub fn new(
        kind: ChangeKind,
        writer_guid: Guid,
        instance_handle: InstanceHandle,
        payload: SerializedPayload,
    ) -> Self {
        Self {
            kind,
            writer_guid,
            instance_handle,
            sequence_number: SequenceNumber::UNKNOWN,
            source_timestamp: Time::ZERO,
            reception_timestamp: Time::ZERO,
            payload,
        }
    }

    pub fn identity(&self) -> SampleIdentity {
        SampleIdentity {
            writer_guid: self.writer_guid,
            sequence_number: self.sequence_number,
        }
    }
}

/// Whether the application already read a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleState {
    #[default]
    NotRead,
    Read,
}

/// Whether this is the first sample the application sees for an instance
/// (since it was created or came back from NOT_ALIVE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewState {
    #[default]
    New,
    NotNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceState {
    #[default]
    Alive,
    NotAliveDisposed,
    NotAliveNoWriters,
}

/// Metadata returned alongside every sample by `read`/`take`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub sample_state: SampleState,
    pub view_state: ViewState,
    pub instance_state: InstanceState,
    pub disposed_generation_count: u32,
    pub no_writers_generation_count: u32,
    pub source_timestamp: Time,
    pub reception_timestamp: Time,
    pub instance_handle: InstanceHandle,
    pub publication_handle: Guid,
    pub sample_identity: SampleIdentity,
    /// `false` for lifecycle-only changes (dispose/unregister).
    pub valid_data: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_info_mapping() {
        for kind in [
            ChangeKind::Alive,
            ChangeKind::NotAliveDisposed,
            ChangeKind::NotAliveUnregistered,
            ChangeKind::NotAliveDisposedUnregistered,
        ] {
            assert_eq!(ChangeKind::from_status_info(kind.status_info()), kind);
        }
        assert_eq!(ChangeKind::NotAliveDisposed.status_info(), 0x01);
        assert_eq!(ChangeKind::NotAliveUnregistered.status_info(), 0x02);
        assert!(ChangeKind::NotAliveDisposedUnregistered.is_disposed());
        assert!(ChangeKind::NotAliveDisposedUnregistered.is_unregistered());
        assert!(!ChangeKind::Alive.is_disposed());
    }

    #[test]
    fn test_instance_handle() {
        assert!(!InstanceHandle::NIL.is_defined());
        let h = InstanceHandle::from_u32(0x0102);
        assert!(h.is_defined());
        assert_eq!(&h.0[12..], &[0, 0, 1, 2]);
    }

    #[test]
    fn test_new_change_is_unsequenced() {
        let change = CacheChange::new(
            ChangeKind::Alive,
            Guid::UNKNOWN,
            InstanceHandle::NIL,
            SerializedPayload::from_vec(vec![0, 1, 0, 0]),
        );
        assert!(change.sequence_number.is_unknown());
        assert_eq!(change.identity().writer_guid, Guid::UNKNOWN);
    }
}

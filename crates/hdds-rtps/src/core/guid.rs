// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS GUID (Globally Unique Identifier) implementation.

use std::fmt;

/// 12-byte participant prefix shared by all entities of a participant.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct GuidPrefix(pub [u8; 12]);

impl GuidPrefix {
    pub const UNKNOWN: GuidPrefix = GuidPrefix([0; 12]);

    pub fn is_unknown(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for GuidPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// 4-byte entity id: 3-byte key plus 1-byte kind.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct EntityId(pub [u8; 4]);

impl EntityId {
    pub const UNKNOWN: EntityId = EntityId([0, 0, 0, 0]);
    pub const PARTICIPANT: EntityId = EntityId([0, 0, 1, 0xC1]);
    pub const SEDP_PUBLICATIONS_WRITER: EntityId = EntityId([0, 0, 3, 0xC2]);
    pub const SEDP_PUBLICATIONS_READER: EntityId = EntityId([0, 0, 3, 0xC7]);
    pub const SEDP_SUBSCRIPTIONS_WRITER: EntityId = EntityId([0, 0, 4, 0xC2]);
    pub const SEDP_SUBSCRIPTIONS_READER: EntityId = EntityId([0, 0, 4, 0xC7]);

    /// User-defined writer with key (kind 0x02).
    pub const fn user_writer(key: u32) -> Self {
        let k = key.to_be_bytes();
        EntityId([k[1], k[2], k[3], 0x02])
    }

    /// User-defined reader with key (kind 0x07).
    pub const fn user_reader(key: u32) -> Self {
        let k = key.to_be_bytes();
        EntityId([k[1], k[2], k[3], 0x07])
    }

    pub const fn kind(&self) -> u8 {
        self.0[3]
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    pub const fn is_writer(&self) -> bool {
        matches!(self.0[3] & 0x0F, 0x02 | 0x03)
    }

    pub const fn is_reader(&self) -> bool {
        matches!(self.0[3] & 0x0F, 0x04 | 0x07)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}.{:02x}.{:02x}.{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// RTPS GUID
///
/// 16-byte identifier (DDSI-RTPS 2.3, 9.3.1.5).
///
/// # Structure
/// - Prefix: 12 bytes (host/vendor unique)
/// - Entity ID: 4 bytes (entity within participant)
///
/// Ordering is bytewise, which is what ownership arbitration uses to break
/// strength ties (lowest GUID wins).
///
/// # Display Format
/// Hex with dots: "01.0f.ac.10.00.00.00.00.00.00.00.01.00.00.01.c1"
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Default)]
pub struct Guid {
    pub prefix: GuidPrefix,
    pub entity_id: EntityId,
}

impl Guid {
    pub const UNKNOWN: Guid = Guid {
        prefix: GuidPrefix::UNKNOWN,
        entity_id: EntityId::UNKNOWN,
    };

    pub const fn new(prefix: GuidPrefix, entity_id: EntityId) -> Self {
        Self { prefix, entity_id }
    }

    /// Create GUID from raw bytes (16 bytes total)
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let mut prefix = [0u8; 12];
        let mut entity_id = [0u8; 4];
        prefix.copy_from_slice(&bytes[0..12]);
        entity_id.copy_from_slice(&bytes[12..16]);
        Self {
            prefix: GuidPrefix(prefix),
            entity_id: EntityId(entity_id),
        }
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..12].copy_from_slice(&self.prefix.0);
        bytes[12..16].copy_from_slice(&self.entity_id.0);
        bytes
    }

    pub fn is_unknown(&self) -> bool {
        self.prefix.is_unknown() && self.entity_id.is_unknown()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{:?}", self.prefix, self.entity_id)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GUID({})", self)
    }
}

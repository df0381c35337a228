// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Parameter ids (RTPS v2.3 Table 9.12 / 9.14)
pub const PID_PAD: u16 = 0x0000;
pub const PID_SENTINEL: u16 = 0x0001;
pub const PID_TOPIC_NAME: u16 = 0x0005;
pub const PID_OWNERSHIP_STRENGTH: u16 = 0x0006;
pub const PID_TYPE_NAME: u16 = 0x0007;
pub const PID_RELIABILITY: u16 = 0x001A;
pub const PID_LIVELINESS: u16 = 0x001B;
pub const PID_DURABILITY: u16 = 0x001D;
pub const PID_OWNERSHIP: u16 = 0x001F;
pub const PID_DEADLINE: u16 = 0x0023;
pub const PID_PARTITION: u16 = 0x0029;
pub const PID_USER_DATA: u16 = 0x002C;
pub const PID_UNICAST_LOCATOR: u16 = 0x002F;
pub const PID_MULTICAST_LOCATOR: u16 = 0x0030;
pub const PID_HISTORY: u16 = 0x0040;
pub const PID_RESOURCE_LIMITS: u16 = 0x0041;
pub const PID_EXPECTS_INLINE_QOS: u16 = 0x0043;
pub const PID_PARTICIPANT_GUID: u16 = 0x0050;
pub const PID_ENDPOINT_GUID: u16 = 0x005A;

// Inline QoS
pub const PID_KEY_HASH: u16 = 0x0070;
pub const PID_STATUS_INFO: u16 = 0x0071;

// Vendor-specific range; unknown ones are skipped on decode.
pub const PID_VENDOR_BIT: u16 = 0x8000;
pub const PID_PERSISTENCE_GUID: u16 = 0x8002;

// Encapsulation identifiers (first two octets of a serialized payload)
pub const PL_CDR_BE: u16 = 0x0002;
pub const PL_CDR_LE: u16 = 0x0003;

pub const GUID_PARAMETER_LENGTH: u16 = 16;
pub const LOCATOR_PARAMETER_LENGTH: u16 = 24;

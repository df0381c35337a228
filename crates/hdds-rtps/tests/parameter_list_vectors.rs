// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hand-assembled discovery payloads.
//!
//! The bytes below are built parameter by parameter instead of going through
//! `to_parameter_list`, so the decoder is checked against the wire layout
//! itself (PL_CDR header, 4-byte aligned values, vendor and unknown PIDs).

use hdds_rtps::core::ser::Endianness;
use hdds_rtps::core::{EntityId, Guid, GuidPrefix, Locator};
use hdds_rtps::protocol::discovery::{ReaderProxyData, WriterProxyData};
use hdds_rtps::qos::{OwnershipKind, ReliabilityKind};

const PREFIX: [u8; 12] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];

struct Vector {
    big_endian: bool,
    bytes: Vec<u8>,
}

impl Vector {
    fn new(big_endian: bool) -> Self {
        // PL_CDR_BE = 0x0002, PL_CDR_LE = 0x0003, options zero.
        let id = if big_endian { 0x02 } else { 0x03 };
        Self {
            big_endian,
            bytes: vec![0x00, id, 0x00, 0x00],
        }
    }

    fn u16(&self, v: u16) -> [u8; 2] {
        if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    }

    fn u32(&self, v: u32) -> [u8; 4] {
        if self.big_endian {
            v.to_be_bytes()
        } else {
            v.to_le_bytes()
        }
    }

    fn param(mut self, pid: u16, value: &[u8]) -> Self {
        assert_eq!(value.len() % 4, 0, "test vector values are pre-padded");
        let pid = self.u16(pid);
        let len = self.u16(value.len() as u16);
        self.bytes.extend_from_slice(&pid);
        self.bytes.extend_from_slice(&len);
        self.bytes.extend_from_slice(value);
        self
    }

    fn string(self, pid: u16, text: &str) -> Self {
        let mut value = self.u32(text.len() as u32 + 1).to_vec();
        value.extend_from_slice(text.as_bytes());
        value.push(0);
        while value.len() % 4 != 0 {
            value.push(0);
        }
        self.param(pid, &value)
    }

    fn word(self, pid: u16, v: u32) -> Self {
        let value = self.u32(v);
        self.param(pid, &value)
    }

    fn locator(self, pid: u16, port: u32, ip: [u8; 4]) -> Self {
        let mut value = self.u32(1).to_vec();
        value.extend_from_slice(&self.u32(port));
        value.extend_from_slice(&[0; 12]);
        value.extend_from_slice(&ip);
        self.param(pid, &value)
    }

    fn sentinel(self) -> Vec<u8> {
        self.param(0x0001, &[]).bytes
    }
}

fn guid_bytes(entity: [u8; 4]) -> Vec<u8> {
    let mut raw = PREFIX.to_vec();
    raw.extend_from_slice(&entity);
    raw
}

fn writer_vector(big_endian: bool) -> Vec<u8> {
    let v = Vector::new(big_endian);
    let reliability = {
        let mut raw = v.u32(2).to_vec();
        raw.extend_from_slice(&v.u32(0));
        raw.extend_from_slice(&v.u32(0));
        raw
    };
    v.param(0x0050, &guid_bytes([0, 0, 1, 0xC1]))
        .param(0x005A, &guid_bytes([0, 0, 1, 0x02]))
        .string(0x0005, "Square")
        .string(0x0007, "ShapeType")
        .locator(0x002F, 7411, [127, 0, 0, 1])
        .param(0x001A, &reliability)
        .word(0x001F, 1)
        .word(0x0006, 7)
        .param(0x8001, &[0xDE, 0xAD, 0xBE, 0xEF])
        .param(0x7777, &[0, 0, 0, 0, 1, 2, 3, 4])
        .sentinel()
}

#[test]
fn decodes_little_endian_writer_announcement() {
    let data = WriterProxyData::from_parameter_list(&writer_vector(false)).expect("decode");

    assert_eq!(
        data.guid,
        Guid::new(GuidPrefix(PREFIX), EntityId::user_writer(1))
    );
    assert_eq!(data.participant_guid.entity_id, EntityId::PARTICIPANT);
    assert_eq!(data.topic_name, "Square");
    assert_eq!(data.type_name, "ShapeType");
    assert_eq!(
        data.unicast_locators,
        vec![Locator::udpv4([127, 0, 0, 1], 7411)]
    );
    assert_eq!(data.qos.reliability.kind, ReliabilityKind::Reliable);
    assert_eq!(data.qos.ownership, OwnershipKind::Exclusive);
    assert_eq!(data.qos.ownership_strength, 7);
}

#[test]
fn big_endian_vector_decodes_to_the_same_proxy() {
    let le = WriterProxyData::from_parameter_list(&writer_vector(false)).expect("LE");
    let be = WriterProxyData::from_parameter_list(&writer_vector(true)).expect("BE");
    assert_eq!(le, be);
}

#[test]
fn reencoded_proxy_matches_the_hand_built_one() {
    let decoded = WriterProxyData::from_parameter_list(&writer_vector(false)).expect("decode");
    let bytes = decoded
        .to_parameter_list(Endianness::Big)
        .expect("encode");
    assert_eq!(&bytes[..2], &[0x00, 0x02]);
    let again = WriterProxyData::from_parameter_list(&bytes).expect("decode again");
    assert_eq!(again, decoded);
}

#[test]
fn reader_announcement_without_participant_guid_uses_endpoint_prefix() {
    let v = Vector::new(false);
    let bytes = v
        .param(0x005A, &guid_bytes([0, 0, 2, 0x07]))
        .string(0x0005, "Square")
        .string(0x0007, "ShapeType")
        .param(0x0043, &[1, 0, 0, 0])
        .sentinel();

    let data = ReaderProxyData::from_parameter_list(&bytes).expect("decode");
    assert_eq!(data.guid.entity_id, EntityId::user_reader(2));
    assert_eq!(
        data.participant_guid,
        Guid::new(GuidPrefix(PREFIX), EntityId::PARTICIPANT)
    );
    assert!(data.expects_inline_qos);
    assert!(data.unicast_locators.is_empty());
}

#[test]
fn missing_endpoint_guid_is_rejected() {
    let bytes = Vector::new(false)
        .string(0x0005, "Square")
        .string(0x0007, "ShapeType")
        .sentinel();
    assert!(WriterProxyData::from_parameter_list(&bytes).is_err());
    assert!(ReaderProxyData::from_parameter_list(&bytes).is_err());
}

#[test]
fn truncated_parameter_is_rejected() {
    let mut bytes = writer_vector(false);
    // Drop the sentinel and half of the last value.
    bytes.truncate(bytes.len() - 4 - 4);
    assert!(WriterProxyData::from_parameter_list(&bytes).is_err());
}

#[test]
fn unknown_encapsulation_is_rejected() {
    let mut bytes = writer_vector(false);
    bytes[1] = 0x01; // CDR_LE, not a parameter list
    assert!(WriterProxyData::from_parameter_list(&bytes).is_err());
}

#[test]
fn out_of_range_policy_kind_is_rejected() {
    let bytes = Vector::new(false)
        .param(0x005A, &guid_bytes([0, 0, 1, 0x02]))
        .word(0x001F, 9)
        .sentinel();
    assert!(WriterProxyData::from_parameter_list(&bytes).is_err());
}

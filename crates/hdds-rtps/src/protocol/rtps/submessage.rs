// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Submessage structs with their wire encoding (RTPS 2.3 Section 8.3.7).
//!
//! Every submessage starts with a 4-byte header:
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | submessageId  |     flags     |      octetsToNextHeader       |
//! +---------------+---------------+-------------------------------+
//! ```
//!
//! Flag bit 0 selects the byte order of the rest of the submessage.
//! `octetsToNextHeader` is the exact body length; the next header starts
//! at the following 4-byte boundary.

use crate::core::guid::{EntityId, GuidPrefix};
use crate::core::ser::{CdrMessage, SerError, SerResult};
use crate::core::time::Time;
use crate::protocol::discovery::InlineQos;
use crate::reliability::{FragmentNumberSet, SequenceNumber, SequenceNumberSet};

pub const PAD: u8 = 0x01;
pub const ACKNACK: u8 = 0x06;
pub const HEARTBEAT: u8 = 0x07;
pub const GAP: u8 = 0x08;
pub const INFO_TS: u8 = 0x09;
pub const INFO_DST: u8 = 0x0E;
pub const NACK_FRAG: u8 = 0x12;
pub const DATA: u8 = 0x15;
pub const DATA_FRAG: u8 = 0x16;

pub const FLAG_ENDIANNESS: u8 = 0x01;
/// HEARTBEAT / ACKNACK final flag.
pub const FLAG_FINAL: u8 = 0x02;
/// HEARTBEAT liveliness flag.
pub const FLAG_LIVELINESS: u8 = 0x04;
/// DATA / DATA_FRAG inline QoS present.
pub const FLAG_INLINE_QOS: u8 = 0x02;
/// DATA serialized data present.
pub const FLAG_DATA: u8 = 0x04;
/// DATA serialized key present.
pub const FLAG_KEY: u8 = 0x08;
/// DATA_FRAG serialized key present.
pub const FLAG_FRAG_KEY: u8 = 0x04;
/// INFO_TS invalidate flag.
pub const FLAG_INVALIDATE: u8 = 0x02;

/// Bytes between `octetsToInlineQos` and the inline QoS of DATA.
const DATA_OCTETS_TO_INLINE_QOS: u16 = 16;
const DATA_FRAG_OCTETS_TO_INLINE_QOS: u16 = 28;

/// Write header + body, then patch `octetsToNextHeader` and pad.
fn write_submessage<F>(msg: &mut CdrMessage, id: u8, flags: u8, body: F) -> SerResult<()>
where
    F: FnOnce(&mut CdrMessage) -> SerResult<()>,
{
    let header_pos = msg.pos();
    msg.write_octet(id)?;
    msg.write_octet(flags | msg.endianness().flag())?;
    msg.write_u16(0)?;
    body(msg)?;
    let length = u16::try_from(msg.pos() - header_pos - 4).map_err(|_| SerError::WriteFailed {
        offset: header_pos,
        reason: format!("submessage 0x{:02x} longer than 65535 bytes", id),
    })?;
    msg.patch_u16(header_pos + 2, length)?;
    msg.write_padding(4)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub inline_qos: Option<InlineQos>,
    /// Serialized data (or serialized key when `key_only`).
    pub payload: Option<Vec<u8>>,
    pub key_only: bool,
}

impl DataSubmessage {
    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        let mut flags = 0;
        if self.inline_qos.is_some() {
            flags |= FLAG_INLINE_QOS;
        }
        if self.payload.is_some() {
            flags |= if self.key_only { FLAG_KEY } else { FLAG_DATA };
        }
        write_submessage(msg, DATA, flags, |m| {
            m.write_u16(0)?;
            m.write_u16(DATA_OCTETS_TO_INLINE_QOS)?;
            m.write_entity_id(&self.reader_id)?;
            m.write_entity_id(&self.writer_id)?;
            m.write_sequence_number(self.writer_sn)?;
            if let Some(qos) = &self.inline_qos {
                qos.write_to(m)?;
            }
            if let Some(payload) = &self.payload {
                m.write_bytes(payload)?;
            }
            Ok(())
        })
    }

    pub fn read_from(body: &mut CdrMessage, flags: u8) -> SerResult<Self> {
        let _extra_flags = body.read_u16()?;
        let octets_to_inline_qos = body.read_u16()?;
        let start = body.pos();
        let reader_id = body.read_entity_id()?;
        let writer_id = body.read_entity_id()?;
        let writer_sn = body.read_sequence_number()?;
        body.set_pos(start + usize::from(octets_to_inline_qos))?;
        let inline_qos = if flags & FLAG_INLINE_QOS != 0 {
            Some(InlineQos::read_from(body)?)
        } else {
            None
        };
        let key_only = flags & FLAG_DATA == 0 && flags & FLAG_KEY != 0;
        let payload = if flags & (FLAG_DATA | FLAG_KEY) != 0 {
            let rest = body.remaining();
            Some(body.read_bytes(rest)?.to_vec())
        } else {
            None
        };
        Ok(Self {
            reader_id,
            writer_id,
            writer_sn,
            inline_qos,
            payload,
            key_only,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFragSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    /// 1-based.
    pub fragment_starting_num: u32,
    pub fragments_in_submessage: u16,
    pub fragment_size: u16,
    pub sample_size: u32,
    pub inline_qos: Option<InlineQos>,
    pub payload: Vec<u8>,
}

impl DataFragSubmessage {
    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        let flags = if self.inline_qos.is_some() {
            FLAG_INLINE_QOS
        } else {
            0
        };
        write_submessage(msg, DATA_FRAG, flags, |m| {
            m.write_u16(0)?;
            m.write_u16(DATA_FRAG_OCTETS_TO_INLINE_QOS)?;
            m.write_entity_id(&self.reader_id)?;
            m.write_entity_id(&self.writer_id)?;
            m.write_sequence_number(self.writer_sn)?;
            m.write_u32(self.fragment_starting_num)?;
            m.write_u16(self.fragments_in_submessage)?;
            m.write_u16(self.fragment_size)?;
            m.write_u32(self.sample_size)?;
            if let Some(qos) = &self.inline_qos {
                qos.write_to(m)?;
            }
            m.write_bytes(&self.payload)
        })
    }

    pub fn read_from(body: &mut CdrMessage, flags: u8) -> SerResult<Self> {
        let _extra_flags = body.read_u16()?;
        let octets_to_inline_qos = body.read_u16()?;
        let start = body.pos();
        let reader_id = body.read_entity_id()?;
        let writer_id = body.read_entity_id()?;
        let writer_sn = body.read_sequence_number()?;
        let fragment_starting_num = body.read_u32()?;
        let fragments_in_submessage = body.read_u16()?;
        let fragment_size = body.read_u16()?;
        let sample_size = body.read_u32()?;
        if fragment_starting_num == 0 || fragment_size == 0 {
            return Err(SerError::invalid("DATA_FRAG with zero fragment number or size"));
        }
        body.set_pos(start + usize::from(octets_to_inline_qos))?;
        let inline_qos = if flags & FLAG_INLINE_QOS != 0 {
            Some(InlineQos::read_from(body)?)
        } else {
            None
        };
        let rest = body.remaining();
        let payload = body.read_bytes(rest)?.to_vec();
        Ok(Self {
            reader_id,
            writer_id,
            writer_sn,
            fragment_starting_num,
            fragments_in_submessage,
            fragment_size,
            sample_size,
            inline_qos,
            payload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub first_sn: SequenceNumber,
    pub last_sn: SequenceNumber,
    pub count: u32,
    pub final_flag: bool,
    pub liveliness_flag: bool,
}

impl HeartbeatSubmessage {
    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        let mut flags = 0;
        if self.final_flag {
            flags |= FLAG_FINAL;
        }
        if self.liveliness_flag {
            flags |= FLAG_LIVELINESS;
        }
        write_submessage(msg, HEARTBEAT, flags, |m| {
            m.write_entity_id(&self.reader_id)?;
            m.write_entity_id(&self.writer_id)?;
            m.write_sequence_number(self.first_sn)?;
            m.write_sequence_number(self.last_sn)?;
            m.write_u32(self.count)
        })
    }

    pub fn read_from(body: &mut CdrMessage, flags: u8) -> SerResult<Self> {
        let hb = Self {
            reader_id: body.read_entity_id()?,
            writer_id: body.read_entity_id()?,
            first_sn: body.read_sequence_number()?,
            last_sn: body.read_sequence_number()?,
            count: body.read_u32()?,
            final_flag: flags & FLAG_FINAL != 0,
            liveliness_flag: flags & FLAG_LIVELINESS != 0,
        };
        // 8.3.7.5.3: firstSN >= 1, lastSN >= firstSN - 1
        if !hb.first_sn.is_valid() || hb.last_sn < hb.first_sn.prev() {
            return Err(SerError::invalid(format!(
                "heartbeat range [{}, {}] is invalid",
                hb.first_sn, hb.last_sn
            )));
        }
        Ok(hb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckNackSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    /// Base = first number not yet received; members are NACKed.
    pub reader_sn_state: SequenceNumberSet,
    pub count: u32,
    pub final_flag: bool,
}

impl AckNackSubmessage {
    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        let flags = if self.final_flag { FLAG_FINAL } else { 0 };
        write_submessage(msg, ACKNACK, flags, |m| {
            m.write_entity_id(&self.reader_id)?;
            m.write_entity_id(&self.writer_id)?;
            m.write_sequence_number_set(&self.reader_sn_state)?;
            m.write_u32(self.count)
        })
    }

    pub fn read_from(body: &mut CdrMessage, flags: u8) -> SerResult<Self> {
        Ok(Self {
            reader_id: body.read_entity_id()?,
            writer_id: body.read_entity_id()?,
            reader_sn_state: body.read_sequence_number_set()?,
            count: body.read_u32()?,
            final_flag: flags & FLAG_FINAL != 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    /// Every number in `[gap_start, gap_list.base())` is irrelevant.
    pub gap_start: SequenceNumber,
    /// Plus these.
    pub gap_list: SequenceNumberSet,
}

impl GapSubmessage {
    /// Coalesce a sorted list of irrelevant numbers into GAPs.
    pub fn from_sequences(
        reader_id: EntityId,
        writer_id: EntityId,
        sequences: &[SequenceNumber],
    ) -> Vec<GapSubmessage> {
        let mut gaps = Vec::new();
        let mut idx = 0;
        while idx < sequences.len() {
            let gap_start = sequences[idx];
            let mut run_end = gap_start;
            idx += 1;
            while idx < sequences.len() && sequences[idx] == run_end.next() {
                run_end = sequences[idx];
                idx += 1;
            }
            let mut gap_list = SequenceNumberSet::new(run_end.next());
            while idx < sequences.len() && gap_list.add(sequences[idx]) {
                idx += 1;
            }
            gaps.push(GapSubmessage {
                reader_id,
                writer_id,
                gap_start,
                gap_list,
            });
        }
        gaps
    }

    /// Every number this GAP marks irrelevant, ascending.
    pub fn sequences(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        let run = self
            .gap_list
            .base()
            .distance_from(self.gap_start)
            .unwrap_or(0);
        (0..run)
            .map(move |offset| self.gap_start + offset)
            .chain(self.gap_list.iter())
    }

    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        write_submessage(msg, GAP, 0, |m| {
            m.write_entity_id(&self.reader_id)?;
            m.write_entity_id(&self.writer_id)?;
            m.write_sequence_number(self.gap_start)?;
            m.write_sequence_number_set(&self.gap_list)
        })
    }

    pub fn read_from(body: &mut CdrMessage) -> SerResult<Self> {
        let gap = Self {
            reader_id: body.read_entity_id()?,
            writer_id: body.read_entity_id()?,
            gap_start: body.read_sequence_number()?,
            gap_list: body.read_sequence_number_set()?,
        };
        if !gap.gap_start.is_valid() || gap.gap_list.base() < gap.gap_start {
            return Err(SerError::invalid("gap start after gap list base"));
        }
        Ok(gap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackFragSubmessage {
    pub reader_id: EntityId,
    pub writer_id: EntityId,
    pub writer_sn: SequenceNumber,
    pub fragment_number_state: FragmentNumberSet,
    pub count: u32,
}

impl NackFragSubmessage {
    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        write_submessage(msg, NACK_FRAG, 0, |m| {
            m.write_entity_id(&self.reader_id)?;
            m.write_entity_id(&self.writer_id)?;
            m.write_sequence_number(self.writer_sn)?;
            m.write_fragment_number_set(&self.fragment_number_state)?;
            m.write_u32(self.count)
        })
    }

    pub fn read_from(body: &mut CdrMessage) -> SerResult<Self> {
        Ok(Self {
            reader_id: body.read_entity_id()?,
            writer_id: body.read_entity_id()?,
            writer_sn: body.read_sequence_number()?,
            fragment_number_state: body.read_fragment_number_set()?,
            count: body.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoTsSubmessage {
    /// `None` invalidates the receiver's timestamp.
    pub timestamp: Option<Time>,
}

impl InfoTsSubmessage {
    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        match self.timestamp {
            Some(ts) => write_submessage(msg, INFO_TS, 0, |m| m.write_time(ts)),
            None => write_submessage(msg, INFO_TS, FLAG_INVALIDATE, |_| Ok(())),
        }
    }

    pub fn read_from(body: &mut CdrMessage, flags: u8) -> SerResult<Self> {
        let timestamp = if flags & FLAG_INVALIDATE != 0 {
            None
        } else {
            Some(body.read_time()?)
        };
        Ok(Self { timestamp })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoDstSubmessage {
    pub guid_prefix: GuidPrefix,
}

impl InfoDstSubmessage {
    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        write_submessage(msg, INFO_DST, 0, |m| m.write_guid_prefix(&self.guid_prefix))
    }

    pub fn read_from(body: &mut CdrMessage) -> SerResult<Self> {
        Ok(Self {
            guid_prefix: body.read_guid_prefix()?,
        })
    }
}

/// Any submessage the reliability core produces or consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submessage {
    Data(DataSubmessage),
    DataFrag(DataFragSubmessage),
    Heartbeat(HeartbeatSubmessage),
    AckNack(AckNackSubmessage),
    Gap(GapSubmessage),
    NackFrag(NackFragSubmessage),
    InfoTs(InfoTsSubmessage),
    InfoDst(InfoDstSubmessage),
}

impl Submessage {
    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        match self {
            Submessage::Data(s) => s.write_to(msg),
            Submessage::DataFrag(s) => s.write_to(msg),
            Submessage::Heartbeat(s) => s.write_to(msg),
            Submessage::AckNack(s) => s.write_to(msg),
            Submessage::Gap(s) => s.write_to(msg),
            Submessage::NackFrag(s) => s.write_to(msg),
            Submessage::InfoTs(s) => s.write_to(msg),
            Submessage::InfoDst(s) => s.write_to(msg),
        }
    }

    /// Decode a body; `Ok(None)` for ids this core does not handle.
    pub fn read_from(id: u8, flags: u8, body: &mut CdrMessage) -> SerResult<Option<Self>> {
        let sub = match id {
            DATA => Submessage::Data(DataSubmessage::read_from(body, flags)?),
            DATA_FRAG => Submessage::DataFrag(DataFragSubmessage::read_from(body, flags)?),
            HEARTBEAT => Submessage::Heartbeat(HeartbeatSubmessage::read_from(body, flags)?),
            ACKNACK => Submessage::AckNack(AckNackSubmessage::read_from(body, flags)?),
            GAP => Submessage::Gap(GapSubmessage::read_from(body)?),
            NACK_FRAG => Submessage::NackFrag(NackFragSubmessage::read_from(body)?),
            INFO_TS => Submessage::InfoTs(InfoTsSubmessage::read_from(body, flags)?),
            INFO_DST => Submessage::InfoDst(InfoDstSubmessage::read_from(body)?),
            _ => return Ok(None),
        };
        Ok(Some(sub))
    }
}

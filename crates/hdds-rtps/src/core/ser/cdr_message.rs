// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable, endian-aware CDR buffer used for every RTPS wire structure.
//!
//! A [`CdrMessage`] keeps two cursors: `pos` (next byte to read or write) and
//! `length` (number of valid bytes). Writes grow the buffer up to `max_size`;
//! reads never go past `length`. Every primitive honours the message's
//! [`Endianness`], which the submessage parser switches per submessage header.
//!
//! All failures are reported as [`SerError`] carrying the offending offset;
//! nothing in here panics on malformed input.

use super::{SerError, SerResult};
use crate::core::guid::{EntityId, Guid, GuidPrefix};
use crate::core::locator::Locator;
use crate::core::time::Time;
use crate::reliability::{
    word_count_for_bits, FragmentNumberSet, SequenceNumber, SequenceNumberSet, MAX_BITMAP_BITS,
};

/// Byte order of a CDR stream (RTPS flag bit 0x01 set = little endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    Big,
    #[default]
    Little,
}

impl Endianness {
    /// Decode from a submessage flags octet.
    pub const fn from_flags(flags: u8) -> Self {
        if flags & 0x01 != 0 {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    /// Endianness bit to OR into submessage flags.
    pub const fn flag(self) -> u8 {
        match self {
            Endianness::Little => 0x01,
            Endianness::Big => 0x00,
        }
    }
}

/// Generate endian-aware write methods for primitive types.
macro_rules! impl_write {
    ($name:ident, $type:ty) => {
        pub fn $name(&mut self, value: $type) -> SerResult<()> {
            let bytes = match self.endianness {
                Endianness::Little => value.to_le_bytes(),
                Endianness::Big => value.to_be_bytes(),
            };
            self.write_bytes(&bytes)
        }
    };
}

/// Generate endian-aware read methods for primitive types.
macro_rules! impl_read {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> SerResult<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.read_bytes($size)?);
            Ok(match self.endianness {
                Endianness::Little => <$type>::from_le_bytes(bytes),
                Endianness::Big => <$type>::from_be_bytes(bytes),
            })
        }
    };
}

/// Number of padding bytes needed to bring `offset` to `alignment`.
pub(crate) fn padding_for(offset: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return 0;
    }
    (alignment - offset % alignment) % alignment
}

#[derive(Debug, Clone)]
pub struct CdrMessage {
    buffer: Vec<u8>,
    pos: usize,
    length: usize,
    max_size: usize,
    endianness: Endianness,
}

impl CdrMessage {
    /// Empty little-endian message that may grow up to `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_size.min(crate::config::DEFAULT_CDR_MESSAGE_SIZE)),
            pos: 0,
            length: 0,
            max_size,
            endianness: Endianness::Little,
        }
    }

    /// Read-only view over received bytes (`length == max_size == bytes.len()`).
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            buffer: bytes.to_vec(),
            pos: 0,
            length: bytes.len(),
            max_size: bytes.len(),
            endianness: Endianness::Little,
        }
    }

    #[must_use]
    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.length.saturating_sub(self.pos)
    }

    /// Bytes left to write before hitting `max_size`.
    pub fn free_space(&self) -> usize {
        self.max_size.saturating_sub(self.pos)
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.length
    }

    /// Move the cursor; only positions inside the valid region are accepted.
    pub fn set_pos(&mut self, pos: usize) -> SerResult<()> {
        if pos > self.length {
            return Err(SerError::ReadFailed {
                offset: pos,
                reason: "position beyond message length".into(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Drop all content, keeping the allocation.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pos = 0;
        self.length = 0;
    }

    /// Cut the valid region back to `len` bytes (undo a partial write).
    pub fn truncate(&mut self, len: usize) {
        if len < self.length {
            self.buffer.truncate(len);
            self.length = len;
            self.pos = self.pos.min(len);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buffer.truncate(self.length);
        self.buffer
    }

    // ------------------------------------------------------------------
    // Raw bytes
    // ------------------------------------------------------------------

    pub fn write_bytes(&mut self, data: &[u8]) -> SerResult<()> {
        let end = self.pos + data.len();
        if end > self.max_size {
            return Err(SerError::WriteFailed {
                offset: self.pos,
                reason: "buffer too small".into(),
            });
        }
        if end > self.buffer.len() {
            self.buffer.resize(end, 0);
        }
        self.buffer[self.pos..end].copy_from_slice(data);
        self.pos = end;
        self.length = self.length.max(end);
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> SerResult<&[u8]> {
        let end = match self.pos.checked_add(len) {
            Some(end) if end <= self.length => end,
            _ => {
                return Err(SerError::ReadFailed {
                    offset: self.pos,
                    reason: "unexpected end of buffer".into(),
                })
            }
        };
        let start = self.pos;
        self.pos = end;
        Ok(&self.buffer[start..end])
    }

    /// Overwrite a u16 already written at `offset` (octetsToNextHeader, parameter length).
    pub fn patch_u16(&mut self, offset: usize, value: u16) -> SerResult<()> {
        if offset + 2 > self.length {
            return Err(SerError::WriteFailed {
                offset,
                reason: "patch outside written region".into(),
            });
        }
        let bytes = match self.endianness {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        self.buffer[offset..offset + 2].copy_from_slice(&bytes);
        Ok(())
    }

    pub fn write_padding(&mut self, alignment: usize) -> SerResult<()> {
        let pad = padding_for(self.pos, alignment);
        self.write_bytes(&[0u8; 8][..pad.min(8)])
    }

    /// Skip alignment padding; a truncated tail is tolerated.
    pub fn skip_padding(&mut self, alignment: usize) {
        let pad = padding_for(self.pos, alignment);
        self.pos = (self.pos + pad).min(self.length);
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    pub fn write_octet(&mut self, value: u8) -> SerResult<()> {
        self.write_bytes(&[value])
    }

    pub fn read_octet(&mut self) -> SerResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn write_bool(&mut self, value: bool) -> SerResult<()> {
        self.write_octet(u8::from(value))
    }

    pub fn read_bool(&mut self) -> SerResult<bool> {
        match self.read_octet()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SerError::invalid(format!("boolean octet {:#04x}", other))),
        }
    }

    impl_write!(write_u16, u16);
    impl_write!(write_i16, i16);
    impl_write!(write_u32, u32);
    impl_write!(write_i32, i32);
    impl_write!(write_u64, u64);
    impl_write!(write_i64, i64);

    impl_read!(read_u16, u16, 2);
    impl_read!(read_i16, i16, 2);
    impl_read!(read_u32, u32, 4);
    impl_read!(read_i32, i32, 4);
    impl_read!(read_u64, u64, 8);
    impl_read!(read_i64, i64, 8);

    // ------------------------------------------------------------------
    // CDR composites
    // ------------------------------------------------------------------

    /// CDR string: u32 length (including NUL), bytes, NUL, pad to 4.
    pub fn write_string(&mut self, value: &str) -> SerResult<()> {
        let len = u32::try_from(value.len() + 1).map_err(|_| SerError::WriteFailed {
            offset: self.pos,
            reason: "string too long".into(),
        })?;
        self.write_u32(len)?;
        self.write_bytes(value.as_bytes())?;
        self.write_octet(0)?;
        self.write_padding(4)
    }

    pub fn read_string(&mut self) -> SerResult<String> {
        let size = self.read_u32()? as usize;
        let raw = self.read_bytes(size)?;
        let text = raw.split(|b| *b == 0).next().unwrap_or_default();
        let value = std::str::from_utf8(text)
            .map_err(|_| SerError::invalid("string is not valid UTF-8"))?
            .to_owned();
        self.skip_padding(4);
        Ok(value)
    }

    /// sequence<octet>: u32 length, bytes, pad to 4.
    pub fn write_octet_seq(&mut self, value: &[u8]) -> SerResult<()> {
        let len = u32::try_from(value.len()).map_err(|_| SerError::WriteFailed {
            offset: self.pos,
            reason: "octet sequence too long".into(),
        })?;
        self.write_u32(len)?;
        self.write_bytes(value)?;
        self.write_padding(4)
    }

    pub fn read_octet_seq(&mut self) -> SerResult<Vec<u8>> {
        let size = self.read_u32()? as usize;
        let value = self.read_bytes(size)?.to_vec();
        self.skip_padding(4);
        Ok(value)
    }

    // ------------------------------------------------------------------
    // RTPS types
    // ------------------------------------------------------------------

    pub fn write_sequence_number(&mut self, sn: SequenceNumber) -> SerResult<()> {
        self.write_i32(sn.high())?;
        self.write_u32(sn.low())
    }

    pub fn read_sequence_number(&mut self) -> SerResult<SequenceNumber> {
        let high = self.read_i32()?;
        let low = self.read_u32()?;
        Ok(SequenceNumber::new(high, low))
    }

    /// base, numBits, then `ceil(numBits / 32)` bitmap words.
    pub fn write_sequence_number_set(&mut self, set: &SequenceNumberSet) -> SerResult<()> {
        self.write_sequence_number(set.base())?;
        self.write_u32(set.num_bits())?;
        for word in set.bitmap_words() {
            self.write_u32(*word)?;
        }
        Ok(())
    }

    pub fn read_sequence_number_set(&mut self) -> SerResult<SequenceNumberSet> {
        let base = self.read_sequence_number()?;
        let num_bits = self.read_u32()?;
        if num_bits > MAX_BITMAP_BITS {
            return Err(SerError::invalid(format!(
                "sequence number set numBits {} > {}",
                num_bits, MAX_BITMAP_BITS
            )));
        }
        if base.high() < 0 {
            return Err(SerError::invalid("negative sequence number set base"));
        }
        let mut words = [0u32; 8];
        for word in words.iter_mut().take(word_count_for_bits(num_bits)) {
            *word = self.read_u32()?;
        }
        SequenceNumberSet::from_raw(base, num_bits, words)
            .ok_or_else(|| SerError::invalid("sequence number set out of range"))
    }

    pub fn write_fragment_number_set(&mut self, set: &FragmentNumberSet) -> SerResult<()> {
        self.write_u32(set.base())?;
        self.write_u32(set.num_bits())?;
        for word in set.bitmap_words() {
            self.write_u32(*word)?;
        }
        Ok(())
    }

    pub fn read_fragment_number_set(&mut self) -> SerResult<FragmentNumberSet> {
        let base = self.read_u32()?;
        let num_bits = self.read_u32()?;
        if num_bits > MAX_BITMAP_BITS {
            return Err(SerError::invalid(format!(
                "fragment number set numBits {} > {}",
                num_bits, MAX_BITMAP_BITS
            )));
        }
        let mut words = [0u32; 8];
        for word in words.iter_mut().take(word_count_for_bits(num_bits)) {
            *word = self.read_u32()?;
        }
        FragmentNumberSet::from_raw(base, num_bits, words)
            .ok_or_else(|| SerError::invalid("fragment number set base must be >= 1"))
    }

    pub fn write_locator(&mut self, locator: &Locator) -> SerResult<()> {
        self.write_i32(locator.kind)?;
        self.write_u32(locator.port)?;
        self.write_bytes(&locator.address)
    }

    pub fn read_locator(&mut self) -> SerResult<Locator> {
        let kind = self.read_i32()?;
        let port = self.read_u32()?;
        let mut address = [0u8; 16];
        address.copy_from_slice(self.read_bytes(16)?);
        Ok(Locator {
            kind,
            port,
            address,
        })
    }

    pub fn write_guid_prefix(&mut self, prefix: &GuidPrefix) -> SerResult<()> {
        self.write_bytes(&prefix.0)
    }

    pub fn read_guid_prefix(&mut self) -> SerResult<GuidPrefix> {
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(self.read_bytes(12)?);
        Ok(GuidPrefix(bytes))
    }

    pub fn write_entity_id(&mut self, entity_id: &EntityId) -> SerResult<()> {
        self.write_bytes(&entity_id.0)
    }

    pub fn read_entity_id(&mut self) -> SerResult<EntityId> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.read_bytes(4)?);
        Ok(EntityId(bytes))
    }

    pub fn write_guid(&mut self, guid: &Guid) -> SerResult<()> {
        self.write_guid_prefix(&guid.prefix)?;
        self.write_entity_id(&guid.entity_id)
    }

    pub fn read_guid(&mut self) -> SerResult<Guid> {
        let prefix = self.read_guid_prefix()?;
        let entity_id = self.read_entity_id()?;
        Ok(Guid::new(prefix, entity_id))
    }

    pub fn write_time(&mut self, time: Time) -> SerResult<()> {
        self.write_i32(time.seconds)?;
        self.write_u32(time.fraction)
    }

    pub fn read_time(&mut self) -> SerResult<Time> {
        let seconds = self.read_i32()?;
        let fraction = self.read_u32()?;
        Ok(Time { seconds, fraction })
    }

    pub fn write_parameter_header(&mut self, pid: u16, length: u16) -> SerResult<()> {
        self.write_u16(pid)?;
        self.write_u16(length)
    }

    pub fn read_parameter_header(&mut self) -> SerResult<(u16, u16)> {
        let pid = self.read_u16()?;
        let length = self.read_u16()?;
        Ok((pid, length))
    }
}

impl Default for CdrMessage {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CDR_MESSAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_U32: u32 = 0x1234_5678;
    const TEST_U64: u64 = 0x1122_3344_5566_7788;

    #[test]
    fn test_write_u32_respects_endianness() {
        let mut le = CdrMessage::new(16);
        le.write_u32(TEST_U32).expect("LE write should succeed");
        assert_eq!(le.as_bytes(), &[0x78, 0x56, 0x34, 0x12]);

        let mut be = CdrMessage::new(16).with_endianness(Endianness::Big);
        be.write_u32(TEST_U32).expect("BE write should succeed");
        assert_eq!(be.as_bytes(), &[0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_primitives_roundtrip_both_orders() {
        for endianness in [Endianness::Little, Endianness::Big] {
            let mut msg = CdrMessage::new(64).with_endianness(endianness);
            msg.write_octet(0xAB).expect("octet");
            msg.write_bool(true).expect("bool");
            msg.write_u16(0xCDEF).expect("u16");
            msg.write_i32(-42).expect("i32");
            msg.write_u64(TEST_U64).expect("u64");

            let mut rx = CdrMessage::from_bytes(msg.as_bytes()).with_endianness(endianness);
            assert_eq!(rx.read_octet().expect("octet"), 0xAB);
            assert!(rx.read_bool().expect("bool"));
            assert_eq!(rx.read_u16().expect("u16"), 0xCDEF);
            assert_eq!(rx.read_i32().expect("i32"), -42);
            assert_eq!(rx.read_u64().expect("u64"), TEST_U64);
            assert!(rx.is_eof());
        }
    }

    #[test]
    fn test_write_overflow_reports_offset() {
        let mut msg = CdrMessage::new(2);
        msg.write_u16(0xABCD).expect("Write u16 should succeed");

        let err = msg.write_octet(0xFF).unwrap_err();
        match err {
            SerError::WriteFailed { offset, reason } => {
                assert_eq!(offset, 2);
                assert_eq!(reason, "buffer too small");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(msg.length(), 2, "failed write must not change length");
    }

    #[test]
    fn test_read_past_length_reports_offset() {
        let mut msg = CdrMessage::from_bytes(&[0u8; 3]);
        assert_eq!(msg.read_u16().expect("Read u16 should succeed"), 0);

        let err = msg.read_u32().unwrap_err();
        assert!(matches!(err, SerError::ReadFailed { offset: 2, .. }));
        assert_eq!(msg.pos(), 2, "failed read must not move the cursor");
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut msg = CdrMessage::from_bytes(&[2]);
        assert!(matches!(
            msg.read_bool(),
            Err(SerError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_string_padding_and_roundtrip() {
        let mut msg = CdrMessage::new(64);
        msg.write_string("Square").expect("string");
        // 4 (len) + 6 chars + NUL = 11, padded to 12
        assert_eq!(msg.length(), 12);
        msg.write_u32(7).expect("trailing u32");

        let mut rx = CdrMessage::from_bytes(msg.as_bytes());
        assert_eq!(rx.read_string().expect("read string"), "Square");
        assert_eq!(rx.read_u32().expect("u32 after padding"), 7);
    }

    #[test]
    fn test_empty_string() {
        let mut msg = CdrMessage::new(16);
        msg.write_string("").expect("empty string");
        assert_eq!(msg.as_bytes(), &[1, 0, 0, 0, 0, 0, 0, 0]);

        let mut rx = CdrMessage::from_bytes(msg.as_bytes());
        assert_eq!(rx.read_string().expect("read"), "");
    }

    #[test]
    fn test_sequence_number_set_wire_layout() {
        let base = SequenceNumber::from(10);
        let mut set = SequenceNumberSet::new(base);
        assert!(set.add(SequenceNumber::from(10)));
        assert!(set.add(SequenceNumber::from(12)));
        assert!(set.add(SequenceNumber::from(41)));

        let mut msg = CdrMessage::new(64);
        msg.write_sequence_number_set(&set).expect("write set");
        let bytes = msg.as_bytes();
        // base (8) + numBits (4) + one bitmap word (4)
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..8], &[0, 0, 0, 0, 10, 0, 0, 0]);
        assert_eq!(u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 32);
        assert_eq!(
            u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            0xA000_0001
        );

        let mut rx = CdrMessage::from_bytes(bytes);
        let decoded = rx.read_sequence_number_set().expect("read set");
        assert_eq!(decoded, set);
    }

    #[test]
    fn test_sequence_number_set_rejects_oversized_bitmap() {
        let mut msg = CdrMessage::new(64);
        msg.write_sequence_number(SequenceNumber::from(1)).expect("base");
        msg.write_u32(257).expect("numBits");

        let mut rx = CdrMessage::from_bytes(msg.as_bytes());
        assert!(matches!(
            rx.read_sequence_number_set(),
            Err(SerError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_locator_roundtrip_big_endian() {
        let locator = Locator::udpv4([192, 168, 1, 100], 7410);
        let mut msg = CdrMessage::new(32).with_endianness(Endianness::Big);
        msg.write_locator(&locator).expect("locator");
        assert_eq!(msg.length(), 24);
        assert_eq!(&msg.as_bytes()[0..4], &[0, 0, 0, 1]);

        let mut rx = CdrMessage::from_bytes(msg.as_bytes()).with_endianness(Endianness::Big);
        assert_eq!(rx.read_locator().expect("read locator"), locator);
    }

    #[test]
    fn test_patch_u16() {
        let mut msg = CdrMessage::new(8);
        msg.write_u16(0).expect("placeholder");
        msg.write_u16(0xFFFF).expect("value");
        msg.patch_u16(0, 0x0102).expect("patch");
        assert_eq!(msg.as_bytes(), &[0x02, 0x01, 0xFF, 0xFF]);
        assert!(msg.patch_u16(3, 1).is_err());
    }

    #[test]
    fn test_padding_helpers() {
        assert_eq!(padding_for(0, 4), 0);
        assert_eq!(padding_for(5, 4), 3);
        assert_eq!(padding_for(6, 8), 2);
        assert_eq!(padding_for(3, 1), 0);
    }
}

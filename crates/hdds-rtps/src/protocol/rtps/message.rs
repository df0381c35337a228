// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS message framing: header, outbound builder and inbound parser.
//!
//! ```text
//! +---------------+---------------+---------------+---------------+
//! |      'R'      |      'T'      |      'P'      |      'S'      |
//! +---------------+---------------+---------------+---------------+
//! | version major | version minor |          vendor id            |
//! +---------------+---------------+---------------+---------------+
//! |                                                               |
//! +                      guidPrefix (12 bytes)                    +
//! |                                                               |
//! +---------------+---------------+---------------+---------------+
//! | submessage ...                                                |
//! ```
//!
//! The parser keeps the receiver state of RTPS 2.3 Section 8.3.4: source
//! prefix from the header, destination prefix from INFO_DST and timestamp
//! from INFO_TS. INFO_* submessages are consumed into that state and not
//! returned.

use crate::config::{PROTOCOL_VERSION, RTPS_MESSAGE_HEADER_SIZE, RTPS_SUBMESSAGE_HEADER_SIZE, VENDOR_ID};
use crate::core::guid::GuidPrefix;
use crate::core::ser::{CdrMessage, Endianness, SerError, SerResult};
use crate::core::time::Time;

use super::submessage::{Submessage, INFO_TS, PAD};

const RTPS_MAGIC: &[u8; 4] = b"RTPS";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpsHeader {
    pub protocol_version: [u8; 2],
    pub vendor_id: [u8; 2],
    pub guid_prefix: GuidPrefix,
}

impl RtpsHeader {
    pub fn new(guid_prefix: GuidPrefix) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            vendor_id: VENDOR_ID,
            guid_prefix,
        }
    }

    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        msg.write_bytes(RTPS_MAGIC)?;
        msg.write_bytes(&self.protocol_version)?;
        msg.write_bytes(&self.vendor_id)?;
        msg.write_guid_prefix(&self.guid_prefix)
    }

    /// Validate the magic and the major protocol version.
    pub fn read_from(msg: &mut CdrMessage) -> SerResult<Self> {
        if msg.read_bytes(4)? != RTPS_MAGIC {
            return Err(SerError::invalid("missing RTPS magic"));
        }
        let mut protocol_version = [0u8; 2];
        protocol_version.copy_from_slice(msg.read_bytes(2)?);
        if protocol_version[0] != PROTOCOL_VERSION[0] {
            return Err(SerError::invalid(format!(
                "unsupported protocol version {}.{}",
                protocol_version[0], protocol_version[1]
            )));
        }
        let mut vendor_id = [0u8; 2];
        vendor_id.copy_from_slice(msg.read_bytes(2)?);
        Ok(Self {
            protocol_version,
            vendor_id,
            guid_prefix: msg.read_guid_prefix()?,
        })
    }
}

/// Accumulates submessages behind one header, up to a size limit.
#[derive(Debug)]
pub struct MessageBuilder {
    msg: CdrMessage,
    submessages: usize,
}

impl MessageBuilder {
    pub fn new(guid_prefix: GuidPrefix, max_size: usize) -> SerResult<Self> {
        let mut msg = CdrMessage::new(max_size);
        RtpsHeader::new(guid_prefix).write_to(&mut msg)?;
        Ok(Self {
            msg,
            submessages: 0,
        })
    }

    /// Append a submessage. Returns `Ok(false)` and leaves the message
    /// untouched when it does not fit.
    pub fn add(&mut self, submessage: &Submessage) -> SerResult<bool> {
        let mark = self.msg.length();
        match submessage.write_to(&mut self.msg) {
            Ok(()) => {
                self.submessages += 1;
                Ok(true)
            }
            Err(SerError::WriteFailed { .. }) => {
                self.msg.truncate(mark);
                Ok(false)
            }
            Err(e) => {
                self.msg.truncate(mark);
                Err(e)
            }
        }
    }

    pub fn submessage_count(&self) -> usize {
        self.submessages
    }

    pub fn is_empty(&self) -> bool {
        self.submessages == 0
    }

    pub fn len(&self) -> usize {
        self.msg.length()
    }

    pub fn finish(self) -> Vec<u8> {
        self.msg.into_bytes()
    }
}

/// One submessage addressed to the local participant, with the receiver
/// state in effect when it was parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedSubmessage {
    pub source_prefix: GuidPrefix,
    pub timestamp: Option<Time>,
    pub submessage: Submessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub header: RtpsHeader,
    pub submessages: Vec<ReceivedSubmessage>,
}

/// Parse a datagram for the participant `local_prefix`.
///
/// A bad header rejects the whole message. A malformed submessage is
/// dropped and parsing resumes at the next header; a length running past
/// the end of the datagram stops the walk. Unknown ids are skipped.
pub fn parse_message(bytes: &[u8], local_prefix: GuidPrefix) -> SerResult<ParsedMessage> {
    if bytes.len() < RTPS_MESSAGE_HEADER_SIZE {
        return Err(SerError::ReadFailed {
            offset: 0,
            reason: format!("{} bytes is shorter than an RTPS header", bytes.len()),
        });
    }
    let mut msg = CdrMessage::from_bytes(&bytes[..RTPS_MESSAGE_HEADER_SIZE]);
    let header = RtpsHeader::read_from(&mut msg)?;

    let mut submessages = Vec::new();
    let mut timestamp = None;
    let mut for_us = true;
    let mut pos = RTPS_MESSAGE_HEADER_SIZE;

    while pos + RTPS_SUBMESSAGE_HEADER_SIZE <= bytes.len() {
        let id = bytes[pos];
        let flags = bytes[pos + 1];
        let endianness = Endianness::from_flags(flags);
        let octets = match endianness {
            Endianness::Little => u16::from_le_bytes([bytes[pos + 2], bytes[pos + 3]]),
            Endianness::Big => u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]),
        } as usize;
        let body_start = pos + RTPS_SUBMESSAGE_HEADER_SIZE;
        // Zero means "up to the end of the message", except for PAD and INFO_TS.
        let body_len = if octets == 0 && id != PAD && id != INFO_TS {
            bytes.len() - body_start
        } else {
            octets
        };
        if body_start + body_len > bytes.len() {
            log::debug!(
                "[RtpsParser] submessage 0x{:02x} at {} overruns the message ({} > {}), stopping",
                id,
                pos,
                body_start + body_len,
                bytes.len()
            );
            break;
        }
        pos = body_start + body_len;
        pos += (4 - pos % 4) % 4;

        let mut body =
            CdrMessage::from_bytes(&bytes[body_start..body_start + body_len]).with_endianness(endianness);
        let submessage = match Submessage::read_from(id, flags, &mut body) {
            Ok(Some(sub)) => sub,
            Ok(None) => {
                log::trace!("[RtpsParser] skipping submessage id 0x{:02x}", id);
                continue;
            }
            Err(e) => {
                log::debug!("[RtpsParser] dropping malformed submessage 0x{:02x}: {}", id, e);
                continue;
            }
        };

        match submessage {
            Submessage::InfoDst(dst) => {
                for_us = dst.guid_prefix.is_unknown() || dst.guid_prefix == local_prefix;
            }
            Submessage::InfoTs(ts) => timestamp = ts.timestamp,
            other if for_us => submessages.push(ReceivedSubmessage {
                source_prefix: header.guid_prefix,
                timestamp,
                submessage: other,
            }),
            other => {
                log::trace!("[RtpsParser] {:?} addressed to another participant", other);
            }
        }
    }

    Ok(ParsedMessage {
        header,
        submessages,
    })
}

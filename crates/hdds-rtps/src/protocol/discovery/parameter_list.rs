// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parameter list framing: `(pid:u16, length:u16, value)` triplets padded to
//! 4 bytes and terminated by `PID_SENTINEL`.
//!
//! Used for discovery payloads (behind a PL_CDR encapsulation header) and for
//! DATA inline QoS (no encapsulation, submessage endianness).

use super::constants::{
    PID_KEY_HASH, PID_PAD, PID_SENTINEL, PID_STATUS_INFO, PL_CDR_BE, PL_CDR_LE,
};
use crate::core::ser::{CdrMessage, Endianness, SerError, SerResult};
use crate::reliability::InstanceHandle;

/// Write the 4-byte encapsulation header. The identifier is always big endian.
pub fn write_encapsulation(msg: &mut CdrMessage, endianness: Endianness) -> SerResult<()> {
    let id = match endianness {
        Endianness::Big => PL_CDR_BE,
        Endianness::Little => PL_CDR_LE,
    };
    msg.write_bytes(&id.to_be_bytes())?;
    msg.write_bytes(&[0, 0])?;
    msg.set_endianness(endianness);
    Ok(())
}

/// Read the encapsulation header and switch `msg` to the announced byte order.
pub fn read_encapsulation(msg: &mut CdrMessage) -> SerResult<Endianness> {
    let raw = msg.read_bytes(4)?;
    let id = u16::from_be_bytes([raw[0], raw[1]]);
    let endianness = match id {
        PL_CDR_BE => Endianness::Big,
        PL_CDR_LE => Endianness::Little,
        other => {
            return Err(SerError::invalid(format!(
                "unsupported encapsulation 0x{:04x}",
                other
            )))
        }
    };
    msg.set_endianness(endianness);
    Ok(endianness)
}

/// Write one parameter; `body` writes the value, length and padding are
/// filled in afterwards.
pub fn write_parameter<F>(msg: &mut CdrMessage, pid: u16, body: F) -> SerResult<()>
where
    F: FnOnce(&mut CdrMessage) -> SerResult<()>,
{
    let header_pos = msg.pos();
    msg.write_parameter_header(pid, 0)?;
    let start = msg.pos();
    body(msg)?;
    msg.write_padding(4)?;
    let length = u16::try_from(msg.pos() - start).map_err(|_| SerError::WriteFailed {
        offset: start,
        reason: format!("parameter 0x{:04x} longer than 65535 bytes", pid),
    })?;
    msg.patch_u16(header_pos + 2, length)
}

pub fn write_sentinel(msg: &mut CdrMessage) -> SerResult<()> {
    msg.write_parameter_header(PID_SENTINEL, 0)
}

/// Walk a parameter list up to and including the sentinel.
///
/// `visit` receives each pid with a cursor over exactly its value (same
/// endianness). Pids it does not know must be ignored by the visitor; PAD is
/// never passed. A missing sentinel or a truncated value is an error.
pub fn read_parameters<F>(msg: &mut CdrMessage, mut visit: F) -> SerResult<()>
where
    F: FnMut(u16, &mut CdrMessage) -> SerResult<()>,
{
    let endianness = msg.endianness();
    loop {
        let (pid, length) = msg.read_parameter_header()?;
        if pid == PID_SENTINEL {
            return Ok(());
        }
        let offset = msg.pos();
        let value = msg.read_bytes(usize::from(length)).map_err(|_| SerError::ReadFailed {
            offset,
            reason: format!("parameter 0x{:04x} truncated ({} bytes announced)", pid, length),
        })?;
        if pid == PID_PAD {
            continue;
        }
        let mut cursor = CdrMessage::from_bytes(value).with_endianness(endianness);
        visit(pid, &mut cursor)?;
    }
}

/// Inline QoS carried by DATA / DATA_FRAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InlineQos {
    pub key_hash: Option<InstanceHandle>,
    /// STATUS_INFO flags (disposed = 0x1, unregistered = 0x2).
    pub status_info: Option<u8>,
}

impl InlineQos {
    pub fn is_empty(&self) -> bool {
        self.key_hash.is_none() && self.status_info.is_none()
    }

    pub fn write_to(&self, msg: &mut CdrMessage) -> SerResult<()> {
        if let Some(handle) = &self.key_hash {
            write_parameter(msg, PID_KEY_HASH, |m| m.write_bytes(&handle.0))?;
        }
        if let Some(flags) = self.status_info {
            write_parameter(msg, PID_STATUS_INFO, |m| m.write_bytes(&[0, 0, 0, flags]))?;
        }
        write_sentinel(msg)
    }

    pub fn read_from(msg: &mut CdrMessage) -> SerResult<Self> {
        let mut qos = InlineQos::default();
        read_parameters(msg, |pid, value| {
            match pid {
                PID_KEY_HASH => {
                    let mut hash = [0u8; 16];
                    hash.copy_from_slice(value.read_bytes(16)?);
                    qos.key_hash = Some(InstanceHandle(hash));
                }
                PID_STATUS_INFO => {
                    let raw = value.read_bytes(4)?;
                    qos.status_info = Some(raw[3]);
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(qos)
    }
}

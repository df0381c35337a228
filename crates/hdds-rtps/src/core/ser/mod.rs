// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDR serialization helpers for RTPS message encoding/decoding.

pub mod cdr_message;

pub use cdr_message::{CdrMessage, Endianness};

use std::fmt;

/// Serialization error used within core::ser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerError {
    WriteFailed { offset: usize, reason: String },
    ReadFailed { offset: usize, reason: String },
    InvalidData { reason: String },
}

impl SerError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        SerError::InvalidData {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerError::WriteFailed { offset, reason } => {
                write!(f, "write failed at offset {}: {}", offset, reason)
            }
            SerError::ReadFailed { offset, reason } => {
                write!(f, "read failed at offset {}: {}", offset, reason)
            }
            SerError::InvalidData { reason } => write!(f, "invalid data: {}", reason),
        }
    }
}

impl std::error::Error for SerError {}

impl From<SerError> for crate::dds::Error {
    fn from(err: SerError) -> Self {
        crate::dds::Error::Serialization(err)
    }
}

pub type SerResult<T> = core::result::Result<T, SerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ser_error_display_variants() {
        let err = SerError::WriteFailed {
            offset: 12,
            reason: "buffer too small".into(),
        };
        assert_eq!(err.to_string(), "write failed at offset 12: buffer too small");

        let err = SerError::ReadFailed {
            offset: 4,
            reason: "unexpected end of buffer".into(),
        };
        assert_eq!(err.to_string(), "read failed at offset 4: unexpected end of buffer");

        let err = SerError::invalid("numBits > 256");
        assert_eq!(err.to_string(), "invalid data: numBits > 256");
    }

    #[test]
    fn test_ser_error_converts_to_dds_error() {
        let err: crate::dds::Error = SerError::invalid("bad").into();
        assert!(matches!(err, crate::dds::Error::Serialization(_)));
    }
}

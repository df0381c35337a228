// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Protocol constants and reliability timing configuration.
//!
//! # Architecture
//!
//! - **Static**: compile-time RTPS constants (header sizes, bitmap limits, defaults)
//! - **Dynamic**: [`ReliabilityConfig`], passed to `Participant::create` and
//!   copied into every endpoint it builds
//!
//! # Example
//!
//! ```ignore
//! use hdds_rtps::config::ReliabilityConfig;
//!
//! let cfg = ReliabilityConfig::from_yaml_str("heartbeat_period_ms: 50\n")?;
//! assert_eq!(cfg.heartbeat_period().as_millis(), 50);
//! ```

use std::time::Duration;

use crate::dds::{Error, Result};

// =======================================================================
// RTPS wire constants
// =======================================================================

/// "RTPS" magic + version (2) + vendor (2) + guid prefix (12).
pub const RTPS_MESSAGE_HEADER_SIZE: usize = 20;

/// Submessage header: id, flags, octetsToNextHeader.
pub const RTPS_SUBMESSAGE_HEADER_SIZE: usize = 4;

/// Protocol version announced in every message header.
pub const PROTOCOL_VERSION: [u8; 2] = [2, 3];

/// Vendor id placed in outgoing message headers.
pub const VENDOR_ID: [u8; 2] = [0x01, 0xAA];

/// Upper bound on SequenceNumberSet / FragmentNumberSet width.
pub const MAX_BITMAP_BITS: u32 = crate::reliability::MAX_BITMAP_BITS;

/// Largest message the CDR buffer grows to (fits a UDP datagram).
pub const DEFAULT_CDR_MESSAGE_SIZE: usize = 65_500;

/// Default payload buffers retained by a participant's pool.
pub const DEFAULT_PAYLOAD_POOL_CACHE: usize = 256;

// =======================================================================
// Reliability timing defaults
// =======================================================================

pub const DEFAULT_HEARTBEAT_PERIOD_MS: u64 = 100;
pub const DEFAULT_NACK_RESPONSE_DELAY_MS: u64 = 5;
pub const DEFAULT_NACK_SUPPRESSION_MS: u64 = 0;
pub const DEFAULT_HEARTBEAT_RESPONSE_DELAY_MS: u64 = 5;
pub const DEFAULT_MAX_BLOCKING_TIME_MS: u64 = 100;
/// Fragment size used when a sample does not fit in one DATA.
pub const DEFAULT_FRAGMENT_SIZE: u16 = 16_384;
/// Room kept for headers, INFO_* and inline QoS around a DATA/DATA_FRAG body.
pub const SUBMESSAGE_OVERHEAD: usize = 128;
/// Partially received fragmented changes kept per matched writer.
pub const DEFAULT_MAX_PENDING_FRAGMENTS: usize = 64;
/// Largest announced DATA_FRAG sample size a reader will reassemble.
pub const DEFAULT_MAX_SAMPLE_SIZE: u32 = 16 * 1024 * 1024;

/// Upper bound accepted for any timing knob (one hour).
const MAX_PERIOD_MS: u64 = 3_600_000;

/// Timing knobs of the reliable protocol.
///
/// All values are milliseconds so the YAML form stays flat.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "config-loaders",
    derive(serde::Deserialize, serde::Serialize),
    serde(default)
)]
pub struct ReliabilityConfig {
    /// Period of the writer's HEARTBEAT timer.
    pub heartbeat_period_ms: u64,
    /// Delay between a NACK and the retransmission pass.
    pub nack_response_delay_ms: u64,
    /// Window during which a sent change is not re-sent on NACK.
    pub nack_suppression_ms: u64,
    /// Delay between a HEARTBEAT and the reader's ACKNACK.
    pub heartbeat_response_delay_ms: u64,
    /// Push mode sends DATA immediately; pull mode waits for NACKs.
    pub push_mode: bool,
    /// Largest datagram handed to the transport.
    pub max_message_size: usize,
    /// Payload bytes per DATA_FRAG fragment.
    pub fragment_size: u16,
    /// Reassembly slots per writer; the least recently updated is evicted.
    pub max_pending_fragments: usize,
    /// DATA_FRAG announcing a larger sample is dropped.
    pub max_sample_size: u32,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_ms: DEFAULT_HEARTBEAT_PERIOD_MS,
            nack_response_delay_ms: DEFAULT_NACK_RESPONSE_DELAY_MS,
            nack_suppression_ms: DEFAULT_NACK_SUPPRESSION_MS,
            heartbeat_response_delay_ms: DEFAULT_HEARTBEAT_RESPONSE_DELAY_MS,
            push_mode: true,
            max_message_size: DEFAULT_CDR_MESSAGE_SIZE,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            max_pending_fragments: DEFAULT_MAX_PENDING_FRAGMENTS,
            max_sample_size: DEFAULT_MAX_SAMPLE_SIZE,
        }
    }
}

impl ReliabilityConfig {
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_period_ms)
    }

    pub fn nack_response_delay(&self) -> Duration {
        Duration::from_millis(self.nack_response_delay_ms)
    }

    pub fn nack_suppression(&self) -> Duration {
        Duration::from_millis(self.nack_suppression_ms)
    }

    pub fn heartbeat_response_delay(&self) -> Duration {
        Duration::from_millis(self.heartbeat_response_delay_ms)
    }

    /// Reject values the timers cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_period_ms == 0 {
            return Err(Error::BadParameter(
                "heartbeat_period_ms must be > 0".to_string(),
            ));
        }
        if self.fragment_size == 0 {
            return Err(Error::BadParameter("fragment_size must be > 0".to_string()));
        }
        if self.max_pending_fragments == 0 || self.max_sample_size == 0 {
            return Err(Error::BadParameter(
                "max_pending_fragments and max_sample_size must be > 0".to_string(),
            ));
        }
        let min_message = RTPS_MESSAGE_HEADER_SIZE + SUBMESSAGE_OVERHEAD + usize::from(self.fragment_size);
        if self.max_message_size < min_message {
            return Err(Error::BadParameter(format!(
                "max_message_size {} cannot hold a {} byte fragment (need {})",
                self.max_message_size, self.fragment_size, min_message
            )));
        }
        for (name, value) in [
            ("heartbeat_period_ms", self.heartbeat_period_ms),
            ("nack_response_delay_ms", self.nack_response_delay_ms),
            ("nack_suppression_ms", self.nack_suppression_ms),
            ("heartbeat_response_delay_ms", self.heartbeat_response_delay_ms),
        ] {
            if value > MAX_PERIOD_MS {
                return Err(Error::BadParameter(format!(
                    "{} = {} exceeds {} ms",
                    name, value, MAX_PERIOD_MS
                )));
            }
        }
        Ok(())
    }
}

#[cfg(feature = "config-loaders")]
impl ReliabilityConfig {
    /// Parse and validate a YAML document (missing keys keep their defaults).
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: ReliabilityConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::BadParameter(format!("invalid reliability YAML: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::BadParameter(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }
}

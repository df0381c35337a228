// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RTPS Submessages (OMG RTPS 2.3 Section 8.3.7)
//!
//! - ACKNACK (0x06): positive/negative acknowledgment
//! - HEARTBEAT (0x07): writer liveliness and available sequences
//! - GAP (0x08): irrelevant sequence numbers
//! - INFO_TS (0x09): timestamp for subsequent submessages
//! - INFO_DST (0x0E): destination GUID prefix
//! - NACK_FRAG (0x12): missing fragments of one change
//! - DATA (0x15): user data payload
//! - DATA_FRAG (0x16): fragmented user data
//!
//! Each submessage carries its own byte order (flag bit 0); [`parse_message`]
//! switches endianness per submessage.

mod message;
pub mod submessage;

pub use message::{parse_message, MessageBuilder, ParsedMessage, ReceivedSubmessage, RtpsHeader};
pub use submessage::{
    AckNackSubmessage, DataFragSubmessage, DataSubmessage, GapSubmessage, HeartbeatSubmessage,
    InfoDstSubmessage, InfoTsSubmessage, NackFragSubmessage, Submessage,
};

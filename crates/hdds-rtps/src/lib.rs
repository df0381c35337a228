// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-rtps - reliable RTPS writer/reader core
//!
//! The stateful reliability protocol of DDSI-RTPS: writer and reader
//! histories, per-peer proxies, HEARTBEAT/ACKNACK/GAP/NACK_FRAG exchange,
//! fragmentation and the CDR / parameter-list codecs underneath.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hdds_rtps::config::ReliabilityConfig;
//! use hdds_rtps::core::GuidPrefix;
//! use hdds_rtps::dds::{ReaderListener, WriterListener};
//! use hdds_rtps::participant::{match_endpoints, Participant, TopicInfo};
//! use hdds_rtps::qos::QosProfile;
//! use hdds_rtps::reliability::InstanceHandle;
//! use hdds_rtps::transport::LoopbackTransport;
//!
//! fn main() -> hdds_rtps::dds::Result<()> {
//!     let transport = Arc::new(LoopbackTransport::new());
//!     let participant =
//!         Participant::create(GuidPrefix([1; 12]), ReliabilityConfig::default(), transport.clone())?;
//!
//!     let topic = TopicInfo::new("Square", "ShapeType");
//!     let writer = participant.create_writer(&topic, QosProfile::reliable_keep_last(10), WriterListener::new())?;
//!     let reader = participant.create_reader(&topic, QosProfile::reliable_keep_last(10), ReaderListener::new())?;
//!     match_endpoints(&writer, &reader)?;
//!
//!     writer.write(b"hello", InstanceHandle::NIL)?;
//!     participant.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   Participant: pool + timers owner, entity registry, inbound dispatch |
//! +---------------------------------------------------------------------+
//! |   StatefulWriter (ReaderProxy per reader) | StatefulReader (WriterProxy) |
//! +---------------------------------------------------------------------+
//! |   WriterHistory | ReaderHistory (instances, ownership, limits)       |
//! +---------------------------------------------------------------------+
//! |   RTPS submessages | ParameterList / proxy data | CdrMessage        |
//! +---------------------------------------------------------------------+
//! |   Transport trait (LoopbackTransport in-memory)                     |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Modules Overview
//!
//! - [`participant`] - entry point, start here
//! - [`core`] - identifiers, payload pool, CDR buffer, stateful endpoints
//! - [`history`] - writer and reader history caches
//! - [`reliability`] - sequence numbers, bitmap sets, cache changes
//! - [`protocol`] - RTPS submessages and the discovery parameter list
//! - [`qos`] - the policies the reliability core interprets
//! - [`dds`] - errors, return codes and listener slots

pub mod config;
pub mod core;
pub mod dds;
pub mod history;
pub mod participant;
pub mod protocol;
pub mod qos;
pub mod reliability;
pub mod runtime;
pub mod transport;

pub use dds::{Error, Result};
pub use participant::{Participant, TopicInfo};

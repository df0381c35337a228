// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RTPS Reliability Primitives
//!
//! Value types shared by both sides of the reliable protocol: sequence
//! numbers, the bitmap sets carried by ACKNACK/GAP/NACK_FRAG, and the
//! [`CacheChange`] that flows from a writer history to a reader history.
//!
//! ## Protocol Flow
//!
//! ```text
//! StatefulWriter (ReaderProxy)              StatefulReader (WriterProxy)
//!   |                                          |
//!   |--- DATA (seq=1) ------------------------>| RECEIVED
//!   |--- DATA (seq=2) ----------X (lost)       |
//!   |--- DATA (seq=3) ------------------------>| RECEIVED, 2 UNKNOWN
//!   |                                          |
//!   |--- HEARTBEAT (first=1, last=3) --------->| 2 -> MISSING
//!   |<-- ACKNACK (base=2, set={2}) ------------|
//!   | 1 ACKNOWLEDGED, 2 -> UNSENT              |
//!   |--- DATA (seq=2) [retransmit] ----------->| available_changes_max = 3
//!   |<-- ACKNACK (base=4, set={}) -------------|
//!   | 1..3 ACKNOWLEDGED, removable             |
//! ```
//!
//! ## See Also
//!
//! - [`crate::core::writer`] - writer-side engine
//! - [`crate::core::reader`] - reader-side engine

mod change;
mod seq;
mod seq_set;

// ============================================================================
// Public re-exports
// ============================================================================

pub use change::{
    CacheChange, ChangeKind, InstanceHandle, InstanceState, SampleIdentity, SampleInfo,
    SampleState, ViewState, WriteParams,
};
pub use seq::{SeqNumGenerator, SequenceNumber};
pub use seq_set::{
    word_count_for_bits, FragmentNumberSet, SequenceNumberSet, BITMAP_WORDS, MAX_BITMAP_BITS,
};

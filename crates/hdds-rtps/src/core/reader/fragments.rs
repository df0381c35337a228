// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reassembly of one fragmented change (DATA_FRAG).
//!
//! Fragment numbers start at 1. Every fragment but the last is exactly
//! `fragment_size` bytes. Fragments are buffered as they arrive, so memory
//! follows what was received rather than the announced sample size.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::config::ReliabilityConfig;
use crate::core::time::Time;
use crate::reliability::{ChangeKind, FragmentNumberSet, InstanceHandle, MAX_BITMAP_BITS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// Starting number is 0 or past the last fragment.
    OutOfRange { starting: u32, total: u32 },
    /// Byte count does not match the advertised geometry.
    LengthMismatch { expected: usize, got: usize },
    /// Zero sample or fragment size.
    InvalidGeometry { sample_size: u32, fragment_size: u16 },
    /// Announced sample larger than the reader accepts.
    SampleTooLarge { sample_size: u32, max: u32 },
}

impl std::fmt::Display for FragmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FragmentError::OutOfRange { starting, total } => {
                write!(f, "fragment {} out of range (total {})", starting, total)
            }
            FragmentError::LengthMismatch { expected, got } => {
                write!(f, "fragment data length {} (expected {})", got, expected)
            }
            FragmentError::InvalidGeometry {
                sample_size,
                fragment_size,
            } => write!(
                f,
                "invalid geometry: sample {} bytes, fragment {} bytes",
                sample_size, fragment_size
            ),
            FragmentError::SampleTooLarge { sample_size, max } => {
                write!(f, "sample of {} bytes exceeds limit {}", sample_size, max)
            }
        }
    }
}

impl std::error::Error for FragmentError {}

/// Bounds applied to the reassembly slots of one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentLimits {
    pub max_pending: usize,
    pub max_sample_size: u32,
}

impl From<&ReliabilityConfig> for FragmentLimits {
    fn from(config: &ReliabilityConfig) -> Self {
        Self {
            max_pending: config.max_pending_fragments,
            max_sample_size: config.max_sample_size,
        }
    }
}

#[derive(Debug)]
pub struct FragmentAssembly {
    sample_size: u32,
    fragment_size: u16,
    total: u32,
    /// Received fragments by number.
    fragments: BTreeMap<u32, Vec<u8>>,
    buffered: usize,
    last_updated: Instant,
    /// Metadata carried by the inline QoS of the first fragment.
    pub kind: ChangeKind,
    pub instance_handle: InstanceHandle,
    pub source_timestamp: Time,
}

/// Number of fragments needed for `sample_size` bytes.
pub fn fragment_count(sample_size: u32, fragment_size: u16) -> u32 {
    if fragment_size == 0 {
        return 0;
    }
    sample_size.div_ceil(u32::from(fragment_size))
}

impl FragmentAssembly {
    /// Empty assembly; fails on a zero size or a sample over `max_sample_size`.
    pub fn new(sample_size: u32, fragment_size: u16, max_sample_size: u32) -> Result<Self, FragmentError> {
        if sample_size == 0 || fragment_size == 0 {
            return Err(FragmentError::InvalidGeometry {
                sample_size,
                fragment_size,
            });
        }
        if sample_size > max_sample_size {
            return Err(FragmentError::SampleTooLarge {
                sample_size,
                max: max_sample_size,
            });
        }
        Ok(Self {
            sample_size,
            fragment_size,
            total: fragment_count(sample_size, fragment_size),
            fragments: BTreeMap::new(),
            buffered: 0,
            last_updated: Instant::now(),
            kind: ChangeKind::Alive,
            instance_handle: InstanceHandle::NIL,
            source_timestamp: Time::ZERO,
        })
    }

    pub fn sample_size(&self) -> u32 {
        self.sample_size
    }

    pub fn fragment_size(&self) -> u16 {
        self.fragment_size
    }

    pub fn total_fragments(&self) -> u32 {
        self.total
    }

    pub fn received_fragments(&self) -> u32 {
        self.fragments.len() as u32
    }

    /// Payload bytes held so far.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.received_fragments() == self.total
    }

    fn fragment_len(&self, number: u32) -> usize {
        let size = usize::from(self.fragment_size);
        let start = (number as usize - 1) * size;
        (self.sample_size as usize - start).min(size)
    }

    /// Store `count` consecutive fragments starting at `starting`.
    /// Duplicates are accepted and ignored.
    pub fn add_fragments(
        &mut self,
        starting: u32,
        count: u16,
        bytes: &[u8],
    ) -> Result<bool, FragmentError> {
        let last = starting.saturating_add(u32::from(count)).saturating_sub(1);
        if starting == 0 || count == 0 || last > self.total {
            return Err(FragmentError::OutOfRange {
                starting,
                total: self.total,
            });
        }
        let expected: usize = (starting..=last).map(|n| self.fragment_len(n)).sum();
        if bytes.len() < expected {
            return Err(FragmentError::LengthMismatch {
                expected,
                got: bytes.len(),
            });
        }
        let mut offset = 0;
        for number in starting..=last {
            let len = self.fragment_len(number);
            if !self.fragments.contains_key(&number) {
                self.fragments
                    .insert(number, bytes[offset..offset + len].to_vec());
                self.buffered += len;
            }
            offset += len;
        }
        self.last_updated = Instant::now();
        Ok(self.is_complete())
    }

    fn first_missing(&self) -> Option<u32> {
        let mut expected = 1;
        for number in self.fragments.keys() {
            if *number != expected {
                break;
            }
            expected += 1;
        }
        (expected <= self.total).then_some(expected)
    }

    /// Missing fragments as a NACK_FRAG set, anchored at the first gap.
    pub fn missing_fragments(&self) -> Option<FragmentNumberSet> {
        let first = self.first_missing()?;
        let mut set = FragmentNumberSet::new(first);
        for number in first..=self.total.min(first + MAX_BITMAP_BITS - 1) {
            if !self.fragments.contains_key(&number) {
                set.add(number);
            }
        }
        Some(set)
    }

    /// Reassembled payload, once complete.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut data = Vec::with_capacity(self.sample_size as usize);
        for fragment in self.fragments.into_values() {
            data.extend_from_slice(&fragment);
        }
        Some(data)
    }
}

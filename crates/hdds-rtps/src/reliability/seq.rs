// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS sequence numbers.
//!
//! On the wire a `SequenceNumber_t` is a signed 32-bit `high` word followed by
//! an unsigned 32-bit `low` word. Ordering compares `high` first, which the
//! derived `Ord` gives us for free because of field order.
//!
//! # Thread Safety
//!
//! [`SeqNumGenerator`] uses an atomic counter so several application threads
//! may allocate sequence numbers without taking the writer lock; the writer
//! history uses it under its own lock anyway, which keeps numbers gap-free.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::sync::atomic::{AtomicI64, Ordering};

/// 64-bit RTPS sequence number (`high:i32`, `low:u32`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber {
    high: i32,
    low: u32,
}

impl SequenceNumber {
    /// `SEQUENCENUMBER_UNKNOWN` (-1, 0).
    pub const UNKNOWN: SequenceNumber = SequenceNumber { high: -1, low: 0 };
    pub const ZERO: SequenceNumber = SequenceNumber { high: 0, low: 0 };
    pub const MAX: SequenceNumber = SequenceNumber {
        high: i32::MAX,
        low: u32::MAX,
    };

    pub const fn new(high: i32, low: u32) -> Self {
        Self { high, low }
    }

    pub const fn high(self) -> i32 {
        self.high
    }

    pub const fn low(self) -> u32 {
        self.low
    }

    /// Combined 64-bit value.
    pub const fn value(self) -> i64 {
        ((self.high as i64) << 32) | self.low as i64
    }

    pub const fn from_value(value: i64) -> Self {
        Self {
            high: (value >> 32) as i32,
            low: value as u32,
        }
    }

    /// Valid sequence numbers start at 1.
    pub const fn is_valid(self) -> bool {
        self.value() > 0
    }

    pub const fn is_unknown(self) -> bool {
        self.high == -1 && self.low == 0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self::from_value(self.value().saturating_add(1))
    }

    #[must_use]
    pub const fn prev(self) -> Self {
        Self::from_value(self.value().saturating_sub(1))
    }

    /// Distance `self - other`, `None` when negative.
    pub fn distance_from(self, other: SequenceNumber) -> Option<u64> {
        u64::try_from(self.value() - other.value()).ok()
    }
}

impl From<i64> for SequenceNumber {
    fn from(value: i64) -> Self {
        Self::from_value(value)
    }
}

impl From<SequenceNumber> for i64 {
    fn from(sn: SequenceNumber) -> Self {
        sn.value()
    }
}

impl Add<u64> for SequenceNumber {
    type Output = SequenceNumber;

    fn add(self, rhs: u64) -> Self::Output {
        let rhs = i64::try_from(rhs).unwrap_or(i64::MAX);
        Self::from_value(self.value().saturating_add(rhs))
    }
}

impl AddAssign<u64> for SequenceNumber {
    fn add_assign(&mut self, rhs: u64) {
        *self = *self + rhs;
    }
}

impl Sub<u64> for SequenceNumber {
    type Output = SequenceNumber;

    fn sub(self, rhs: u64) -> Self::Output {
        let rhs = i64::try_from(rhs).unwrap_or(i64::MAX);
        Self::from_value(self.value().saturating_sub(rhs))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SN({})", self.value())
    }
}

/// Monotonic sequence number allocator starting at 1.
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicI64,
}

impl SeqNumGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicI64::new(1),
        }
    }

    /// Resume numbering after `last` (e.g. when a history is rebuilt).
    pub fn starting_after(last: SequenceNumber) -> Self {
        Self {
            next: AtomicI64::new(last.value().max(0) + 1),
        }
    }

    /// Allocate the next sequence number.
    pub fn next(&self) -> SequenceNumber {
        SequenceNumber::from_value(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Last allocated number (ZERO when none yet).
    pub fn current(&self) -> SequenceNumber {
        SequenceNumber::from_value(self.next.load(Ordering::Relaxed) - 1)
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_high_low_split() {
        let sn = SequenceNumber::from((3_i64 << 32) + 7);
        assert_eq!(sn.high(), 3);
        assert_eq!(sn.low(), 7);
        assert_eq!(sn.value(), (3_i64 << 32) + 7);
    }

    #[test]
    fn test_ordering_crosses_low_word() {
        let a = SequenceNumber::new(0, u32::MAX);
        let b = SequenceNumber::new(1, 0);
        assert!(a < b);
        assert_eq!(a.next(), b);
        assert_eq!(b.prev(), a);
        assert!(SequenceNumber::UNKNOWN < SequenceNumber::ZERO);
    }

    #[test]
    fn test_arithmetic() {
        let sn = SequenceNumber::from(10);
        assert_eq!(sn + 5, SequenceNumber::from(15));
        assert_eq!(sn - 3, SequenceNumber::from(7));
        assert_eq!(SequenceNumber::from(15).distance_from(sn), Some(5));
        assert_eq!(sn.distance_from(SequenceNumber::from(15)), None);

        let mut acc = SequenceNumber::ZERO;
        acc += 2;
        assert_eq!(acc, SequenceNumber::from(2));
    }

    #[test]
    fn test_validity() {
        assert!(!SequenceNumber::ZERO.is_valid());
        assert!(!SequenceNumber::UNKNOWN.is_valid());
        assert!(SequenceNumber::UNKNOWN.is_unknown());
        assert!(SequenceNumber::from(1).is_valid());
    }

    #[test]
    fn test_generator_starts_at_one() {
        let gen = SeqNumGenerator::new();
        assert_eq!(gen.current(), SequenceNumber::ZERO);
        assert_eq!(gen.next(), SequenceNumber::from(1));
        assert_eq!(gen.next(), SequenceNumber::from(2));
        assert_eq!(gen.current(), SequenceNumber::from(2));

        let resumed = SeqNumGenerator::starting_after(SequenceNumber::from(41));
        assert_eq!(resumed.next(), SequenceNumber::from(42));
    }

    #[test]
    fn test_generator_thread_safety() {
        let gen = Arc::new(SeqNumGenerator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gen = Arc::clone(&gen);
                thread::spawn(move || (0..250).map(|_| gen.next().value()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().expect("thread should join"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000, "every allocated number must be unique");
        assert_eq!(all.first().copied(), Some(1));
        assert_eq!(all.last().copied(), Some(1000));
    }
}

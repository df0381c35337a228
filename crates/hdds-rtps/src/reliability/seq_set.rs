// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded bitmap sets used by ACKNACK, GAP and NACK_FRAG.
//!
//! Layout is fixed by the wire protocol: bit `i` of the set (offset `i` from
//! the base) lives in word `i / 32`, most significant bit first
//! (`1 << (31 - i % 32)`). `numBits` is the exact count of significant bits
//! (highest member offset + 1) and the bitmap is transmitted as
//! `ceil(numBits / 32)` words.

use super::seq::SequenceNumber;

/// Maximum number of bitmap bits (RTPS limit).
pub const MAX_BITMAP_BITS: u32 = 256;
pub const WORD_BITS: u32 = 32;
pub const BITMAP_WORDS: usize = 8;

/// Compute number of words required for a given bit count.
pub fn word_count_for_bits(bits: u32) -> usize {
    bits.min(MAX_BITMAP_BITS).div_ceil(WORD_BITS) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Bitmap {
    num_bits: u32,
    words: [u32; BITMAP_WORDS],
}

impl Bitmap {
    fn from_raw(num_bits: u32, mut words: [u32; BITMAP_WORDS]) -> Self {
        let num_bits = num_bits.min(MAX_BITMAP_BITS);
        let used = word_count_for_bits(num_bits);
        for word in words.iter_mut().skip(used) {
            *word = 0;
        }
        // Clear bits past num_bits in the last used word so equality is canonical.
        let tail = num_bits % WORD_BITS;
        if tail != 0 && used > 0 {
            words[used - 1] &= !(u32::MAX >> tail);
        }
        Self { num_bits, words }
    }

    fn set(&mut self, offset: u32) -> bool {
        if offset >= MAX_BITMAP_BITS {
            return false;
        }
        self.words[(offset / WORD_BITS) as usize] |= 1 << (31 - offset % WORD_BITS);
        self.num_bits = self.num_bits.max(offset + 1);
        true
    }

    fn get(&self, offset: u32) -> bool {
        offset < self.num_bits
            && self.words[(offset / WORD_BITS) as usize] & (1 << (31 - offset % WORD_BITS)) != 0
    }

    /// Clearing the highest member shrinks `num_bits` to the next one.
    fn clear(&mut self, offset: u32) {
        if offset >= self.num_bits {
            return;
        }
        self.words[(offset / WORD_BITS) as usize] &= !(1 << (31 - offset % WORD_BITS));
        if offset + 1 == self.num_bits {
            self.num_bits = self
                .words
                .iter()
                .enumerate()
                .rev()
                .find(|(_, w)| **w != 0)
                .map_or(0, |(idx, w)| idx as u32 * WORD_BITS + (WORD_BITS - w.trailing_zeros()));
        }
    }

    fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    fn used_words(&self) -> &[u32] {
        &self.words[..word_count_for_bits(self.num_bits)]
    }

    fn offsets(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.num_bits).filter(move |off| self.get(*off))
    }
}

/// SequenceNumberSet: base plus a 256-wide membership bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceNumberSet {
    base: SequenceNumber,
    bitmap: Bitmap,
}

impl SequenceNumberSet {
    pub const MAX_BITS: u32 = MAX_BITMAP_BITS;

    /// Empty set anchored at `base`.
    pub fn new(base: SequenceNumber) -> Self {
        Self {
            base,
            bitmap: Bitmap::default(),
        }
    }

    /// Build from explicit members; `None` if any falls outside `[base, base + 256)`.
    pub fn from_sequences<I>(base: SequenceNumber, sequences: I) -> Option<Self>
    where
        I: IntoIterator<Item = SequenceNumber>,
    {
        let mut set = Self::new(base);
        for seq in sequences {
            if !set.add(seq) {
                return None;
            }
        }
        Some(set)
    }

    /// Construct from decoded wire fields. Requires a valid (>= 1) base.
    pub fn from_raw(base: SequenceNumber, num_bits: u32, words: [u32; BITMAP_WORDS]) -> Option<Self> {
        if !base.is_valid() || num_bits > MAX_BITMAP_BITS {
            return None;
        }
        Some(Self {
            base,
            bitmap: Bitmap::from_raw(num_bits, words),
        })
    }

    pub fn base(&self) -> SequenceNumber {
        self.base
    }

    pub fn num_bits(&self) -> u32 {
        self.bitmap.num_bits
    }

    /// Bitmap words that go on the wire.
    pub fn bitmap_words(&self) -> &[u32] {
        self.bitmap.used_words()
    }

    /// Add a member; `false` (set unchanged) when outside the window.
    pub fn add(&mut self, seq: SequenceNumber) -> bool {
        match seq.distance_from(self.base) {
            Some(offset) if offset < u64::from(MAX_BITMAP_BITS) => self.bitmap.set(offset as u32),
            _ => false,
        }
    }

    pub fn remove(&mut self, seq: SequenceNumber) {
        if let Some(offset) = seq.distance_from(self.base) {
            if offset < u64::from(MAX_BITMAP_BITS) {
                self.bitmap.clear(offset as u32);
            }
        }
    }

    pub fn contains(&self, seq: SequenceNumber) -> bool {
        match seq.distance_from(self.base) {
            Some(offset) if offset < u64::from(MAX_BITMAP_BITS) => self.bitmap.get(offset as u32),
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bitmap.offsets().count()
    }

    /// Highest member, if any.
    pub fn max(&self) -> Option<SequenceNumber> {
        self.bitmap
            .offsets()
            .last()
            .map(|off| self.base + u64::from(off))
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = SequenceNumber> + '_ {
        self.bitmap.offsets().map(move |off| self.base + u64::from(off))
    }
}

/// FragmentNumberSet (NACK_FRAG): u32 base (>= 1) plus a 256-wide bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentNumberSet {
    base: u32,
    bitmap: Bitmap,
}

impl FragmentNumberSet {
    pub fn new(base: u32) -> Self {
        Self {
            base: base.max(1),
            bitmap: Bitmap::default(),
        }
    }

    pub fn from_raw(base: u32, num_bits: u32, words: [u32; BITMAP_WORDS]) -> Option<Self> {
        if base == 0 || num_bits > MAX_BITMAP_BITS {
            return None;
        }
        Some(Self {
            base,
            bitmap: Bitmap::from_raw(num_bits, words),
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn num_bits(&self) -> u32 {
        self.bitmap.num_bits
    }

    pub fn bitmap_words(&self) -> &[u32] {
        self.bitmap.used_words()
    }

    pub fn add(&mut self, fragment: u32) -> bool {
        fragment >= self.base && self.bitmap.set(fragment - self.base)
    }

    pub fn contains(&self, fragment: u32) -> bool {
        fragment >= self.base && self.bitmap.get(fragment - self.base)
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bitmap.offsets().map(move |off| self.base + off)
    }
}

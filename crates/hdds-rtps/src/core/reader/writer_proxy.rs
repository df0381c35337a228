// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-matched-writer state kept inside a reliable reader.
//!
//! State is compact: every number at or below `changes_from_writer_low_mark`
//! is resolved (received or lost), `received` holds numbers that arrived out
//! of order (and resolved ones not yet trimmed), and `max_sequence_number`
//! is the highest number the writer is known to have produced. Anything
//! unresolved in `(low_mark, max_sequence_number]` is missing; numbers above
//! the last HEARTBEAT's `lastSN` are reported as unknown.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::core::guid::Guid;
use crate::core::locator::Locator;
use crate::protocol::discovery::WriterProxyData;
use crate::reliability::{SequenceNumber, SequenceNumberSet};

use super::fragments::{FragmentAssembly, FragmentLimits};

/// Reception status of one sequence number from one writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFromWriterStatus {
    Unknown,
    Missing,
    Received,
    Lost,
}

impl ChangeFromWriterStatus {
    /// Counts toward the contiguous watermark.
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::Received | Self::Lost)
    }

    /// Announced by a HEARTBEAT.
    #[must_use]
    pub fn announced(self) -> Self {
        match self {
            Self::Unknown => Self::Missing,
            other => other,
        }
    }

    /// Dropped from the writer's history before we got it.
    #[must_use]
    pub fn trimmed_by_writer(self) -> Self {
        match self {
            Self::Unknown | Self::Missing => Self::Lost,
            other => other,
        }
    }
}

/// Result of a HEARTBEAT accepted by [`WriterProxy::process_heartbeat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatOutcome {
    /// An ACKNACK must be scheduled.
    pub send_acknack: bool,
    /// Liveliness flag was set.
    pub assert_liveliness: bool,
    /// Changes that became LOST.
    pub lost: u32,
}

#[derive(Debug)]
pub struct WriterProxy {
    data: WriterProxyData,
    changes_from_writer_low_mark: SequenceNumber,
    /// Numbers at or below this are forgotten.
    trimmed_up_to: SequenceNumber,
    max_sequence_number: SequenceNumber,
    heartbeat_last: SequenceNumber,
    /// `true` entries are relevant (DATA), `false` came from a GAP.
    received: BTreeMap<SequenceNumber, bool>,
    last_notified: SequenceNumber,
    last_heartbeat_count: u32,
    heartbeat_final_flag: bool,
    received_at_least_one_heartbeat: bool,
    acknack_count: u32,
    nackfrag_count: u32,
    ownership_strength: i32,
    is_alive: bool,
    last_liveliness: Instant,
    fragments: BTreeMap<SequenceNumber, FragmentAssembly>,
}

impl WriterProxy {
    pub fn new(data: WriterProxyData, initial_sequence: SequenceNumber) -> Self {
        let ownership_strength = data.qos.ownership_strength;
        Self {
            data,
            changes_from_writer_low_mark: initial_sequence,
            trimmed_up_to: initial_sequence,
            max_sequence_number: initial_sequence,
            heartbeat_last: initial_sequence,
            received: BTreeMap::new(),
            last_notified: initial_sequence,
            last_heartbeat_count: 0,
            heartbeat_final_flag: false,
            received_at_least_one_heartbeat: false,
            acknack_count: 0,
            nackfrag_count: 0,
            ownership_strength,
            is_alive: true,
            last_liveliness: Instant::now(),
            fragments: BTreeMap::new(),
        }
    }

    pub fn guid(&self) -> Guid {
        self.data.guid
    }

    pub fn data(&self) -> &WriterProxyData {
        &self.data
    }

    /// Replace discovery data; the ownership strength follows it.
    pub fn update(&mut self, data: WriterProxyData) {
        self.ownership_strength = data.qos.ownership_strength;
        self.data = data;
    }

    /// Durable identity when announced, the writer GUID otherwise.
    pub fn persistence_guid(&self) -> Guid {
        self.data.persistence_guid.unwrap_or(self.data.guid)
    }

    pub fn locators(&self) -> &[Locator] {
        self.data.locators()
    }

    pub fn ownership_strength(&self) -> i32 {
        self.ownership_strength
    }

    pub fn update_ownership_strength(&mut self, strength: i32) {
        self.ownership_strength = strength;
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive
    }

    pub fn assert_liveliness(&mut self) {
        self.is_alive = true;
        self.last_liveliness = Instant::now();
    }

    pub fn set_not_alive(&mut self) {
        self.is_alive = false;
    }

    pub fn last_liveliness(&self) -> Instant {
        self.last_liveliness
    }

    pub fn changes_from_writer_low_mark(&self) -> SequenceNumber {
        self.changes_from_writer_low_mark
    }

    /// Highest number below which everything is received or lost.
    pub fn available_changes_max(&self) -> SequenceNumber {
        self.changes_from_writer_low_mark
    }

    /// Lowest number still tracked.
    pub fn available_changes_min(&self) -> SequenceNumber {
        self.trimmed_up_to.next()
    }

    pub fn status_of(&self, seq: SequenceNumber) -> Option<ChangeFromWriterStatus> {
        if seq <= self.trimmed_up_to {
            return None;
        }
        let status = if self.received.contains_key(&seq) {
            ChangeFromWriterStatus::Received
        } else if seq <= self.changes_from_writer_low_mark {
            ChangeFromWriterStatus::Lost
        } else if seq <= self.heartbeat_last {
            ChangeFromWriterStatus::Missing
        } else {
            ChangeFromWriterStatus::Unknown
        };
        Some(status)
    }

    /// Forgotten numbers report whether they were resolved.
    pub fn change_was_received(&self, seq: SequenceNumber) -> bool {
        if seq <= self.trimmed_up_to {
            return seq <= self.changes_from_writer_low_mark;
        }
        self.received.contains_key(&seq)
    }

    fn advance_low_mark(&mut self) {
        let mut next = self.changes_from_writer_low_mark.next();
        while self.received.contains_key(&next) {
            self.changes_from_writer_low_mark = next;
            next = next.next();
        }
        if self.changes_from_writer_low_mark > self.max_sequence_number {
            self.max_sequence_number = self.changes_from_writer_low_mark;
        }
    }

    fn received_between(&self, from: SequenceNumber, to: SequenceNumber) -> u64 {
        if from > to {
            return 0;
        }
        self.received.range(from..=to).count() as u64
    }

    /// DATA (or a fully reassembled DATA_FRAG) arrived.
    ///
    /// Returns `false` for duplicates and numbers already resolved.
    pub fn received_change_set(&mut self, seq: SequenceNumber) -> bool {
        self.mark_received(seq, true)
    }

    /// GAP: the number counts toward contiguity without being delivered.
    pub fn irrelevant_change_set(&mut self, seq: SequenceNumber) -> bool {
        self.mark_received(seq, false)
    }

    fn mark_received(&mut self, seq: SequenceNumber, relevant: bool) -> bool {
        if !seq.is_valid()
            || seq <= self.changes_from_writer_low_mark
            || self.received.contains_key(&seq)
        {
            return false;
        }
        self.received.insert(seq, relevant);
        self.fragments.remove(&seq);
        if seq > self.max_sequence_number {
            self.max_sequence_number = seq;
        }
        self.advance_low_mark();
        true
    }

    /// Was `seq` received through DATA (as opposed to a GAP)?
    pub fn is_relevant(&self, seq: SequenceNumber) -> bool {
        self.received.get(&seq).copied().unwrap_or(false)
    }

    /// HEARTBEAT `lastSN`: everything up to `seq` exists on the writer.
    pub fn missing_changes_update(&mut self, seq: SequenceNumber) {
        if seq > self.max_sequence_number {
            self.max_sequence_number = seq;
        }
        if seq > self.heartbeat_last {
            self.heartbeat_last = seq;
        }
    }

    /// HEARTBEAT `firstSN`: everything below `seq` left the writer history.
    /// Returns how many unresolved changes became LOST.
    pub fn lost_changes_update(&mut self, seq: SequenceNumber) -> u32 {
        let new_low_mark = seq.prev();
        if new_low_mark <= self.changes_from_writer_low_mark {
            return 0;
        }
        let span = new_low_mark
            .distance_from(self.changes_from_writer_low_mark)
            .unwrap_or(0);
        let received = self.received_between(self.changes_from_writer_low_mark.next(), new_low_mark);
        let lost = span.saturating_sub(received);

        self.changes_from_writer_low_mark = new_low_mark;
        if new_low_mark > self.heartbeat_last {
            self.heartbeat_last = new_low_mark;
        }
        self.fragments.retain(|s, _| *s > new_low_mark);
        self.advance_low_mark();
        u32::try_from(lost).unwrap_or(u32::MAX)
    }

    /// Apply a HEARTBEAT. `None` when the count is not newer than the last one.
    pub fn process_heartbeat(
        &mut self,
        count: u32,
        first: SequenceNumber,
        last: SequenceNumber,
        final_flag: bool,
        liveliness_flag: bool,
    ) -> Option<HeartbeatOutcome> {
        if count <= self.last_heartbeat_count {
            log::trace!(
                "[WriterProxy] {} stale heartbeat count {} (last {})",
                self.data.guid,
                count,
                self.last_heartbeat_count
            );
            return None;
        }
        self.last_heartbeat_count = count;
        if liveliness_flag {
            self.assert_liveliness();
        }

        let lost = self.lost_changes_update(first);
        let lost = if self.received_at_least_one_heartbeat { lost } else { 0 };
        self.received_at_least_one_heartbeat = true;
        self.missing_changes_update(last);
        self.heartbeat_final_flag = final_flag;

        let send_acknack = !final_flag || (!liveliness_flag && self.are_there_missing_changes());
        Some(HeartbeatOutcome {
            send_acknack,
            assert_liveliness: liveliness_flag,
            lost,
        })
    }

    pub fn heartbeat_final_flag(&self) -> bool {
        self.heartbeat_final_flag
    }

    pub fn received_at_least_one_heartbeat(&self) -> bool {
        self.received_at_least_one_heartbeat
    }

    pub fn are_there_missing_changes(&self) -> bool {
        self.unresolved_up_to(self.max_sequence_number) > 0
    }

    fn unresolved_up_to(&self, last: SequenceNumber) -> u64 {
        let last = last.min(self.max_sequence_number);
        let Some(span) = last.distance_from(self.changes_from_writer_low_mark) else {
            return 0;
        };
        span.saturating_sub(self.received_between(self.changes_from_writer_low_mark.next(), last))
    }

    /// Unresolved changes strictly below `seq`.
    pub fn unknown_missing_changes_up_to(&self, seq: SequenceNumber) -> u32 {
        u32::try_from(self.unresolved_up_to(seq.prev())).unwrap_or(u32::MAX)
    }

    /// Numbers tracked between the low mark and the highest known one.
    pub fn number_of_changes_from_writer(&self) -> u64 {
        self.max_sequence_number
            .distance_from(self.changes_from_writer_low_mark)
            .unwrap_or(0)
    }

    /// ACKNACK set: unresolved numbers (unknown included) within one bitmap
    /// window above the low mark.
    pub fn missing_changes(&self) -> SequenceNumberSet {
        let base = self.changes_from_writer_low_mark.next();
        let mut set = SequenceNumberSet::new(base);
        let mut seq = base;
        while seq <= self.max_sequence_number {
            if !self.received.contains_key(&seq) && !set.add(seq) {
                break;
            }
            seq = seq.next();
        }
        set
    }

    /// Next received relevant change not yet notified to the application.
    pub fn next_cache_change_to_be_notified(&mut self) -> Option<SequenceNumber> {
        if self.last_notified >= self.changes_from_writer_low_mark {
            return None;
        }
        let next = self
            .received
            .range(self.last_notified.next()..=self.changes_from_writer_low_mark)
            .find(|(_, relevant)| **relevant)
            .map(|(seq, _)| *seq);
        match next {
            Some(seq) => self.last_notified = seq,
            None => {
                if self.changes_from_writer_low_mark > self.last_notified {
                    self.last_notified = self.changes_from_writer_low_mark;
                }
            }
        }
        next
    }

    pub fn last_notified(&self) -> SequenceNumber {
        self.last_notified
    }

    /// Forget resolved entries up to `seq` (bounded by the low mark).
    pub fn remove_changes_from_writer_up_to(&mut self, seq: SequenceNumber) {
        let up_to = seq.min(self.changes_from_writer_low_mark);
        if up_to <= self.trimmed_up_to {
            return;
        }
        self.received = self.received.split_off(&up_to.next());
        self.trimmed_up_to = up_to;
    }

    pub fn next_acknack_count(&mut self) -> u32 {
        self.acknack_count = self.acknack_count.wrapping_add(1);
        self.acknack_count
    }

    pub fn next_nackfrag_count(&mut self) -> u32 {
        self.nackfrag_count = self.nackfrag_count.wrapping_add(1);
        self.nackfrag_count
    }

    /// Reassembly slot for a fragmented change, created on first fragment.
    ///
    /// `None` when the change is already known or the announced geometry
    /// breaks `limits`. A new slot beyond `limits.max_pending` evicts the
    /// least recently updated one; the evicted change is requested again
    /// as a whole through ACKNACK.
    pub fn fragment_assembly(
        &mut self,
        seq: SequenceNumber,
        sample_size: u32,
        fragment_size: u16,
        limits: FragmentLimits,
    ) -> Option<&mut FragmentAssembly> {
        if seq <= self.changes_from_writer_low_mark || self.received.contains_key(&seq) {
            return None;
        }
        let restart = match self.fragments.get(&seq) {
            Some(slot) => slot.sample_size() != sample_size || slot.fragment_size() != fragment_size,
            None => true,
        };
        if restart {
            let assembly = match FragmentAssembly::new(sample_size, fragment_size, limits.max_sample_size) {
                Ok(assembly) => assembly,
                Err(e) => {
                    log::warn!(
                        "[WriterProxy] {} dropping DATA_FRAG {}: {}",
                        self.data.guid,
                        seq,
                        e
                    );
                    return None;
                }
            };
            if self.fragments.contains_key(&seq) {
                log::debug!(
                    "[WriterProxy] {} fragment geometry changed for {}, restarting",
                    self.data.guid,
                    seq
                );
            } else {
                self.evict_fragments(limits.max_pending.saturating_sub(1));
            }
            self.fragments.insert(seq, assembly);
        }
        self.fragments.get_mut(&seq)
    }

    /// Drop least recently updated slots until at most `keep` remain.
    fn evict_fragments(&mut self, keep: usize) {
        while self.fragments.len() > keep {
            let Some(oldest) = self
                .fragments
                .iter()
                .min_by_key(|(_, f)| f.last_updated())
                .map(|(seq, _)| *seq)
            else {
                break;
            };
            log::debug!(
                "[WriterProxy] {} evicting partial change {} ({} pending)",
                self.data.guid,
                oldest,
                self.fragments.len()
            );
            self.fragments.remove(&oldest);
        }
    }

    /// Payload bytes held by partial changes.
    pub fn pending_fragment_bytes(&self) -> usize {
        self.fragments.values().map(FragmentAssembly::buffered_bytes).sum()
    }

    /// Partially received changes, excluded from the ACKNACK set in favour
    /// of NACK_FRAG.
    pub fn partial_changes(&self) -> impl Iterator<Item = (SequenceNumber, &FragmentAssembly)> {
        self.fragments.iter().map(|(seq, f)| (*seq, f))
    }

    pub fn has_partial(&self, seq: SequenceNumber) -> bool {
        self.fragments.contains_key(&seq)
    }

    /// Detach a fully reassembled change from its slot.
    pub fn take_complete(&mut self, seq: SequenceNumber) -> Option<FragmentAssembly> {
        if !self.fragments.get(&seq)?.is_complete() {
            return None;
        }
        self.fragments.remove(&seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::guid::{EntityId, GuidPrefix};

    fn sn(v: i64) -> SequenceNumber {
        SequenceNumber::from(v)
    }

    fn proxy() -> WriterProxy {
        let data = WriterProxyData {
            guid: Guid::new(GuidPrefix([4; 12]), EntityId::user_writer(1)),
            ..Default::default()
        };
        WriterProxy::new(data, SequenceNumber::ZERO)
    }

    fn set(base: i64, members: &[i64]) -> SequenceNumberSet {
        SequenceNumberSet::from_sequences(sn(base), members.iter().map(|m| sn(*m)))
            .expect("members inside window")
    }

    #[test]
    fn test_pending_fragment_slots_are_capped() {
        let mut wp = proxy();
        let limits = FragmentLimits {
            max_pending: 4,
            max_sample_size: 1 << 20,
        };
        for seq in 1..=10 {
            let slot = wp
                .fragment_assembly(sn(seq), 1 << 20, 1000, limits)
                .expect("slot within limits");
            slot.add_fragments(1, 1, &[0; 1000]).expect("fragment");
        }
        let pending: Vec<i64> = wp.partial_changes().map(|(s, _)| s.value()).collect();
        assert_eq!(pending, vec![7, 8, 9, 10]);
        assert_eq!(wp.pending_fragment_bytes(), 4 * 1000);
    }

    #[test]
    fn test_fragment_geometry_outside_limits_is_dropped() {
        let mut wp = proxy();
        let limits = FragmentLimits {
            max_pending: 4,
            max_sample_size: 4096,
        };
        assert!(wp.fragment_assembly(sn(1), 4097, 1024, limits).is_none());
        assert!(wp.fragment_assembly(sn(1), 4096, 0, limits).is_none());
        assert_eq!(wp.partial_changes().count(), 0);
        assert!(wp.fragment_assembly(sn(1), 4096, 1024, limits).is_some());
    }

    #[test]
    fn test_missing_changes_update_sequence() {
        let mut wp = proxy();
        let mut count = 0;
        let mut hb = |wp: &mut WriterProxy, first: i64, last: i64| {
            count += 1;
            wp.process_heartbeat(count, sn(first), sn(last), false, false)
                .expect("fresh heartbeat count")
        };

        let out = hb(&mut wp, 1, 1);
        assert_eq!(wp.missing_changes(), set(1, &[1]));
        assert_eq!(wp.available_changes_max(), SequenceNumber::ZERO);
        assert_eq!(wp.unknown_missing_changes_up_to(sn(1)), 0);
        assert_eq!(wp.unknown_missing_changes_up_to(sn(2)), 1);
        assert_eq!(out.lost, 0);
        assert!(out.send_acknack);

        hb(&mut wp, 1, 3);
        assert_eq!(wp.missing_changes(), set(1, &[1, 2, 3]));
        assert_eq!(wp.unknown_missing_changes_up_to(sn(4)), 3);

        assert!(wp.received_change_set(sn(6)));
        assert_eq!(wp.missing_changes(), set(1, &[1, 2, 3, 4, 5]));
        assert_eq!(wp.status_of(sn(3)), Some(ChangeFromWriterStatus::Missing));
        assert_eq!(wp.status_of(sn(4)), Some(ChangeFromWriterStatus::Unknown));
        assert_eq!(wp.unknown_missing_changes_up_to(sn(6)), 5);
        assert_eq!(wp.unknown_missing_changes_up_to(sn(7)), 5);

        hb(&mut wp, 1, 7);
        assert_eq!(wp.unknown_missing_changes_up_to(sn(8)), 6);

        for i in 1..=5 {
            assert!(wp.received_change_set(sn(i)));
        }
        assert_eq!(wp.missing_changes(), set(7, &[7]));
        assert_eq!(wp.available_changes_max(), sn(6));

        let out = hb(&mut wp, 1, 4);
        assert_eq!(wp.missing_changes(), set(7, &[7]));
        assert_eq!(out.lost, 0);

        wp.received_change_set(sn(8));
        wp.received_change_set(sn(10));
        assert_eq!(wp.missing_changes(), set(7, &[7, 9]));
        assert_eq!(wp.number_of_changes_from_writer(), 4);
        assert_eq!(wp.unknown_missing_changes_up_to(sn(9)), 1);
        assert_eq!(wp.unknown_missing_changes_up_to(sn(11)), 2);

        let out = hb(&mut wp, 11, 0);
        assert_eq!(wp.available_changes_max(), sn(10));
        assert_eq!(out.lost, 2);
    }

    #[test]
    fn test_lost_changes_update_sequence() {
        let mut wp = proxy();
        let out = wp
            .process_heartbeat(1, sn(3), sn(3), false, false)
            .expect("fresh");
        assert_eq!(wp.missing_changes(), set(3, &[3]));
        assert_eq!(wp.available_changes_max(), sn(2));
        assert_eq!(wp.number_of_changes_from_writer(), 1);
        assert_eq!(out.lost, 0, "late joiner: nothing counted as lost");

        wp.received_change_set(sn(5));
        let out = wp
            .process_heartbeat(2, sn(5), sn(5), false, false)
            .expect("fresh");
        assert!(wp.missing_changes().is_empty());
        assert_eq!(wp.available_changes_max(), sn(5));
        assert_eq!(wp.number_of_changes_from_writer(), 0);
        assert_eq!(out.lost, 2);

        let out = wp
            .process_heartbeat(3, sn(4), sn(5), false, false)
            .expect("fresh");
        assert_eq!(out.lost, 0);
        assert_eq!(wp.available_changes_max(), sn(5));

        wp.received_change_set(sn(7));
        assert_eq!(wp.missing_changes(), set(6, &[6]));
        assert_eq!(wp.number_of_changes_from_writer(), 2);

        let out = wp
            .process_heartbeat(4, sn(8), sn(8), false, false)
            .expect("fresh");
        assert_eq!(wp.missing_changes(), set(8, &[8]));
        assert_eq!(wp.available_changes_max(), sn(7));
        assert_eq!(out.lost, 1);

        let out = wp
            .process_heartbeat(5, sn(10), sn(10), false, false)
            .expect("fresh");
        assert_eq!(wp.missing_changes(), set(10, &[10]));
        assert_eq!(wp.available_changes_max(), sn(9));
        assert_eq!(out.lost, 2);
    }

    #[test]
    fn test_received_out_of_order_and_duplicates() {
        let mut wp = proxy();
        assert!(wp.received_change_set(sn(3)));
        assert_eq!(wp.missing_changes(), set(1, &[1, 2]));
        assert_eq!(wp.number_of_changes_from_writer(), 3);
        assert!(wp.are_there_missing_changes());
        assert_eq!(wp.unknown_missing_changes_up_to(sn(4)), 2);

        assert!(wp.received_change_set(sn(6)));
        assert_eq!(wp.unknown_missing_changes_up_to(sn(7)), 4);

        assert!(wp.received_change_set(sn(2)));
        assert!(!wp.received_change_set(sn(2)), "duplicate");
        assert!(wp.received_change_set(sn(1)));
        assert_eq!(wp.available_changes_max(), sn(3));
        assert!(wp.change_was_received(sn(3)));
    }

    #[test]
    fn test_gap_counts_toward_contiguity_but_is_not_notified() {
        let mut wp = proxy();
        wp.received_change_set(sn(1));
        wp.irrelevant_change_set(sn(2));
        wp.received_change_set(sn(3));
        assert_eq!(wp.available_changes_max(), sn(3));
        assert!(!wp.is_relevant(sn(2)));

        assert_eq!(wp.next_cache_change_to_be_notified(), Some(sn(1)));
        assert_eq!(wp.next_cache_change_to_be_notified(), Some(sn(3)));
        assert_eq!(wp.next_cache_change_to_be_notified(), None);
    }

    #[test]
    fn test_watermark_never_passes_missing() {
        let mut rng = fastrand::Rng::with_seed(42);
        let mut wp = proxy();
        let mut got = std::collections::BTreeSet::new();
        for _ in 0..300 {
            let seq = rng.i64(1..60);
            wp.received_change_set(sn(seq));
            got.insert(seq);
            let max = wp.available_changes_max().value();
            for s in 1..=max {
                assert!(got.contains(&s), "watermark {} passed missing {}", max, s);
            }
        }
    }

    #[test]
    fn test_stale_heartbeat_ignored() {
        let mut wp = proxy();
        assert!(wp.process_heartbeat(2, sn(1), sn(3), true, false).is_some());
        assert!(wp.process_heartbeat(2, sn(1), sn(9), true, false).is_none());
        assert!(wp.process_heartbeat(1, sn(1), sn(9), true, false).is_none());
        assert_eq!(wp.missing_changes(), set(1, &[1, 2, 3]));
    }

    #[test]
    fn test_final_heartbeat_without_missing_needs_no_ack() {
        let mut wp = proxy();
        wp.received_change_set(sn(1));
        let out = wp
            .process_heartbeat(1, sn(1), sn(1), true, false)
            .expect("fresh");
        assert!(!out.send_acknack);
        let out = wp
            .process_heartbeat(2, sn(1), sn(2), true, false)
            .expect("fresh");
        assert!(out.send_acknack);
    }

    #[test]
    fn test_trim_resolved_prefix() {
        let mut wp = proxy();
        for i in 1..=4 {
            wp.received_change_set(sn(i));
        }
        wp.received_change_set(sn(6));
        wp.remove_changes_from_writer_up_to(sn(10));
        assert_eq!(wp.status_of(sn(3)), None);
        assert_eq!(wp.status_of(sn(6)), Some(ChangeFromWriterStatus::Received));
        assert_eq!(wp.available_changes_min(), sn(5));
        assert!(wp.change_was_received(sn(2)));
    }

    #[test]
    fn test_status_transitions() {
        use ChangeFromWriterStatus::*;
        assert_eq!(Unknown.announced(), Missing);
        assert_eq!(Received.announced(), Received);
        assert_eq!(Missing.trimmed_by_writer(), Lost);
        assert_eq!(Received.trimmed_by_writer(), Received);
        assert!(Lost.is_resolved());
        assert!(!Missing.is_resolved());
    }
}
